//! satsflow: the intent runtime behind a chat-driven Lightning wallet bot.
//!
//! A chat action (inline send, faucet, invoice payment, LNURL flow) is turned
//! into a persisted [`intent`] that a later, possibly concurrent trigger
//! consumes. The runtime guarantees that each intent is consumed at most once,
//! that money only moves through the [`transaction`] executor, and that every
//! payment attempt leaves an audit record.
//!
//! Background settlement watching lives in [`runtime::RetryPoller`].

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod flows;
pub mod intent;
pub mod notify;
pub mod observability;
pub mod runtime;
pub mod settings;
pub mod transaction;
pub mod wallet;

pub use config::Config;
pub use error::{Error, Result};
