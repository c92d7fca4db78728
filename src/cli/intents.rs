//! `satsflow intents` and `satsflow transactions`: read-only inspection plus
//! expiry cleanup of the intent table.

use std::sync::Arc;

use chrono::Utc;
use clap::Subcommand;

use crate::config::Config;
use crate::db::{Database, IntentBackend, StoredIntent, TransactionLog};
use crate::transaction::TransactionRecord;

#[derive(Subcommand, Debug, Clone)]
pub enum IntentsCommand {
    /// Print one stored intent as JSON.
    Show { id: String },
    /// Most recently updated intents.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Delete every expired intent.
    Purge,
}

pub async fn run_intents_command(config: &Config, command: IntentsCommand) -> anyhow::Result<()> {
    let db = crate::db::connect(&config.database).await?;
    match command {
        IntentsCommand::Show { id } => println!("{}", show_intent(&db, &id).await?),
        IntentsCommand::List { limit } => {
            let intents = db.list_intents(limit).await?;
            if intents.is_empty() {
                println!("No intents stored.");
            }
            for intent in &intents {
                println!("{}", intent_line(intent));
            }
        }
        IntentsCommand::Purge => {
            let purged = db.purge_expired_intents(Utc::now()).await?;
            tracing::info!(purged, "Expired intents purged");
            println!("Purged {purged} expired intent(s).");
        }
    }
    Ok(())
}

pub async fn run_transactions_command(
    config: &Config,
    user_id: i64,
    limit: usize,
) -> anyhow::Result<()> {
    let db = crate::db::connect(&config.database).await?;
    let records = db.list_transactions(user_id, limit).await?;
    if records.is_empty() {
        println!("No transactions for user {user_id}.");
    }
    for record in &records {
        println!("{}", transaction_line(record));
    }
    Ok(())
}

/// Record metadata plus the decoded payload.
async fn show_intent(db: &Arc<dyn Database>, id: &str) -> anyhow::Result<String> {
    let Some(stored) = db.get_intent(id).await? else {
        anyhow::bail!("intent {id} not found");
    };
    let payload: serde_json::Value = serde_json::from_str(&stored.payload)?;
    let view = serde_json::json!({
        "id": stored.id,
        "kind": stored.kind,
        "active": stored.active,
        "canceled": stored.canceled,
        "expired": stored.is_expired(Utc::now()),
        "created_at": stored.created_at,
        "updated_at": stored.updated_at,
        "expires_at": stored.expires_at,
        "payload": payload,
    });
    Ok(serde_json::to_string_pretty(&view)?)
}

fn intent_line(intent: &StoredIntent) -> String {
    let state = match (intent.active, intent.canceled) {
        (true, _) => "active",
        (false, true) => "canceled",
        (false, false) => "done",
    };
    format!(
        "{}  {:<14} {:<8} updated {}",
        intent.id,
        intent.kind,
        state,
        intent.updated_at.format("%Y-%m-%d %H:%M:%S")
    )
}

fn transaction_line(record: &TransactionRecord) -> String {
    let to = record
        .to
        .as_ref()
        .map(|to| to.label.as_str())
        .unwrap_or("external");
    let status = if record.success { "ok" } else { "FAILED" };
    let mut line = format!(
        "{}  {:<14} {} -> {}  {} sat  {}",
        record.time.format("%Y-%m-%d %H:%M:%S"),
        record.kind,
        record.from.label,
        to,
        record.amount,
        status
    );
    if let Some(error) = &record.error {
        line.push_str(&format!(" ({error})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryBackend;
    use crate::transaction::Participant;
    use chrono::Duration;

    fn stored(id: &str, active: bool, canceled: bool) -> StoredIntent {
        let now = Utc::now();
        StoredIntent {
            id: id.to_string(),
            kind: "faucet".to_string(),
            active,
            canceled,
            payload: r#"{"per_user":10}"#.to_string(),
            created_at: now,
            updated_at: now,
            expires_at: Some(now + Duration::hours(1)),
        }
    }

    #[tokio::test]
    async fn show_includes_decoded_payload() {
        let db: Arc<dyn Database> = Arc::new(MemoryBackend::new());
        db.put_intent(&stored("faucet:abc:30", true, false)).await.unwrap();

        let rendered = show_intent(&db, "faucet:abc:30").await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["kind"], "faucet");
        assert_eq!(value["payload"]["per_user"], 10);
        assert_eq!(value["expired"], false);

        assert!(show_intent(&db, "missing").await.is_err());
    }

    #[test]
    fn intent_line_shows_state() {
        assert!(intent_line(&stored("a", true, false)).contains("active"));
        assert!(intent_line(&stored("b", false, true)).contains("canceled"));
        assert!(intent_line(&stored("c", false, false)).contains("done"));
    }

    #[test]
    fn transaction_line_marks_failures() {
        let mut record = TransactionRecord::new(
            "pay".to_string(),
            Participant::new(1, "@alice", None),
            None,
            250,
        );
        record.error = Some("no route".to_string());
        let line = transaction_line(&record);
        assert!(line.contains("@alice -> external"));
        assert!(line.contains("250 sat"));
        assert!(line.ends_with("FAILED (no route)"));
    }
}
