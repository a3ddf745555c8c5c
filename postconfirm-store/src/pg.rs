use std::collections::BTreeSet;

use async_trait::async_trait;
use regex::Regex;
use sqlx::{PgPool, Row};
use tracing::{instrument, warn};

use postconfirm_types::{Action, Address, ChallengePolicy, PatternRecord, SenderState, StashEntry};

use crate::{encode_refs, merge_refs, parse_refs, policy_from_str, record_source_of, Store, StoreError};

/// Postgres-backed [`Store`], opened once at startup and shared across
/// every milter session (§5: "a connection pool to the backing store —
/// opened once, shared").
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> PgStore {
        PgStore { pool }
    }

    async fn lookup_sender_table(
        &self,
        table: &str,
        addr: &Address,
    ) -> Result<Option<(Action, BTreeSet<String>)>, StoreError> {
        let query = format!(
            "SELECT action, ref FROM {} WHERE sender = $1 AND type = 'E'",
            table
        );
        let row = sqlx::query(&query)
            .bind(addr.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            let action: String = r.get("action");
            let refs: Option<String> = r.get("ref");
            (
                action.parse::<Action>().unwrap_or(Action::Unknown),
                parse_refs(refs.as_deref()),
            )
        }))
    }

    async fn patterns_from_table(&self, table: &str, is_static: bool) -> Result<Vec<PatternRecord>, StoreError> {
        let query = format!("SELECT sender, action FROM {} WHERE type = 'P'", table);
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let pattern_str: String = r.get("sender");
            let action: String = r.get("action");
            let pattern = Regex::new(&format!("(?i)^{}$", pattern_str))?;
            out.push(PatternRecord {
                pattern,
                action: action.parse::<Action>().unwrap_or(Action::Unknown),
                source: record_source_of(is_static),
            });
        }
        Ok(out)
    }

    async fn drain_table(&self, table: &str, addr: &Address) -> Result<Vec<StashEntry>, StoreError> {
        let query = format!(
            "SELECT id, recipients, message, created FROM {} WHERE sender = $1 ORDER BY id",
            table
        );
        let rows = sqlx::query(&query).bind(addr.as_str()).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let id: i64 = r.get("id");
            let recipients_json: String = r.get("recipients");
            let message: String = r.get("message");
            let created: chrono::DateTime<chrono::Utc> = r.get("created");
            let recipients: Vec<Address> = serde_json::from_str::<Vec<String>>(&recipients_json)
                .unwrap_or_default()
                .into_iter()
                .map(|s| Address::new(&s))
                .collect();

            // Delete this row, via its own statement, before moving on
            // to the next: the deletion must be durable before the
            // caller is handed the next entry.
            let delete_query = format!("DELETE FROM {} WHERE id = $1", table);
            sqlx::query(&delete_query).bind(id).execute(&self.pool).await?;

            out.push(StashEntry {
                id,
                sender: addr.clone(),
                recipients,
                message: message.into_bytes(),
                created,
            });
        }
        Ok(out)
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self), fields(sender = %addr))]
    async fn get_sender(&self, addr: &Address) -> Result<Option<SenderState>, StoreError> {
        let runtime = self.lookup_sender_table("senders", addr).await?;
        let r#static = self.lookup_sender_table("senders_static", addr).await?;

        Ok(match (runtime, r#static) {
            (None, None) => None,
            (Some((action, refs)), None) | (None, Some((action, refs))) => {
                Some(SenderState { action, references: refs })
            }
            (Some((action, refs_rt)), Some((_, refs_static))) => Some(SenderState {
                action,
                references: merge_refs(refs_rt, refs_static),
            }),
        })
    }

    #[instrument(skip(self))]
    async fn list_patterns(&self) -> Result<Vec<PatternRecord>, StoreError> {
        let mut out = self.patterns_from_table("senders", false).await?;
        out.extend(self.patterns_from_table("senders_static", true).await?);
        Ok(out)
    }

    #[instrument(skip(self, refs), fields(sender = %addr, action = %action))]
    async fn upsert_sender(&self, addr: &Address, action: Action, refs: &BTreeSet<String>) -> Result<(), StoreError> {
        let ref_json = encode_refs(refs);
        sqlx::query(
            "INSERT INTO senders (sender, action, ref, type, source) \
             VALUES ($1, $2, $3, 'E', 'runtime') \
             ON CONFLICT (sender) DO UPDATE SET action = $2, ref = $3",
        )
        .bind(addr.as_str())
        .bind(action.as_str())
        .bind(ref_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, message), fields(sender = %addr, recipients = recipients.len()))]
    async fn stash(&self, addr: &Address, recipients: &[Address], message: &[u8]) -> Result<i64, StoreError> {
        let recipients_json =
            serde_json::to_string(&recipients.iter().map(Address::as_str).collect::<Vec<_>>())
                .expect("a slice of &str always serialises");
        let message_text = String::from_utf8_lossy(message).into_owned();

        let row = sqlx::query(
            "INSERT INTO stash (sender, recipients, message) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(addr.as_str())
        .bind(recipients_json)
        .bind(message_text)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    #[instrument(skip(self), fields(sender = %addr))]
    async fn drain_stash(&self, addr: &Address) -> Result<Vec<StashEntry>, StoreError> {
        let mut out = self.drain_table("stash", addr).await?;
        out.extend(self.drain_table("stash_static", addr).await?);
        if !out.is_empty() {
            warn!(count = out.len(), "draining stash");
        }
        Ok(out)
    }

    async fn get_challenge_rule(&self, addr: &Address) -> Result<Option<ChallengePolicy>, StoreError> {
        let row = sqlx::query(
            "SELECT action_to_take FROM challenges WHERE challenge = $1 AND challenge_type = 'E'",
        )
        .bind(addr.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| policy_from_str(r.get::<String, _>("action_to_take").as_str())))
    }

    async fn list_challenge_patterns(&self) -> Result<Vec<(Regex, ChallengePolicy)>, StoreError> {
        let rows = sqlx::query(
            "SELECT challenge, action_to_take FROM challenges WHERE challenge_type = 'P'",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            let pattern_str: String = r.get("challenge");
            let action_to_take: String = r.get("action_to_take");
            out.push((
                Regex::new(&format!("(?i)^{}$", pattern_str))?,
                policy_from_str(&action_to_take),
            ));
        }
        Ok(out)
    }
}
