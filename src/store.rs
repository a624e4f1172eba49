use crate::boosts::{Boost, Boostagram};
use crate::config;
use crate::error::StoreError;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_PAGE_SIZE: i64 = 25;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    Inserted,
    AlreadyPresent,
}

/// Filters for the boost listing.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct BoostQuery {
    pub page: Option<i64>,
    pub items: Option<i64>,
    /// Only boosts newer than the one with this identifier.
    pub since: Option<String>,
    pub created_at_lt: Option<f64>,
    pub created_at_gt: Option<f64>,
}

impl BoostQuery {
    pub fn limit(&self) -> i64 {
        self.items
            .filter(|items| *items > 0)
            .map_or(DEFAULT_PAGE_SIZE, |items| items.min(MAX_PAGE_SIZE))
    }

    /// Saturates rather than overflowing on absurd page numbers.
    pub fn offset(&self) -> i64 {
        (self.page.unwrap_or(1).max(1) - 1).saturating_mul(self.limit())
    }
}

/// Insert-if-absent persistence keyed by the provider identifier.
#[async_trait]
pub trait BoostStore: Send + Sync {
    async fn upsert(&self, boost: &Boost) -> Result<Upserted, StoreError>;

    async fn list(&self, query: &BoostQuery) -> Result<Vec<Boost>, StoreError>;
}

/// The boostagram blob as stored. Serialization problems store `null`
/// rather than failing the insert.
pub fn serialize_boostagram(boost: &Boost) -> String {
    match serde_json::to_string(&boost.boostagram) {
        Ok(serialized) => serialized,
        Err(err) => {
            warn!(identifier = %boost.identifier, "failed to serialize boostagram: {}", err);
            "null".to_string()
        }
    }
}

const INSERT_SQL: &str = r#"
INSERT INTO invoices
    (amount, boostagram, comment, created_at, creation_date, description, identifier, payer_name, value,
     action, podcast, episode, app_name, sender_name, message, value_msat_total, feed_id, item_id,
     guid, episode_guid, block_guid, event_guid, remote_feed_guid, remote_item_guid)
VALUES
    ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
ON CONFLICT (identifier) DO NOTHING
"#;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS invoices (
    identifier TEXT NOT NULL UNIQUE,
    amount DOUBLE PRECISION NOT NULL DEFAULT 0,
    value DOUBLE PRECISION NOT NULL DEFAULT 0,
    boostagram TEXT,
    comment TEXT,
    description TEXT,
    payer_name TEXT,
    created_at TEXT NOT NULL DEFAULT '',
    creation_date DOUBLE PRECISION NOT NULL DEFAULT 0,
    action TEXT NOT NULL DEFAULT '',
    podcast TEXT NOT NULL DEFAULT '',
    episode TEXT NOT NULL DEFAULT '',
    app_name TEXT NOT NULL DEFAULT '',
    sender_name TEXT NOT NULL DEFAULT '',
    message TEXT NOT NULL DEFAULT '',
    value_msat_total BIGINT NOT NULL DEFAULT 0,
    feed_id BIGINT,
    item_id BIGINT,
    guid TEXT NOT NULL DEFAULT '',
    episode_guid TEXT NOT NULL DEFAULT '',
    block_guid TEXT NOT NULL DEFAULT '',
    event_guid TEXT NOT NULL DEFAULT '',
    remote_feed_guid TEXT NOT NULL DEFAULT '',
    remote_item_guid TEXT NOT NULL DEFAULT ''
)
"#;

#[derive(Clone, Debug)]
pub struct PgBoostStore {
    pool: PgPool,
}

impl PgBoostStore {
    pub async fn connect(cfg: &config::Database) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&cfg.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BoostStore for PgBoostStore {
    async fn upsert(&self, boost: &Boost) -> Result<Upserted, StoreError> {
        debug!(identifier = %boost.identifier, "inserting boost");

        let blob = serialize_boostagram(boost);
        let bg = boost.parsed_boostagram();

        let result = sqlx::query(INSERT_SQL)
            .bind(boost.amount)
            .bind(blob)
            .bind(&boost.comment)
            .bind(&boost.created_at)
            .bind(boost.creation_date)
            .bind(&boost.description)
            .bind(&boost.identifier)
            .bind(&boost.payer_name)
            .bind(boost.value)
            .bind(&bg.action)
            .bind(&bg.podcast)
            .bind(&bg.episode)
            .bind(&bg.app_name)
            .bind(&bg.sender_name)
            .bind(&bg.message)
            .bind(bg.value_msat_total)
            .bind(bg.feed_id)
            .bind(bg.item_id)
            .bind(&bg.guid)
            .bind(&bg.episode_guid)
            .bind(&bg.block_guid)
            .bind(&bg.event_guid)
            .bind(&bg.remote_feed_guid)
            .bind(&bg.remote_item_guid)
            .execute(&self.pool)
            .await?;

        Ok(if result.rows_affected() > 0 {
            Upserted::Inserted
        } else {
            Upserted::AlreadyPresent
        })
    }

    async fn list(&self, query: &BoostQuery) -> Result<Vec<Boost>, StoreError> {
        let mut qb = list_query(query);
        let rows = qb.build().fetch_all(&self.pool).await?;

        rows.iter().map(boost_from_row).collect()
    }
}

fn list_query(query: &BoostQuery) -> QueryBuilder<'_, Postgres> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "SELECT amount, boostagram, comment, created_at, creation_date, description, identifier, payer_name, value \
         FROM invoices WHERE 1=1",
    );

    if let Some(lt) = query.created_at_lt {
        qb.push(" AND creation_date <= ").push_bind(lt);
    }

    if let Some(gt) = query.created_at_gt {
        qb.push(" AND creation_date >= ").push_bind(gt);
    }

    if let Some(since) = &query.since {
        qb.push(" AND creation_date >= (SELECT MAX(creation_date) FROM invoices WHERE identifier = ")
            .push_bind(since.clone())
            .push(")");
        qb.push(" AND identifier <> ").push_bind(since.clone());
    }

    qb.push(" ORDER BY creation_date DESC LIMIT ")
        .push_bind(query.limit())
        .push(" OFFSET ")
        .push_bind(query.offset());

    qb
}

fn boost_from_row(row: &PgRow) -> Result<Boost, StoreError> {
    let blob: Option<String> = row.try_get("boostagram")?;

    let boostagram = blob
        .and_then(|blob| serde_json::from_str::<Value>(&blob).ok())
        .filter(|value| !value.is_null());

    Ok(Boost {
        amount: row.try_get("amount")?,
        boostagram,
        comment: row.try_get("comment")?,
        created_at: row.try_get("created_at")?,
        creation_date: row.try_get("creation_date")?,
        description: row.try_get("description")?,
        identifier: row.try_get("identifier")?,
        payer_name: row.try_get("payer_name")?,
        value: row.try_get("value")?,
    })
}

/// In-process store with the same first-writer-wins semantics.
#[derive(Default)]
pub struct MemoryBoostStore {
    rows: Mutex<HashMap<String, StoredBoost>>,
}

/// A stored row: the boost as received plus its flattened boostagram columns.
#[derive(Debug, Clone)]
pub struct StoredBoost {
    pub boost: Boost,
    pub blob: String,
    pub boostagram: Boostagram,
}

impl MemoryBoostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, identifier: &str) -> Option<StoredBoost> {
        self.rows.lock().ok()?.get(identifier).cloned()
    }
}

#[async_trait]
impl BoostStore for MemoryBoostStore {
    async fn upsert(&self, boost: &Boost) -> Result<Upserted, StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))?;

        if rows.contains_key(&boost.identifier) {
            return Ok(Upserted::AlreadyPresent);
        }

        rows.insert(
            boost.identifier.clone(),
            StoredBoost {
                boost: boost.clone(),
                blob: serialize_boostagram(boost),
                boostagram: boost.parsed_boostagram(),
            },
        );

        Ok(Upserted::Inserted)
    }

    async fn list(&self, query: &BoostQuery) -> Result<Vec<Boost>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))?;

        let since_date = match &query.since {
            Some(since) => Some(rows.get(since).map(|row| row.boost.creation_date)),
            None => None,
        };

        let mut boosts: Vec<Boost> = rows
            .values()
            .map(|row| &row.boost)
            .filter(|b| query.created_at_lt.map_or(true, |lt| b.creation_date <= lt))
            .filter(|b| query.created_at_gt.map_or(true, |gt| b.creation_date >= gt))
            .filter(|b| match (&query.since, since_date) {
                // unknown identifier: MAX() over no rows is NULL, which matches nothing
                (Some(_), Some(None)) => false,
                (Some(since), Some(Some(date))) => b.creation_date >= date && &b.identifier != since,
                _ => true,
            })
            .cloned()
            .collect();

        boosts.sort_by(|a, b| b.creation_date.total_cmp(&a.creation_date));

        Ok(boosts
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .collect())
    }
}
