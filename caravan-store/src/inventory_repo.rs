use crate::backend;
use async_trait::async_trait;
use caravan_core::StoreError;
use caravan_inventory::{
    ContextKey, Hold, HoldStatus, HoldToken, InventoryStore, InventoryUnit, OwnerRef, Partition,
    PartitionKey, PartitionTx, UnitStatus,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct UnitRow {
    unit_id: String,
    status: String,
    hold_token: Option<String>,
    hold_expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<UnitRow> for InventoryUnit {
    type Error = StoreError;

    fn try_from(row: UnitRow) -> Result<Self, Self::Error> {
        let status = UnitStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("unit {} has status {}", row.unit_id, row.status))
        })?;
        Ok(InventoryUnit {
            unit_id: row.unit_id,
            status,
            hold_token: row.hold_token.map(HoldToken::from),
            hold_expires_at: row.hold_expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HoldRow {
    token: String,
    owner_ref: String,
    unit_ids: Vec<String>,
    status: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
}

impl HoldRow {
    fn into_hold(self, key: &PartitionKey) -> Result<Hold, StoreError> {
        let status = HoldStatus::parse(&self.status).ok_or_else(|| {
            StoreError::Corrupt(format!("hold {} has status {}", self.token, self.status))
        })?;
        Ok(Hold {
            token: HoldToken::from(self.token),
            resource_id: key.resource_id,
            context: key.context,
            owner: OwnerRef::new(self.owner_ref),
            unit_ids: self.unit_ids.into_iter().collect(),
            status,
            created_at: self.created_at,
            expires_at: self.expires_at,
            closed_at: self.closed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PartitionRow {
    resource_id: Uuid,
    context_key: String,
}

impl TryFrom<PartitionRow> for PartitionKey {
    type Error = StoreError;

    fn try_from(row: PartitionRow) -> Result<Self, Self::Error> {
        let context: ContextKey = row
            .context_key
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("context key {}: {}", row.context_key, e)))?;
        Ok(PartitionKey::new(row.resource_id, context))
    }
}

/// PostgreSQL inventory. A partition transaction takes a transaction-scoped advisory lock on
/// the partition key, loads its rows, and writes back only what changed.
#[derive(Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(
        tx: &mut Transaction<'static, Postgres>,
        key: &PartitionKey,
    ) -> Result<Partition, StoreError> {
        let context = key.context.to_string();

        let units = sqlx::query_as::<_, UnitRow>(
            r#"
            SELECT unit_id, status, hold_token, hold_expires_at
            FROM inventory_units
            WHERE resource_id = $1 AND context_key = $2
            "#,
        )
        .bind(key.resource_id)
        .bind(&context)
        .fetch_all(&mut **tx)
        .await
        .map_err(backend)?
        .into_iter()
        .map(InventoryUnit::try_from)
        .collect::<Result<Vec<_>, _>>()?;

        let holds = sqlx::query_as::<_, HoldRow>(
            r#"
            SELECT token, owner_ref, unit_ids, status, created_at, expires_at, closed_at
            FROM holds
            WHERE resource_id = $1 AND context_key = $2
            "#,
        )
        .bind(key.resource_id)
        .bind(&context)
        .fetch_all(&mut **tx)
        .await
        .map_err(backend)?
        .into_iter()
        .map(|row| row.into_hold(key))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Partition::from_parts(key.clone(), units, holds))
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    async fn begin(&self, key: &PartitionKey) -> Result<Box<dyn PartitionTx>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("inventory:{}", key))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        let original = Self::load(&mut tx, key).await?;
        Ok(Box::new(PgPartitionTx {
            tx,
            working: original.clone(),
            original,
        }))
    }

    async fn exists(&self, key: &PartitionKey) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM inventory_units WHERE resource_id = $1 AND context_key = $2
            )
            "#,
        )
        .bind(key.resource_id)
        .bind(key.context.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(backend)
    }

    async fn locate_hold(&self, token: &HoldToken) -> Result<Option<PartitionKey>, StoreError> {
        sqlx::query_as::<_, PartitionRow>(
            "SELECT resource_id, context_key FROM holds WHERE token = $1",
        )
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?
        .map(PartitionKey::try_from)
        .transpose()
    }

    async fn partitions(&self) -> Result<Vec<PartitionKey>, StoreError> {
        // Partitions without holds have nothing to expire or purge.
        sqlx::query_as::<_, PartitionRow>(
            r#"
            SELECT DISTINCT resource_id, context_key
            FROM holds
            ORDER BY resource_id, context_key
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(PartitionKey::try_from)
        .collect()
    }
}

struct PgPartitionTx {
    tx: Transaction<'static, Postgres>,
    original: Partition,
    working: Partition,
}

#[async_trait]
impl PartitionTx for PgPartitionTx {
    fn partition(&mut self) -> &mut Partition {
        &mut self.working
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgPartitionTx {
            mut tx,
            original,
            working,
        } = *self;
        let key = &working.key;
        let context = key.context.to_string();

        let mut unit_writes = 0;
        for unit in working.units.values() {
            if original.units.get(&unit.unit_id) == Some(unit) {
                continue;
            }
            sqlx::query(
                r#"
                INSERT INTO inventory_units (resource_id, context_key, unit_id, status, hold_token, hold_expires_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (resource_id, context_key, unit_id) DO UPDATE
                SET status = EXCLUDED.status,
                    hold_token = EXCLUDED.hold_token,
                    hold_expires_at = EXCLUDED.hold_expires_at
                "#,
            )
            .bind(key.resource_id)
            .bind(&context)
            .bind(&unit.unit_id)
            .bind(unit.status.as_str())
            .bind(unit.hold_token.as_ref().map(HoldToken::as_str))
            .bind(unit.hold_expires_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
            unit_writes += 1;
        }

        for token in original.holds.keys() {
            if !working.holds.contains_key(token) {
                sqlx::query("DELETE FROM holds WHERE token = $1")
                    .bind(token.as_str())
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
            }
        }

        // Closed holds first so the active-owner unique index never sees two live rows.
        let mut changed: Vec<&Hold> = working
            .holds
            .values()
            .filter(|h| original.holds.get(&h.token) != Some(*h))
            .collect();
        changed.sort_by_key(|h| h.status == HoldStatus::Active);

        for hold in &changed {
            let unit_ids: Vec<String> = hold.unit_ids.iter().cloned().collect();
            sqlx::query(
                r#"
                INSERT INTO holds (token, resource_id, context_key, owner_ref, unit_ids, status, created_at, expires_at, closed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (token) DO UPDATE
                SET unit_ids = EXCLUDED.unit_ids,
                    status = EXCLUDED.status,
                    expires_at = EXCLUDED.expires_at,
                    closed_at = EXCLUDED.closed_at
                "#,
            )
            .bind(hold.token.as_str())
            .bind(key.resource_id)
            .bind(&context)
            .bind(hold.owner.as_str())
            .bind(&unit_ids)
            .bind(hold.status.as_str())
            .bind(hold.created_at)
            .bind(hold.expires_at)
            .bind(hold.closed_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        debug!(
            partition = %key,
            units = unit_writes,
            holds = changed.len(),
            "partition committed"
        );
        Ok(())
    }
}
