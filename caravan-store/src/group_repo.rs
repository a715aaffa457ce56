use crate::backend;
use async_trait::async_trait;
use caravan_core::StoreError;
use caravan_pooling::{
    GroupAggregate, GroupFilter, GroupStatus, GroupStore, GroupTx, Member, MemberStatus,
    PaymentOutcome, PoolGroup,
};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

const GROUP_COLUMNS: &str = "id, trip_id, creator_id, group_size, current_size, status, \
     selected_package_id, per_person_cost, payment_deadline, created_at, updated_at, locked_at";

const MEMBER_COLUMNS: &str = "id, group_id, user_id, status, payment_status, amount_paid, \
     payment_id, joined_at, paid_at, package_approved_at, updated_at";

#[derive(sqlx::FromRow)]
struct GroupRow {
    id: Uuid,
    trip_id: Uuid,
    creator_id: String,
    group_size: i32,
    current_size: i32,
    status: String,
    selected_package_id: Option<String>,
    per_person_cost: Option<i64>,
    payment_deadline: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    locked_at: Option<DateTime<Utc>>,
}

impl TryFrom<GroupRow> for PoolGroup {
    type Error = StoreError;

    fn try_from(row: GroupRow) -> Result<Self, Self::Error> {
        let status = GroupStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("group {} has status {}", row.id, row.status))
        })?;
        Ok(PoolGroup {
            id: row.id,
            trip_id: row.trip_id,
            creator_id: row.creator_id,
            group_size: to_u32(row.group_size)?,
            current_size: to_u32(row.current_size)?,
            status,
            selected_package_id: row.selected_package_id,
            per_person_cost: row.per_person_cost,
            payment_deadline: row.payment_deadline,
            created_at: row.created_at,
            updated_at: row.updated_at,
            locked_at: row.locked_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    id: Uuid,
    group_id: Uuid,
    user_id: String,
    status: String,
    payment_status: Option<String>,
    amount_paid: i64,
    payment_id: Option<String>,
    joined_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    package_approved_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for Member {
    type Error = StoreError;

    fn try_from(row: MemberRow) -> Result<Self, Self::Error> {
        let status = MemberStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("member {} has status {}", row.id, row.status))
        })?;
        let payment_status = match row.payment_status.as_deref() {
            None => None,
            Some(raw) => Some(PaymentOutcome::parse(raw).ok_or_else(|| {
                StoreError::Corrupt(format!("member {} has payment status {}", row.id, raw))
            })?),
        };
        Ok(Member {
            id: row.id,
            group_id: row.group_id,
            user_id: row.user_id,
            status,
            payment_status,
            amount_paid: row.amount_paid,
            payment_id: row.payment_id,
            joined_at: row.joined_at,
            paid_at: row.paid_at,
            package_approved_at: row.package_approved_at,
            updated_at: row.updated_at,
        })
    }
}

fn to_u32(value: i32) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative size {}", value)))
}

fn to_i32(value: u32) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("size {} out of range", value)))
}

/// PostgreSQL pool groups. A group transaction locks the group row with `FOR UPDATE`.
#[derive(Clone)]
pub struct PgGroupStore {
    pool: PgPool,
}

impl PgGroupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn members(
        executor: impl sqlx::PgExecutor<'_>,
        group_id: Uuid,
    ) -> Result<Vec<Member>, StoreError> {
        sqlx::query_as::<_, MemberRow>(&format!(
            "SELECT {} FROM pool_members WHERE group_id = $1 ORDER BY joined_at, id",
            MEMBER_COLUMNS
        ))
        .bind(group_id)
        .fetch_all(executor)
        .await
        .map_err(backend)?
        .into_iter()
        .map(Member::try_from)
        .collect()
    }
}

#[async_trait]
impl GroupStore for PgGroupStore {
    async fn insert(&self, group: &PoolGroup) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO pool_groups ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            GROUP_COLUMNS
        ))
        .bind(group.id)
        .bind(group.trip_id)
        .bind(&group.creator_id)
        .bind(to_i32(group.group_size)?)
        .bind(to_i32(group.current_size)?)
        .bind(group.status.as_str())
        .bind(&group.selected_package_id)
        .bind(group.per_person_cost)
        .bind(group.payment_deadline)
        .bind(group.created_at)
        .bind(group.updated_at)
        .bind(group.locked_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn begin(&self, group_id: Uuid) -> Result<Option<Box<dyn GroupTx>>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {} FROM pool_groups WHERE id = $1 FOR UPDATE",
            GROUP_COLUMNS
        ))
        .bind(group_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;
        let Some(row) = row else {
            return Ok(None);
        };

        let group = PoolGroup::try_from(row)?;
        let members = Self::members(&mut *tx, group_id).await?;
        let original = GroupAggregate { group, members };

        Ok(Some(Box::new(PgGroupTx {
            tx,
            working: original.clone(),
            original,
            deleted: false,
        })))
    }

    async fn load(&self, group_id: Uuid) -> Result<Option<GroupAggregate>, StoreError> {
        let row = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {} FROM pool_groups WHERE id = $1",
            GROUP_COLUMNS
        ))
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => Ok(Some(GroupAggregate {
                group: PoolGroup::try_from(row)?,
                members: Self::members(&self.pool, group_id).await?,
            })),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &GroupFilter) -> Result<Vec<PoolGroup>, StoreError> {
        sqlx::query_as::<_, GroupRow>(&format!(
            r#"
            SELECT {} FROM pool_groups g
            WHERE ($1::uuid IS NULL OR g.trip_id = $1)
              AND ($2::text IS NULL OR g.status = $2)
              AND ($3::text IS NULL
                   OR g.creator_id = $3
                   OR EXISTS (
                       SELECT 1 FROM pool_members m
                       WHERE m.group_id = g.id
                         AND m.user_id = $3
                         AND m.status NOT IN ('REJECTED', 'CANCELLED')))
            ORDER BY g.created_at DESC, g.id DESC
            "#,
            GROUP_COLUMNS
        ))
        .bind(filter.trip_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.involving_user.as_deref())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?
        .into_iter()
        .map(PoolGroup::try_from)
        .collect()
    }

    async fn locate_member(&self, member_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        sqlx::query_scalar::<_, Uuid>("SELECT group_id FROM pool_members WHERE id = $1")
            .bind(member_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }
}

struct PgGroupTx {
    tx: Transaction<'static, Postgres>,
    original: GroupAggregate,
    working: GroupAggregate,
    deleted: bool,
}

#[async_trait]
impl GroupTx for PgGroupTx {
    fn aggregate(&mut self) -> &mut GroupAggregate {
        &mut self.working
    }

    fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let PgGroupTx {
            mut tx,
            original,
            working,
            deleted,
        } = *self;
        let group = &working.group;

        if deleted {
            sqlx::query("DELETE FROM pool_groups WHERE id = $1")
                .bind(group.id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            tx.commit().await.map_err(backend)?;
            debug!(group_id = %group.id, "group row deleted");
            return Ok(());
        }

        if *group != original.group {
            sqlx::query(
                r#"
                UPDATE pool_groups
                SET current_size = $2, status = $3, selected_package_id = $4, per_person_cost = $5,
                    payment_deadline = $6, updated_at = $7, locked_at = $8
                WHERE id = $1
                "#,
            )
            .bind(group.id)
            .bind(to_i32(group.current_size)?)
            .bind(group.status.as_str())
            .bind(&group.selected_package_id)
            .bind(group.per_person_cost)
            .bind(group.payment_deadline)
            .bind(group.updated_at)
            .bind(group.locked_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        let mut member_writes = 0;
        for member in &working.members {
            if original.members.iter().any(|m| m == member) {
                continue;
            }
            sqlx::query(&format!(
                r#"
                INSERT INTO pool_members ({})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO UPDATE
                SET status = EXCLUDED.status,
                    payment_status = EXCLUDED.payment_status,
                    amount_paid = EXCLUDED.amount_paid,
                    payment_id = EXCLUDED.payment_id,
                    paid_at = EXCLUDED.paid_at,
                    package_approved_at = EXCLUDED.package_approved_at,
                    updated_at = EXCLUDED.updated_at
                "#,
                MEMBER_COLUMNS
            ))
            .bind(member.id)
            .bind(member.group_id)
            .bind(&member.user_id)
            .bind(member.status.as_str())
            .bind(member.payment_status.map(|p| p.as_str()))
            .bind(member.amount_paid)
            .bind(&member.payment_id)
            .bind(member.joined_at)
            .bind(member.paid_at)
            .bind(member.package_approved_at)
            .bind(member.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
            member_writes += 1;
        }

        tx.commit().await.map_err(backend)?;
        debug!(group_id = %group.id, members = member_writes, "group committed");
        Ok(())
    }
}
