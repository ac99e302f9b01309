use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, AggregateUpdate, CommandParamsRecord, DomainEventRecord, NewAggregate, RecordId,
    RecordQuery, Result, StoreError, StoredAggregate, Version,
    store::{DurableStore, StoreTransaction, validate_records},
};

const RECORD_COLUMNS: &str = "id, aggregate_type, aggregate_id, aggregate_version, command_type, \
     command_params, event_type, event_data, timestamp, published";

/// PostgreSQL-backed durable store implementation.
#[derive(Clone)]
pub struct PostgresDurableStore {
    pool: PgPool,
}

impl PostgresDurableStore {
    /// Creates a new PostgreSQL durable store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_record(row: PgRow) -> Result<DomainEventRecord> {
        let params_json: serde_json::Value = row.try_get("command_params")?;
        let command_params: CommandParamsRecord = serde_json::from_value(params_json)?;

        Ok(DomainEventRecord {
            id: RecordId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: row.try_get("aggregate_id")?,
            aggregate_version: Version::new(row.try_get("aggregate_version")?),
            command_type: row.try_get("command_type")?,
            command_params,
            event_type: row.try_get("event_type")?,
            event_data: row.try_get("event_data")?,
            timestamp: row.try_get("timestamp")?,
            published: row.try_get("published")?,
        })
    }

    fn row_to_aggregate(row: PgRow) -> Result<StoredAggregate> {
        Ok(StoredAggregate {
            aggregate_type: row.try_get("aggregate_type")?,
            id: AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
            version: Version::new(row.try_get("version")?),
            concurrency_version: row.try_get("concurrency_version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            state: row.try_get("state")?,
        })
    }

    /// Builds the WHERE clause for a record query. Placeholders are numbered
    /// in the order [`bind_record_filter`](Self::bind_record_filter) binds them.
    fn record_filter_sql(query: &RecordQuery) -> String {
        let mut sql = String::from(" WHERE 1=1");
        let mut param_count = 0;

        if query.aggregate_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_type = ${param_count}"));
        }
        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }
        if query.command_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND command_type = ${param_count}"));
        }
        if query.command_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND command_id = ${param_count}"));
        }
        if query.published.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND published = ${param_count}"));
        }

        sql
    }

    fn bind_record_filter<'q>(
        mut sqlx_query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        query: &'q RecordQuery,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        if let Some(ref aggregate_type) = query.aggregate_type {
            sqlx_query = sqlx_query.bind(aggregate_type);
        }
        if let Some(ref aggregate_id) = query.aggregate_id {
            sqlx_query = sqlx_query.bind(aggregate_id);
        }
        if let Some(ref command_type) = query.command_type {
            sqlx_query = sqlx_query.bind(command_type);
        }
        if let Some(ref command_id) = query.command_id {
            sqlx_query = sqlx_query.bind(command_id);
        }
        if let Some(published) = query.published {
            sqlx_query = sqlx_query.bind(published);
        }
        sqlx_query
    }
}

#[async_trait]
impl DurableStore for PostgresDurableStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<PostgresTransaction> {
        let tx = self.pool.begin().await?;
        Ok(PostgresTransaction { tx })
    }

    async fn find_aggregate(
        &self,
        aggregate_type: &str,
        id: AggregateId,
    ) -> Result<Option<StoredAggregate>> {
        let row: Option<PgRow> = sqlx::query(
            r#"
            SELECT aggregate_type, id, version, concurrency_version, created_at, updated_at, state
            FROM aggregates
            WHERE aggregate_type = $1 AND id = $2
            "#,
        )
        .bind(aggregate_type)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_aggregate).transpose()
    }

    async fn record_exists(&self, query: &RecordQuery) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM domain_events{} LIMIT 1",
            Self::record_filter_sql(query)
        );
        let row = Self::bind_record_filter(sqlx::query(&sql), query)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn query_records(&self, query: &RecordQuery) -> Result<Vec<DomainEventRecord>> {
        let mut sql = format!(
            "SELECT {RECORD_COLUMNS} FROM domain_events{} ORDER BY seq ASC",
            Self::record_filter_sql(query)
        );
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = Self::bind_record_filter(sqlx::query(&sql), query)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn mark_published(&self, record_id: RecordId) -> Result<()> {
        let result = sqlx::query("UPDATE domain_events SET published = TRUE WHERE id = $1")
            .bind(record_id.as_uuid())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RecordNotFound(record_id));
        }
        Ok(())
    }
}

/// An open PostgreSQL transaction.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PostgresTransaction {
    async fn add_aggregate(&mut self, aggregate: NewAggregate) -> Result<AggregateId> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO aggregates (aggregate_type, version, state)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(&aggregate.aggregate_type)
        .bind(aggregate.version.as_i64())
        .bind(&aggregate.state)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(AggregateId::from_uuid(id))
    }

    async fn update_aggregate(&mut self, update: AggregateUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE aggregates
            SET version = $1,
                state = $2,
                concurrency_version = concurrency_version + 1,
                updated_at = now()
            WHERE aggregate_type = $3 AND id = $4 AND version = $5
            "#,
        )
        .bind(update.new_version.as_i64())
        .bind(&update.state)
        .bind(&update.aggregate_type)
        .bind(update.id.as_uuid())
        .bind(update.expected_version.as_i64())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let actual: Option<i64> =
            sqlx::query_scalar("SELECT version FROM aggregates WHERE aggregate_type = $1 AND id = $2")
                .bind(&update.aggregate_type)
                .bind(update.id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await?;

        match actual {
            Some(actual) => Err(StoreError::ConcurrencyConflict {
                aggregate_type: update.aggregate_type,
                aggregate_id: update.id,
                expected: update.expected_version,
                actual: Version::new(actual),
            }),
            None => Err(StoreError::AggregateNotFound {
                aggregate_type: update.aggregate_type,
                aggregate_id: update.id,
            }),
        }
    }

    async fn add_records(&mut self, records: &[DomainEventRecord]) -> Result<()> {
        validate_records(records)?;

        for record in records {
            let params_json = serde_json::to_value(&record.command_params)?;

            sqlx::query(
                r#"
                INSERT INTO domain_events (id, aggregate_type, aggregate_id, aggregate_version,
                    command_type, command_id, command_params, event_type, event_data, timestamp, published)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(record.id.as_uuid())
            .bind(&record.aggregate_type)
            .bind(&record.aggregate_id)
            .bind(record.aggregate_version.as_i64())
            .bind(&record.command_type)
            .bind(record.command_id())
            .bind(params_json)
            .bind(&record.event_type)
            .bind(&record.event_data)
            .bind(record.timestamp)
            .bind(record.published)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
