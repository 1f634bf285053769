//! Postgres-backed routing table.
//!
//! Uses runtime queries (`sqlx::query` / `sqlx::query_as`) so the crate builds
//! without a live database.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use super::types::{EndpointSummary, EndpointTarget, EndpointUpdate, NewEndpoint, StoreError};
use super::EndpointStore;

/// Routing table stored in the `input`, `pipe` and `output` tables.
#[derive(Clone)]
pub struct PgEndpointStore {
    pool: PgPool,
}

impl PgEndpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool and apply the bundled migrations.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("postgres_connected");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;

        info!("postgres_migrations_applied");
        Ok(Self::new(pool))
    }
}

/// Map a unique-key violation on `input.address` to [`StoreError::AddressTaken`].
fn address_conflict(err: sqlx::Error, address: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::AddressTaken(address.to_string());
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl EndpointStore for PgEndpointStore {
    async fn targets_for(&self, address: &str) -> Result<Vec<EndpointTarget>, StoreError> {
        let targets = sqlx::query_as::<_, EndpointTarget>(
            r"
            SELECT input.address, output.filter, output.kind, output.target, output.data
            FROM pipe
            INNER JOIN input ON pipe.i = input.address
            INNER JOIN output ON pipe.o = output.id
            WHERE input.address = $1
            ORDER BY output.id
            ",
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        Ok(targets)
    }

    async fn list_for_target(
        &self,
        target: &str,
        owner: &str,
    ) -> Result<Vec<EndpointSummary>, StoreError> {
        let endpoints = sqlx::query_as::<_, EndpointSummary>(
            r"
            SELECT input.address, output.filter
            FROM pipe
            INNER JOIN input ON pipe.i = input.address
            INNER JOIN output ON pipe.o = output.id
            WHERE output.target = $1
              AND output.owner = $2
            ORDER BY output.id
            ",
        )
        .bind(target)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(endpoints)
    }

    async fn create(&self, endpoint: NewEndpoint) -> Result<(), StoreError> {
        sqlx::query(
            r"
            WITH i AS (
                INSERT INTO input (address, owner)
                VALUES ($1, $2)
                RETURNING address
            ),
            o AS (
                INSERT INTO output (kind, target, filter, owner, data)
                VALUES ($3, $4, $5, $2, $6)
                RETURNING id
            )
            INSERT INTO pipe (i, o) VALUES ((SELECT address FROM i), (SELECT id FROM o))
            ",
        )
        .bind(&endpoint.address)
        .bind(&endpoint.owner)
        .bind(&endpoint.kind)
        .bind(&endpoint.target)
        .bind(&endpoint.filter)
        .bind(&endpoint.data)
        .execute(&self.pool)
        .await
        .map_err(|e| address_conflict(e, &endpoint.address))?;

        Ok(())
    }

    async fn update(&self, update: EndpointUpdate) -> Result<(), StoreError> {
        // pipe.i cascades on rename, so only input and output are touched here.
        let (updated,): (i64,) = sqlx::query_as(
            r"
            WITH io AS (
                SELECT pipe.i, pipe.o
                FROM pipe
                INNER JOIN input ON pipe.i = input.address
                WHERE pipe.i = $1 AND input.owner = $6
                ORDER BY pipe.o
                LIMIT 1
            ),
            i AS (
                UPDATE input SET address = $2
                WHERE address = (SELECT i FROM io)
                RETURNING address
            ),
            o AS (
                UPDATE output SET filter = $3, target = $4, data = $5
                WHERE id = (SELECT o FROM io)
                RETURNING id
            )
            SELECT count(*) FROM i
            ",
        )
        .bind(&update.address)
        .bind(&update.new_address)
        .bind(&update.filter)
        .bind(&update.target)
        .bind(&update.data)
        .bind(&update.owner)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| address_conflict(e, &update.new_address))?;

        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, address: &str, owner: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let outputs: Vec<(i64,)> = sqlx::query_as(
            r"
            DELETE FROM pipe
            USING input
            WHERE pipe.i = input.address
              AND input.address = $1
              AND input.owner = $2
            RETURNING pipe.o
            ",
        )
        .bind(address)
        .bind(owner)
        .fetch_all(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM input WHERE address = $1 AND owner = $2")
            .bind(address)
            .bind(owner)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(StoreError::NotFound);
        }

        let ids: Vec<i64> = outputs.into_iter().map(|(id,)| id).collect();
        sqlx::query("DELETE FROM output WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
