//! PostgreSQL-backed durable queues.
//!
//! All queues share one table. A delivery is a row whose `state` moves
//! `ready → unacked`, and is deleted on ack or marked `rejected` on reject.
//! Consumption claims rows with `FOR UPDATE SKIP LOCKED`, so concurrent
//! consumers never receive the same row.
//!
//! # Schema
//! - `bridgeindex_queue`: `(id, queue, body, state, enqueued_at)`

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::broker::{Broker, Delivery, Queue};
use crate::error::BusError;

const READY: &str = "ready";
const UNACKED: &str = "unacked";
const REJECTED: &str = "rejected";

/// Postgres broker. Cheaply cloneable, wraps a connection pool.
#[derive(Clone)]
pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    /// Connect and create the queue table if missing.
    pub async fn connect(database_url: &str) -> Result<Self, BusError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| BusError::Connection(format!("postgres connect: {e}")))?;
        Self::from_pool(pool).await
    }

    /// Share an existing pool.
    pub async fn from_pool(pool: PgPool) -> Result<Self, BusError> {
        let broker = Self { pool };
        broker.init_schema().await?;
        info!("PgBroker connected and schema initialized");
        Ok(broker)
    }

    async fn init_schema(&self) -> Result<(), BusError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bridgeindex_queue (
                id          BIGSERIAL PRIMARY KEY,
                queue       TEXT      NOT NULL,
                body        BYTEA     NOT NULL,
                state       TEXT      NOT NULL DEFAULT 'ready',
                enqueued_at BIGINT    NOT NULL DEFAULT EXTRACT(EPOCH FROM NOW())::BIGINT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| BusError::Connection(e.to_string()))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_bridgeindex_queue_state
             ON bridgeindex_queue(queue, state, id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| BusError::Connection(e.to_string()))?;

        debug!("PgBroker schema initialized");
        Ok(())
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn open_queue(&self, name: &str) -> Result<Arc<dyn Queue>, BusError> {
        // Cheap liveness check so a dead pool surfaces on open, not first poll
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;
        Ok(Arc::new(PgQueue {
            pool: self.pool.clone(),
            name: name.to_string(),
        }))
    }
}

/// One named queue inside `bridgeindex_queue`.
pub struct PgQueue {
    pool: PgPool,
    name: String,
}

impl PgQueue {
    fn tags(tags: &[u64]) -> Vec<i64> {
        tags.iter().map(|t| *t as i64).collect()
    }

    fn settle_err(&self, e: sqlx::Error) -> BusError {
        BusError::Settle {
            queue: self.name.clone(),
            reason: e.to_string(),
        }
    }

    async fn move_state(&self, from: &str, to: &str) -> Result<u64, BusError> {
        let result = sqlx::query("UPDATE bridgeindex_queue SET state = $3 WHERE queue = $1 AND state = $2")
            .bind(&self.name)
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await
            .map_err(|e| self.settle_err(e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Queue for PgQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, bodies: &[Vec<u8>]) -> Result<(), BusError> {
        if bodies.is_empty() {
            return Ok(());
        }
        let publish_err = |e: sqlx::Error| BusError::Publish {
            queue: self.name.clone(),
            reason: e.to_string(),
        };

        let mut tx = self.pool.begin().await.map_err(publish_err)?;
        for body in bodies {
            sqlx::query("INSERT INTO bridgeindex_queue (queue, body) VALUES ($1, $2)")
                .bind(&self.name)
                .bind(body.as_slice())
                .execute(&mut *tx)
                .await
                .map_err(publish_err)?;
        }
        tx.commit().await.map_err(publish_err)?;
        Ok(())
    }

    async fn consume(&self, max: usize) -> Result<Vec<Delivery>, BusError> {
        let rows = sqlx::query(
            "UPDATE bridgeindex_queue SET state = 'unacked'
             WHERE id IN (
                 SELECT id FROM bridgeindex_queue
                 WHERE queue = $1 AND state = 'ready'
                 ORDER BY id
                 LIMIT $2
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, body",
        )
        .bind(&self.name)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BusError::Consume {
            queue: self.name.clone(),
            reason: e.to_string(),
        })?;

        let mut deliveries = rows
            .iter()
            .map(|row| {
                Ok(Delivery {
                    tag: row.try_get::<i64, _>("id")? as u64,
                    body: row.try_get::<Vec<u8>, _>("body")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| BusError::Consume {
                queue: self.name.clone(),
                reason: e.to_string(),
            })?;
        // RETURNING does not preserve the subquery order
        deliveries.sort_by_key(|d| d.tag);
        Ok(deliveries)
    }

    async fn ack(&self, tags: &[u64]) -> Result<(), BusError> {
        sqlx::query("DELETE FROM bridgeindex_queue WHERE queue = $1 AND id = ANY($2)")
            .bind(&self.name)
            .bind(Self::tags(tags))
            .execute(&self.pool)
            .await
            .map_err(|e| self.settle_err(e))?;
        Ok(())
    }

    async fn reject(&self, tags: &[u64]) -> Result<(), BusError> {
        sqlx::query("UPDATE bridgeindex_queue SET state = $3 WHERE queue = $1 AND id = ANY($2)")
            .bind(&self.name)
            .bind(Self::tags(tags))
            .bind(REJECTED)
            .execute(&self.pool)
            .await
            .map_err(|e| self.settle_err(e))?;
        Ok(())
    }

    async fn return_unacked(&self) -> Result<u64, BusError> {
        self.move_state(UNACKED, READY).await
    }

    async fn purge_rejected(&self) -> Result<u64, BusError> {
        let result = sqlx::query("DELETE FROM bridgeindex_queue WHERE queue = $1 AND state = $2")
            .bind(&self.name)
            .bind(REJECTED)
            .execute(&self.pool)
            .await
            .map_err(|e| self.settle_err(e))?;
        Ok(result.rows_affected())
    }

    async fn ready_count(&self) -> Result<u64, BusError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM bridgeindex_queue WHERE queue = $1 AND state = $2")
            .bind(&self.name)
            .bind(READY)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| BusError::Consume {
                queue: self.name.clone(),
                reason: e.to_string(),
            })?;
        let n: i64 = row.try_get("n").map_err(|e| BusError::Consume {
            queue: self.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn broker() -> Option<PgBroker> {
        let url = std::env::var("DATABASE_URL").ok()?;
        Some(PgBroker::connect(&url).await.expect("connect"))
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn publish_consume_ack_roundtrip() {
        let Some(broker) = broker().await else { return };
        let q = broker.open_queue("test_roundtrip").await.unwrap();
        q.purge_rejected().await.unwrap();
        q.return_unacked().await.unwrap();
        let stale = q.consume(10_000).await.unwrap();
        q.ack(&stale.iter().map(|d| d.tag).collect::<Vec<_>>()).await.unwrap();

        q.publish(&[b"a".to_vec(), b"b".to_vec()]).await.unwrap();
        let got = q.consume(10).await.unwrap();
        assert_eq!(got.iter().map(|d| d.body.clone()).collect::<Vec<_>>(), vec![b"a".to_vec(), b"b".to_vec()]);

        q.reject(&[got[1].tag]).await.unwrap();
        q.ack(&[got[0].tag]).await.unwrap();
        assert_eq!(q.ready_count().await.unwrap(), 0);
        assert_eq!(q.purge_rejected().await.unwrap(), 1);
    }
}
