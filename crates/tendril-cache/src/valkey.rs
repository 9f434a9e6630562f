//! Valkey/Redis adapter for the KV backend.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, ErrorKind, RedisError};
use deadpool_redis::{Config, Connection, Pool, PoolError, Runtime};

use crate::error::KvError;
use crate::traits::KvBackend;

/// Valkey/Redis KV backend.
#[derive(Clone)]
pub struct ValkeyKv {
    pool: Pool,
    namespace: Option<String>,
}

impl ValkeyKv {
    /// Create a new Valkey KV backend.
    ///
    /// No connection is opened here; the pool connects on first use so a
    /// cache outage at startup does not prevent the service from booting.
    pub fn new(
        url: &str,
        namespace: Option<String>,
        pool_size: usize,
        connect_timeout: Duration,
    ) -> Result<Self, KvError> {
        let config = Config::from_url(url);
        let pool = config
            .builder()
            .map_err(|e| KvError::Connection(e.to_string()))?
            .max_size(pool_size)
            .wait_timeout(Some(connect_timeout))
            .create_timeout(Some(connect_timeout))
            .recycle_timeout(Some(connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| KvError::Connection(e.to_string()))?;

        Ok(Self { pool, namespace })
    }

    fn prefixed_key(&self, key: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}", ns, key),
            None => key.to_string(),
        }
    }

    async fn conn(&self) -> Result<Connection, KvError> {
        self.pool.get().await.map_err(classify_pool_error)
    }
}

fn classify_pool_error(err: PoolError) -> KvError {
    match err {
        PoolError::Timeout(_) => KvError::Timeout,
        PoolError::Backend(e) => classify_redis_error(e),
        other => KvError::Connection(other.to_string()),
    }
}

fn classify_redis_error(err: RedisError) -> KvError {
    if err.is_timeout() {
        KvError::Timeout
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        KvError::Connection(err.to_string())
    } else if err.kind() == ErrorKind::TypeError {
        KvError::InvalidValue(err.to_string())
    } else {
        KvError::Backend(err.to_string())
    }
}

#[async_trait]
impl KvBackend for ValkeyKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.conn().await?;

        let prefixed = self.prefixed_key(key);
        let result: Option<Vec<u8>> = conn.get(&prefixed).await.map_err(classify_redis_error)?;

        Ok(result)
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError> {
        let mut conn = self.conn().await?;

        let prefixed = self.prefixed_key(key);

        match ttl {
            Some(duration) => {
                let seconds = duration.as_secs().max(1);
                conn.set_ex::<_, _, ()>(&prefixed, value, seconds)
                    .await
                    .map_err(classify_redis_error)?;
            }
            None => {
                conn.set::<_, _, ()>(&prefixed, value)
                    .await
                    .map_err(classify_redis_error)?;
            }
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let mut conn = self.conn().await?;

        let prefixed = self.prefixed_key(key);
        let deleted: i64 = conn.del(&prefixed).await.map_err(classify_redis_error)?;

        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.conn().await?;

        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(classify_redis_error)?;

        Ok(())
    }

    async fn close(&self) -> Result<(), KvError> {
        self.pool.close();
        Ok(())
    }
}

impl std::fmt::Debug for ValkeyKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValkeyKv")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
