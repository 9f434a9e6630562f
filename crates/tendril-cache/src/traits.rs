use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvError;

#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    async fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), KvError>;

    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    async fn ping(&self) -> Result<(), KvError>;

    /// Release pooled connections. Further calls may fail.
    async fn close(&self) -> Result<(), KvError> {
        Ok(())
    }
}
