use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use super::{SharedState, StateError};

const DELETE_IF_EQUALS: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

pub struct RedisState {
    client: redis::Client,
    connection: Mutex<Option<redis::aio::ConnectionManager>>,
}

impl RedisState {
    pub fn new(url: &str) -> Result<Self, StateError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
        })
    }

    async fn connection(&self) -> Result<redis::aio::ConnectionManager, StateError> {
        let mut guard = self.connection.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_connection_manager().await?);
        }
        match guard.as_ref() {
            Some(conn) => Ok(conn.clone()),
            None => Err(StateError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "redis connection unavailable",
            )))),
        }
    }

    /// Drop the cached connection after a failure so the next call reconnects.
    async fn reset(&self, err: redis::RedisError) -> StateError {
        tracing::warn!("Redis command failed: {err}");
        *self.connection.lock().await = None;
        StateError::Redis(err)
    }
}

#[async_trait]
impl SharedState for RedisState {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        let mut conn = self.connection().await?;
        match conn.get::<_, Option<String>>(key).await {
            Ok(value) => Ok(value),
            Err(err) => Err(self.reset(err).await),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StateError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = match ttl {
            Some(ttl) => conn.set_ex(key, value, ttl.as_secs().max(1)).await,
            None => conn.set(key, value).await,
        };
        if let Err(err) = result {
            return Err(self.reset(err).await);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StateError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = conn.del(keys).await;
        if let Err(err) = result {
            return Err(self.reset(err).await);
        }
        Ok(())
    }

    async fn push(&self, key: &str, values: &[String]) -> Result<(), StateError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<()> = conn.rpush(key, values).await;
        if let Err(err) = result {
            return Err(self.reset(err).await);
        }
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StateError> {
        let mut conn = self.connection().await?;
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let reply: redis::RedisResult<Option<String>> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await;
        match reply {
            Ok(reply) => Ok(reply.is_some()),
            Err(err) => Err(self.reset(err).await),
        }
    }

    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool, StateError> {
        let mut conn = self.connection().await?;
        let deleted: redis::RedisResult<i64> = redis::Script::new(DELETE_IF_EQUALS)
            .key(key)
            .arg(value)
            .invoke_async(&mut conn)
            .await;
        match deleted {
            Ok(count) => Ok(count > 0),
            Err(err) => Err(self.reset(err).await),
        }
    }
}
