use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use crate::{Client, CustomRedisError};

pub struct RedisClient {
    connection: MultiplexedConnection,
}

impl RedisClient {
    /// Create a new RedisClient with optional response and connection timeouts.
    ///
    /// # Errors
    /// Returns `CustomRedisError::InvalidConfiguration` if `Some(Duration::ZERO)` is passed,
    /// use `None` for no timeout instead.
    pub async fn with_config(
        addr: String,
        response_timeout: Option<Duration>,
        connection_timeout: Option<Duration>,
    ) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        if response_timeout.is_some_and(|t| t.is_zero())
            || connection_timeout.is_some_and(|t| t.is_zero())
        {
            return Err(CustomRedisError::InvalidConfiguration(
                "Redis timeouts cannot be Duration::ZERO - use None for no timeout".to_string(),
            ));
        }

        let mut config = redis::AsyncConnectionConfig::new();
        if let Some(timeout) = response_timeout {
            config = config.set_response_timeout(timeout);
        }
        if let Some(timeout) = connection_timeout {
            config = config.set_connection_timeout(timeout);
        }

        let connection = client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        Ok(RedisClient { connection })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn exists(&self, k: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(k).await?;
        Ok(exists)
    }

    async fn batch_set_nx_ex(
        &self,
        items: Vec<(String, String)>,
        ttl_seconds: u64,
    ) -> Result<Vec<bool>, CustomRedisError> {
        if items.is_empty() {
            return Ok(vec![]);
        }

        let mut pipe = redis::pipe();
        for (k, v) in &items {
            pipe.cmd("SET")
                .arg(k)
                .arg(v)
                .arg("EX")
                .arg(ttl_seconds)
                .arg("NX");
        }

        let mut conn = self.connection.clone();
        let results: Vec<Option<String>> = pipe.query_async(&mut conn).await?;

        Ok(results.into_iter().map(|r| r.is_some()).collect())
    }
}
