//! The `STOP` job signal (spec §6): a process-wide Redis key the ingress
//! clears when new work is enqueued. Workers exit their poll loop once the
//! next claim attempt returns nothing AND they observe `STOP` set.

use async_trait::async_trait;
use redis::AsyncCommands;

use crate::config::RedisConfig;

use super::error::StoreError;

const STOP_KEY: &str = "STOP";

#[async_trait]
pub trait JobSignal: Send + Sync {
    async fn is_stopped(&self) -> Result<bool, StoreError>;
}

pub struct RedisJobSignal {
    client: redis::Client,
    job_db: u8,
}

impl RedisJobSignal {
    pub fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.endpoint.as_str())?;
        Ok(Self { client, job_db: config.job_db })
    }
}

#[async_trait]
impl JobSignal for RedisJobSignal {
    async fn is_stopped(&self) -> Result<bool, StoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        if self.job_db != 0 {
            redis::cmd("SELECT").arg(self.job_db).query_async::<()>(&mut conn).await?;
        }
        let stopped: bool = conn.exists(STOP_KEY).await?;
        Ok(stopped)
    }
}
