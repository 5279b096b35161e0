use async_trait::async_trait;
use redis::RedisResult;
use tracing::{debug, info};
use uuid::Uuid;
use ridepool_core::TripLock;

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub fn new(connection_string: &str) -> RedisResult<Self> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    /// SET NX EX: the first worker to claim the trip wins until the TTL lapses
    pub async fn acquire_trip_lock(&self, trip_id: Uuid, ttl_seconds: u64) -> RedisResult<bool> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let key = format!("trip:{}:settlement", trip_id);

        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(std::process::id())
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut con)
            .await?;

        if result.is_some() {
            info!("Settlement claim acquired: {}", key);
        } else {
            debug!("Settlement claim already held: {}", key);
        }
        Ok(result.is_some())
    }

    /// Deletes the claim only while this process still owns it
    pub async fn release_trip_lock(&self, trip_id: Uuid) -> RedisResult<bool> {
        let mut con = self.client.get_multiplexed_async_connection().await?;
        let key = format!("trip:{}:settlement", trip_id);
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#,
        );

        let deleted: i64 = script.key(&key).arg(std::process::id()).invoke_async(&mut con).await?;
        if deleted == 1 {
            info!("Settlement claim released: {}", key);
        }
        Ok(deleted == 1)
    }
}

#[async_trait]
impl TripLock for RedisClient {
    async fn try_claim(
        &self,
        trip_id: Uuid,
        ttl_seconds: u64,
    ) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.acquire_trip_lock(trip_id, ttl_seconds).await?)
    }

    async fn release(&self, trip_id: Uuid) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.release_trip_lock(trip_id).await?;
        Ok(())
    }
}
