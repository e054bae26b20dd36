//! Redis-backed counter store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{info, trace};

use super::{CounterStore, LimiterScript, ScriptCall, StoreResult};

/// Counter store shared by every process connected to the same Redis.
///
/// Scripts are sent with `EVALSHA` and transparently re-sent with `EVAL`
/// when the server's script cache does not know them yet.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    fixed_window: Script,
    sliding_window: Script,
    token_bucket: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        info!(url = %url, "Connected to Redis counter store");

        Ok(Self {
            connection,
            fixed_window: Script::new(LimiterScript::FixedWindow.source()),
            sliding_window: Script::new(LimiterScript::SlidingWindow.source()),
            token_bucket: Script::new(LimiterScript::TokenBucket.source()),
        })
    }

    fn script(&self, script: LimiterScript) -> &Script {
        match script {
            LimiterScript::FixedWindow => &self.fixed_window,
            LimiterScript::SlidingWindow => &self.sliding_window,
            LimiterScript::TokenBucket => &self.token_bucket,
        }
    }

    /// SHA1 digest Redis uses to cache `script`.
    pub fn script_hash(&self, script: LimiterScript) -> &str {
        self.script(script).get_hash()
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn eval(&self, script: LimiterScript, call: &ScriptCall) -> StoreResult<bool> {
        let mut conn = self.connection.clone();

        let admitted: i64 = self
            .script(script)
            .key(&call.key)
            .arg(call.max_attempts)
            .arg(call.interval_ms)
            .arg(call.now_ms)
            .arg(&call.member)
            .invoke_async(&mut conn)
            .await?;

        trace!(key = %call.key, script = %script, admitted, "Ran script on Redis");
        Ok(admitted == 1)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.connection.clone();
        // -2 for a missing key, -1 for a key without expiry
        let millis: i64 = conn.pttl(key).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn remove(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }
}
