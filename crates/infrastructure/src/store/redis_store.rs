//! Redis-backed key-value store
//!
//! Conditional writes run as Lua scripts so each one is a single atomic step
//! on the server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::StoreConfig;
use orchestrator_domain::{CounterOutcome, Expiry, KeyValueStore};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, error, info, instrument};

const COMPARE_AND_SWAP: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[1] then
  return 0
end
if ARGV[3] == 'keep' then
  redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
elseif ARGV[3] == 'px' then
  redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[4])
else
  redis.call('SET', KEYS[1], ARGV[2])
end
return 1
"#;

const DELETE_IF_EQUALS: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

const INCREMENT_BELOW: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
  return {0, current, redis.call('PTTL', KEYS[1])}
end
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return {1, count, redis.call('PTTL', KEYS[1])}
"#;

const SET_ADD_EXTEND: &str = r#"
local existed = redis.call('EXISTS', KEYS[1])
for i = 2, #ARGV do
  redis.call('SADD', KEYS[1], ARGV[i])
end
local ttl = tonumber(ARGV[1])
if ttl > 0 then
  local current = redis.call('PTTL', KEYS[1])
  if existed == 0 or (current >= 0 and current < ttl) then
    redis.call('PEXPIRE', KEYS[1], ttl)
  end
end
return 1
"#;

/// Interval between non-blocking pops while waiting on an empty list.
/// Blocking pops would stall every other command on the multiplexed connection.
const LIST_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    closed: AtomicBool,
    compare_and_swap: Script,
    delete_if_equals: Script,
    increment_below: Script,
    set_add_extend: Script,
}

fn store_error(err: redis::RedisError) -> OrchestratorError {
    OrchestratorError::store(err.to_string())
}

fn millis(duration: Duration) -> u64 {
    (duration.as_millis() as u64).max(1)
}

fn ttl_from_pttl(pttl: i64) -> Option<Duration> {
    (pttl >= 0).then(|| Duration::from_millis(pttl as u64))
}

impl RedisStore {
    pub async fn connect(config: &StoreConfig) -> OrchestratorResult<Self> {
        info!("Connecting to Redis store at {}", config.url);

        let client = redis::Client::open(config.url.as_str()).map_err(store_error)?;
        let mut conn = tokio::time::timeout(
            config.connection_timeout(),
            client.get_connection_manager(),
        )
        .await
        .map_err(|_| OrchestratorError::store("timed out connecting to Redis"))?
        .map_err(store_error)?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;

        info!("Redis store connected");

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            closed: AtomicBool::new(false),
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
            delete_if_equals: Script::new(DELETE_IF_EQUALS),
            increment_below: Script::new(INCREMENT_BELOW),
            set_add_extend: Script::new(SET_ADD_EXTEND),
        })
    }

    fn build_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    fn connection(&self) -> OrchestratorResult<ConnectionManager> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OrchestratorError::store("Redis store is closed"));
        }
        Ok(self.conn.clone())
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> OrchestratorResult<Option<Vec<u8>>> {
        let mut conn = self.connection()?;
        redis::cmd("GET")
            .arg(self.build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis GET failed for key {}: {}", key, e);
                store_error(e)
            })
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> OrchestratorResult<Option<(Vec<u8>, Option<Duration>)>> {
        let mut conn = self.connection()?;
        let full_key = self.build_key(key);
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(&full_key)
            .cmd("PTTL")
            .arg(&full_key)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(value.map(|value| (value, ttl_from_pttl(pttl))))
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> OrchestratorResult<()> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.build_key(key)).arg(value);
        match expiry {
            Expiry::Never => {}
            Expiry::After(ttl) => {
                cmd.arg("PX").arg(millis(ttl));
            }
            Expiry::Keep => {
                cmd.arg("KEEPTTL");
            }
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(|e| {
            error!("Redis SET failed for key {}: {}", key, e);
            store_error(e)
        })?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> OrchestratorResult<bool> {
        let mut conn = self.connection()?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.build_key(key)).arg(value).arg("NX");
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(millis(ttl));
        }
        let reply: Option<String> = cmd.query_async(&mut conn).await.map_err(store_error)?;
        Ok(reply.is_some())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        expiry: Expiry,
    ) -> OrchestratorResult<bool> {
        let mut conn = self.connection()?;
        let (mode, ttl_ms) = match expiry {
            Expiry::Keep => ("keep", 0),
            Expiry::After(ttl) => ("px", millis(ttl)),
            Expiry::Never => ("never", 0),
        };
        let swapped: i64 = self
            .compare_and_swap
            .key(self.build_key(key))
            .arg(expected)
            .arg(new)
            .arg(mode)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(swapped == 1)
    }

    async fn delete(&self, key: &str) -> OrchestratorResult<bool> {
        let mut conn = self.connection()?;
        let removed: i64 = redis::cmd("DEL")
            .arg(self.build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> OrchestratorResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        let full_keys: Vec<String> = keys.iter().map(|k| self.build_key(k)).collect();
        let removed: u64 = redis::cmd("DEL")
            .arg(full_keys)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        debug!("Redis DEL removed {} of {} keys", removed, keys.len());
        Ok(removed)
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> OrchestratorResult<bool> {
        let mut conn = self.connection()?;
        let removed: i64 = self
            .delete_if_equals
            .key(self.build_key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(removed > 0)
    }

    async fn ttl(&self, key: &str) -> OrchestratorResult<Option<Duration>> {
        let mut conn = self.connection()?;
        let pttl: i64 = redis::cmd("PTTL")
            .arg(self.build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(ttl_from_pttl(pttl))
    }

    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> OrchestratorResult<CounterOutcome> {
        let mut conn = self.connection()?;
        let (applied, count, pttl): (i64, u64, i64) = self
            .increment_below
            .key(self.build_key(key))
            .arg(limit)
            .arg(millis(window))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(CounterOutcome {
            applied: applied == 1,
            count,
            ttl: ttl_from_pttl(pttl).unwrap_or(Duration::ZERO),
        })
    }

    async fn set_add(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> OrchestratorResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let mut invocation = self.set_add_extend.key(self.build_key(key));
        invocation.arg(ttl.map_or(0, millis));
        for member in members {
            invocation.arg(member);
        }
        let _: i64 = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> OrchestratorResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let _: i64 = redis::cmd("SREM")
            .arg(self.build_key(key))
            .arg(members)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> OrchestratorResult<Vec<String>> {
        let mut conn = self.connection()?;
        redis::cmd("SMEMBERS")
            .arg(self.build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> OrchestratorResult<()> {
        let mut conn = self.connection()?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(self.build_key(key))
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn list_pop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> OrchestratorResult<Option<Vec<u8>>> {
        let full_key = self.build_key(key);
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut conn = self.connection()?;
            let popped: Option<Vec<u8>> = redis::cmd("RPOP")
                .arg(&full_key)
                .query_async(&mut conn)
                .await
                .map_err(store_error)?;
            if popped.is_some() {
                return Ok(popped);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LIST_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn list_len(&self, key: &str) -> OrchestratorResult<u64> {
        let mut conn = self.connection()?;
        redis::cmd("LLEN")
            .arg(self.build_key(key))
            .query_async(&mut conn)
            .await
            .map_err(store_error)
    }

    async fn health_check(&self) -> OrchestratorResult<bool> {
        let mut conn = self.connection()?;
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        Ok(pong.is_ok())
    }

    async fn close(&self) -> OrchestratorResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        info!("Redis store closed");
        Ok(())
    }
}
