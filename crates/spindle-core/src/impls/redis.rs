//! Redis-backed task store.
//!
//! Key layout (all keys share `prefix`, default `spindle`):
//!
//! ```text
//! {prefix}:queues              SET   known queue names
//! {prefix}:t:{task_id}         HASH  msg, state, process_at, retry_count, max_retry,
//!                                    last_error, last_failed_at, lease
//! {prefix}:{queue}:pending     LIST  task ids, FIFO
//! {prefix}:{queue}:scheduled   ZSET  task id -> process_at (ms)
//! {prefix}:{queue}:retry       ZSET  task id -> process_at (ms)
//! {prefix}:{queue}:active      ZSET  task id -> lease expiry (ms)
//! {prefix}:{queue}:archived    ZSET  task id -> archived at (ms)
//! ```
//!
//! Every state transition is a single Lua script, so claims and lease checks
//! are atomic with respect to other workers sharing the same Redis.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info, warn};

use crate::app::retry::retry_transient;
use crate::domain::{LeaseId, QueueName, TaskEnvelope, TaskId, TaskInfo, TaskState};
use crate::error::{SpindleError, SpindleResult};
use crate::ports::{
    ArchiveRetention, ClaimedTask, Clock, IdGenerator, Lease, QueueStats, SystemClock, TaskStore,
    UlidGenerator,
};

const LEASE_LOST: i64 = 0;
const NOT_FOUND: i64 = -1;

// KEYS: task, pending, scheduled, queues
// ARGV: msg, id, process_at, now, queue, max_retry
static ENQUEUE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call("EXISTS", KEYS[1]) == 1 then
            return 0
        end
        local state = "pending"
        if tonumber(ARGV[3]) > tonumber(ARGV[4]) then
            state = "scheduled"
        end
        redis.call("HSET", KEYS[1], "msg", ARGV[1], "state", state,
            "process_at", ARGV[3], "retry_count", 0, "max_retry", ARGV[6])
        if state == "pending" then
            redis.call("RPUSH", KEYS[2], ARGV[2])
        else
            redis.call("ZADD", KEYS[3], ARGV[3], ARGV[2])
        end
        redis.call("SADD", KEYS[4], ARGV[5])
        return 1
        "#,
    )
});

// KEYS: pending_1, active_1, pending_2, active_2, ...
// ARGV: task key prefix, lease id, lease expiry
static DEQUEUE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        for i = 1, #KEYS, 2 do
            local id = redis.call("LPOP", KEYS[i])
            if id then
                local key = ARGV[1] .. id
                redis.call("HSET", key, "state", "active", "lease", ARGV[2])
                redis.call("ZADD", KEYS[i + 1], ARGV[3], id)
                local fields = redis.call("HMGET", key, "msg", "retry_count")
                return {fields[1], fields[2]}
            end
        end
        return nil
        "#,
    )
});

// KEYS: task, active
// ARGV: id, lease
static ACK: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call("EXISTS", KEYS[1]) == 0 then
            return -1
        end
        local fields = redis.call("HMGET", KEYS[1], "state", "lease")
        if fields[1] ~= "active" or fields[2] ~= ARGV[2] then
            return 0
        end
        redis.call("DEL", KEYS[1])
        redis.call("ZREM", KEYS[2], ARGV[1])
        return 1
        "#,
    )
});

// Drops archived entries scored before `cutoff`, then the oldest beyond
// `max_tasks`, deleting their task hashes.
const TRIM_ARCHIVE: &str = r#"
local function trim_archive(archived, cutoff, max_tasks, task_prefix)
    local old = redis.call("ZRANGEBYSCORE", archived, "-inf", "(" .. cutoff)
    for _, id in ipairs(old) do
        redis.call("DEL", task_prefix .. id)
    end
    if #old > 0 then
        redis.call("ZREMRANGEBYSCORE", archived, "-inf", "(" .. cutoff)
    end
    local excess = redis.call("ZCARD", archived) - tonumber(max_tasks)
    if excess > 0 then
        local ids = redis.call("ZRANGE", archived, 0, excess - 1)
        for _, id in ipairs(ids) do
            redis.call("DEL", task_prefix .. id)
        end
        redis.call("ZREMRANGEBYRANK", archived, 0, excess - 1)
    end
end
"#;

// KEYS: task, active, retry, archived
// ARGV: id, lease, error, now, process_at, cutoff, max_tasks, task key prefix
// Returns 1 when moved to retry, 2 when archived.
static RETRY: LazyLock<Script> = LazyLock::new(|| {
    Script::new(&format!(
        "{TRIM_ARCHIVE}{}",
        r#"
        if redis.call("EXISTS", KEYS[1]) == 0 then
            return -1
        end
        local fields = redis.call("HMGET", KEYS[1], "state", "lease", "retry_count", "max_retry")
        if fields[1] ~= "active" or fields[2] ~= ARGV[2] then
            return 0
        end
        redis.call("ZREM", KEYS[2], ARGV[1])
        redis.call("HDEL", KEYS[1], "lease")
        redis.call("HSET", KEYS[1], "last_error", ARGV[3], "last_failed_at", ARGV[4])
        if tonumber(fields[3]) >= tonumber(fields[4]) then
            redis.call("HSET", KEYS[1], "state", "archived")
            redis.call("ZADD", KEYS[4], ARGV[4], ARGV[1])
            trim_archive(KEYS[4], ARGV[6], ARGV[7], ARGV[8])
            return 2
        end
        redis.call("HINCRBY", KEYS[1], "retry_count", 1)
        redis.call("HSET", KEYS[1], "state", "retry", "process_at", ARGV[5])
        redis.call("ZADD", KEYS[3], ARGV[5], ARGV[1])
        return 1
        "#
    ))
});

// KEYS: task, active, archived
// ARGV: id, lease, error, now, cutoff, max_tasks, task key prefix
static ARCHIVE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(&format!(
        "{TRIM_ARCHIVE}{}",
        r#"
        if redis.call("EXISTS", KEYS[1]) == 0 then
            return -1
        end
        local fields = redis.call("HMGET", KEYS[1], "state", "lease")
        if fields[1] ~= "active" or fields[2] ~= ARGV[2] then
            return 0
        end
        redis.call("ZREM", KEYS[2], ARGV[1])
        redis.call("HDEL", KEYS[1], "lease")
        redis.call("HSET", KEYS[1], "state", "archived",
            "last_error", ARGV[3], "last_failed_at", ARGV[4])
        redis.call("ZADD", KEYS[3], ARGV[4], ARGV[1])
        trim_archive(KEYS[3], ARGV[5], ARGV[6], ARGV[7])
        return 1
        "#
    ))
});

// KEYS: task, active
// ARGV: id, lease, expiry
static EXTEND: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        if redis.call("EXISTS", KEYS[1]) == 0 then
            return -1
        end
        local fields = redis.call("HMGET", KEYS[1], "state", "lease")
        if fields[1] ~= "active" or fields[2] ~= ARGV[2] then
            return 0
        end
        redis.call("ZADD", KEYS[2], ARGV[3], ARGV[1])
        return 1
        "#,
    )
});

// KEYS: scheduled, retry, pending
// ARGV: now, task key prefix
static PROMOTE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local moved = 0
        for i = 1, 2 do
            local ids = redis.call("ZRANGEBYSCORE", KEYS[i], "-inf", ARGV[1])
            for _, id in ipairs(ids) do
                redis.call("ZREM", KEYS[i], id)
                redis.call("HSET", ARGV[2] .. id, "state", "pending")
                redis.call("RPUSH", KEYS[3], id)
                moved = moved + 1
            end
        end
        return moved
        "#,
    )
});

// KEYS: active, pending
// ARGV: now, task key prefix
static RECLAIM: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r#"
        local ids = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1])
        for _, id in ipairs(ids) do
            local key = ARGV[2] .. id
            redis.call("ZREM", KEYS[1], id)
            redis.call("HDEL", key, "lease")
            redis.call("HSET", key, "state", "pending", "last_error", "lease expired")
            redis.call("RPUSH", KEYS[2], id)
        end
        return #ids
        "#,
    )
});

/// Connection settings for [`RedisTaskStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// `host:port` or a full `redis://` URL.
    pub addr: String,
    pub password: Option<String>,
    pub key_prefix: String,
    /// Attempts made by `connect` before giving up.
    pub connect_retries: u32,
    pub archive_retention: ArchiveRetention,
}

impl RedisStoreConfig {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            password: None,
            key_prefix: "spindle".to_string(),
            connect_retries: 3,
            archive_retention: ArchiveRetention::default(),
        }
    }

    pub fn with_archive_retention(mut self, retention: ArchiveRetention) -> Self {
        self.archive_retention = retention;
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Connection URL; the password is embedded when set.
    pub fn url(&self) -> String {
        let rest = self
            .addr
            .strip_prefix("redis://")
            .unwrap_or(&self.addr);
        match self.password.as_deref() {
            Some(pw) if !pw.is_empty() => format!("redis://:{pw}@{rest}"),
            _ => format!("redis://{rest}"),
        }
    }
}

/// Redis key names.
#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn queues(&self) -> String {
        format!("{}:queues", self.prefix)
    }

    fn task_prefix(&self) -> String {
        format!("{}:t:", self.prefix)
    }

    fn task(&self, id: TaskId) -> String {
        format!("{}:t:{}", self.prefix, id)
    }

    fn queue(&self, queue: &QueueName, state: TaskState) -> String {
        format!("{}:{}:{}", self.prefix, queue, state.as_str())
    }
}

pub struct RedisTaskStore {
    conn: ConnectionManager,
    keys: Keys,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retention: ArchiveRetention,
    closed: AtomicBool,
}

impl RedisTaskStore {
    /// Connect and verify with `PING`, retrying with backoff.
    pub async fn connect(config: RedisStoreConfig) -> SpindleResult<Self> {
        Self::connect_with_clock(config, Arc::new(SystemClock)).await
    }

    pub async fn connect_with_clock(
        config: RedisStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> SpindleResult<Self> {
        let client = Client::open(config.url())
            .map_err(|e| SpindleError::Config(format!("redis address {:?}: {e}", config.addr)))?;

        let conn = retry_transient(
            config.connect_retries,
            Duration::from_millis(400),
            || {
                let client = client.clone();
                async move {
                    let mut conn = ConnectionManager::new(client).await?;
                    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
                    Ok::<_, SpindleError>(conn)
                }
            },
        )
        .await?;

        info!(addr = %config.addr, prefix = %config.key_prefix, "redis task store connected");
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Ok(Self {
            conn,
            keys: Keys {
                prefix: config.key_prefix,
            },
            clock,
            ids,
            retention: config.archive_retention,
            closed: AtomicBool::new(false),
        })
    }

    fn conn(&self) -> SpindleResult<ConnectionManager> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SpindleError::StoreUnavailable("redis store closed".into()));
        }
        Ok(self.conn.clone())
    }

    fn lease_deadline(&self, lease_for: Duration) -> SpindleResult<DateTime<Utc>> {
        let lease_for = chrono::Duration::from_std(lease_for)
            .map_err(|e| SpindleError::InvalidOption(format!("lease duration: {e}")))?;
        self.clock.now().checked_add_signed(lease_for).ok_or_else(|| {
            SpindleError::InvalidOption("lease duration is beyond the supported date range".into())
        })
    }

    async fn known_queues(&self) -> SpindleResult<Vec<QueueName>> {
        let mut conn = self.conn()?;
        let names: Vec<String> = conn.smembers(self.keys.queues()).await?;
        Ok(names.into_iter().map(QueueName::new).collect())
    }
}

fn lease_status(id: TaskId, code: i64) -> SpindleResult<()> {
    match code {
        NOT_FOUND => Err(SpindleError::TaskNotFound(id)),
        LEASE_LOST => Err(SpindleError::LeaseLost(id)),
        _ => Ok(()),
    }
}

fn from_millis(ms: i64) -> SpindleResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| SpindleError::StoreUnavailable(format!("bad timestamp {ms}")))
}

fn decode_envelope(msg: &str) -> SpindleResult<TaskEnvelope> {
    serde_json::from_str(msg)
        .map_err(|e| SpindleError::StoreUnavailable(format!("corrupt task message: {e}")))
}

/// Rebuild `TaskInfo` from the task hash.
fn decode_info(fields: &HashMap<String, String>) -> SpindleResult<TaskInfo> {
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| SpindleError::StoreUnavailable(format!("task hash missing {name}")))
    };
    let number = |name: &str| -> SpindleResult<i64> {
        field(name)?
            .parse()
            .map_err(|e| SpindleError::StoreUnavailable(format!("task hash {name}: {e}")))
    };

    let envelope = decode_envelope(field("msg")?)?;
    let state: TaskState = field("state")?
        .parse()
        .map_err(|e| SpindleError::StoreUnavailable(format!("task hash state: {e}")))?;
    let last_failed_at = match fields.get("last_failed_at") {
        Some(_) => Some(from_millis(number("last_failed_at")?)?),
        None => None,
    };

    Ok(TaskInfo {
        envelope,
        state,
        process_at: from_millis(number("process_at")?)?,
        retry_count: u32::try_from(number("retry_count")?)
            .map_err(|e| SpindleError::StoreUnavailable(format!("task hash retry_count: {e}")))?,
        last_error: fields.get("last_error").cloned(),
        last_failed_at,
    })
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn enqueue(
        &self,
        envelope: TaskEnvelope,
        process_at: DateTime<Utc>,
    ) -> SpindleResult<TaskInfo> {
        let mut conn = self.conn()?;
        let now = self.clock.now();
        let id = envelope.id();
        let queue = envelope.queue().clone();
        let msg = serde_json::to_string(&envelope)
            .map_err(|e| SpindleError::InvalidOption(format!("encode envelope: {e}")))?;

        let created: i64 = ENQUEUE
            .key(self.keys.task(id))
            .key(self.keys.queue(&queue, TaskState::Pending))
            .key(self.keys.queue(&queue, TaskState::Scheduled))
            .key(self.keys.queues())
            .arg(msg)
            .arg(id.to_string())
            .arg(process_at.timestamp_millis())
            .arg(now.timestamp_millis())
            .arg(queue.as_str())
            .arg(envelope.max_retry())
            .invoke_async(&mut conn)
            .await?;
        if created == 0 {
            return Err(SpindleError::InvalidOption(format!("task {id} already exists")));
        }

        let state = if process_at <= now {
            TaskState::Pending
        } else {
            TaskState::Scheduled
        };
        debug!(task_id = %id, queue = %queue, state = %state, "task stored");
        Ok(TaskInfo {
            envelope,
            state,
            process_at,
            retry_count: 0,
            last_error: None,
            last_failed_at: None,
        })
    }

    async fn dequeue(
        &self,
        queues: &[QueueName],
        lease_for: Duration,
    ) -> SpindleResult<Option<ClaimedTask>> {
        if queues.is_empty() {
            return Ok(None);
        }
        let mut conn = self.conn()?;
        let lease = Lease {
            id: self.ids.generate_lease_id(),
            expires_at: self.lease_deadline(lease_for)?,
        };

        let mut invocation = DEQUEUE.prepare_invoke();
        for queue in queues {
            invocation
                .key(self.keys.queue(queue, TaskState::Pending))
                .key(self.keys.queue(queue, TaskState::Active));
        }
        invocation
            .arg(self.keys.task_prefix())
            .arg(lease.id.to_string())
            .arg(lease.expires_at.timestamp_millis());

        let claimed: Option<(String, u32)> = invocation.invoke_async(&mut conn).await?;
        let Some((msg, retry_count)) = claimed else {
            return Ok(None);
        };
        Ok(Some(ClaimedTask {
            envelope: decode_envelope(&msg)?,
            lease,
            retry_count,
        }))
    }

    async fn ack(&self, id: TaskId, lease: LeaseId) -> SpindleResult<()> {
        let mut conn = self.conn()?;
        let queue = self.queue_of(id).await?;
        let code: i64 = ACK
            .key(self.keys.task(id))
            .key(self.keys.queue(&queue, TaskState::Active))
            .arg(id.to_string())
            .arg(lease.to_string())
            .invoke_async(&mut conn)
            .await?;
        lease_status(id, code)
    }

    async fn retry(
        &self,
        id: TaskId,
        lease: LeaseId,
        error: &str,
        backoff: Duration,
    ) -> SpindleResult<TaskState> {
        let mut conn = self.conn()?;
        let queue = self.queue_of(id).await?;
        let now = self.clock.now();
        let backoff = chrono::Duration::from_std(backoff)
            .map_err(|e| SpindleError::InvalidOption(format!("backoff: {e}")))?;
        let retry_at = now.checked_add_signed(backoff).ok_or_else(|| {
            SpindleError::InvalidOption("backoff is beyond the supported date range".into())
        })?;

        let code: i64 = RETRY
            .key(self.keys.task(id))
            .key(self.keys.queue(&queue, TaskState::Active))
            .key(self.keys.queue(&queue, TaskState::Retry))
            .key(self.keys.queue(&queue, TaskState::Archived))
            .arg(id.to_string())
            .arg(lease.to_string())
            .arg(error)
            .arg(now.timestamp_millis())
            .arg(retry_at.timestamp_millis())
            .arg(self.retention.cutoff(now).timestamp_millis())
            .arg(self.retention.max_tasks)
            .arg(self.keys.task_prefix())
            .invoke_async(&mut conn)
            .await?;
        lease_status(id, code)?;
        Ok(if code == 2 {
            TaskState::Archived
        } else {
            TaskState::Retry
        })
    }

    async fn archive(&self, id: TaskId, lease: LeaseId, error: &str) -> SpindleResult<()> {
        let mut conn = self.conn()?;
        let queue = self.queue_of(id).await?;
        let now = self.clock.now();
        let code: i64 = ARCHIVE
            .key(self.keys.task(id))
            .key(self.keys.queue(&queue, TaskState::Active))
            .key(self.keys.queue(&queue, TaskState::Archived))
            .arg(id.to_string())
            .arg(lease.to_string())
            .arg(error)
            .arg(now.timestamp_millis())
            .arg(self.retention.cutoff(now).timestamp_millis())
            .arg(self.retention.max_tasks)
            .arg(self.keys.task_prefix())
            .invoke_async(&mut conn)
            .await?;
        lease_status(id, code)
    }

    async fn extend_lease(
        &self,
        id: TaskId,
        lease: LeaseId,
        lease_for: Duration,
    ) -> SpindleResult<DateTime<Utc>> {
        let mut conn = self.conn()?;
        let queue = self.queue_of(id).await?;
        let expires_at = self.lease_deadline(lease_for)?;
        let code: i64 = EXTEND
            .key(self.keys.task(id))
            .key(self.keys.queue(&queue, TaskState::Active))
            .arg(id.to_string())
            .arg(lease.to_string())
            .arg(expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        lease_status(id, code)?;
        Ok(expires_at)
    }

    async fn promote_scheduled(&self) -> SpindleResult<usize> {
        let now = self.clock.now().timestamp_millis();
        let mut total = 0;
        for queue in self.known_queues().await? {
            let mut conn = self.conn()?;
            let moved: usize = PROMOTE
                .key(self.keys.queue(&queue, TaskState::Scheduled))
                .key(self.keys.queue(&queue, TaskState::Retry))
                .key(self.keys.queue(&queue, TaskState::Pending))
                .arg(now)
                .arg(self.keys.task_prefix())
                .invoke_async(&mut conn)
                .await?;
            total += moved;
        }
        Ok(total)
    }

    async fn reclaim_expired_leases(&self) -> SpindleResult<usize> {
        let now = self.clock.now().timestamp_millis();
        let mut total = 0;
        for queue in self.known_queues().await? {
            let mut conn = self.conn()?;
            let reclaimed: usize = RECLAIM
                .key(self.keys.queue(&queue, TaskState::Active))
                .key(self.keys.queue(&queue, TaskState::Pending))
                .arg(now)
                .arg(self.keys.task_prefix())
                .invoke_async(&mut conn)
                .await?;
            if reclaimed > 0 {
                warn!(queue = %queue, count = reclaimed, "lease expired, tasks returned to pending");
            }
            total += reclaimed;
        }
        Ok(total)
    }

    async fn task_info(&self, id: TaskId) -> SpindleResult<Option<TaskInfo>> {
        let mut conn = self.conn()?;
        let fields: HashMap<String, String> = conn.hgetall(self.keys.task(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_info(&fields).map(Some)
    }

    async fn queue_stats(&self, queue: &QueueName) -> SpindleResult<QueueStats> {
        let mut conn = self.conn()?;
        let (pending, scheduled, active, retry, archived): (usize, usize, usize, usize, usize) =
            redis::pipe()
                .llen(self.keys.queue(queue, TaskState::Pending))
                .zcard(self.keys.queue(queue, TaskState::Scheduled))
                .zcard(self.keys.queue(queue, TaskState::Active))
                .zcard(self.keys.queue(queue, TaskState::Retry))
                .zcard(self.keys.queue(queue, TaskState::Archived))
                .query_async(&mut conn)
                .await?;
        Ok(QueueStats {
            pending,
            scheduled,
            active,
            retry,
            archived,
        })
    }

    async fn close(&self) -> SpindleResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        debug!("redis task store closed");
        Ok(())
    }
}

impl RedisTaskStore {
    /// Queue the task was enqueued on, read from its stored envelope.
    async fn queue_of(&self, id: TaskId) -> SpindleResult<QueueName> {
        let mut conn = self.conn()?;
        let msg: Option<String> = conn.hget(self.keys.task(id), "msg").await?;
        let msg = msg.ok_or(SpindleError::TaskNotFound(id))?;
        Ok(decode_envelope(&msg)?.queue().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use ulid::Ulid;

    #[test]
    fn url_embeds_password() {
        let config = RedisStoreConfig::new("localhost:6380");
        assert_eq!(config.url(), "redis://localhost:6380");

        let config = RedisStoreConfig::new("redis://cache:6379").with_password("s3cret");
        assert_eq!(config.url(), "redis://:s3cret@cache:6379");

        let config = RedisStoreConfig::new("cache:6379").with_password("");
        assert_eq!(config.url(), "redis://cache:6379");
    }

    #[test]
    fn archive_retention_defaults_and_override() {
        let config = RedisStoreConfig::new("localhost:6380");
        assert_eq!(config.archive_retention, ArchiveRetention::default());

        let retention = ArchiveRetention {
            max_tasks: 50,
            max_age: Duration::from_secs(3600),
        };
        let config = config.with_archive_retention(retention);
        assert_eq!(config.archive_retention, retention);
    }

    #[test]
    fn key_layout() {
        let keys = Keys {
            prefix: "spindle".into(),
        };
        let id = TaskId::from_ulid(Ulid::nil());
        let queue = QueueName::new("critical");

        assert_eq!(keys.queues(), "spindle:queues");
        assert_eq!(keys.task(id), format!("spindle:t:{id}"));
        assert!(keys.task(id).starts_with(&keys.task_prefix()));
        assert_eq!(keys.queue(&queue, TaskState::Pending), "spindle:critical:pending");
        assert_eq!(keys.queue(&queue, TaskState::Active), "spindle:critical:active");
    }

    #[test]
    fn task_hash_decodes_into_info() {
        let envelope = TaskEnvelope::new(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new("demo:echo"),
            b"hello".to_vec(),
            QueueName::new("default"),
            3,
            Duration::from_secs(10),
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        );
        let mut fields = HashMap::new();
        fields.insert("msg".to_string(), serde_json::to_string(&envelope).unwrap());
        fields.insert("state".to_string(), "retry".to_string());
        fields.insert("process_at".to_string(), "1700000005000".to_string());
        fields.insert("retry_count".to_string(), "2".to_string());
        fields.insert("last_error".to_string(), "boom".to_string());
        fields.insert("last_failed_at".to_string(), "1700000004000".to_string());

        let info = decode_info(&fields).unwrap();
        assert_eq!(info.envelope, envelope);
        assert_eq!(info.state, TaskState::Retry);
        assert_eq!(info.retry_count, 2);
        assert_eq!(info.process_at.timestamp_millis(), 1_700_000_005_000);
        assert_eq!(info.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn lease_status_codes() {
        let id = TaskId::from_ulid(Ulid::nil());
        assert!(lease_status(id, 1).is_ok());
        assert!(matches!(lease_status(id, LEASE_LOST), Err(SpindleError::LeaseLost(_))));
        assert!(matches!(lease_status(id, NOT_FOUND), Err(SpindleError::TaskNotFound(_))));
    }
}
