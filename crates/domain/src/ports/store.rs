use std::time::Duration;

use async_trait::async_trait;
use orchestrator_errors::OrchestratorResult;

/// 写入时的过期策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// 永不过期
    Never,
    /// 在给定时长后过期
    After(Duration),
    /// 保留键当前的剩余TTL
    Keep,
}

/// 原子计数的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOutcome {
    /// 计数是否在上限内完成递增
    pub applied: bool,
    /// 递增后（或被拒绝时）的当前计数
    pub count: u64,
    /// 计数键的剩余存活时间
    pub ttl: Duration,
}

/// 共享键值存储
///
/// 注册表、缓存、限流器和作业队列共用这一个抽象。所有条件写操作
/// （`set_if_absent`、`compare_and_swap`、`delete_if_equals`、
/// `increment_below`）在实现中必须是原子的。
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> OrchestratorResult<Option<Vec<u8>>>;

    /// 一次读取值和剩余TTL
    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> OrchestratorResult<Option<(Vec<u8>, Option<Duration>)>>;

    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> OrchestratorResult<()>;

    /// 键不存在时写入，返回是否写入成功
    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> OrchestratorResult<bool>;

    /// 当前值等于 `expected` 时替换为 `new`
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        expiry: Expiry,
    ) -> OrchestratorResult<bool>;

    async fn delete(&self, key: &str) -> OrchestratorResult<bool>;

    async fn delete_many(&self, keys: &[String]) -> OrchestratorResult<u64>;

    /// 当前值等于 `expected` 时删除
    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> OrchestratorResult<bool>;

    /// 剩余TTL；键不存在或没有过期时间时返回 `None`
    async fn ttl(&self, key: &str) -> OrchestratorResult<Option<Duration>>;

    /// 计数小于 `limit` 时加一；新建计数键时设置 `window` 作为TTL
    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> OrchestratorResult<CounterOutcome>;

    /// 向集合添加成员；TTL只会延长，不会缩短
    async fn set_add(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> OrchestratorResult<()>;

    async fn set_remove(&self, key: &str, members: &[String]) -> OrchestratorResult<()>;

    async fn set_members(&self, key: &str) -> OrchestratorResult<Vec<String>>;

    async fn list_push(&self, key: &str, value: &[u8]) -> OrchestratorResult<()>;

    /// 先进先出弹出，最多阻塞 `timeout`
    async fn list_pop(&self, key: &str, timeout: Duration)
        -> OrchestratorResult<Option<Vec<u8>>>;

    async fn list_len(&self, key: &str) -> OrchestratorResult<u64>;

    async fn health_check(&self) -> OrchestratorResult<bool>;

    async fn close(&self) -> OrchestratorResult<()>;
}
