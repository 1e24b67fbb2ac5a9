use std::time::Duration;

/// 调度索引（有序集合）的键名
/// Key of the scheduling index (sorted set)
pub const STREAMS_KEY: &str = "streams";

/// 重试计数哈希表的键名
/// Key of the retry-attempt counter hash
pub const ATTEMPTS_KEY: &str = "attempts";

/// 默认最大尝试次数，第三次失败即放弃
/// Default maximum attempts, the third failure abandons
pub const DEFAULT_MAX_ATTEMPTS: u64 = 3;

/// 没有可处理的流时的休眠间隔
/// Sleep interval when no stream is eligible
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_millis(420);

/// 存储错误后的退避时间
/// Back-off after a store error
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// 认领过期时间
/// Claim expiry
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(300);

/// 版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
