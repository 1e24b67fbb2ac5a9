//! 内存存储实现
//! Memory store implementation
//!
//! 使用内存数据结构实现与 Redis 存储相同的语义，不依赖任何外部服务
//! Implements the same semantics as the Redis store with in-memory data structures,
//! without any external service dependency

use crate::event::RawStreamEntry;
use crate::time::{Clock, SystemClock};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// 认领记录
/// Claim record
#[derive(Debug, Clone)]
pub struct ClaimRecord {
  pub owner: String,
  pub expires_at: DateTime<Utc>,
}

/// 内存存储数据
/// In-memory storage data
#[derive(Debug, Default)]
pub struct MemoryStorage {
  /// 租户日志，按追加顺序
  /// Tenant logs, in append order
  pub streams: HashMap<String, Vec<RawStreamEntry>>,
  /// 调度索引：流键 -> 分数
  /// Scheduling index: stream key -> score
  pub index: HashMap<String, f64>,
  /// 重试计数器
  /// Retry-attempt counters
  pub attempts: HashMap<String, u64>,
  /// 认领：流键 -> 认领记录
  /// Claims: stream key -> claim record
  pub claims: HashMap<String, ClaimRecord>,
  /// 下一个条目序号
  /// Next entry sequence number
  pub next_seq: u64,
}

impl MemoryStorage {
  /// 生成下一个条目 ID
  /// Generate the next entry id
  pub(crate) fn next_entry_id(&mut self) -> String {
    self.next_seq += 1;
    format!("{}-0", self.next_seq)
  }

  /// 流为空时删除流与调度索引项
  /// Drop the stream and its index entry when the stream is empty
  pub(crate) fn remove_if_empty(&mut self, stream: &str) -> bool {
    let empty = self
      .streams
      .get(stream)
      .map(|entries| entries.is_empty())
      .unwrap_or(true);
    if empty {
      self.streams.remove(stream);
      self.index.remove(stream);
    }
    empty
  }

  /// 清除过期的认领
  /// Purge expired claims
  pub(crate) fn purge_expired_claims(&mut self, now: DateTime<Utc>) {
    self.claims.retain(|_, claim| claim.expires_at > now);
  }
}

/// 内存存储
/// Memory store
#[derive(Clone)]
pub struct MemoryStore {
  pub(crate) storage: Arc<RwLock<MemoryStorage>>,
  /// 认领过期使用的时钟
  /// Clock used for claim expiry
  pub(crate) clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryStore {
  /// 创建新的内存存储实例
  /// Create a new memory store instance
  pub fn new() -> Self {
    Self {
      storage: Arc::new(RwLock::new(MemoryStorage::default())),
      clock: Arc::new(SystemClock),
    }
  }

  /// 设置认领过期使用的时钟
  /// Set the clock used for claim expiry
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// 获取存储的引用
  /// Get storage reference
  pub fn storage(&self) -> &Arc<RwLock<MemoryStorage>> {
    &self.storage
  }

  /// 存储是否完全为空（没有流、索引项、计数器或认领）
  /// Whether the store holds nothing at all (no stream, index entry, counter or claim)
  pub async fn is_empty(&self) -> bool {
    let now = self.clock.now();
    let storage = self.storage.read().await;
    storage.streams.is_empty()
      && storage.index.is_empty()
      && storage.attempts.is_empty()
      && storage.claims.values().all(|c| c.expires_at <= now)
  }
}
