//! 存储模块
//! Store module
//!
//! 定义了与持久化存储交互的抽象层：租户流、调度索引、重试计数器和认领
//! Defines the abstraction layer over the durable store: tenant streams, the scheduling
//! index, retry-attempt counters and claims

use crate::error::Result;
use crate::event::{EventMessage, RawStreamEntry};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

pub mod constants;
pub mod keys;

/// 存储特性，Redis 与内存实现共享同一语义
/// Store trait, the Redis and in-memory implementations share the same semantics
///
/// 时间参数均为调度索引分数（Unix 秒，浮点）
/// Time arguments are scheduling-index scores (Unix seconds, float)
#[async_trait]
pub trait Store: Send + Sync {
  /// 测试连接
  /// Ping the connection
  async fn ping(&self) -> Result<()>;

  /// 释放连接；之后的调用会重新建立连接，停止使用由调用方（处理器的连接状态）负责
  /// Release the connection; a later call reconnects, so callers gate further use
  /// themselves (see the processor's connected state)
  async fn close(&self) -> Result<()>;

  /// 追加事件并把租户在调度索引中的分数设置为 `score`，原子执行
  /// Append an event and set the tenant's scheduling-index score to `score`, atomically
  ///
  /// 返回新条目的 ID
  /// Returns the new entry id
  async fn append(&self, stream: &str, msg: &EventMessage, score: f64) -> Result<String>;

  /// 按存储顺序读取流的全部条目
  /// Read every entry of a stream in stored order
  async fn read_stream(&self, stream: &str) -> Result<Vec<RawStreamEntry>>;

  /// 删除条目；若流因此变空，则同时删除流键和调度索引项
  /// Delete entries; when the stream becomes empty, drop its key and index entry too
  ///
  /// 返回流是否已被删除
  /// Returns whether the stream was removed
  async fn delete_entries(&self, stream: &str, ids: &[String]) -> Result<bool>;

  /// 若流为空（或不存在），删除流键与调度索引项
  /// Remove the stream key and index entry when the stream is empty (or missing)
  async fn remove_if_empty(&self, stream: &str) -> Result<bool>;

  /// 计数器加一，返回新值
  /// Increment a counter, returning the new value
  async fn incr_attempts(&self, field: &str) -> Result<u64>;

  /// 删除计数器
  /// Delete counters
  async fn clear_attempts(&self, fields: &[String]) -> Result<()>;

  /// 认领分数最小且 `<= now` 的未被认领的流
  /// Claim the unclaimed stream with the lowest score `<= now`
  async fn claim_next(&self, now: f64, owner: &str, ttl: Duration) -> Result<Option<String>>;

  /// 释放认领（仅当认领仍属于 `owner`）
  /// Release a claim (only if it still belongs to `owner`)
  async fn release(&self, stream: &str, owner: &str) -> Result<bool>;

  // Inspection
  // 检查相关方法

  /// 流中的条目数
  /// Number of entries in a stream
  async fn stream_len(&self, stream: &str) -> Result<u64>;

  /// 调度索引的全部内容，按分数升序
  /// The whole scheduling index, ascending by score
  async fn scheduled_streams(&self) -> Result<Vec<(String, f64)>>;

  /// 全部重试计数器
  /// Every retry-attempt counter
  async fn attempts(&self) -> Result<HashMap<String, u64>>;

  /// 当前有效的认领
  /// Currently held claims
  async fn claims(&self) -> Result<HashMap<String, String>>;
}
