//! 客户端模块
//! Client module
//!
//! 提供事件推送功能：把事件追加到租户流，并刷新租户在调度索引中的分数
//! Provides event pushing: appends an event to the tenant stream and refreshes the
//! tenant's score in the scheduling index

use crate::base::Store;
use crate::error::Result;
use crate::event::{Event, EventMessage, PullRequest};
use crate::rdb::RedisStore;
use crate::redis::RedisConnectionConfig;
use crate::time::{self, Clock, SystemClock};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

/// streamq 客户端，负责推送事件
/// streamq client, responsible for pushing events
#[derive(Clone)]
pub struct Client {
  store: Arc<dyn Store>,
  clock: Arc<dyn Clock>,
}

impl Client {
  /// 创建新的客户端实例
  /// Create a new client instance
  pub fn new(store: Arc<dyn Store>) -> Self {
    Self {
      store,
      clock: Arc::new(SystemClock),
    }
  }

  /// 连接 Redis 并创建客户端
  /// Connect to Redis and create a client
  pub async fn connect(redis_connection: RedisConnectionConfig) -> Result<Self> {
    let store = RedisStore::new(redis_connection).await?;
    Ok(Self::new(Arc::new(store)))
  }

  /// 设置推送时间使用的时钟
  /// Set the clock used for push times
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// 获取存储实例
  /// Get the store instance
  pub fn get_store(&self) -> Arc<dyn Store> {
    self.store.clone()
  }

  /// 推送事件，租户立即可被处理
  /// Push an event, the tenant becomes eligible right away
  ///
  /// 返回新条目的 ID；存储失败直接返回给调用者，不做重试
  /// Returns the new entry id; store failures are returned to the caller, not retried
  pub async fn push(
    &self,
    installation_id: u64,
    owner: &str,
    repo: &str,
    pull_number: u64,
    event_type: &str,
    data: Value,
  ) -> Result<String> {
    let pull = PullRequest::new(installation_id, owner, repo, pull_number);
    self
      .push_at(&pull, Event::new(event_type, data), self.clock.now())
      .await
  }

  /// 推送事件，并把租户的可处理时间设置为 `at`
  /// Push an event and set the tenant's eligibility time to `at`
  ///
  /// 每次推送都会覆盖租户的分数，因此后续推送会推迟已排定的租户
  /// Every push overwrites the tenant score, so a later push postpones a scheduled tenant
  pub async fn push_at(&self, pull: &PullRequest, event: Event, at: DateTime<Utc>) -> Result<String> {
    let stream = pull.stream_key();
    let msg = EventMessage::new(pull.clone(), event);
    let id = self.store.append(&stream, &msg, time::score(at)).await?;
    tracing::debug!(
      stream = %stream,
      id = %id,
      pull = %pull,
      event_type = %msg.event.event_type,
      "event pushed"
    );
    Ok(id)
  }

  /// 关闭客户端
  /// Close the client
  pub async fn close(&self) -> Result<()> {
    self.store.close().await
  }
}
