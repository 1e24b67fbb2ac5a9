//! 处理器模块
//! Processor module
//!
//! ## 概述 / Overview
//!
//! StreamProcessor 每次处理一个租户流：读取流快照，按拉取请求分组，依次交给评估引擎，
//! 并根据引擎返回的错误分类决定重试还是放弃。
//!
//! The StreamProcessor works one tenant stream at a time: it reads a snapshot of the
//! stream, groups it by pull request, hands each batch to the evaluation engine in order
//! and applies the retry/abandon policy that matches the returned error class.
//!
//! ## 重试策略 / Retry policy
//!
//! | 结果 / Outcome | 范围 / Scope | 处理 / Handling |
//! |---|---|---|
//! | `Ok` | pull | 删除批次条目和计数器 / delete the batch entries and counter |
//! | `PullRetryable` | pull | 计数加一，达到上限则丢弃批次 / count, drop the batch at the limit |
//! | `StreamRetryable` | stream | 计数加一并停止本轮，达到上限则丢弃剩余条目 / count and stop the pass, drop everything left of the snapshot at the limit |
//! | `Fatal` | pull | 记录错误并丢弃批次 / log and drop the batch |
//!
//! ## 使用示例 / Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamq::components::processor::StreamProcessor;
//! use streamq::engine::EngineFunc;
//! use streamq::memdb::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = EngineFunc::new(|_pull: &streamq::PullRequest, _sources: Vec<streamq::Event>| Ok(()));
//! let processor = StreamProcessor::new(Arc::new(MemoryStore::new()), Arc::new(engine));
//! processor.connect().await?;
//! while let Some(report) = processor.consume_next().await? {
//!   println!("{} pull requests processed", report.processed.len());
//! }
//! processor.close().await?;
//! # Ok(())
//! # }
//! ```

use crate::base::constants::{DEFAULT_CLAIM_TTL, DEFAULT_MAX_ATTEMPTS};
use crate::base::keys;
use crate::base::Store;
use crate::batcher::{self, WorkBatch};
use crate::engine::{Engine, EngineError};
use crate::error::{Error, Result};
use crate::event::PullRequest;
use crate::time::{self, Clock, SystemClock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 一轮处理中流级别的结果
/// Stream-level outcome of one pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamOutcome {
  /// 所有批次都已尝试
  /// Every batch was attempted
  #[default]
  Completed,
  /// 流级可重试错误，本轮提前停止
  /// Stream-retryable failure, the pass stopped early
  Retrying { attempts: u64 },
  /// 流级重试次数耗尽，剩余条目已丢弃
  /// Stream retries exhausted, the remaining entries were dropped
  Abandoned,
}

/// 一轮处理的报告
/// Report of one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
  pub stream: String,
  /// 成功处理的拉取请求
  /// Pull requests processed successfully
  pub processed: Vec<PullRequest>,
  /// 将在下一轮重试的拉取请求
  /// Pull requests kept for a later pass
  pub retrying: Vec<PullRequest>,
  /// 重试次数耗尽而被丢弃的拉取请求（包括流级放弃时的剩余批次）
  /// Pull requests dropped after exhausting retries (including the remaining batches of a
  /// stream abandonment)
  pub abandoned: Vec<PullRequest>,
  /// 因致命错误被丢弃的拉取请求
  /// Pull requests dropped on a fatal error
  pub dropped: Vec<PullRequest>,
  /// 无法解码而被删除的条目 ID
  /// Ids of entries deleted because they could not be decoded
  pub malformed: Vec<String>,
  pub outcome: StreamOutcome,
}

impl PassReport {
  fn new(stream: &str) -> Self {
    Self {
      stream: stream.to_string(),
      ..Default::default()
    }
  }
}

/// 流认领守卫
/// Stream claim guard
///
/// 显式调用 [`StreamClaim::release`] 释放；未释放就被丢弃时会在当前运行时后台释放，
/// 若都失败则由认领过期兜底
/// Released explicitly through [`StreamClaim::release`]; an unreleased claim is released in
/// the background on drop, and the claim TTL covers whatever is left
pub struct StreamClaim {
  store: Arc<dyn Store>,
  stream: String,
  owner: String,
  released: bool,
}

impl std::fmt::Debug for StreamClaim {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StreamClaim")
      .field("stream", &self.stream)
      .field("owner", &self.owner)
      .field("released", &self.released)
      .finish()
  }
}

impl StreamClaim {
  pub fn stream_name(&self) -> &str {
    &self.stream
  }

  /// 释放认领，返回认领是否仍属于本处理器
  /// Release the claim, returning whether it was still held by this processor
  pub async fn release(mut self) -> Result<bool> {
    self.released = true;
    self.store.release(&self.stream, &self.owner).await
  }
}

impl Drop for StreamClaim {
  fn drop(&mut self) {
    if self.released {
      return;
    }
    let store = Arc::clone(&self.store);
    let stream = std::mem::take(&mut self.stream);
    let owner = std::mem::take(&mut self.owner);
    if let Ok(rt) = tokio::runtime::Handle::try_current() {
      rt.spawn(async move {
        if let Err(e) = store.release(&stream, &owner).await {
          tracing::warn!(stream = %stream, error = %e, "(Drop) failed to release claim");
        }
      });
    } else {
      tracing::warn!(
        stream = %stream,
        "(Drop) no runtime available, claim is left to expire"
      );
    }
  }
}

/// 流处理器
/// Stream processor
pub struct StreamProcessor {
  store: Arc<dyn Store>,
  engine: Arc<dyn Engine>,
  clock: Arc<dyn Clock>,
  max_attempts: u64,
  claim_ttl: Duration,
  worker_id: String,
  connected: AtomicBool,
}

impl StreamProcessor {
  /// 创建新的流处理器
  /// Create a new stream processor
  pub fn new(store: Arc<dyn Store>, engine: Arc<dyn Engine>) -> Self {
    let host = hostname::get()
      .unwrap_or_default()
      .to_string_lossy()
      .to_string();
    let worker_id = format!("{}:{}:{}", host, std::process::id(), Uuid::new_v4());
    Self {
      store,
      engine,
      clock: Arc::new(SystemClock),
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      claim_ttl: DEFAULT_CLAIM_TTL,
      worker_id,
      connected: AtomicBool::new(false),
    }
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  /// 设置最大尝试次数（拉取请求级与流级共用）
  /// Set the maximum attempts (shared by pull and stream scope)
  /// 0 在 [`StreamProcessor::connect`] 时被拒绝
  /// Zero is rejected by [`StreamProcessor::connect`]
  pub fn max_attempts(mut self, max_attempts: u64) -> Self {
    self.max_attempts = max_attempts;
    self
  }

  pub fn claim_ttl(mut self, ttl: Duration) -> Self {
    self.claim_ttl = ttl;
    self
  }

  /// 认领者标识 `host:pid:uuid`
  /// Claim owner identity `host:pid:uuid`
  pub fn worker_id(&self) -> &str {
    &self.worker_id
  }

  pub fn store(&self) -> Arc<dyn Store> {
    self.store.clone()
  }

  /// 连接存储
  /// Connect to the store
  pub async fn connect(&self) -> Result<()> {
    if self.max_attempts == 0 {
      return Err(Error::config("max_attempts must be at least 1"));
    }
    self.store.ping().await?;
    self.connected.store(true, Ordering::SeqCst);
    Ok(())
  }

  /// 关闭存储连接
  /// Close the store connection
  pub async fn close(&self) -> Result<()> {
    self.connected.store(false, Ordering::SeqCst);
    self.store.close().await
  }

  pub fn is_connected(&self) -> bool {
    self.connected.load(Ordering::SeqCst)
  }

  fn ensure_connected(&self) -> Result<()> {
    if self.is_connected() {
      Ok(())
    } else {
      Err(Error::NotConnected)
    }
  }

  /// 认领下一个可处理的流
  /// Claim the next eligible stream
  pub async fn next_stream(&self) -> Result<Option<StreamClaim>> {
    self.ensure_connected()?;
    let now = time::score(self.clock.now());
    let claimed = self
      .store
      .claim_next(now, &self.worker_id, self.claim_ttl)
      .await?;
    Ok(claimed.map(|stream| StreamClaim {
      store: self.store.clone(),
      stream,
      owner: self.worker_id.clone(),
      released: false,
    }))
  }

  /// 认领下一个可处理的流并在其上执行 `f`，无论成功与否都会释放认领
  /// Claim the next eligible stream and run `f` on it, releasing the claim either way
  pub async fn with_next_stream<F, Fut, T>(&self, f: F) -> Result<Option<T>>
  where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = T>,
  {
    let Some(claim) = self.next_stream().await? else {
      return Ok(None);
    };
    let value = f(claim.stream_name().to_string()).await;
    claim.release().await?;
    Ok(Some(value))
  }

  /// 认领并处理下一个可处理的流；没有可处理的流时返回 `None`
  /// Claim and consume the next eligible stream; `None` when nothing is eligible
  pub async fn consume_next(&self) -> Result<Option<PassReport>> {
    self
      .with_next_stream(|stream| async move { self.consume(&stream).await })
      .await?
      .transpose()
  }

  /// 对一个流执行一轮处理
  /// Run one pass over a stream
  pub async fn consume(&self, stream: &str) -> Result<PassReport> {
    self.ensure_connected()?;
    keys::installation_id(stream)?;

    let mut report = PassReport::new(stream);
    let entries = self.store.read_stream(stream).await?;
    let grouped = batcher::group_by_pull(entries);

    if !grouped.malformed.is_empty() {
      let mut ids = Vec::with_capacity(grouped.malformed.len());
      for entry in grouped.malformed {
        tracing::error!(
          stream = %stream,
          id = %entry.id,
          error = %entry.error,
          "dropping malformed stream entry"
        );
        ids.push(entry.id);
      }
      self.store.delete_entries(stream, &ids).await?;
      report.malformed = ids;
    }

    // 本轮中因拉取请求级重试而保留的批次
    let mut kept: Vec<WorkBatch> = Vec::new();
    let mut batches = grouped.batches.into_iter();
    while let Some(batch) = batches.next() {
      let WorkBatch {
        pull,
        message_ids,
        events,
      } = batch;

      match self.engine.run(&pull, events).await {
        Ok(()) => {
          self.store.delete_entries(stream, &message_ids).await?;
          self.store.clear_attempts(&[pull.attempt_field()]).await?;
          report.processed.push(pull);
        }
        Err(EngineError::PullRetryable { reason }) => {
          let attempts = self.store.incr_attempts(&pull.attempt_field()).await?;
          if attempts >= self.max_attempts {
            tracing::error!(
              stream = %stream,
              installation_id = pull.installation_id,
              owner = %pull.owner,
              repo = %pull.repo,
              pull_number = pull.pull_number,
              attempts,
              error = %reason,
              "failed to process pull request, abandoning"
            );
            self.store.delete_entries(stream, &message_ids).await?;
            self.store.clear_attempts(&[pull.attempt_field()]).await?;
            report.abandoned.push(pull);
          } else {
            tracing::info!(
              stream = %stream,
              installation_id = pull.installation_id,
              owner = %pull.owner,
              repo = %pull.repo,
              pull_number = pull.pull_number,
              attempts,
              error = %reason,
              "failed to process pull request, retrying"
            );
            report.retrying.push(pull.clone());
            kept.push(WorkBatch {
              pull,
              message_ids,
              events: Vec::new(),
            });
          }
        }
        Err(EngineError::StreamRetryable {
          reason,
          retry_after,
        }) => {
          let field = keys::stream_attempt_field(stream);
          let attempts = self.store.incr_attempts(&field).await?;
          let retry_after_secs = retry_after.map(|d| d.as_secs());
          if attempts >= self.max_attempts {
            tracing::error!(
              stream = %stream,
              attempts,
              retry_after = ?retry_after_secs,
              error = %reason,
              "failed to process stream, abandoning"
            );
            // 快照中所有尚存的批次：本轮保留的、当前的以及之后的
            let mut ids = message_ids;
            let mut fields = vec![field, pull.attempt_field()];
            report.retrying.clear();
            report.abandoned.push(pull);
            for rest in kept.drain(..).chain(batches.by_ref()) {
              ids.extend(rest.message_ids);
              fields.push(rest.pull.attempt_field());
              report.abandoned.push(rest.pull);
            }
            self.store.delete_entries(stream, &ids).await?;
            self.store.clear_attempts(&fields).await?;
            report.outcome = StreamOutcome::Abandoned;
          } else {
            tracing::info!(
              stream = %stream,
              attempts,
              retry_after = ?retry_after_secs,
              error = %reason,
              "failed to process stream, retrying"
            );
            report.outcome = StreamOutcome::Retrying { attempts };
          }
          break;
        }
        Err(EngineError::Fatal(e)) => {
          tracing::error!(
            stream = %stream,
            installation_id = pull.installation_id,
            owner = %pull.owner,
            repo = %pull.repo,
            pull_number = pull.pull_number,
            error = %e,
            "failed to process pull request"
          );
          self.store.delete_entries(stream, &message_ids).await?;
          self.store.clear_attempts(&[pull.attempt_field()]).await?;
          report.dropped.push(pull);
        }
      }
    }

    if report.outcome == StreamOutcome::Completed {
      self
        .store
        .clear_attempts(&[keys::stream_attempt_field(stream)])
        .await?;
    }
    self.store.remove_if_empty(stream).await?;

    tracing::debug!(
      stream = %stream,
      processed = report.processed.len(),
      retrying = report.retrying.len(),
      abandoned = report.abandoned.len(),
      dropped = report.dropped.len(),
      malformed = report.malformed.len(),
      "stream pass finished"
    );
    Ok(report)
  }
}
