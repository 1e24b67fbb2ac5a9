//! 处理循环
//! Processing loop
//!
//! 一个 StreamRunner 就是工作池中的一个顺序循环：认领下一个可处理的流并执行一轮处理；
//! 没有可处理的流时休眠 `idle_interval`，存储出错时记录日志并休眠 `error_backoff`
//! A StreamRunner is one sequential loop of the worker pool: claim the next eligible stream
//! and run a pass over it; sleep `idle_interval` when nothing is eligible, log and sleep
//! `error_backoff` on a store error

use crate::components::processor::StreamProcessor;
use crate::components::ComponentLifecycle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 处理循环
/// Processing loop
pub struct StreamRunner {
  id: usize,
  processor: Arc<StreamProcessor>,
  idle_interval: Duration,
  error_backoff: Duration,
  token: CancellationToken,
  done: AtomicBool,
}

impl StreamRunner {
  pub fn new(
    id: usize,
    processor: Arc<StreamProcessor>,
    idle_interval: Duration,
    error_backoff: Duration,
    token: CancellationToken,
  ) -> Self {
    Self {
      id,
      processor,
      idle_interval,
      error_backoff,
      token,
      done: AtomicBool::new(false),
    }
  }

  /// 休眠，收到停止信号时提前返回 `false`
  /// Sleep, returning `false` early when stopped
  async fn pause(&self, duration: Duration) -> bool {
    tokio::select! {
      _ = self.token.cancelled() => false,
      _ = tokio::time::sleep(duration) => true,
    }
  }

  async fn run(&self) {
    tracing::debug!(runner = self.id, "stream runner started");
    while !self.token.is_cancelled() {
      match self.processor.consume_next().await {
        Ok(Some(report)) => {
          tracing::trace!(runner = self.id, stream = %report.stream, "stream consumed");
        }
        Ok(None) => {
          if !self.pause(self.idle_interval).await {
            break;
          }
        }
        Err(e) => {
          tracing::error!(runner = self.id, error = %e, "failed to consume stream");
          if !self.pause(self.error_backoff).await {
            break;
          }
        }
      }
    }
    self.done.store(true, Ordering::SeqCst);
    tracing::debug!(runner = self.id, "stream runner exited");
  }
}

impl ComponentLifecycle for StreamRunner {
  fn start(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move { self.run().await })
  }

  fn shutdown(&self) {
    self.token.cancel();
  }

  fn is_done(&self) -> bool {
    self.done.load(Ordering::SeqCst)
  }
}
