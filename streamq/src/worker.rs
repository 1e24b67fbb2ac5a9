//! 工作池模块
//! Worker pool module
//!
//! Worker 监督 `worker_count` 个独立的处理循环，负责启动、协作式停止以及等待关闭完成
//! The Worker supervises `worker_count` independent processing loops: startup, cooperative
//! stop and waiting for shutdown to complete

use crate::base::Store;
use crate::components::processor::StreamProcessor;
use crate::components::runner::StreamRunner;
use crate::components::ComponentLifecycle;
use crate::config::WorkerConfig;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::time::{Clock, SystemClock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// 工作池状态
/// Worker pool state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  New,
  Running,
  Stopping,
  Closed,
}

/// 工作池
/// Worker pool
pub struct Worker {
  processor: Arc<StreamProcessor>,
  config: WorkerConfig,
  state: WorkerState,
  token: CancellationToken,
  runners: Vec<Arc<StreamRunner>>,
  handles: Vec<JoinHandle<()>>,
}

impl Worker {
  /// 创建新的工作池
  /// Create a new worker pool
  pub fn new(store: Arc<dyn Store>, engine: Arc<dyn Engine>, config: WorkerConfig) -> Self {
    Self::with_clock(store, engine, config, Arc::new(SystemClock))
  }

  /// 使用指定时钟创建工作池
  /// Create a worker pool with the given clock
  pub fn with_clock(
    store: Arc<dyn Store>,
    engine: Arc<dyn Engine>,
    config: WorkerConfig,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let processor = StreamProcessor::new(store, engine)
      .with_clock(clock)
      .max_attempts(config.max_attempts)
      .claim_ttl(config.claim_ttl);
    Self {
      processor: Arc::new(processor),
      config,
      state: WorkerState::New,
      token: CancellationToken::new(),
      runners: Vec::new(),
      handles: Vec::new(),
    }
  }

  pub fn processor(&self) -> Arc<StreamProcessor> {
    self.processor.clone()
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn is_running(&self) -> bool {
    self.state == WorkerState::Running
  }

  /// 连接存储并启动全部处理循环
  /// Connect to the store and start every processing loop
  pub async fn start(&mut self) -> Result<()> {
    if self.state != WorkerState::New {
      return Err(Error::WorkerRunning);
    }
    self.config.validate()?;
    self.processor.connect().await?;

    for id in 0..self.config.worker_count {
      let runner = Arc::new(StreamRunner::new(
        id,
        self.processor.clone(),
        self.config.idle_interval,
        self.config.error_backoff,
        self.token.child_token(),
      ));
      self.handles.push(runner.clone().start());
      self.runners.push(runner);
    }
    self.state = WorkerState::Running;
    tracing::info!(
      worker_id = %self.processor.worker_id(),
      worker_count = self.config.worker_count,
      "worker started"
    );
    Ok(())
  }

  /// 发送停止信号；进行中的处理会完成当前这一轮
  /// Raise the stop signal; in-flight passes finish
  pub fn stop(&mut self) {
    if self.state != WorkerState::Running {
      return;
    }
    tracing::info!("stopping worker");
    self.token.cancel();
    for runner in &self.runners {
      runner.shutdown();
    }
    self.state = WorkerState::Stopping;
  }

  /// 等待所有处理循环退出，然后关闭存储；仍在运行时先发送停止信号
  /// Wait for every processing loop to exit, then close the store; a running worker is
  /// stopped first
  pub async fn wait_shutdown_complete(&mut self) -> Result<()> {
    if self.state == WorkerState::Closed {
      return Ok(());
    }
    self.stop();
    for result in futures::future::join_all(self.handles.drain(..)).await {
      if let Err(e) = result {
        tracing::error!(error = %e, "stream runner task failed");
      }
    }
    self.runners.clear();
    self.state = WorkerState::Closed;
    self.processor.close().await?;
    tracing::info!("worker shut down");
    Ok(())
  }

  /// 停止并等待关闭完成
  /// Stop and wait for shutdown to complete
  pub async fn shutdown(&mut self) -> Result<()> {
    self.stop();
    self.wait_shutdown_complete().await
  }
}

impl Drop for Worker {
  fn drop(&mut self) {
    // 未正常关闭时至少停止后台循环
    self.token.cancel();
  }
}
