//! 评估引擎边界
//! Evaluation engine boundary
//!
//! 处理器对每个工作批次调用一次 [`Engine::run`]，并依据返回的 [`EngineError`] 决定
//! 重试范围：单个拉取请求、整个租户流，或直接丢弃
//! The processor calls [`Engine::run`] once per work batch and picks the retry scope from
//! the returned [`EngineError`]: one pull request, the whole tenant stream, or a drop.

use crate::event::{Event, PullRequest};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;
use thiserror::Error;

/// 评估引擎失败分类
/// Evaluation engine failure classification
#[derive(Error, Debug)]
pub enum EngineError {
  /// 单个拉取请求可重试（例如暂时无法获取拉取请求的数据）
  /// Retryable for one pull request (e.g. its data is temporarily unavailable)
  #[error("pull request retryable: {reason}")]
  PullRetryable { reason: String },

  /// 整个租户流可重试（例如速率限制或租户级服务错误）
  /// Retryable for the whole tenant stream (e.g. rate limiting or a tenant-wide outage)
  #[error("stream retryable: {reason}")]
  StreamRetryable {
    reason: String,
    /// 上游建议的等待时间，仅用于日志
    /// Wait time suggested upstream, logged only
    retry_after: Option<Duration>,
  },

  /// 其他任何失败
  /// Any other failure
  #[error("{0}")]
  Fatal(Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
  pub fn pull_retryable<S: Into<String>>(reason: S) -> Self {
    Self::PullRetryable {
      reason: reason.into(),
    }
  }

  pub fn stream_retryable<S: Into<String>>(reason: S, retry_after: Option<Duration>) -> Self {
    Self::StreamRetryable {
      reason: reason.into(),
      retry_after,
    }
  }

  pub fn fatal<E>(error: E) -> Self
  where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
  {
    Self::Fatal(error.into())
  }
}

/// 评估引擎特性
/// Evaluation engine trait
#[async_trait]
pub trait Engine: Send + Sync {
  /// 按推送顺序评估一个拉取请求的全部待处理事件
  /// Evaluate every pending event of one pull request, in push order
  async fn run(&self, pull: &PullRequest, sources: Vec<Event>) -> Result<(), EngineError>;
}

/// 函数式引擎适配器
/// Functional engine adapter
pub struct EngineFunc<F> {
  func: F,
}

impl<F> EngineFunc<F>
where
  F: Fn(&PullRequest, Vec<Event>) -> Result<(), EngineError> + Send + Sync,
{
  pub fn new(func: F) -> Self {
    Self { func }
  }
}

#[async_trait]
impl<F> Engine for EngineFunc<F>
where
  F: Fn(&PullRequest, Vec<Event>) -> Result<(), EngineError> + Send + Sync,
{
  async fn run(&self, pull: &PullRequest, sources: Vec<Event>) -> Result<(), EngineError> {
    (self.func)(pull, sources)
  }
}

/// 异步函数式引擎适配器
/// Asynchronous functional engine adapter
pub struct AsyncEngineFunc<F, Fut> {
  func: F,
  _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncEngineFunc<F, Fut>
where
  F: Fn(PullRequest, Vec<Event>) -> Fut + Send + Sync,
  Fut: Future<Output = Result<(), EngineError>> + Send,
{
  pub fn new(func: F) -> Self {
    Self {
      func,
      _phantom: PhantomData,
    }
  }
}

#[async_trait]
impl<F, Fut> Engine for AsyncEngineFunc<F, Fut>
where
  F: Fn(PullRequest, Vec<Event>) -> Fut + Send + Sync,
  Fut: Future<Output = Result<(), EngineError>> + Send,
{
  async fn run(&self, pull: &PullRequest, sources: Vec<Event>) -> Result<(), EngineError> {
    (self.func)(pull.clone(), sources).await
  }
}
