//! 配置模块
//! Configuration module
//!
//! 定义了工作池的配置选项
//! Defines the configuration options of the worker pool

use crate::base::constants::{
  DEFAULT_CLAIM_TTL, DEFAULT_ERROR_BACKOFF, DEFAULT_IDLE_INTERVAL, DEFAULT_MAX_ATTEMPTS,
};
use crate::error::{Error, Result};
use std::time::Duration;

pub const ENV_WORKER_COUNT: &str = "STREAMQ_WORKER_COUNT";
pub const ENV_IDLE_INTERVAL_MS: &str = "STREAMQ_IDLE_INTERVAL_MS";
pub const ENV_MAX_ATTEMPTS: &str = "STREAMQ_MAX_ATTEMPTS";
pub const ENV_CLAIM_TTL_SECS: &str = "STREAMQ_CLAIM_TTL_SECS";

/// 工作池配置
/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// 并发处理循环数
  /// Number of concurrent processing loops
  pub worker_count: usize,
  /// 没有可处理的流时的休眠间隔
  /// Sleep interval when no stream is eligible
  pub idle_interval: Duration,
  /// 存储错误后的退避时间
  /// Back-off after a store error
  pub error_backoff: Duration,
  /// 拉取请求级与流级的最大尝试次数
  /// Maximum attempts for both pull and stream scope
  pub max_attempts: u64,
  /// 认领过期时间
  /// Claim expiry
  pub claim_ttl: Duration,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      worker_count: num_cpus::get(),
      idle_interval: DEFAULT_IDLE_INTERVAL,
      error_backoff: DEFAULT_ERROR_BACKOFF,
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      claim_ttl: DEFAULT_CLAIM_TTL,
    }
  }
}

impl WorkerConfig {
  /// 创建新的工作池配置
  /// Create a new worker pool configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// 从环境变量读取配置，未设置的项使用默认值
  /// Read the configuration from environment variables, unset items keep their defaults
  pub fn from_env() -> Result<Self> {
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// 从任意键值来源读取配置
  /// Read the configuration from any key/value source
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    let parse = |key: &str| -> Result<Option<u64>> {
      match lookup(key) {
        None => Ok(None),
        Some(value) => value
          .trim()
          .parse::<u64>()
          .map(Some)
          .map_err(|e| Error::config(format!("{key}={value:?}: {e}"))),
      }
    };

    let mut config = Self::default();
    if let Some(count) = parse(ENV_WORKER_COUNT)? {
      config = config.worker_count(count as usize);
    }
    if let Some(ms) = parse(ENV_IDLE_INTERVAL_MS)? {
      config = config.idle_interval(Duration::from_millis(ms));
    }
    if let Some(attempts) = parse(ENV_MAX_ATTEMPTS)? {
      config = config.max_attempts(attempts);
    }
    if let Some(secs) = parse(ENV_CLAIM_TTL_SECS)? {
      config = config.claim_ttl(Duration::from_secs(secs));
    }
    config.validate()?;
    Ok(config)
  }

  /// 设置并发处理循环数
  /// Set the number of concurrent processing loops
  pub fn worker_count(mut self, worker_count: usize) -> Self {
    self.worker_count = worker_count.max(1);
    self
  }

  pub fn idle_interval(mut self, interval: Duration) -> Self {
    self.idle_interval = interval;
    self
  }

  pub fn error_backoff(mut self, backoff: Duration) -> Self {
    self.error_backoff = backoff;
    self
  }

  /// 设置最大尝试次数
  /// Set the maximum attempts
  pub fn max_attempts(mut self, max_attempts: u64) -> Self {
    self.max_attempts = max_attempts;
    self
  }

  pub fn claim_ttl(mut self, ttl: Duration) -> Self {
    self.claim_ttl = ttl;
    self
  }

  /// 验证配置
  /// Validate the configuration
  pub fn validate(&self) -> Result<()> {
    if self.worker_count == 0 {
      return Err(Error::config("Worker count must be greater than 0"));
    }
    if self.max_attempts == 0 {
      return Err(Error::config("Max attempts must be greater than 0"));
    }
    if self.claim_ttl < Duration::from_secs(1) {
      return Err(Error::config("Claim TTL cannot be less than 1 second"));
    }
    Ok(())
  }
}
