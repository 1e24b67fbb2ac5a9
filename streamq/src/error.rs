//! 错误处理模块
//! Error handling module
//!
//! 定义了 streamq 中使用的各种错误类型。评估引擎的失败分类见 [`crate::engine::EngineError`]
//! Defines the error types used in streamq. Evaluation engine failures are classified by
//! [`crate::engine::EngineError`] instead.

use thiserror::Error;

/// streamq 的结果类型
/// Result type for streamq
pub type Result<T> = std::result::Result<T, Error>;

/// streamq 错误类型
/// streamq error type
#[derive(Error, Debug)]
pub enum Error {
  /// Redis connection error
  #[error("Redis connection error: {0}")]
  Redis(#[from] redis::RedisError),

  /// 序列化错误
  /// Serialization error
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// 无效的流名称
  /// Invalid stream name
  #[error("Invalid stream name: {name}")]
  InvalidStreamName { name: String },

  /// 流条目格式错误
  /// Malformed stream entry
  #[error("Malformed stream entry {id}: {message}")]
  MalformedEntry { id: String, message: String },

  /// 处理器尚未连接
  /// Processor is not connected
  #[error("Stream processor is not connected")]
  NotConnected,

  /// 工作池已在运行
  /// Worker pool is already running
  #[error("Worker is already running")]
  WorkerRunning,

  /// 配置错误
  /// Configuration error
  #[error("Configuration error: {message}")]
  Config { message: String },

  /// IO 错误
  /// IO error
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),

  /// 其他错误
  /// Other error
  #[error("Other error: {message}")]
  Other { message: String },
}

impl Error {
  /// 创建配置错误
  /// Create a configuration error
  pub fn config<S: Into<String>>(message: S) -> Self {
    Self::Config {
      message: message.into(),
    }
  }

  /// 创建其他错误
  /// Create another type of error
  pub fn other<S: Into<String>>(message: S) -> Self {
    Self::Other {
      message: message.into(),
    }
  }

  /// 创建条目格式错误
  /// Create a malformed entry error
  pub fn malformed<I: Into<String>, S: Into<String>>(id: I, message: S) -> Self {
    Self::MalformedEntry {
      id: id.into(),
      message: message.into(),
    }
  }

  /// 检查是否为可重试错误（存储连接类失败）
  /// Check if the error is retriable (store connectivity failures)
  pub fn is_retriable(&self) -> bool {
    match self {
      Error::Redis(e) => {
        e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
      }
      Error::Io(_) => true,
      Error::Serialization(_)
      | Error::InvalidStreamName { .. }
      | Error::MalformedEntry { .. }
      | Error::NotConnected
      | Error::WorkerRunning
      | Error::Config { .. }
      | Error::Other { .. } => false,
    }
  }
}
