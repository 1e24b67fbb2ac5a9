//! Redis 配置和连接管理模块
//! Redis configuration and connection management module

use crate::error::Result;
use redis::{ConnectionInfo, IntoConnectionInfo};

/// 默认 Redis 地址
/// Default Redis address
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Redis 连接类型
/// Redis connection types
#[derive(Debug, Clone)]
pub enum RedisConnectionConfig {
  /// 单机连接
  /// Standalone connection
  Single(ConnectionInfo),
}

impl RedisConnectionConfig {
  /// 创建单机连接
  /// Create a standalone connection
  pub fn single<T: IntoConnectionInfo>(connection_info: T) -> Result<Self> {
    Ok(Self::Single(connection_info.into_connection_info()?))
  }

  /// 从 `REDIS_URL` 环境变量读取，缺省为本地地址
  /// Read from the `REDIS_URL` environment variable, defaulting to localhost
  pub fn from_env() -> Result<Self> {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| DEFAULT_REDIS_URL.to_string());
    Self::single(url)
  }

  pub fn connection_info(&self) -> &ConnectionInfo {
    match self {
      Self::Single(info) => info,
    }
  }
}
