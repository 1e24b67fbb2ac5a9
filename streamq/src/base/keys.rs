//! Redis 键名 - 流、计数器字段与认领键
//! Redis key names - streams, counter fields and claim keys
//!
//! 键格式 / Key formats:
//! - `stream~{installation_id}`: 租户日志，同时也是 `streams` 的成员和流级计数器字段
//! - `pull~{installation_id}~{owner}~{repo}~{pull_number}`: 拉取请求级计数器字段
//! - `claim~stream~{installation_id}`: 处理器认领

use crate::error::{Error, Result};

pub const STREAM_PREFIX: &str = "stream~";
pub const PULL_PREFIX: &str = "pull~";
pub const CLAIM_PREFIX: &str = "claim~";

/// 生成租户流键: stream~{installation_id}
/// Generate the tenant stream key: stream~{installation_id}
pub fn stream_key(installation_id: u64) -> String {
  format!("{STREAM_PREFIX}{installation_id}")
}

/// 从流键中解析出 installation id
/// Parse the installation id out of a stream key
pub fn installation_id(stream_name: &str) -> Result<u64> {
  stream_name
    .strip_prefix(STREAM_PREFIX)
    .and_then(|id| id.parse::<u64>().ok())
    .ok_or_else(|| Error::InvalidStreamName {
      name: stream_name.to_string(),
    })
}

/// 拉取请求级计数器字段
/// Pull-scope attempt counter field
pub fn pull_attempt_field(installation_id: u64, owner: &str, repo: &str, pull_number: u64) -> String {
  format!("{PULL_PREFIX}{installation_id}~{owner}~{repo}~{pull_number}")
}

/// 流级计数器字段，与流键相同
/// Stream-scope attempt counter field, identical to the stream key
pub fn stream_attempt_field(stream_name: &str) -> String {
  stream_name.to_string()
}

/// 认领键: claim~stream~{installation_id}
/// Claim key: claim~stream~{installation_id}
pub fn claim_key(stream_name: &str) -> String {
  format!("{CLAIM_PREFIX}{stream_name}")
}
