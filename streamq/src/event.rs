//! 事件模块
//! Event module
//!
//! 定义了事件、拉取请求标识以及它们在流条目中的存储格式
//! Defines events, pull request identity and their stored form inside stream entries

use crate::base::keys;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// 流条目中的字段名
/// Field names of a stream entry
pub mod fields {
  pub const INSTALLATION_ID: &str = "installation_id";
  pub const OWNER: &str = "owner";
  pub const REPO: &str = "repo";
  pub const PULL_NUMBER: &str = "pull_number";
  pub const EVENT_TYPE: &str = "event_type";
  pub const DATA: &str = "data";
}

/// 单个事件，交给评估引擎的 `sources` 元素
/// A single event, one element of the `sources` handed to the evaluation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
  /// 事件类型，例如 `pull_request`、`comment`
  /// Event type, e.g. `pull_request`, `comment`
  pub event_type: String,
  /// 不透明负载
  /// Opaque payload
  pub data: Value,
}

impl Event {
  pub fn new<S: Into<String>>(event_type: S, data: Value) -> Self {
    Self {
      event_type: event_type.into(),
      data,
    }
  }
}

/// 拉取请求标识：一个工作批次的键
/// Pull request identity: the key of one work batch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRequest {
  pub installation_id: u64,
  pub owner: String,
  pub repo: String,
  pub pull_number: u64,
}

impl PullRequest {
  pub fn new<O: Into<String>, R: Into<String>>(
    installation_id: u64,
    owner: O,
    repo: R,
    pull_number: u64,
  ) -> Self {
    Self {
      installation_id,
      owner: owner.into(),
      repo: repo.into(),
      pull_number,
    }
  }

  /// 所属租户的流键
  /// Stream key of the owning tenant
  pub fn stream_key(&self) -> String {
    keys::stream_key(self.installation_id)
  }

  /// 拉取请求级重试计数器字段
  /// Pull-scope attempt counter field
  pub fn attempt_field(&self) -> String {
    keys::pull_attempt_field(
      self.installation_id,
      &self.owner,
      &self.repo,
      self.pull_number,
    )
  }
}

impl Display for PullRequest {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{}/{}#{} (installation {})",
      self.owner, self.repo, self.pull_number, self.installation_id
    )
  }
}

/// 事件消息：流中存储的完整记录
/// Event message: the full record stored in a stream
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
  pub pull: PullRequest,
  pub event: Event,
}

impl EventMessage {
  pub fn new(pull: PullRequest, event: Event) -> Self {
    Self { pull, event }
  }

  /// 编码为流条目字段，顺序固定
  /// Encode into stream entry fields, in a fixed order
  pub fn to_fields(&self) -> Result<Vec<(&'static str, String)>> {
    Ok(vec![
      (fields::INSTALLATION_ID, self.pull.installation_id.to_string()),
      (fields::OWNER, self.pull.owner.clone()),
      (fields::REPO, self.pull.repo.clone()),
      (fields::PULL_NUMBER, self.pull.pull_number.to_string()),
      (fields::EVENT_TYPE, self.event.event_type.clone()),
      (fields::DATA, serde_json::to_string(&self.event.data)?),
    ])
  }

  /// 从流条目字段解码
  /// Decode from stream entry fields
  pub fn from_fields(id: &str, map: &HashMap<String, String>) -> Result<Self> {
    let get = |name: &str| {
      map
        .get(name)
        .ok_or_else(|| Error::malformed(id, format!("missing field `{name}`")))
    };
    let number = |name: &str| -> Result<u64> {
      get(name)?
        .parse::<u64>()
        .map_err(|e| Error::malformed(id, format!("invalid `{name}`: {e}")))
    };
    let data = serde_json::from_str(get(fields::DATA)?)
      .map_err(|e| Error::malformed(id, format!("invalid `data`: {e}")))?;
    Ok(Self {
      pull: PullRequest {
        installation_id: number(fields::INSTALLATION_ID)?,
        owner: get(fields::OWNER)?.clone(),
        repo: get(fields::REPO)?.clone(),
        pull_number: number(fields::PULL_NUMBER)?,
      },
      event: Event {
        event_type: get(fields::EVENT_TYPE)?.clone(),
        data,
      },
    })
  }
}

/// 存储层返回的原始流条目
/// Raw stream entry as returned by the store
#[derive(Debug, Clone, PartialEq)]
pub struct RawStreamEntry {
  /// 条目 ID，例如 `1700000000000-0`
  /// Entry id, e.g. `1700000000000-0`
  pub id: String,
  pub fields: HashMap<String, String>,
}

impl RawStreamEntry {
  pub fn decode(&self) -> Result<StreamMessage> {
    Ok(StreamMessage {
      id: self.id.clone(),
      message: EventMessage::from_fields(&self.id, &self.fields)?,
    })
  }
}

/// 解码后的流条目
/// Decoded stream entry
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
  pub id: String,
  pub message: EventMessage,
}
