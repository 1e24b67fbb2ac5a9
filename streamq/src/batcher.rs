//! 批次分组
//! Batch grouping
//!
//! 将一个租户的流快照按拉取请求分组，保持拉取请求首次出现的顺序以及批次内的事件顺序
//! Groups a tenant's stream snapshot by pull request, keeping the first-appearance order
//! of pull requests and the event order inside each batch.

use crate::error::Error;
use crate::event::{Event, PullRequest, RawStreamEntry};
use std::collections::HashMap;

/// 工作批次：一次评估引擎调用的输入
/// Work batch: the input of one evaluation engine call
#[derive(Debug, Clone, PartialEq)]
pub struct WorkBatch {
  pub pull: PullRequest,
  /// 批次内条目的 ID，与 `events` 一一对应
  /// Entry ids of the batch, parallel to `events`
  pub message_ids: Vec<String>,
  pub events: Vec<Event>,
}

/// 无法解码的条目
/// An entry that failed to decode
#[derive(Debug)]
pub struct MalformedEntry {
  pub id: String,
  pub error: Error,
}

/// 分组结果
#[derive(Debug, Default)]
pub struct Grouped {
  pub batches: Vec<WorkBatch>,
  pub malformed: Vec<MalformedEntry>,
}

/// 按拉取请求分组，按键相等而非相邻
/// Group by pull request, by key equality rather than contiguity
pub fn group_by_pull(entries: Vec<RawStreamEntry>) -> Grouped {
  let mut grouped = Grouped::default();
  let mut index: HashMap<PullRequest, usize> = HashMap::new();

  for entry in entries {
    let decoded = match entry.decode() {
      Ok(decoded) => decoded,
      Err(error) => {
        grouped.malformed.push(MalformedEntry {
          id: entry.id,
          error,
        });
        continue;
      }
    };
    let pull = decoded.message.pull;
    let position = match index.get(&pull) {
      Some(position) => *position,
      None => {
        grouped.batches.push(WorkBatch {
          pull: pull.clone(),
          message_ids: Vec::new(),
          events: Vec::new(),
        });
        index.insert(pull, grouped.batches.len() - 1);
        grouped.batches.len() - 1
      }
    };
    let batch = &mut grouped.batches[position];
    batch.message_ids.push(decoded.id);
    batch.events.push(decoded.message.event);
  }

  grouped
}
