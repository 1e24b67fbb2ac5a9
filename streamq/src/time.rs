//! 时钟抽象
//! Clock abstraction
//!
//! 调度索引的分数是时间戳，因此推送与选择都通过可注入的时钟读取时间
//! Scheduling-index scores are timestamps, so pushing and selecting read the time
//! through an injectable clock.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// 时钟特性
/// Clock trait
pub trait Clock: Send + Sync + Debug {
  /// 当前时间
  /// Current time
  fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
/// System clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// 手动时钟，仅在显式设置时前进
/// Manual clock, only moves when explicitly set
#[derive(Debug, Clone)]
pub struct ManualClock {
  millis: Arc<AtomicI64>,
}

impl ManualClock {
  pub fn new(at: DateTime<Utc>) -> Self {
    Self {
      millis: Arc::new(AtomicI64::new(at.timestamp_millis())),
    }
  }

  pub fn set(&self, at: DateTime<Utc>) {
    self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
  }

  pub fn advance(&self, by: chrono::Duration) {
    self
      .millis
      .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new(Utc::now())
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    let millis = self.millis.load(Ordering::SeqCst);
    Utc
      .timestamp_millis_opt(millis)
      .single()
      .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
  }
}

/// 将时间转换为调度索引分数（秒，浮点）
/// Convert a time into a scheduling-index score (seconds, float)
pub fn score(at: DateTime<Utc>) -> f64 {
  at.timestamp_millis() as f64 / 1000.0
}
