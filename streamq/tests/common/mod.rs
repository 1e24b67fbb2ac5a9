//! Shared helpers for the integration tests: a scripted engine that records every call,
//! and a tracing layer that captures the crate's log lines.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use streamq::{Engine, EngineError, Event, PullRequest};
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// One recorded engine invocation
#[derive(Debug, Clone, PartialEq)]
pub struct EngineCall {
  pub pull: PullRequest,
  pub sources: Vec<Event>,
}

type Outcome = Box<dyn Fn(&PullRequest) -> Result<(), EngineError> + Send + Sync>;

/// Engine that replays queued outcomes in call order, succeeding once the queue is empty
#[derive(Default)]
pub struct ScriptedEngine {
  outcomes: Mutex<VecDeque<Outcome>>,
  fallback: Mutex<Option<Outcome>>,
  calls: Mutex<Vec<EngineCall>>,
}

impl ScriptedEngine {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  /// Queue the outcome of the next unscripted call
  pub fn then<F>(&self, outcome: F) -> &Self
  where
    F: Fn(&PullRequest) -> Result<(), EngineError> + Send + Sync + 'static,
  {
    self.outcomes.lock().unwrap().push_back(Box::new(outcome));
    self
  }

  /// Outcome used once the queue is exhausted (`Ok` when unset)
  pub fn always<F>(&self, outcome: F)
  where
    F: Fn(&PullRequest) -> Result<(), EngineError> + Send + Sync + 'static,
  {
    *self.fallback.lock().unwrap() = Some(Box::new(outcome));
  }

  pub fn reset_fallback(&self) {
    *self.fallback.lock().unwrap() = None;
  }

  pub fn calls(&self) -> Vec<EngineCall> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Engine for ScriptedEngine {
  async fn run(&self, pull: &PullRequest, sources: Vec<Event>) -> Result<(), EngineError> {
    self.calls.lock().unwrap().push(EngineCall {
      pull: pull.clone(),
      sources,
    });
    if let Some(outcome) = self.outcomes.lock().unwrap().pop_front() {
      return outcome(pull);
    }
    match self.fallback.lock().unwrap().as_ref() {
      Some(outcome) => outcome(pull),
      None => Ok(()),
    }
  }
}

pub fn pull_retryable(_: &PullRequest) -> Result<(), EngineError> {
  Err(EngineError::pull_retryable("mergeable state unknown"))
}

pub fn rate_limited(_: &PullRequest) -> Result<(), EngineError> {
  Err(EngineError::stream_retryable(
    "rate limited",
    Some(std::time::Duration::from_secs(123)),
  ))
}

pub fn fatal(_: &PullRequest) -> Result<(), EngineError> {
  Err(EngineError::fatal("boom"))
}

pub fn ok(_: &PullRequest) -> Result<(), EngineError> {
  Ok(())
}

/// One captured log line
#[derive(Debug, Clone)]
pub struct LogLine {
  pub level: Level,
  pub message: String,
  pub fields: HashMap<String, String>,
}

/// Tracing layer collecting the events emitted by the crate
#[derive(Clone, Default)]
pub struct LogCapture {
  lines: Arc<Mutex<Vec<LogLine>>>,
}

impl LogCapture {
  /// Install the capture as the default subscriber of the current thread
  pub fn install() -> (Self, DefaultGuard) {
    let capture = Self::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
  }

  pub fn lines(&self) -> Vec<LogLine> {
    self.lines.lock().unwrap().clone()
  }

  /// Messages logged at `level`, in order
  pub fn messages(&self, level: Level) -> Vec<String> {
    self
      .lines()
      .into_iter()
      .filter(|line| line.level == level)
      .map(|line| line.message)
      .collect()
  }
}

struct FieldVisitor<'a> {
  message: &'a mut String,
  fields: &'a mut HashMap<String, String>,
}

impl Visit for FieldVisitor<'_> {
  fn record_str(&mut self, field: &Field, value: &str) {
    if field.name() == "message" {
      *self.message = value.to_string();
    } else {
      self
        .fields
        .insert(field.name().to_string(), value.to_string());
    }
  }

  fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
    if field.name() == "message" {
      *self.message = format!("{value:?}");
    } else {
      self
        .fields
        .insert(field.name().to_string(), format!("{value:?}"));
    }
  }
}

impl<S: Subscriber> Layer<S> for LogCapture {
  fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
    let metadata = event.metadata();
    if !metadata.target().starts_with("streamq") {
      return;
    }
    let mut message = String::new();
    let mut fields = HashMap::new();
    event.record(&mut FieldVisitor {
      message: &mut message,
      fields: &mut fields,
    });
    self.lines.lock().unwrap().push(LogLine {
      level: *metadata.level(),
      message,
      fields,
    });
  }
}
