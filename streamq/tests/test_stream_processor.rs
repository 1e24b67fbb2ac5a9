//! Stream processor behaviour against the in-memory store: batching, the pull/stream
//! retry policy, fatal drops, date scheduling and claims.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::{fatal, ok, pull_retryable, rate_limited, EngineCall, LogCapture, ScriptedEngine};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use streamq::base::Store;
use streamq::client::Client;
use streamq::components::processor::{StreamOutcome, StreamProcessor};
use streamq::event::RawStreamEntry;
use streamq::memdb::MemoryStore;
use streamq::time::ManualClock;
use streamq::{Error, Event, PullRequest};
use tracing::Level;

fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

struct Harness {
  store: Arc<MemoryStore>,
  clock: Arc<ManualClock>,
  client: Client,
  engine: Arc<ScriptedEngine>,
  processor: StreamProcessor,
}

impl Harness {
  async fn new() -> Self {
    let clock = Arc::new(ManualClock::new(date(2020, 1, 1)));
    let store = Arc::new(MemoryStore::new().with_clock(clock.clone()));
    let client = Client::new(store.clone()).with_clock(clock.clone());
    let engine = ScriptedEngine::new();
    let processor = StreamProcessor::new(store.clone(), engine.clone()).with_clock(clock.clone());
    processor.connect().await.expect("connect should succeed");
    Self {
      store,
      clock,
      client,
      engine,
      processor,
    }
  }

  async fn push(&self, installation_id: u64, pull_number: u64, event_type: &str, payload: &str) {
    self
      .client
      .push(
        installation_id,
        "owner",
        "repo",
        pull_number,
        event_type,
        json!({ "payload": payload }),
      )
      .await
      .expect("push should succeed");
  }

  async fn index_len(&self) -> usize {
    self.store.scheduled_streams().await.unwrap().len()
  }

  async fn attempts(&self) -> HashMap<String, u64> {
    self.store.attempts().await.unwrap()
  }
}

fn call(installation_id: u64, pull_number: u64, sources: Vec<(&str, &str)>) -> EngineCall {
  EngineCall {
    pull: PullRequest::new(installation_id, "owner", "repo", pull_number),
    sources: sources
      .into_iter()
      .map(|(event_type, payload)| Event::new(event_type, json!({ "payload": payload })))
      .collect(),
  }
}

#[tokio::test]
async fn test_consume_unexisting_stream() {
  let h = Harness::new().await;
  let report = h.processor.consume("stream~666").await.unwrap();
  assert_eq!(h.engine.call_count(), 0);
  assert!(report.processed.is_empty());
  assert_eq!(report.outcome, StreamOutcome::Completed);
  assert!(h.store.is_empty().await);
  h.processor.close().await.unwrap();
}

#[tokio::test]
async fn test_consume_good_stream() {
  let h = Harness::new().await;
  h.push(12345, 123, "pull_request", "whatever").await;
  h.push(12345, 123, "comment", "foobar").await;

  assert_eq!(h.index_len().await, 1);
  assert_eq!(h.store.stream_len("stream~12345").await.unwrap(), 2);
  assert!(h.attempts().await.is_empty());

  let report = h.processor.consume("stream~12345").await.unwrap();
  h.processor.close().await.unwrap();

  assert_eq!(
    h.engine.calls(),
    vec![call(
      12345,
      123,
      vec![("pull_request", "whatever"), ("comment", "foobar")]
    )]
  );
  assert_eq!(report.processed.len(), 1);
  assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_stream_processor_retrying_pull() {
  let (logs, _guard) = LogCapture::install();
  let h = Harness::new().await;
  h.engine
    .then(pull_retryable)
    .then(pull_retryable)
    .then(ok)
    .then(pull_retryable)
    .then(pull_retryable);

  h.push(12345, 123, "pull_request", "whatever").await;
  h.push(12345, 42, "comment", "foobar").await;
  assert_eq!(h.index_len().await, 1);
  assert_eq!(h.store.stream_len("stream~12345").await.unwrap(), 2);

  let report = h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(
    h.engine.calls(),
    vec![
      call(12345, 123, vec![("pull_request", "whatever")]),
      call(12345, 42, vec![("comment", "foobar")]),
    ]
  );
  assert_eq!(report.retrying.len(), 2);
  assert_eq!(h.index_len().await, 1);
  assert_eq!(
    h.attempts().await,
    HashMap::from([
      ("pull~12345~owner~repo~42".to_string(), 1),
      ("pull~12345~owner~repo~123".to_string(), 1),
    ])
  );

  h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(h.engine.call_count(), 4);
  assert_eq!(h.index_len().await, 1);
  assert_eq!(h.store.stream_len("stream~12345").await.unwrap(), 1);
  assert_eq!(
    h.attempts().await,
    HashMap::from([("pull~12345~owner~repo~42".to_string(), 2)])
  );

  let report = h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(h.engine.call_count(), 5);
  assert_eq!(report.abandoned.len(), 1);
  assert_eq!(report.abandoned[0].pull_number, 42);

  // Too many retries, everything is gone
  assert_eq!(
    logs.messages(Level::INFO),
    vec!["failed to process pull request, retrying"; 3]
  );
  assert_eq!(
    logs.messages(Level::ERROR),
    vec!["failed to process pull request, abandoning"]
  );
  let abandoning = logs
    .lines()
    .into_iter()
    .find(|line| line.level == Level::ERROR)
    .unwrap();
  assert_eq!(abandoning.fields["pull_number"], "42");
  assert_eq!(abandoning.fields["attempts"], "3");
  assert!(h.store.is_empty().await);

  h.processor.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_processor_retrying_stream_recovered() {
  let (logs, _guard) = LogCapture::install();
  let h = Harness::new().await;
  h.engine.always(rate_limited);

  h.push(12345, 123, "pull_request", "whatever").await;
  h.push(12345, 123, "comment", "foobar").await;

  let report = h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(report.outcome, StreamOutcome::Retrying { attempts: 1 });
  assert_eq!(
    h.engine.calls(),
    vec![call(
      12345,
      123,
      vec![("pull_request", "whatever"), ("comment", "foobar")]
    )]
  );
  assert_eq!(h.index_len().await, 1);
  assert_eq!(h.store.stream_len("stream~12345").await.unwrap(), 2);
  assert_eq!(
    h.attempts().await,
    HashMap::from([("stream~12345".to_string(), 1)])
  );

  h.engine.reset_fallback();
  let report = h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(report.outcome, StreamOutcome::Completed);
  assert_eq!(h.engine.call_count(), 2);
  assert!(h.store.is_empty().await);

  assert_eq!(
    logs.messages(Level::INFO),
    vec!["failed to process stream, retrying"]
  );
  assert!(logs.messages(Level::ERROR).is_empty());
  let retrying = logs
    .lines()
    .into_iter()
    .find(|line| line.level == Level::INFO)
    .unwrap();
  assert_eq!(retrying.fields["stream"], "stream~12345");
  assert_eq!(retrying.fields["retry_after"], "Some(123)");

  h.processor.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_processor_retrying_stream_failure() {
  let (logs, _guard) = LogCapture::install();
  let h = Harness::new().await;
  h.engine.always(rate_limited);

  h.push(12345, 123, "pull_request", "whatever").await;
  h.push(12345, 123, "comment", "foobar").await;

  h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(h.engine.call_count(), 1);
  assert_eq!(
    h.attempts().await,
    HashMap::from([("stream~12345".to_string(), 1)])
  );

  h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(h.engine.call_count(), 2);
  assert_eq!(
    h.attempts().await,
    HashMap::from([("stream~12345".to_string(), 2)])
  );

  let report = h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(h.engine.call_count(), 3);
  assert_eq!(report.outcome, StreamOutcome::Abandoned);

  // Too many retries, everything is gone
  assert_eq!(
    logs.messages(Level::INFO),
    vec!["failed to process stream, retrying"; 2]
  );
  assert_eq!(
    logs.messages(Level::ERROR),
    vec!["failed to process stream, abandoning"]
  );
  assert!(h.store.is_empty().await);

  h.processor.close().await.unwrap();
}

#[tokio::test]
async fn test_stream_abandonment_clears_pull_counters() {
  let h = Harness::new().await;
  h.engine
    .then(pull_retryable)
    .then(pull_retryable)
    .then(rate_limited)
    .then(rate_limited)
    .then(rate_limited);

  h.push(12345, 1, "pull_request", "a").await;
  h.push(12345, 2, "pull_request", "b").await;

  h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(h.attempts().await.len(), 2);

  h.processor.consume("stream~12345").await.unwrap();
  h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(
    h.attempts().await,
    HashMap::from([
      ("pull~12345~owner~repo~1".to_string(), 1),
      ("pull~12345~owner~repo~2".to_string(), 1),
      ("stream~12345".to_string(), 2),
    ])
  );

  let report = h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(h.engine.call_count(), 5);
  assert_eq!(report.outcome, StreamOutcome::Abandoned);
  assert_eq!(report.abandoned.len(), 2);
  assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_stream_abandonment_drops_batches_kept_earlier_in_the_pass() {
  let h = Harness::new().await;
  h.engine
    .then(rate_limited)
    .then(rate_limited)
    .then(ok)
    .then(pull_retryable)
    .then(rate_limited);

  h.push(1, 10, "pull_request", "a").await;
  h.push(1, 20, "pull_request", "b").await;
  h.push(1, 30, "pull_request", "c").await;

  h.processor.consume("stream~1").await.unwrap();
  h.processor.consume("stream~1").await.unwrap();
  assert_eq!(
    h.attempts().await,
    HashMap::from([("stream~1".to_string(), 2)])
  );

  // 10 succeeds, 20 is kept for a retry, 30 exhausts the stream budget
  let report = h.processor.consume("stream~1").await.unwrap();
  assert_eq!(h.engine.call_count(), 5);
  assert_eq!(report.outcome, StreamOutcome::Abandoned);
  assert_eq!(report.processed, vec![PullRequest::new(1, "owner", "repo", 10)]);
  assert_eq!(
    report.abandoned,
    vec![
      PullRequest::new(1, "owner", "repo", 20),
      PullRequest::new(1, "owner", "repo", 30),
    ]
  );
  assert!(report.retrying.is_empty());

  assert_eq!(h.store.stream_len("stream~1").await.unwrap(), 0);
  assert_eq!(h.index_len().await, 0);
  assert!(h.attempts().await.is_empty());
  assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_stream_processor_stream_error() {
  let (logs, _guard) = LogCapture::install();
  let h = Harness::new().await;
  h.engine.always(fatal);

  h.push(12345, 123, "pull_request", "whatever").await;

  let report = h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(report.dropped.len(), 1);
  h.processor.consume("stream~12345").await.unwrap();
  h.processor.close().await.unwrap();

  // Error has been logged, the store must be clean
  assert_eq!(h.engine.call_count(), 1);
  assert_eq!(
    logs.messages(Level::ERROR),
    vec!["failed to process pull request"]
  );
  assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_fatal_error_only_drops_its_batch() {
  let h = Harness::new().await;
  h.engine.then(pull_retryable).then(fatal).then(ok);

  h.push(12345, 1, "pull_request", "a").await;
  h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(h.attempts().await.len(), 1);

  h.push(12345, 2, "pull_request", "b").await;
  let report = h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(report.dropped.len(), 1);
  assert_eq!(report.processed.len(), 1);
  assert_eq!(report.processed[0].pull_number, 2);
  assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_max_attempts_is_configurable() {
  let clock = Arc::new(ManualClock::new(date(2020, 1, 1)));
  let store = Arc::new(MemoryStore::new().with_clock(clock.clone()));
  let engine = ScriptedEngine::new();
  engine.always(pull_retryable);
  let processor = StreamProcessor::new(store.clone(), engine.clone())
    .with_clock(clock.clone())
    .max_attempts(1);
  processor.connect().await.unwrap();

  Client::new(store.clone())
    .push(1, "owner", "repo", 1, "comment", json!({}))
    .await
    .unwrap();
  let report = processor.consume("stream~1").await.unwrap();
  assert_eq!(report.abandoned.len(), 1);
  assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_zero_max_attempts_is_rejected_on_connect() {
  let processor =
    StreamProcessor::new(Arc::new(MemoryStore::new()), ScriptedEngine::new()).max_attempts(0);
  assert!(matches!(
    processor.connect().await,
    Err(Error::Config { .. })
  ));
  assert!(!processor.is_connected());
}

#[tokio::test]
async fn test_interleaved_events_are_batched_per_pull() {
  let h = Harness::new().await;
  h.push(12345, 1, "pull_request", "a").await;
  h.push(12345, 2, "pull_request", "b").await;
  h.push(12345, 1, "comment", "c").await;
  h.push(12345, 2, "comment", "d").await;

  h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(
    h.engine.calls(),
    vec![
      call(12345, 1, vec![("pull_request", "a"), ("comment", "c")]),
      call(12345, 2, vec![("pull_request", "b"), ("comment", "d")]),
    ]
  );
  assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_malformed_entry_is_dropped() {
  let (logs, _guard) = LogCapture::install();
  let h = Harness::new().await;
  h.push(12345, 1, "pull_request", "a").await;
  {
    let mut storage = h.store.storage().write().await;
    storage
      .streams
      .get_mut("stream~12345")
      .unwrap()
      .push(RawStreamEntry {
        id: "999-0".to_string(),
        fields: HashMap::from([("owner".to_string(), "owner".to_string())]),
      });
  }

  let report = h.processor.consume("stream~12345").await.unwrap();
  assert_eq!(report.malformed, vec!["999-0"]);
  assert_eq!(report.processed.len(), 1);
  assert_eq!(
    logs.messages(Level::ERROR),
    vec!["dropping malformed stream entry"]
  );
  assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn test_stream_processor_date_scheduling() {
  let h = Harness::new().await;

  // Don't process it before 2040
  h.clock.set(date(2040, 1, 1));
  h.push(12345, 123, "pull_request", "whatever").await;
  h.clock.set(date(2020, 1, 1));
  h.push(54321, 321, "pull_request", "foobar").await;

  assert_eq!(h.index_len().await, 2);
  assert!(h.attempts().await.is_empty());

  h.clock.set(date(2020, 1, 14));
  let claim = h.processor.next_stream().await.unwrap().expect("a stream is due");
  assert_eq!(claim.stream_name(), "stream~54321");
  h.processor.consume(claim.stream_name()).await.unwrap();
  assert!(claim.release().await.unwrap());

  assert_eq!(h.index_len().await, 1);
  assert!(h.attempts().await.is_empty());
  let received: Vec<u64> = h
    .engine
    .calls()
    .iter()
    .map(|c| c.pull.installation_id)
    .collect();
  assert_eq!(received, vec![54321]);

  h.clock.set(date(2030, 1, 14));
  let seen = h
    .processor
    .with_next_stream(|stream| async move { stream })
    .await
    .unwrap();
  assert_eq!(seen, None);
  assert_eq!(h.index_len().await, 1);
  assert_eq!(h.engine.call_count(), 1);

  // 2041: the postponed tenant is due
  h.clock.set(date(2041, 1, 14));
  let report = h.processor.consume_next().await.unwrap().expect("a stream is due");
  assert_eq!(report.stream, "stream~12345");

  let received: Vec<u64> = h
    .engine
    .calls()
    .iter()
    .map(|c| c.pull.installation_id)
    .collect();
  assert_eq!(received, vec![54321, 12345]);
  assert!(h.store.is_empty().await);

  h.processor.close().await.unwrap();
}

#[tokio::test]
async fn test_push_postpones_scheduled_tenant() {
  let h = Harness::new().await;
  h.push(1, 1, "pull_request", "a").await;
  h.clock.set(date(2020, 1, 2));
  h.push(1, 1, "comment", "b").await;

  // Eligible from the last push only
  h.clock.set(date(2020, 1, 1));
  assert!(h.processor.consume_next().await.unwrap().is_none());
  h.clock.set(date(2020, 1, 2));
  let report = h.processor.consume_next().await.unwrap().unwrap();
  assert_eq!(report.processed.len(), 1);
  assert_eq!(h.engine.calls()[0].sources.len(), 2);
}

#[tokio::test]
async fn test_claims_are_exclusive_until_expired() {
  let h = Harness::new().await;
  let other = StreamProcessor::new(h.store.clone(), h.engine.clone())
    .with_clock(h.clock.clone())
    .claim_ttl(Duration::from_secs(60));
  other.connect().await.unwrap();
  assert_ne!(other.worker_id(), h.processor.worker_id());

  h.push(1, 1, "pull_request", "a").await;
  h.push(2, 1, "pull_request", "b").await;

  let first = h.processor.next_stream().await.unwrap().unwrap();
  let second = other.next_stream().await.unwrap().unwrap();
  assert_ne!(first.stream_name(), second.stream_name());
  assert!(other.next_stream().await.unwrap().is_none());
  assert_eq!(h.store.claims().await.unwrap().len(), 2);

  // A crashed holder: its claim is never released but expires
  std::mem::forget(second);
  h.clock.advance(chrono::Duration::seconds(61));
  let taken_over = other.next_stream().await.unwrap().unwrap();
  assert_ne!(taken_over.stream_name(), first.stream_name());

  assert!(first.release().await.unwrap());
  assert!(taken_over.release().await.unwrap());
  assert!(h.store.claims().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_with_next_stream_releases_claim() {
  let h = Harness::new().await;
  h.push(1, 1, "pull_request", "a").await;

  let name = h
    .processor
    .with_next_stream(|stream| async move { stream })
    .await
    .unwrap();
  assert_eq!(name.as_deref(), Some("stream~1"));
  assert!(h.store.claims().await.unwrap().is_empty());
  // Nothing was consumed, the tenant is still scheduled
  assert_eq!(h.index_len().await, 1);
}

#[tokio::test]
async fn test_processor_not_connected() {
  let h = Harness::new().await;
  h.processor.close().await.unwrap();
  assert!(matches!(
    h.processor.consume_next().await,
    Err(Error::NotConnected)
  ));
}
