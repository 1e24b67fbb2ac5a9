//! Run a worker pool until Ctrl-C, printing every batch it receives.
//!
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 STREAMQ_WORKER_COUNT=4 cargo run --example consumer
//! ```

use std::sync::Arc;
use streamq::config::WorkerConfig;
use streamq::engine::AsyncEngineFunc;
use streamq::rdb::RedisStore;
use streamq::redis::RedisConnectionConfig;
use streamq::worker::Worker;
use streamq::{EngineError, Event, PullRequest};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(EnvFilter::from_default_env().add_directive("streamq=info".parse()?))
    .init();

  let store = Arc::new(RedisStore::new(RedisConnectionConfig::from_env()?).await?);
  let engine = AsyncEngineFunc::new(|pull: PullRequest, sources: Vec<Event>| async move {
    tracing::info!(pull = %pull, events = sources.len(), "evaluating");
    // 奇数拉取请求模拟上游暂时不可用
    if pull.pull_number % 2 == 1 && sources.iter().any(|e| e.event_type == "comment") {
      return Err(EngineError::pull_retryable("mergeable state unknown"));
    }
    Ok(())
  });

  let mut worker = Worker::new(store, Arc::new(engine), WorkerConfig::from_env()?);
  worker.start().await?;
  tokio::signal::ctrl_c().await?;
  worker.shutdown().await?;
  Ok(())
}
