//! Push a handful of events for a few tenants.
//!
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 cargo run --example producer
//! ```

use serde_json::json;
use streamq::client::Client;
use streamq::redis::RedisConnectionConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::registry()
    .with(fmt::layer())
    .with(EnvFilter::from_default_env().add_directive("streamq=debug".parse()?))
    .init();

  let client = Client::connect(RedisConnectionConfig::from_env()?).await?;

  for installation_id in 1..=3u64 {
    for pull_number in [1u64, 2] {
      client
        .push(
          installation_id,
          &format!("owner-{installation_id}"),
          "repo",
          pull_number,
          "pull_request",
          json!({ "action": "synchronize" }),
        )
        .await?;
      client
        .push(
          installation_id,
          &format!("owner-{installation_id}"),
          "repo",
          pull_number,
          "comment",
          json!({ "body": "@bot refresh" }),
        )
        .await?;
    }
  }

  let store = client.get_store();
  for (stream, score) in store.scheduled_streams().await? {
    tracing::info!(stream = %stream, score, len = store.stream_len(&stream).await?, "scheduled");
  }
  client.close().await?;
  Ok(())
}
