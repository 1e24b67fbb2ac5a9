//! # streamq
//!
//! 基于 Redis 的按租户持久化事件流与可重试的工作分发
//! Durable per-tenant event streams with retrying work dispatch, backed by Redis
//!
//! 事件按租户（installation）追加到各自的流中，租户按可处理时间排入调度索引。
//! 工作池中的处理循环认领可处理的租户，把流按拉取请求分组后交给评估引擎，
//! 并按失败范围决定重试单个拉取请求、重试整个租户，还是丢弃。
//! Events are appended to one stream per tenant (installation) and tenants are scheduled
//! by eligibility time. Processing loops of the worker pool claim eligible tenants, group
//! their stream by pull request, hand each batch to the evaluation engine, and decide from
//! the failure scope whether to retry one pull request, retry the whole tenant or drop.
//!
//! ## 特性
//! ## Features
//!
//! - 至少一次投递，同一拉取请求的事件按推送顺序交付
//!   - At-least-once delivery, events of one pull request arrive in push order
//! - 推送合并窗口：每次推送都会推迟租户的可处理时间
//!   - Coalescing window: every push postpones the tenant's eligibility time
//! - 拉取请求级与流级的重试计数，耗尽后放弃并记录错误日志
//!   - Pull-scope and stream-scope retry counters, abandoning with an error log once exhausted
//! - 带过期时间的认领，崩溃的工作者不会永久阻塞租户
//!   - Expiring claims, a crashed worker never blocks a tenant forever
//! - Redis 与内存两种存储后端
//!   - Redis and in-memory store backends
//!
//! ## 快速开始
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use streamq::client::Client;
//! use streamq::config::WorkerConfig;
//! use streamq::engine::EngineFunc;
//! use streamq::rdb::RedisStore;
//! use streamq::redis::RedisConnectionConfig;
//! use streamq::worker::Worker;
//! use streamq::{Event, PullRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let redis_config = RedisConnectionConfig::single("redis://127.0.0.1:6379")?;
//!   let store = Arc::new(RedisStore::new(redis_config).await?);
//!
//!   // 推送事件
//!   // Push an event
//!   let client = Client::new(store.clone());
//!   client
//!     .push(12345, "owner", "repo", 42, "pull_request", serde_json::json!({"action": "opened"}))
//!     .await?;
//!
//!   // 处理事件
//!   // Process events
//!   let engine = EngineFunc::new(|pull: &PullRequest, sources: Vec<Event>| {
//!     println!("{pull}: {} events", sources.len());
//!     Ok(())
//!   });
//!   let mut worker = Worker::new(store, Arc::new(engine), WorkerConfig::default());
//!   worker.start().await?;
//!   tokio::signal::ctrl_c().await?;
//!   worker.shutdown().await?;
//!   Ok(())
//! }
//! ```

pub mod base;
pub mod batcher;
pub mod client;
pub mod components;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod memdb;
pub mod rdb;
pub mod redis;
pub mod time;
pub mod worker;

pub use engine::{Engine, EngineError};
pub use error::{Error, Result};
pub use event::{Event, PullRequest};
