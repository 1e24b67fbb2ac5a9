//! Redis 存储实现
//! Redis store implementation
//!
//! 租户日志使用 Redis Stream，调度索引使用有序集合，重试计数器使用哈希，认领使用带过期的字符串键
//! Tenant logs are Redis streams, the scheduling index is a sorted set, retry counters live
//! in a hash and claims are expiring string keys.

use crate::base::constants::{ATTEMPTS_KEY, STREAMS_KEY};
use crate::base::keys;
use crate::base::Store;
use crate::error::Result;
use crate::event::{EventMessage, RawStreamEntry};
use crate::rdb::redis_scripts::{RedisArg, ScriptManager};
use crate::redis::RedisConnectionConfig;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::StreamRangeReply;
use redis::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// 单次 XDEL 的最大 ID 数，避免超出 Lua unpack 的栈限制
/// Upper bound of ids per XDEL, keeps Lua `unpack` under its stack limit
const DELETE_CHUNK: usize = 1000;

/// Redis 存储
/// Redis store
pub struct RedisStore {
  client: Client,
  conn: Mutex<Option<MultiplexedConnection>>,
  script_manager: ScriptManager,
}

impl RedisStore {
  /// 连接 Redis 并预加载脚本
  /// Connect to Redis and preload the scripts
  pub async fn new(config: RedisConnectionConfig) -> Result<Self> {
    let client = Client::open(config.connection_info().clone())?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let mut script_manager = ScriptManager::default();
    script_manager.load_scripts(&mut conn).await?;
    Ok(Self {
      client,
      conn: Mutex::new(Some(conn)),
      script_manager,
    })
  }

  /// 获取连接，关闭后会重新建立
  /// Get the connection, re-established after a close
  async fn get_connection(&self) -> Result<MultiplexedConnection> {
    let mut guard = self.conn.lock().await;
    if let Some(conn) = guard.as_ref() {
      return Ok(conn.clone());
    }
    let conn = self.client.get_multiplexed_async_connection().await?;
    *guard = Some(conn.clone());
    Ok(conn)
  }
}

#[async_trait]
impl Store for RedisStore {
  async fn ping(&self) -> Result<()> {
    let mut conn = self.get_connection().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(())
  }

  /// 丢弃多路复用连接，下一次调用会通过 `get_connection` 重新连接
  /// Drop the multiplexed connection; the next call reconnects through `get_connection`
  async fn close(&self) -> Result<()> {
    self.conn.lock().await.take();
    Ok(())
  }

  async fn append(&self, stream: &str, msg: &EventMessage, score: f64) -> Result<String> {
    let mut conn = self.get_connection().await?;
    let keys = vec![stream.to_string(), STREAMS_KEY.to_string()];
    let mut args = vec![RedisArg::Float(score)];
    for (field, value) in msg.to_fields()? {
      args.push(RedisArg::Str(field.to_string()));
      args.push(RedisArg::Str(value));
    }
    self
      .script_manager
      .eval_script::<String>(&mut conn, "push", &keys, &args)
      .await
  }

  async fn read_stream(&self, stream: &str) -> Result<Vec<RawStreamEntry>> {
    let mut conn = self.get_connection().await?;
    let reply: StreamRangeReply = redis::cmd("XRANGE")
      .arg(stream)
      .arg("-")
      .arg("+")
      .query_async(&mut conn)
      .await?;
    let entries = reply
      .ids
      .into_iter()
      .map(|sid| {
        let fields = sid
          .map
          .keys()
          .filter_map(|field| sid.get::<String>(field).map(|v| (field.clone(), v)))
          .collect();
        RawStreamEntry { id: sid.id, fields }
      })
      .collect();
    Ok(entries)
  }

  async fn delete_entries(&self, stream: &str, ids: &[String]) -> Result<bool> {
    let mut conn = self.get_connection().await?;
    let keys = vec![stream.to_string(), STREAMS_KEY.to_string()];
    let mut removed = false;
    let mut chunks: Vec<&[String]> = ids.chunks(DELETE_CHUNK).collect();
    if chunks.is_empty() {
      chunks.push(&[]);
    }
    for chunk in chunks {
      let args: Vec<RedisArg> = chunk.iter().cloned().map(RedisArg::Str).collect();
      let result: i64 = self
        .script_manager
        .eval_script(&mut conn, "delete_entries", &keys, &args)
        .await?;
      removed = result == 1;
    }
    Ok(removed)
  }

  async fn remove_if_empty(&self, stream: &str) -> Result<bool> {
    self.delete_entries(stream, &[]).await
  }

  async fn incr_attempts(&self, field: &str) -> Result<u64> {
    let mut conn = self.get_connection().await?;
    let count: i64 = redis::cmd("HINCRBY")
      .arg(ATTEMPTS_KEY)
      .arg(field)
      .arg(1)
      .query_async(&mut conn)
      .await?;
    Ok(count.max(0) as u64)
  }

  async fn clear_attempts(&self, fields: &[String]) -> Result<()> {
    if fields.is_empty() {
      return Ok(());
    }
    let mut conn = self.get_connection().await?;
    let _: i64 = redis::cmd("HDEL")
      .arg(ATTEMPTS_KEY)
      .arg(fields)
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  async fn claim_next(&self, now: f64, owner: &str, ttl: Duration) -> Result<Option<String>> {
    let mut conn = self.get_connection().await?;
    let keys = vec![STREAMS_KEY.to_string()];
    let args = vec![
      RedisArg::Float(now),
      RedisArg::Str(owner.to_string()),
      RedisArg::Int(ttl.as_millis().max(1) as i64),
      RedisArg::Str(keys::CLAIM_PREFIX.to_string()),
    ];
    self
      .script_manager
      .eval_script::<Option<String>>(&mut conn, "claim_next", &keys, &args)
      .await
  }

  async fn release(&self, stream: &str, owner: &str) -> Result<bool> {
    let mut conn = self.get_connection().await?;
    let keys = vec![keys::claim_key(stream)];
    let args = vec![RedisArg::Str(owner.to_string())];
    let released: i64 = self
      .script_manager
      .eval_script(&mut conn, "release", &keys, &args)
      .await?;
    Ok(released == 1)
  }

  async fn stream_len(&self, stream: &str) -> Result<u64> {
    let mut conn = self.get_connection().await?;
    let len: u64 = redis::cmd("XLEN").arg(stream).query_async(&mut conn).await?;
    Ok(len)
  }

  async fn scheduled_streams(&self) -> Result<Vec<(String, f64)>> {
    let mut conn = self.get_connection().await?;
    let streams: Vec<(String, f64)> = redis::cmd("ZRANGE")
      .arg(STREAMS_KEY)
      .arg(0)
      .arg(-1)
      .arg("WITHSCORES")
      .query_async(&mut conn)
      .await?;
    Ok(streams)
  }

  async fn attempts(&self) -> Result<HashMap<String, u64>> {
    let mut conn = self.get_connection().await?;
    let attempts: HashMap<String, u64> = redis::cmd("HGETALL")
      .arg(ATTEMPTS_KEY)
      .query_async(&mut conn)
      .await?;
    Ok(attempts)
  }

  async fn claims(&self) -> Result<HashMap<String, String>> {
    let mut conn = self.get_connection().await?;
    let pattern = format!("{}*", keys::CLAIM_PREFIX);
    let mut claim_keys = Vec::new();
    let mut cursor: u64 = 0;
    loop {
      let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
        .arg(cursor)
        .arg("MATCH")
        .arg(&pattern)
        .arg("COUNT")
        .arg(100)
        .query_async(&mut conn)
        .await?;
      claim_keys.extend(batch);
      if next == 0 {
        break;
      }
      cursor = next;
    }

    let mut claims = HashMap::new();
    for key in claim_keys {
      let owner: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
      if let (Some(owner), Some(stream)) = (owner, key.strip_prefix(keys::CLAIM_PREFIX)) {
        claims.insert(stream.to_string(), owner);
      }
    }
    Ok(claims)
  }
}
