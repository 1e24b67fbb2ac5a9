//! Redis Lua 脚本模块
//!
//! 多键变更（推送、排空清理、认领、释放）都通过脚本在服务端原子执行，
//! 以维持“调度索引中存在租户当且仅当其流非空”的不变量

use crate::error::{Error, Result};
use phf::phf_map;
use redis::aio::MultiplexedConnection;
use redis::{ErrorKind, RedisWrite, ToRedisArgs};
use std::collections::HashMap;

#[derive(Clone, Debug)]
pub enum RedisArg {
  Int(i64),
  Str(String),
  Float(f64),
}

impl ToRedisArgs for RedisArg {
  fn write_redis_args<W>(&self, out: &mut W)
  where
    W: ?Sized + RedisWrite,
  {
    match self {
      RedisArg::Int(i) => i.write_redis_args(out),
      RedisArg::Str(s) => s.write_redis_args(out),
      RedisArg::Float(f) => f.write_redis_args(out),
    }
  }
}

/// Redis Lua 脚本集合
pub mod scripts {
  /// 追加事件并刷新调度分数
  /// Append an event and refresh the scheduling score
  /// `KEYS[1]` -> stream~`<installation_id>`
  /// `KEYS[2]` -> streams
  /// `ARGV[1]` -> 调度分数 / scheduling score
  /// `ARGV[2..]` -> 字段/值对 / field/value pairs
  /// Returns the new entry id
  pub const PUSH: &str = r#"
        local id = redis.call("XADD", KEYS[1], "*", unpack(ARGV, 2))
        redis.call("ZADD", KEYS[2], ARGV[1], KEYS[1])
        return id
    "#;

  /// 删除条目，流变空时删除流键和调度索引项
  /// Delete entries, dropping the stream key and index entry once it is empty
  /// `KEYS[1]` -> stream~`<installation_id>`
  /// `KEYS[2]` -> streams
  /// `ARGV[..]` -> 条目 ID / entry ids (may be empty)
  /// Returns 1 if the stream was removed, 0 otherwise
  pub const DELETE_ENTRIES: &str = r#"
        if #ARGV > 0 then
            redis.call("XDEL", KEYS[1], unpack(ARGV))
        end
        if redis.call("XLEN", KEYS[1]) == 0 then
            redis.call("DEL", KEYS[1])
            redis.call("ZREM", KEYS[2], KEYS[1])
            return 1
        end
        return 0
    "#;

  /// 认领分数最小且已到期的未认领流
  /// Claim the unclaimed eligible stream with the lowest score
  /// `KEYS[1]` -> streams
  /// `ARGV[1]` -> 当前分数 / current score
  /// `ARGV[2]` -> 认领者 / claim owner
  /// `ARGV[3]` -> 认领过期毫秒数 / claim ttl in milliseconds
  /// `ARGV[4]` -> 认领键前缀 / claim key prefix
  /// Returns the claimed stream name, or nil
  pub const CLAIM_NEXT: &str = r#"
        local candidates = redis.call("ZRANGEBYSCORE", KEYS[1], "-inf", ARGV[1])
        for _, stream in ipairs(candidates) do
            if redis.call("SET", ARGV[4] .. stream, ARGV[2], "NX", "PX", ARGV[3]) then
                return stream
            end
        end
        return false
    "#;

  /// 释放仍属于调用者的认领
  /// Release a claim still owned by the caller
  /// `KEYS[1]` -> claim~stream~`<installation_id>`
  /// `ARGV[1]` -> 认领者 / claim owner
  /// Returns 1 if released, 0 otherwise
  pub const RELEASE: &str = r#"
        if redis.call("GET", KEYS[1]) == ARGV[1] then
            return redis.call("DEL", KEYS[1])
        end
        return 0
    "#;
}

/// Redis 脚本管理器
#[derive(Debug, Default)]
pub struct ScriptManager {
  /// 脚本SHA缓存
  script_sha1: HashMap<&'static str, String>,
}

impl ScriptManager {
  /// 预加载所有脚本
  pub async fn load_scripts(&mut self, conn: &mut MultiplexedConnection) -> Result<()> {
    for (name, script) in ALL_SCRIPT.entries() {
      let sha = self.load_script(conn, script).await?;
      self.script_sha1.insert(*name, sha);
    }
    Ok(())
  }

  pub async fn load_script(&self, conn: &mut MultiplexedConnection, script: &str) -> Result<String> {
    let sha: String = redis::cmd("SCRIPT")
      .arg("LOAD")
      .arg(script)
      .query_async(conn)
      .await?;
    Ok(sha)
  }

  /// 获取脚本SHA
  pub fn get_script_sha(&self, name: &str) -> Option<&String> {
    self.script_sha1.get(name)
  }

  /// 执行脚本；脚本缓存被清空时回退到 EVAL
  pub async fn eval_script<T>(
    &self,
    conn: &mut MultiplexedConnection,
    script_name: &str,
    keys: &[String],
    args: &[RedisArg],
  ) -> Result<T>
  where
    T: redis::FromRedisValue,
  {
    let script = ALL_SCRIPT
      .get(script_name)
      .ok_or_else(|| Error::other(format!("Unknown script: {script_name}")))?;
    if let Some(sha) = self.get_script_sha(script_name) {
      let result: redis::RedisResult<T> = redis::cmd("EVALSHA")
        .arg(sha)
        .arg(keys.len())
        .arg(keys)
        .arg(args)
        .query_async(conn)
        .await;
      match result {
        Ok(value) => return Ok(value),
        Err(e) if e.kind() == ErrorKind::NoScriptError => {
          tracing::debug!(script = script_name, "script cache flushed, falling back to EVAL");
        }
        Err(e) => return Err(e.into()),
      }
    }
    let value: T = redis::cmd("EVAL")
      .arg(*script)
      .arg(keys.len())
      .arg(keys)
      .arg(args)
      .query_async(conn)
      .await?;
    Ok(value)
  }
}

static ALL_SCRIPT: phf::Map<&'static str, &'static str> = phf_map! {
    "push" => scripts::PUSH,
    "delete_entries" => scripts::DELETE_ENTRIES,
    "claim_next" => scripts::CLAIM_NEXT,
    "release" => scripts::RELEASE,
};
