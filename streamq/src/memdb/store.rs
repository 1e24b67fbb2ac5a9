//! 内存存储的 Store 特性实现
//! Store trait implementation for the memory store

use crate::base::Store;
use crate::error::Result;
use crate::event::{EventMessage, RawStreamEntry};
use crate::memdb::memory_store::{ClaimRecord, MemoryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
  let millis = ttl.as_millis().min(i64::MAX as u128) as i64;
  now
    .checked_add_signed(chrono::Duration::milliseconds(millis))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl Store for MemoryStore {
  async fn ping(&self) -> Result<()> {
    Ok(())
  }

  async fn close(&self) -> Result<()> {
    Ok(())
  }

  async fn append(&self, stream: &str, msg: &EventMessage, score: f64) -> Result<String> {
    let fields = msg
      .to_fields()?
      .into_iter()
      .map(|(k, v)| (k.to_string(), v))
      .collect();
    let mut storage = self.storage.write().await;
    let id = storage.next_entry_id();
    storage
      .streams
      .entry(stream.to_string())
      .or_default()
      .push(RawStreamEntry {
        id: id.clone(),
        fields,
      });
    storage.index.insert(stream.to_string(), score);
    Ok(id)
  }

  async fn read_stream(&self, stream: &str) -> Result<Vec<RawStreamEntry>> {
    let storage = self.storage.read().await;
    Ok(storage.streams.get(stream).cloned().unwrap_or_default())
  }

  async fn delete_entries(&self, stream: &str, ids: &[String]) -> Result<bool> {
    let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut storage = self.storage.write().await;
    if let Some(entries) = storage.streams.get_mut(stream) {
      entries.retain(|entry| !ids.contains(entry.id.as_str()));
    }
    Ok(storage.remove_if_empty(stream))
  }

  async fn remove_if_empty(&self, stream: &str) -> Result<bool> {
    let mut storage = self.storage.write().await;
    Ok(storage.remove_if_empty(stream))
  }

  async fn incr_attempts(&self, field: &str) -> Result<u64> {
    let mut storage = self.storage.write().await;
    let count = storage.attempts.entry(field.to_string()).or_insert(0);
    *count += 1;
    Ok(*count)
  }

  async fn clear_attempts(&self, fields: &[String]) -> Result<()> {
    let mut storage = self.storage.write().await;
    for field in fields {
      storage.attempts.remove(field);
    }
    Ok(())
  }

  async fn claim_next(&self, now: f64, owner: &str, ttl: Duration) -> Result<Option<String>> {
    let wall = self.clock.now();
    let mut storage = self.storage.write().await;
    storage.purge_expired_claims(wall);

    // 与 ZRANGEBYSCORE 相同：按分数升序，分数相同按名称
    let mut candidates: Vec<(&String, f64)> = storage
      .index
      .iter()
      .filter(|(_, score)| **score <= now)
      .map(|(name, score)| (name, *score))
      .collect();
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let chosen = candidates
      .into_iter()
      .map(|(name, _)| name)
      .find(|name| !storage.claims.contains_key(*name))
      .cloned();

    if let Some(stream) = &chosen {
      storage.claims.insert(
        stream.clone(),
        ClaimRecord {
          owner: owner.to_string(),
          expires_at: expiry(wall, ttl),
        },
      );
    }
    Ok(chosen)
  }

  async fn release(&self, stream: &str, owner: &str) -> Result<bool> {
    let wall = self.clock.now();
    let mut storage = self.storage.write().await;
    storage.purge_expired_claims(wall);
    let owned = storage
      .claims
      .get(stream)
      .map(|claim| claim.owner == owner)
      .unwrap_or(false);
    if owned {
      storage.claims.remove(stream);
    }
    Ok(owned)
  }

  async fn stream_len(&self, stream: &str) -> Result<u64> {
    let storage = self.storage.read().await;
    Ok(storage.streams.get(stream).map(Vec::len).unwrap_or(0) as u64)
  }

  async fn scheduled_streams(&self) -> Result<Vec<(String, f64)>> {
    let storage = self.storage.read().await;
    let mut streams: Vec<(String, f64)> = storage
      .index
      .iter()
      .map(|(name, score)| (name.clone(), *score))
      .collect();
    streams.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    Ok(streams)
  }

  async fn attempts(&self) -> Result<HashMap<String, u64>> {
    let storage = self.storage.read().await;
    Ok(storage.attempts.clone())
  }

  async fn claims(&self) -> Result<HashMap<String, String>> {
    let wall = self.clock.now();
    let storage = self.storage.read().await;
    Ok(
      storage
        .claims
        .iter()
        .filter(|(_, claim)| claim.expires_at > wall)
        .map(|(stream, claim)| (stream.clone(), claim.owner.clone()))
        .collect(),
    )
  }
}
