//! Redis 存储后端
//! Redis store backend

pub mod redis_scripts;
pub mod redis_store;

pub use redis_store::RedisStore;
