//! 内存存储模块
//! Memory store module
//!
//! 基于内存的存储后端，不依赖任何外部服务，主要用于测试和嵌入式场景
//! In-memory store backend without external service dependencies, mainly for tests and
//! embedded use

pub mod memory_store;
mod store;

pub use memory_store::MemoryStore;
