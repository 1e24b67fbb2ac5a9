//! 组件模块
//! Components module
//!
//! 提供流处理器以及驱动它的后台循环，并定义通用的组件生命周期 trait
//! Provides the stream processor and the background loop driving it, and defines the
//! common component lifecycle trait

use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod processor;
pub mod runner;

/// 组件生命周期管理接口
/// Component lifecycle interface
///
/// # 实现者 / Implementors
///
/// - [`StreamRunner`](runner::StreamRunner) - 反复认领并处理可处理的流
///
/// # 注意 / Note
///
/// [`StreamProcessor`](processor::StreamProcessor) 没有实现此 trait，它只执行单轮处理，由
/// `StreamRunner` 驱动
/// [`StreamProcessor`](processor::StreamProcessor) does not implement this trait, it runs
/// single passes and is driven by `StreamRunner`
pub trait ComponentLifecycle {
  /// 启动组件的后台任务
  /// Start the component's background task
  fn start(self: Arc<Self>) -> JoinHandle<()>;

  /// 发送关闭信号，组件完成当前操作后停止
  /// Send the shutdown signal, the component stops after its current operation
  fn shutdown(&self);

  /// 组件是否已停止
  /// Whether the component has stopped
  fn is_done(&self) -> bool;
}
