//! 结果接收端
//!
//! 显示端实现 [`ResultSink`] 并注册到流水线。流水线在专门的分发线程上
//! 依次调用它，分析线程从不直接等待显示端。

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use tracing::{debug, warn};

use crate::error::SegError;
use crate::segment::RenderedFrame;

pub trait ResultSink: Send + Sync + 'static {
    /// 收到一帧渲染结果。实现不应阻塞，耗时工作需要自行转移到其他线程
    fn on_result(&self, frame: RenderedFrame);

    /// 单帧错误通知，默认只记录日志
    fn on_error(&self, error: SegError) {
        warn!("帧处理失败: {}", error);
    }
}

/// 分发给接收端的事件
#[derive(Debug, Clone)]
pub enum SinkEvent {
    Result(RenderedFrame),
    Error(SegError),
}

/// 把事件转发到通道的接收端，由宿主在自己的线程上消费
pub struct ChannelSink {
    sender: Sender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<SinkEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl ResultSink for ChannelSink {
    fn on_result(&self, frame: RenderedFrame) {
        if self.sender.send(SinkEvent::Result(frame)).is_err() {
            debug!("结果接收端已关闭，丢弃结果");
        }
    }

    fn on_error(&self, error: SegError) {
        if self.sender.send(SinkEvent::Error(error)).is_err() {
            debug!("结果接收端已关闭，丢弃错误");
        }
    }
}

/// 启动分发线程
///
/// 返回事件发送端和线程句柄；所有发送端被丢弃后线程处理完剩余事件退出。
pub(crate) fn spawn_dispatcher(
    sink: std::sync::Arc<dyn ResultSink>,
) -> std::io::Result<(Sender<SinkEvent>, thread::JoinHandle<()>)> {
    let (sender, receiver) = mpsc::channel::<SinkEvent>();
    let handle = thread::Builder::new()
        .name("segstream-sink".to_string())
        .spawn(move || {
            for event in receiver {
                match event {
                    SinkEvent::Result(frame) => sink.on_result(frame),
                    SinkEvent::Error(error) => sink.on_error(error),
                }
            }
            debug!("分发线程退出");
        })?;
    Ok((sender, handle))
}
