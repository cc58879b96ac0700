use crossbeam_channel::{Receiver, Sender};
use tracing::{info, warn};

use crate::event::EntityChangedEvent;

/// 事件总线
pub trait EventBus: Send + Sync {
    fn publish(&self, event: EntityChangedEvent);
}

/// 基于 crossbeam 通道的进程内事件总线
#[derive(Debug, Clone)]
pub struct ChannelEventBus {
    sender: Sender<EntityChangedEvent>,
}

impl ChannelEventBus {
    pub fn new(sender: Sender<EntityChangedEvent>) -> Self {
        Self { sender }
    }

    /// 创建无界通道，返回总线与接收端
    pub fn unbounded() -> (Self, Receiver<EntityChangedEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }
}

impl EventBus for ChannelEventBus {
    fn publish(&self, event: EntityChangedEvent) {
        if let Err(err) = self.sender.send(event) {
            warn!("event receiver disconnected, dropping event for {}", err.0.entity_id);
        }
    }
}

/// 以 JSON 审计日志输出事件
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventBus;

impl EventBus for LoggingEventBus {
    fn publish(&self, event: EntityChangedEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!("entity changed: {}", json),
            Err(err) => warn!("cannot serialize change event for {}: {}", event.entity_id, err),
        }
    }
}
