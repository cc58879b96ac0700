use std::sync::Arc;

use change_set::EntityMetadata;
use tracing::{debug, trace, warn};

use crate::{
    bus::EventBus,
    error::TransactionError,
    event::EntityChangedEvent,
    record::ChangeRecord,
    transaction::{TransactionContext, TransactionOutcome},
};

/// 将变更记录转换为事件并按顺序交给事件总线
pub struct ChangeEventPublisher<M: EntityMetadata + ?Sized, B: EventBus + ?Sized> {
    metadata: Arc<M>,
    bus: Arc<B>,
}

impl<M: EntityMetadata + ?Sized, B: EventBus + ?Sized> Clone for ChangeEventPublisher<M, B> {
    fn clone(&self) -> Self {
        Self { metadata: Arc::clone(&self.metadata), bus: Arc::clone(&self.bus) }
    }
}

impl<M: EntityMetadata + ?Sized, B: EventBus + ?Sized> ChangeEventPublisher<M, B> {
    pub fn new(metadata: Arc<M>, bus: Arc<B>) -> Self {
        Self { metadata, bus }
    }

    /// 按记录顺序发布，每条记录一个事件
    ///
    /// 无法生成身份令牌的记录记录日志后跳过，不影响其余记录。
    ///
    /// # 返回
    /// 实际发布的事件数
    pub fn publish(&self, records: &[ChangeRecord]) -> usize {
        trace!("publish {:?}", records);
        let mut published = 0;
        for record in records {
            match EntityChangedEvent::from_record(record, self.metadata.as_ref()) {
                Ok(event) => {
                    self.bus.publish(event);
                    published += 1;
                }
                Err(err) => warn!("skip change event for {:?}: {}", record.entity(), err),
            }
        }
        published
    }
}

impl<M, B> ChangeEventPublisher<M, B>
where
    M: EntityMetadata + ?Sized + 'static,
    B: EventBus + ?Sized + 'static,
{
    /// 事务提交后发布；回滚时丢弃记录
    pub fn publish_after_commit(
        &self,
        tx: &TransactionContext,
        records: Vec<ChangeRecord>,
    ) -> Result<(), TransactionError> {
        let publisher = self.clone();
        tx.register_synchronization(move |tx: &TransactionContext, outcome: TransactionOutcome| match outcome {
            TransactionOutcome::Committed => {
                publisher.publish(&records);
            }
            TransactionOutcome::RolledBack => {
                debug!("{} rolled back, discard {} change record(s)", tx.id(), records.len());
            }
        })
    }
}
