use std::{path::Path, sync::Arc};

use change_set::{EntityHandle, EntityMetadata};
use tracing::info;

use crate::{
    accumulator::{AccumulatorState, ChangeAccumulator},
    bus::EventBus,
    classifier::ChangeClassifier,
    config::ChangeEventConfig,
    error::ChangeEventError,
    publisher::ChangeEventPublisher,
    publishing::PublishingInfoCache,
    record::ChangeRecord,
    transaction::TransactionContext,
};

/// 实体变更事件管理器
///
/// 组合发布信息缓存、分类器、事务累加器与发布器：
/// - flush 前调用 [`before_flush`](Self::before_flush) 累加变更
/// - 需要在 flush 之外取得变更时调用 [`collect`](Self::collect)
/// - 事务提交后用 [`publish`](Self::publish) 或预先注册 [`publish_after_commit`](Self::publish_after_commit)
///
/// # 示例
/// ```ignore
/// let (bus, events) = ChannelEventBus::unbounded();
/// let manager = ChangeEventManager::new(metadata, Arc::new(bus), ChangeEventConfig::default());
///
/// let tx = TransactionContext::begin();
/// manager.before_flush(&tx, &dirty_entities)?;
/// let records = manager.collect(&tx, &[])?;
/// manager.publish_after_commit(&tx, records)?;
/// tx.commit()?;
/// ```
pub struct ChangeEventManager<M: EntityMetadata + ?Sized, B: EventBus + ?Sized> {
    accumulator: ChangeAccumulator<M>,
    publisher: ChangeEventPublisher<M, B>,
}

impl<M: EntityMetadata + ?Sized, B: EventBus + ?Sized> ChangeEventManager<M, B> {
    pub fn new(metadata: Arc<M>, bus: Arc<B>, config: ChangeEventConfig) -> Self {
        info!(
            "change event manager: enabled={}, {} publishing override(s)",
            config.enabled,
            config.overrides.len()
        );
        let cache = Arc::new(PublishingInfoCache::new(config));
        let classifier = ChangeClassifier::new(Arc::clone(&metadata), cache);
        Self { accumulator: ChangeAccumulator::new(classifier), publisher: ChangeEventPublisher::new(metadata, bus) }
    }

    /// 从 YAML 配置文件创建
    pub fn from_config_file<P: AsRef<Path>>(
        metadata: Arc<M>,
        bus: Arc<B>,
        path: P,
    ) -> Result<Self, ChangeEventError> {
        let config = ChangeEventConfig::load_from_file(path)?;
        Ok(Self::new(metadata, bus, config))
    }

    pub fn before_flush(&self, tx: &TransactionContext, entities: &[EntityHandle]) -> Result<(), ChangeEventError> {
        self.accumulator.observe(tx, entities)
    }

    pub fn collect(
        &self,
        tx: &TransactionContext,
        entities: &[EntityHandle],
    ) -> Result<Vec<ChangeRecord>, ChangeEventError> {
        self.accumulator.collect(tx, entities)
    }

    pub fn publish(&self, records: &[ChangeRecord]) -> usize {
        self.publisher.publish(records)
    }

    pub fn state(&self, tx: &TransactionContext) -> AccumulatorState {
        self.accumulator.state(tx)
    }

    #[inline]
    pub fn accumulator(&self) -> &ChangeAccumulator<M> {
        &self.accumulator
    }

    #[inline]
    pub fn publishing_cache(&self) -> &PublishingInfoCache {
        self.accumulator.classifier().cache()
    }
}

impl<M, B> ChangeEventManager<M, B>
where
    M: EntityMetadata + ?Sized + 'static,
    B: EventBus + ?Sized + 'static,
{
    pub fn publish_after_commit(
        &self,
        tx: &TransactionContext,
        records: Vec<ChangeRecord>,
    ) -> Result<(), ChangeEventError> {
        Ok(self.publisher.publish_after_commit(tx, records)?)
    }
}
