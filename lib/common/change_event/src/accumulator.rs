use change_set::{EntityHandle, EntityMetadata};
use tracing::trace;

use crate::{
    classifier::ChangeClassifier,
    error::ChangeEventError,
    record::{has_distinct_subjects, ChangeRecord},
    transaction::{TransactionContext, TransactionOutcome, TransactionSynchronization},
};

/// 累加器在某个事务中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// 事务中尚未绑定累加资源
    Unbound,
    BoundEmpty,
    BoundAccumulating,
}

/// 绑定在事务上的累加资源
#[derive(Debug, Default)]
struct AccumulatedChanges {
    records: Vec<ChangeRecord>,
    synchronized: bool,
}

impl AccumulatedChanges {
    /// 首次访问时返回 `true`，此时需要注册解绑回调
    fn mark_synchronized(&mut self) -> bool {
        !std::mem::replace(&mut self.synchronized, true)
    }
}

/// 事务完成时解绑累加资源，无论提交还是回滚
struct ReleaseAccumulatedChanges;

impl TransactionSynchronization for ReleaseAccumulatedChanges {
    fn after_completion(self: Box<Self>, tx: &TransactionContext, outcome: TransactionOutcome) {
        if let Some(changes) = tx.unbind_resource::<AccumulatedChanges>() {
            trace!("{} completed as {:?}, released {} change record(s)", tx.id(), outcome, changes.records.len());
        }
    }
}

/// 事务范围的变更累加器
///
/// 每次 flush 前通过 [`ChangeAccumulator::observe`] 分类实体并合并到事务的记录列表，
/// 同一实体只保留一条记录，属性旧值保留事务内第一次观察到的值。
pub struct ChangeAccumulator<M: EntityMetadata + ?Sized> {
    classifier: ChangeClassifier<M>,
}

impl<M: EntityMetadata + ?Sized> ChangeAccumulator<M> {
    pub fn new(classifier: ChangeClassifier<M>) -> Self {
        Self { classifier }
    }

    #[inline]
    pub fn classifier(&self) -> &ChangeClassifier<M> {
        &self.classifier
    }

    /// 分类实体并合并到事务的累加列表
    pub fn observe(&self, tx: &TransactionContext, entities: &[EntityHandle]) -> Result<(), ChangeEventError> {
        trace!("observe {:?}", entities);
        let incoming = self.classifier.records_for(entities);

        let newly_bound = tx.with_resource(|changes: &mut AccumulatedChanges| {
            merge(&mut changes.records, incoming);
            changes.mark_synchronized()
        })?;
        if newly_bound {
            tx.register_synchronization(ReleaseAccumulatedChanges)?;
        }
        Ok(())
    }

    /// 返回累加列表与本次实体合并后的快照，不修改事务中的累加列表
    pub fn collect(
        &self,
        tx: &TransactionContext,
        entities: &[EntityHandle],
    ) -> Result<Vec<ChangeRecord>, ChangeEventError> {
        trace!("collect {:?}", entities);
        let (mut records, newly_bound) = tx.with_resource(|changes: &mut AccumulatedChanges| {
            (changes.records.clone(), changes.mark_synchronized())
        })?;
        if newly_bound {
            tx.register_synchronization(ReleaseAccumulatedChanges)?;
        }

        merge(&mut records, self.classifier.records_for(entities));
        Ok(records)
    }

    /// 事务当前累加的记录（按第一次观察的顺序）
    pub fn records(&self, tx: &TransactionContext) -> Vec<ChangeRecord> {
        tx.with_existing_resource(|changes: &AccumulatedChanges| changes.records.clone()).unwrap_or_default()
    }

    pub fn state(&self, tx: &TransactionContext) -> AccumulatorState {
        match tx.with_existing_resource(|changes: &AccumulatedChanges| changes.records.is_empty()) {
            None => AccumulatorState::Unbound,
            Some(true) => AccumulatorState::BoundEmpty,
            Some(false) => AccumulatorState::BoundAccumulating,
        }
    }
}

/// 按实体合并；新实体追加到末尾，已有实体合并到原记录
pub(crate) fn merge(accumulated: &mut Vec<ChangeRecord>, incoming: Vec<ChangeRecord>) {
    for record in incoming {
        match accumulated.iter_mut().find(|existing| existing.is_same_subject(record.entity())) {
            Some(existing) => existing.merge_with(record),
            None => accumulated.push(record),
        }
    }
    debug_assert!(has_distinct_subjects(accumulated), "duplicate change records for one entity");
    trace!("merged {:?}", accumulated);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use change_set::{
        test_util::{TestEntity, TestMetadata},
        OldValue, PublishingFlags,
    };

    use super::*;
    use crate::{publishing::PublishingInfoCache, record::ChangeKind};

    fn accumulator() -> ChangeAccumulator<TestMetadata> {
        let metadata = TestMetadata::builder()
            .entity("Invoice", |e| e.scalar("status"))
            .publishing("Invoice", PublishingFlags::ALL)
            .build();
        ChangeAccumulator::new(ChangeClassifier::new(Arc::new(metadata), Arc::new(PublishingInfoCache::default())))
    }

    #[test]
    fn test_state_transitions() {
        let accumulator = accumulator();
        let tx = TransactionContext::begin();
        assert_eq!(accumulator.state(&tx), AccumulatorState::Unbound);

        accumulator.observe(&tx, &[]).unwrap();
        assert_eq!(accumulator.state(&tx), AccumulatorState::BoundEmpty);

        let invoice = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT").into_handle();
        invoice.set("status", "SENT");
        let handle: EntityHandle = invoice;
        accumulator.observe(&tx, &[handle]).unwrap();
        assert_eq!(accumulator.state(&tx), AccumulatorState::BoundAccumulating);

        tx.commit().unwrap();
        assert_eq!(accumulator.state(&tx), AccumulatorState::Unbound);
        assert_eq!(tx.resource_count(), 0);
    }

    #[test]
    fn test_single_release_synchronization() {
        let accumulator = accumulator();
        let tx = TransactionContext::begin();

        accumulator.observe(&tx, &[]).unwrap();
        accumulator.observe(&tx, &[]).unwrap();
        accumulator.collect(&tx, &[]).unwrap();
        assert_eq!(tx.synchronization_count(), 1);
    }

    #[test]
    fn test_collect_does_not_write_back() {
        let accumulator = accumulator();
        let tx = TransactionContext::begin();
        let invoice = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT").into_handle();
        invoice.set("status", "SENT");
        let handle: EntityHandle = invoice;

        let snapshot = accumulator.collect(&tx, &[Arc::clone(&handle)]).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].kind(), ChangeKind::Updated);
        assert_eq!(accumulator.state(&tx), AccumulatorState::BoundEmpty);
    }

    #[test]
    fn test_merge_appends_in_first_observed_order() {
        let accumulator = accumulator();
        let tx = TransactionContext::begin();
        let first = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT").into_handle();
        let second = TestEntity::new("Invoice", 2i64).with_value("status", "DRAFT").into_handle();
        first.set("status", "SENT");
        second.set("status", "SENT");
        let first: EntityHandle = first;
        let second: EntityHandle = second;

        accumulator.observe(&tx, &[Arc::clone(&first)]).unwrap();
        accumulator.observe(&tx, &[Arc::clone(&second), Arc::clone(&first)]).unwrap();

        let records = accumulator.records(&tx);
        assert_eq!(records.len(), 2);
        assert!(records[0].is_same_subject(&first));
        assert!(records[1].is_same_subject(&second));
        assert_eq!(records[0].changes().old_value("status"), Some(&OldValue::from("DRAFT")));
    }
}
