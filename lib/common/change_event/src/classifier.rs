use std::sync::Arc;

use change_set::{AttributeChangeSet, DiffBuilder, EntityHandle, EntityMetadata, ManagedEntity};
use tracing::debug;

use crate::{
    publishing::{PublishingInfo, PublishingInfoCache},
    record::{ChangeKind, ChangeRecord},
};

/// 变更分类器
///
/// 判断实体属于创建、更新还是删除，并构建对应的属性变更集。
/// 判定顺序固定：
/// 1. 启用了创建事件且实体为新建 -> `Created`
/// 2. 启用了更新或删除事件时查询变更监听器，没有监听器则跳过
/// 3. 启用了删除事件且监听器报告已删除 -> `Deleted`
/// 4. 启用了更新事件且监听器有变更 -> `Updated`
pub struct ChangeClassifier<M: EntityMetadata + ?Sized> {
    metadata: Arc<M>,
    cache: Arc<PublishingInfoCache>,
}

impl<M: EntityMetadata + ?Sized> ChangeClassifier<M> {
    pub fn new(metadata: Arc<M>, cache: Arc<PublishingInfoCache>) -> Self {
        Self { metadata, cache }
    }

    #[inline]
    pub fn metadata(&self) -> &Arc<M> {
        &self.metadata
    }

    #[inline]
    pub fn cache(&self) -> &Arc<PublishingInfoCache> {
        &self.cache
    }

    pub fn classify(
        &self,
        entity: &dyn ManagedEntity,
        info: &PublishingInfo,
    ) -> Option<(ChangeKind, AttributeChangeSet)> {
        if !info.enabled {
            return None;
        }

        let diff = DiffBuilder::new(self.metadata.as_ref());
        if info.on_created && entity.is_new() {
            return Some((ChangeKind::Created, diff.build_for_create_or_delete(entity, false)));
        }
        if !(info.on_updated || info.on_deleted) {
            return None;
        }

        let Some(listener) = entity.change_listener() else {
            debug!("cannot classify {:?}: no change listener attached", entity);
            return None;
        };

        if info.on_deleted && listener.is_deleted() {
            return Some((ChangeKind::Deleted, diff.build_for_create_or_delete(entity, true)));
        }
        if info.on_updated && listener.has_changes() {
            return Some((ChangeKind::Updated, diff.build_for_update(entity, &listener.raw_changes())));
        }
        None
    }

    /// 对单个实体分类并生成变更记录
    pub fn record_for(&self, entity: &EntityHandle) -> Option<ChangeRecord> {
        let info = self.cache.get(self.metadata.as_ref(), &entity.entity_type());
        let (kind, changes) = self.classify(entity.as_ref(), &info)?;
        Some(ChangeRecord::new(Arc::clone(entity), kind, changes, info.declared_type.clone()))
    }

    pub fn records_for(&self, entities: &[EntityHandle]) -> Vec<ChangeRecord> {
        entities.iter().filter_map(|entity| self.record_for(entity)).collect()
    }
}

#[cfg(test)]
mod tests {
    use change_set::{
        test_util::{TestEntity, TestMetadata},
        EntityType, OldValue, PublishingFlags,
    };

    use super::*;

    fn classifier(flags: PublishingFlags) -> ChangeClassifier<TestMetadata> {
        let metadata = TestMetadata::builder()
            .entity("Invoice", |e| e.scalar("status").scalar("number"))
            .publishing("Invoice", flags)
            .build();
        ChangeClassifier::new(Arc::new(metadata), Arc::new(PublishingInfoCache::default()))
    }

    fn kind_of(classifier: &ChangeClassifier<TestMetadata>, entity: TestEntity) -> Option<ChangeKind> {
        let handle: EntityHandle = entity.into_handle();
        classifier.record_for(&handle).map(|record| record.kind())
    }

    #[test]
    fn test_created_takes_precedence() {
        let entity = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT").as_new();
        entity.mark_deleted();

        assert_eq!(kind_of(&classifier(PublishingFlags::ALL), entity), Some(ChangeKind::Created));
    }

    #[test]
    fn test_created_wins_over_recorded_changes() {
        let entity = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT").as_new();
        entity.set("status", "SENT");

        let classifier = classifier(PublishingFlags::ALL);
        let handle: EntityHandle = entity.into_handle();
        let record = classifier.record_for(&handle).unwrap();
        assert_eq!(record.kind(), ChangeKind::Created);
        // 创建只标记被赋值的属性
        assert_eq!(record.changes().old_value("status"), Some(&OldValue::Absent));
        assert!(!record.changes().is_changed("number"));
    }

    #[test]
    fn test_new_entity_without_created_events() {
        let entity = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT").as_new();
        assert_eq!(kind_of(&classifier(PublishingFlags::new(false, true, true)), entity), None);
    }

    #[test]
    fn test_deleted_before_updated() {
        let entity = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT");
        entity.set("status", "SENT");
        entity.mark_deleted();

        let classifier = classifier(PublishingFlags::ALL);
        let handle: EntityHandle = entity.into_handle();
        let record = classifier.record_for(&handle).unwrap();
        assert_eq!(record.kind(), ChangeKind::Deleted);
        // 删除记录保存最终值
        assert_eq!(record.changes().old_value("status"), Some(&OldValue::from("SENT")));
    }

    #[test]
    fn test_updated() {
        let entity = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT");
        entity.set("status", "SENT");

        let classifier = classifier(PublishingFlags::new(false, true, false));
        let handle: EntityHandle = entity.into_handle();
        let record = classifier.record_for(&handle).unwrap();
        assert_eq!(record.kind(), ChangeKind::Updated);
        assert_eq!(record.changes().old_value("status"), Some(&OldValue::from("DRAFT")));
        assert_eq!(record.declared_type(), &EntityType::from("Invoice"));
    }

    #[test]
    fn test_unchanged_entity_has_no_record() {
        let entity = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT");
        assert_eq!(kind_of(&classifier(PublishingFlags::ALL), entity), None);
    }

    #[test]
    fn test_deleted_without_deleted_events() {
        let entity = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT");
        entity.mark_deleted();
        assert_eq!(kind_of(&classifier(PublishingFlags::new(true, false, false)), entity), None);
    }

    #[test]
    fn test_missing_listener_is_skipped() {
        let _ = tracing_subscriber::fmt::try_init();
        let entity = TestEntity::new("Invoice", 1i64).with_value("status", "DRAFT").without_listener();
        assert_eq!(kind_of(&classifier(PublishingFlags::ALL), entity), None);
    }

    #[test]
    fn test_disabled_type() {
        let classifier = classifier(PublishingFlags::ALL);
        let entity = TestEntity::new("Customer", 1i64).as_new();
        assert_eq!(kind_of(&classifier, entity), None);
    }
}
