use change_set::{AttributeChangeSet, DiffBuilder, DiffError, EntityMetadata, EntityType, IdentityToken};
use serde::Serialize;

use crate::record::{ChangeKind, ChangeRecord};

/// 发布到事件总线的实体变更事件
///
/// 不再持有实体句柄，主体以身份令牌表示，可序列化用于审计日志。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityChangedEvent {
    pub entity_id: IdentityToken,
    pub kind: ChangeKind,
    pub changes: AttributeChangeSet,
    pub declared_type: EntityType,
}

impl EntityChangedEvent {
    /// 由变更记录生成事件；实体没有主键时返回 [`DiffError::MissingPrimaryKey`]
    pub fn from_record<M: EntityMetadata + ?Sized>(
        record: &ChangeRecord,
        metadata: &M,
    ) -> Result<Self, DiffError> {
        let entity_id = DiffBuilder::new(metadata).identity_of(record.entity().as_ref())?;
        Ok(Self {
            entity_id,
            kind: record.kind(),
            changes: record.changes().clone(),
            declared_type: record.declared_type().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use change_set::{
        test_util::{TestEntity, TestMetadata},
        EntityHandle,
    };

    use super::*;

    #[test]
    fn test_event_carries_canonical_identity() {
        let metadata = TestMetadata::builder().extension("ExtOrder", "Order").build();
        let order: EntityHandle = TestEntity::new("ExtOrder", 42i64).into_handle();
        let changes = AttributeChangeSet::builder().add_change("status", "NEW").build();
        let record = ChangeRecord::new(order, ChangeKind::Updated, changes, EntityType::from("Order"));

        let event = EntityChangedEvent::from_record(&record, &metadata).unwrap();
        assert_eq!(event.entity_id, IdentityToken::new("Order", 42i64));
        assert_eq!(event.kind, ChangeKind::Updated);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["entity_id"], serde_json::json!({"entity_type": "Order", "key": 42}));
        assert_eq!(json["kind"], "updated");
    }

    #[test]
    fn test_unsaved_subject_has_no_event() {
        let metadata = TestMetadata::default();
        let entity: EntityHandle = TestEntity::new_unsaved("Order").into_handle();
        let record =
            ChangeRecord::new(entity, ChangeKind::Created, AttributeChangeSet::default(), EntityType::from("Order"));

        let result = EntityChangedEvent::from_record(&record, &metadata);
        assert!(matches!(result, Err(DiffError::MissingPrimaryKey { .. })));
    }
}
