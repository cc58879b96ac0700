use std::fmt;

use change_set::{same_entity, AttributeChangeSet, EntityHandle, EntityType};
use serde::{Deserialize, Serialize};

/// 变更种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Created => "CREATED",
            ChangeKind::Updated => "UPDATED",
            ChangeKind::Deleted => "DELETED",
        };
        f.write_str(name)
    }
}

/// 单个实体在事务内的变更记录
///
/// 事务进行期间持有实体句柄；同一实体的多次观察通过 [`ChangeRecord::merge_with`] 合并，
/// 一个事务内每个实体最多一条记录。
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    entity: EntityHandle,
    kind: ChangeKind,
    changes: AttributeChangeSet,
    declared_type: EntityType,
}

impl ChangeRecord {
    pub fn new(
        entity: EntityHandle,
        kind: ChangeKind,
        changes: AttributeChangeSet,
        declared_type: EntityType,
    ) -> Self {
        Self { entity, kind, changes, declared_type }
    }

    #[inline]
    pub fn entity(&self) -> &EntityHandle {
        &self.entity
    }

    #[inline]
    pub fn kind(&self) -> ChangeKind {
        self.kind
    }

    #[inline]
    pub fn changes(&self) -> &AttributeChangeSet {
        &self.changes
    }

    #[inline]
    pub fn declared_type(&self) -> &EntityType {
        &self.declared_type
    }

    /// 是否描述同一个实体实例（句柄同一性）
    #[inline]
    pub fn is_same_subject(&self, entity: &EntityHandle) -> bool {
        same_entity(&self.entity, entity)
    }

    /// 合并同一实体的后一次观察
    ///
    /// 后一次观察为删除时记录变为删除，否则保持第一次观察的种类；
    /// 属性旧值保留第一次记录的值。
    pub fn merge_with(&mut self, later: ChangeRecord) {
        if later.kind == ChangeKind::Deleted {
            self.kind = ChangeKind::Deleted;
        }
        self.changes = std::mem::take(&mut self.changes).merge(later.changes);
    }
}

/// 列表中每个实体是否只出现一次
pub fn has_distinct_subjects(records: &[ChangeRecord]) -> bool {
    records
        .iter()
        .enumerate()
        .all(|(i, record)| records[i + 1..].iter().all(|other| !other.is_same_subject(record.entity())))
}
