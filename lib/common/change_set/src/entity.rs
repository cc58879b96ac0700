use std::{fmt::Debug, sync::Arc};

use thiserror::Error;

use crate::value::{EntityType, KeyValue, Value};

/// 受管实体句柄
///
/// 变更记录在事务内以句柄（而非拷贝）持有实体；句柄相等即指针相等。
pub type EntityHandle = Arc<dyn ManagedEntity>;

/// 判断两个句柄是否指向同一个实体对象
///
/// 只比较数据指针，忽略 vtable。
#[inline]
pub fn same_entity(a: &EntityHandle, b: &EntityHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// 单个属性读取失败
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot read attribute '{attribute}': {reason}")]
pub struct AttributeReadError {
    pub attribute: String,
    pub reason: String,
}

impl AttributeReadError {
    pub fn new(attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Self { attribute: attribute.into(), reason: reason.into() }
    }
}

/// 持久化引擎管理的实体
///
/// 由 ORM 层实现；本 crate 只通过此接口读取实体状态。
pub trait ManagedEntity: Debug + Send + Sync {
    /// 运行时类型（可能是原始类型的动态扩展）
    fn entity_type(&self) -> EntityType;

    /// 主键；尚未分配时返回 `None`
    fn primary_key(&self) -> Option<KeyValue>;

    /// 读取属性当前值
    fn attribute_value(&self, name: &str) -> Result<Value, AttributeReadError>;

    /// 持久化层是否将此实体标记为新建
    fn is_new(&self) -> bool;

    /// 附着在实体上的变更监听器；未附着时返回 `None`
    fn change_listener(&self) -> Option<&dyn ChangeListener>;
}

/// 变更监听器上报的原始变更
#[derive(Debug, Clone)]
pub enum RawChange {
    /// 普通属性的旧值
    Attribute { name: String, old_value: Value },
    /// 嵌入对象内部的一组变更
    Embedded { name: String, changes: Vec<RawChange> },
}

impl RawChange {
    pub fn attribute(name: impl Into<String>, old_value: impl Into<Value>) -> Self {
        RawChange::Attribute { name: name.into(), old_value: old_value.into() }
    }

    pub fn embedded(name: impl Into<String>, changes: Vec<RawChange>) -> Self {
        RawChange::Embedded { name: name.into(), changes }
    }

    pub fn name(&self) -> &str {
        match self {
            RawChange::Attribute { name, .. } | RawChange::Embedded { name, .. } => name,
        }
    }
}

/// 实体级变更监听器
///
/// 记录实体自加载（或创建）以来的字段级修改。
pub trait ChangeListener {
    /// 实体是否已在当前单元中被删除
    fn is_deleted(&self) -> bool;

    /// 是否记录了任何变更
    fn has_changes(&self) -> bool;

    /// 已记录的原始变更（可能包含嵌入对象的变更组）
    fn raw_changes(&self) -> Vec<RawChange>;
}
