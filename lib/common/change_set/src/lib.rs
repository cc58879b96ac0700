//! 实体属性变更集
//!
//! 在一个工作单元内记录受管实体的属性旧值：
//! - [`AttributeChangeSet`]: 单个实体的属性旧值集合，支持嵌入对象的嵌套变更
//! - [`DiffBuilder`]: 从变更监听器的原始通知（更新）或实体完整状态（创建 / 删除）构建变更集
//! - 实体引用形式的旧值保存为 [`IdentityToken`]，事务结束后仍可安全比较
//!
//! 与持久化引擎之间通过 [`EntityMetadata`]、[`ManagedEntity`]、[`ChangeListener`] 三个协作者接口交互。

pub mod attribute_changes;
pub mod diff_builder;
pub mod entity;
pub mod error;
pub mod metadata;
pub mod value;

#[cfg(any(test, feature = "test-util"))]
pub mod test_util;

// 重新导出核心类型，方便使用
pub use attribute_changes::{AttributeChangeSet, AttributeChangeSetBuilder};
pub use diff_builder::DiffBuilder;
pub use entity::{same_entity, AttributeReadError, ChangeListener, EntityHandle, ManagedEntity, RawChange};
pub use error::DiffError;
pub use metadata::{AttributeDescriptor, AttributeKind, EntityMetadata, PublishingFlags};
pub use value::{CollectionKind, EntityType, IdentityToken, KeyValue, OldValue, ScalarValue, Value};
