use thiserror::Error;

use crate::{
    entity::AttributeReadError,
    metadata::AttributeKind,
    value::EntityType,
};

/// 单个属性的差异构建失败
///
/// 只影响所在属性：差异构建器在属性边界捕获并记录日志，跳过该属性后继续。
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiffError {
    #[error(transparent)]
    AttributeRead(#[from] AttributeReadError),

    #[error("attribute '{attribute}' declared as {expected:?} but holds a {actual} value")]
    KindMismatch { attribute: String, expected: AttributeKind, actual: &'static str },

    #[error("attribute '{attribute}' is not declared by {entity_type}")]
    UndeclaredAttribute { entity_type: EntityType, attribute: String },

    #[error("referenced {entity_type} instance has no primary key")]
    MissingPrimaryKey { entity_type: EntityType },
}
