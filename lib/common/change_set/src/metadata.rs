use serde::{Deserialize, Serialize};

use crate::value::{CollectionKind, EntityType};

/// 属性种类
///
/// 由元数据层针对每个声明属性给出一次，差异构建器按此分派。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Scalar,
    /// 引用另一个实体
    EntityRef,
    /// 实体集合（有序或无序）
    Collection(CollectionKind),
    /// 嵌入对象，携带嵌入类型
    Embedded(EntityType),
}

/// 声明的持久化属性
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub kind: AttributeKind,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self { name: name.into(), kind }
    }
}

/// 某类型启用的变更事件种类
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublishingFlags {
    #[serde(default)]
    pub created: bool,
    #[serde(default)]
    pub updated: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl PublishingFlags {
    pub const ALL: Self = Self { created: true, updated: true, deleted: true };

    pub const fn new(created: bool, updated: bool, deleted: bool) -> Self {
        Self { created, updated, deleted }
    }
}

/// 元数据协作者
///
/// 提供类型的持久化属性列表、属性种类、扩展类型解析和事件发布配置。
/// 元数据如何加载不在本 crate 范围内。
pub trait EntityMetadata: Send + Sync {
    /// 类型声明的持久化属性（按声明顺序）
    fn declared_attributes(&self, entity_type: &EntityType) -> Vec<AttributeDescriptor>;

    /// 将动态扩展类型解析为原始类型；非扩展类型返回自身
    fn canonical_type(&self, entity_type: &EntityType) -> EntityType;

    /// 类型上声明的事件发布配置；未声明返回 `None`
    fn publishing_config(&self, entity_type: &EntityType) -> Option<PublishingFlags>;

    fn attribute_kind(&self, entity_type: &EntityType, name: &str) -> Option<AttributeKind> {
        self.declared_attributes(entity_type)
            .into_iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.kind)
    }

    fn is_entity_typed(&self, entity_type: &EntityType, name: &str) -> bool {
        matches!(self.attribute_kind(entity_type, name), Some(AttributeKind::EntityRef))
    }

    fn is_collection_typed(&self, entity_type: &EntityType, name: &str) -> bool {
        matches!(self.attribute_kind(entity_type, name), Some(AttributeKind::Collection(_)))
    }

    fn is_embedded(&self, entity_type: &EntityType, name: &str) -> bool {
        matches!(self.attribute_kind(entity_type, name), Some(AttributeKind::Embedded(_)))
    }
}
