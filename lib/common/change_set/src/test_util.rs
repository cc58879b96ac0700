//! 内存版协作者，用于测试
//!
//! - [`TestMetadata`]: 以构建器声明类型、属性、扩展类型与发布配置
//! - [`TestEntity`]: 带变更监听器的实体，`set` / `set_embedded` 模拟 ORM 记录字段级修改

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::{
    entity::{AttributeReadError, ChangeListener, EntityHandle, ManagedEntity, RawChange},
    metadata::{AttributeDescriptor, AttributeKind, EntityMetadata, PublishingFlags},
    value::{CollectionKind, EntityType, KeyValue, Value},
};

// ============================================================================
// 元数据
// ============================================================================

#[derive(Debug, Default)]
pub struct TestMetadata {
    attributes: HashMap<EntityType, Vec<AttributeDescriptor>>,
    extensions: HashMap<EntityType, EntityType>,
    publishing: HashMap<EntityType, PublishingFlags>,
    publishing_lookups: AtomicUsize,
    attribute_lookups: AtomicUsize,
}

impl TestMetadata {
    pub fn builder() -> TestMetadataBuilder {
        TestMetadataBuilder::default()
    }

    /// `publishing_config` 被调用的次数
    pub fn publishing_lookups(&self) -> usize {
        self.publishing_lookups.load(Ordering::SeqCst)
    }

    /// `declared_attributes` 被调用的次数
    pub fn attribute_lookups(&self) -> usize {
        self.attribute_lookups.load(Ordering::SeqCst)
    }
}

impl EntityMetadata for TestMetadata {
    fn declared_attributes(&self, entity_type: &EntityType) -> Vec<AttributeDescriptor> {
        self.attribute_lookups.fetch_add(1, Ordering::SeqCst);
        self.attributes
            .get(entity_type)
            .or_else(|| self.attributes.get(&self.canonical_type(entity_type)))
            .cloned()
            .unwrap_or_default()
    }

    fn canonical_type(&self, entity_type: &EntityType) -> EntityType {
        self.extensions.get(entity_type).cloned().unwrap_or_else(|| entity_type.clone())
    }

    fn publishing_config(&self, entity_type: &EntityType) -> Option<PublishingFlags> {
        self.publishing_lookups.fetch_add(1, Ordering::SeqCst);
        self.publishing.get(entity_type).copied()
    }
}

#[derive(Debug, Default)]
pub struct TestMetadataBuilder {
    metadata: TestMetadata,
}

impl TestMetadataBuilder {
    pub fn entity(
        mut self,
        entity_type: impl Into<EntityType>,
        declare: impl FnOnce(EntityDeclaration) -> EntityDeclaration,
    ) -> Self {
        let declaration = declare(EntityDeclaration::default());
        self.metadata.attributes.insert(entity_type.into(), declaration.attributes);
        self
    }

    /// 声明 `extension` 为 `original` 的动态扩展类型
    pub fn extension(mut self, extension: impl Into<EntityType>, original: impl Into<EntityType>) -> Self {
        self.metadata.extensions.insert(extension.into(), original.into());
        self
    }

    pub fn publishing(mut self, entity_type: impl Into<EntityType>, flags: PublishingFlags) -> Self {
        self.metadata.publishing.insert(entity_type.into(), flags);
        self
    }

    pub fn build(self) -> TestMetadata {
        self.metadata
    }
}

#[derive(Debug, Default)]
pub struct EntityDeclaration {
    attributes: Vec<AttributeDescriptor>,
}

impl EntityDeclaration {
    fn attribute(mut self, name: &str, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeDescriptor::new(name, kind));
        self
    }

    pub fn scalar(self, name: &str) -> Self {
        self.attribute(name, AttributeKind::Scalar)
    }

    pub fn reference(self, name: &str) -> Self {
        self.attribute(name, AttributeKind::EntityRef)
    }

    pub fn list(self, name: &str) -> Self {
        self.attribute(name, AttributeKind::Collection(CollectionKind::List))
    }

    pub fn set(self, name: &str) -> Self {
        self.attribute(name, AttributeKind::Collection(CollectionKind::Set))
    }

    pub fn embedded(self, name: &str, embedded_type: impl Into<EntityType>) -> Self {
        self.attribute(name, AttributeKind::Embedded(embedded_type.into()))
    }
}

// ============================================================================
// 实体与变更监听器
// ============================================================================

/// 变更监听器：同一属性在两次 flush 之间只保留第一次记录的旧值
#[derive(Debug, Default)]
pub struct TestChangeListener {
    deleted: AtomicBool,
    changes: Mutex<Vec<RawChange>>,
}

impl TestChangeListener {
    fn record(&self, name: &str, old_value: Value) {
        let mut changes = self.changes.lock();
        if !changes.iter().any(|c| c.name() == name) {
            changes.push(RawChange::Attribute { name: name.to_string(), old_value });
        }
    }

    fn record_embedded(&self, name: &str, attribute: &str, old_value: Value) {
        let mut changes = self.changes.lock();
        let group = changes.iter_mut().find_map(|c| match c {
            RawChange::Embedded { name: group_name, changes } if group_name == name => Some(changes),
            _ => None,
        });
        match group {
            Some(group) => {
                if !group.iter().any(|c| c.name() == attribute) {
                    group.push(RawChange::Attribute { name: attribute.to_string(), old_value });
                }
            }
            None => changes.push(RawChange::embedded(
                name,
                vec![RawChange::Attribute { name: attribute.to_string(), old_value }],
            )),
        }
    }

    fn reset(&self) {
        self.changes.lock().clear();
    }
}

impl ChangeListener for TestChangeListener {
    fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    fn has_changes(&self) -> bool {
        !self.changes.lock().is_empty()
    }

    fn raw_changes(&self) -> Vec<RawChange> {
        self.changes.lock().clone()
    }
}

pub struct TestEntity {
    entity_type: EntityType,
    key: Option<KeyValue>,
    values: Mutex<BTreeMap<String, Value>>,
    embedded: BTreeMap<String, Arc<TestEntity>>,
    failing: BTreeSet<String>,
    new: AtomicBool,
    listener: Option<TestChangeListener>,
}

impl TestEntity {
    /// 已持久化的实体（带主键与变更监听器）
    pub fn new(entity_type: impl Into<EntityType>, key: impl Into<KeyValue>) -> Self {
        Self::with_key(entity_type.into(), Some(key.into()))
    }

    /// 尚未分配主键的实体
    pub fn new_unsaved(entity_type: impl Into<EntityType>) -> Self {
        Self::with_key(entity_type.into(), None)
    }

    fn with_key(entity_type: EntityType, key: Option<KeyValue>) -> Self {
        Self {
            entity_type,
            key,
            values: Mutex::new(BTreeMap::new()),
            embedded: BTreeMap::new(),
            failing: BTreeSet::new(),
            new: AtomicBool::new(false),
            listener: Some(TestChangeListener::default()),
        }
    }

    pub fn with_value(self, name: &str, value: impl Into<Value>) -> Self {
        self.values.lock().insert(name.to_string(), value.into());
        self
    }

    pub fn with_embedded(mut self, name: &str, embedded: TestEntity) -> Self {
        self.embedded.insert(name.to_string(), Arc::new(embedded));
        self
    }

    /// 读取该属性时返回错误
    pub fn with_failing_attribute(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn without_listener(mut self) -> Self {
        self.listener = None;
        self
    }

    /// 标记为持久化层的新建实体
    pub fn as_new(self) -> Self {
        self.new.store(true, Ordering::SeqCst);
        self
    }

    pub fn into_handle(self) -> Arc<TestEntity> {
        Arc::new(self)
    }

    /// 修改属性并由监听器记录旧值
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        let old_value = self.values.lock().insert(name.to_string(), value.into()).unwrap_or(Value::Null);
        if let Some(listener) = &self.listener {
            listener.record(name, old_value);
        }
    }

    /// 修改嵌入对象的属性，变更记录在所属实体的监听器中
    pub fn set_embedded(&self, name: &str, attribute: &str, value: impl Into<Value>) {
        let Some(embedded) = self.embedded.get(name) else {
            return;
        };
        let old_value =
            embedded.values.lock().insert(attribute.to_string(), value.into()).unwrap_or(Value::Null);
        if let Some(listener) = &self.listener {
            listener.record_embedded(name, attribute, old_value);
        }
    }

    pub fn mark_deleted(&self) {
        if let Some(listener) = &self.listener {
            listener.deleted.store(true, Ordering::SeqCst);
        }
    }

    /// 模拟 flush 完成：监听器清空，新建标记清除
    pub fn flush(&self) {
        self.new.store(false, Ordering::SeqCst);
        if let Some(listener) = &self.listener {
            listener.reset();
        }
    }
}

impl fmt::Debug for TestEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}-{}", self.entity_type, key),
            None => write!(f, "{}-<unsaved>", self.entity_type),
        }
    }
}

impl ManagedEntity for TestEntity {
    fn entity_type(&self) -> EntityType {
        self.entity_type.clone()
    }

    fn primary_key(&self) -> Option<KeyValue> {
        self.key.clone()
    }

    fn attribute_value(&self, name: &str) -> Result<Value, AttributeReadError> {
        if self.failing.contains(name) {
            return Err(AttributeReadError::new(name, "lazy loading failed"));
        }
        if let Some(embedded) = self.embedded.get(name) {
            let handle: EntityHandle = embedded.clone();
            return Ok(Value::Entity(handle));
        }
        Ok(self.values.lock().get(name).cloned().unwrap_or(Value::Null))
    }

    fn is_new(&self) -> bool {
        self.new.load(Ordering::SeqCst)
    }

    fn change_listener(&self) -> Option<&dyn ChangeListener> {
        self.listener.as_ref().map(|listener| listener as &dyn ChangeListener)
    }
}
