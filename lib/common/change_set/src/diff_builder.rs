use std::collections::BTreeSet;

use tracing::trace;

use crate::{
    attribute_changes::{AttributeChangeSet, AttributeChangeSetBuilder},
    entity::{ManagedEntity, RawChange},
    error::DiffError,
    metadata::{AttributeDescriptor, AttributeKind, EntityMetadata},
    value::{CollectionKind, EntityType, IdentityToken, OldValue, Value},
};

/// 差异构建器
///
/// 遍历实体声明的属性（创建 / 删除），或变更监听器上报的原始变更（更新），
/// 生成 [`AttributeChangeSet`]。实体引用和实体集合形式的旧值会被转换为身份令牌。
///
/// 单个属性失败（读取失败、种类不符、引用缺少主键）只跳过该属性，不影响其余属性。
pub struct DiffBuilder<'a, M: EntityMetadata + ?Sized> {
    metadata: &'a M,
}

impl<'a, M: EntityMetadata + ?Sized> DiffBuilder<'a, M> {
    #[inline]
    pub fn new(metadata: &'a M) -> Self {
        Self { metadata }
    }

    /// 实体的身份令牌（规范类型 + 主键）
    pub fn identity_of(&self, entity: &dyn ManagedEntity) -> Result<IdentityToken, DiffError> {
        let entity_type = self.metadata.canonical_type(&entity.entity_type());
        match entity.primary_key() {
            Some(key) => Ok(IdentityToken { entity_type, key }),
            None => Err(DiffError::MissingPrimaryKey { entity_type }),
        }
    }

    // ============================================================================
    // 更新
    // ============================================================================

    /// 根据变更监听器上报的原始变更构建更新差异
    ///
    /// 嵌入对象的变更组递归构建后放入嵌套变更集。
    pub fn build_for_update(
        &self,
        entity: &dyn ManagedEntity,
        raw_changes: &[RawChange],
    ) -> AttributeChangeSet {
        self.build_from_raw(&entity.entity_type(), raw_changes)
    }

    fn build_from_raw(&self, entity_type: &EntityType, raw_changes: &[RawChange]) -> AttributeChangeSet {
        let declared = self.metadata.declared_attributes(entity_type);
        let mut builder = AttributeChangeSet::builder();
        for change in raw_changes {
            let result = match change {
                // 整个嵌入对象被替换时，旧对象的属性值作为嵌套旧值
                RawChange::Attribute { name, old_value } => declared_kind(&declared, entity_type, name)
                    .and_then(|kind| self.push_final_value(&mut builder, name.clone(), &kind, old_value)),
                RawChange::Embedded { name, changes } => {
                    declared_kind(&declared, entity_type, name).and_then(|kind| match kind {
                        AttributeKind::Embedded(embedded_type) => {
                            let nested = self.build_from_raw(&embedded_type, changes);
                            builder.push_embedded_changes(name.as_str(), nested);
                            Ok(())
                        }
                        other => Err(DiffError::KindMismatch {
                            attribute: name.clone(),
                            expected: other,
                            actual: "embedded group",
                        }),
                    })
                }
            };
            if let Err(err) = result {
                skip_attribute(entity_type, &err);
            }
        }
        builder.build()
    }

    // ============================================================================
    // 创建 / 删除
    // ============================================================================

    /// 为创建或删除合成完整的属性差异
    ///
    /// - 创建：每个当前值非空的属性记录一条旧值为 `Absent` 的变更，只标记哪些属性被赋值
    /// - 删除：每个声明属性记录其最终值作为旧值，嵌入对象递归处理
    pub fn build_for_create_or_delete(
        &self,
        entity: &dyn ManagedEntity,
        is_delete: bool,
    ) -> AttributeChangeSet {
        let entity_type = entity.entity_type();
        let mut builder = AttributeChangeSet::builder();

        for attribute in self.metadata.declared_attributes(&entity_type) {
            let value = match entity.attribute_value(&attribute.name) {
                Ok(value) => value,
                Err(err) => {
                    skip_attribute(&entity_type, &DiffError::from(err));
                    continue;
                }
            };

            if !is_delete {
                if !value.is_null() {
                    builder.push_change(attribute.name, OldValue::Absent);
                }
                continue;
            }

            if let Err(err) = self.push_final_value(&mut builder, attribute.name, &attribute.kind, &value) {
                skip_attribute(&entity_type, &err);
            }
        }

        builder.build()
    }

    fn push_final_value(
        &self,
        builder: &mut AttributeChangeSetBuilder,
        name: String,
        kind: &AttributeKind,
        value: &Value,
    ) -> Result<(), DiffError> {
        match (kind, value) {
            (AttributeKind::Embedded(_), Value::Entity(embedded)) => {
                let nested = self.build_for_create_or_delete(embedded.as_ref(), true);
                builder.push_embedded_changes(name, nested);
            }
            _ => {
                let old_value = self.convert(&name, kind, value)?;
                builder.push_change(name, old_value);
            }
        }
        Ok(())
    }

    // ============================================================================
    // 旧值转换
    // ============================================================================

    /// 按声明的属性种类把值转换为可安全保存的旧值
    fn convert(&self, name: &str, kind: &AttributeKind, value: &Value) -> Result<OldValue, DiffError> {
        match (kind, value) {
            (_, Value::Null) => Ok(OldValue::Absent),
            (AttributeKind::Scalar, Value::Scalar(v)) => Ok(OldValue::Scalar(v.clone())),
            (AttributeKind::EntityRef, Value::Entity(entity)) => {
                Ok(OldValue::Ref(self.identity_of(entity.as_ref())?))
            }
            (AttributeKind::Collection(CollectionKind::List), Value::Entities(items)) => items
                .iter()
                .map(|item| self.identity_of(item.as_ref()))
                .collect::<Result<Vec<_>, _>>()
                .map(OldValue::List),
            (AttributeKind::Collection(CollectionKind::Set), Value::Entities(items)) => items
                .iter()
                .map(|item| self.identity_of(item.as_ref()))
                .collect::<Result<BTreeSet<_>, _>>()
                .map(OldValue::Set),
            (kind, value) => Err(DiffError::KindMismatch {
                attribute: name.to_string(),
                expected: kind.clone(),
                actual: value.variant_name(),
            }),
        }
    }
}

/// 在已取得的属性声明中查找属性种类
fn declared_kind(
    declared: &[AttributeDescriptor],
    entity_type: &EntityType,
    name: &str,
) -> Result<AttributeKind, DiffError> {
    declared.iter().find(|attr| attr.name == name).map(|attr| attr.kind.clone()).ok_or_else(|| {
        DiffError::UndeclaredAttribute { entity_type: entity_type.clone(), attribute: name.to_string() }
    })
}

fn skip_attribute(entity_type: &EntityType, err: &DiffError) {
    trace!("skip attribute of {} in diff: {}", entity_type, err);
}
