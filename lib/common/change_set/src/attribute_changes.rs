use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet},
    fmt,
};

use serde::Serialize;

use crate::value::OldValue;

// ============================================================================
// 属性变更集
// ============================================================================

/// 单个实体的属性变更集
///
/// 记录每个变更属性的旧值，嵌入对象属性的变更以嵌套变更集保存。
/// 构建完成后不可修改；同一实体的两次观察通过 [`AttributeChangeSet::merge`] 合并。
///
/// # 不变量
/// - 属性名唯一；构建时对同名属性的重复写入保留第一次写入的旧值
/// - 出现在 `embedded` 中的属性名一定也出现在 `changes` 中（旧值为 `Absent`）
/// - 同名属性先记录为普通旧值时，之后的嵌入变更被忽略，反之亦然
///
/// # 示例
/// ```ignore
/// let city = AttributeChangeSet::builder().add_change("city", "Berlin").build();
/// let changes = AttributeChangeSet::builder()
///     .add_change("name", "Alice")
///     .add_embedded_changes("address", city)
///     .build();
///
/// assert!(changes.attributes().contains("address.city"));
/// assert_eq!(changes.old_value_ex("address.city"), Some(&OldValue::from("Berlin")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AttributeChangeSet {
    changes: BTreeMap<String, OldValue>,
    embedded: BTreeMap<String, AttributeChangeSet>,
}

impl AttributeChangeSet {
    #[inline]
    pub fn builder() -> AttributeChangeSetBuilder {
        AttributeChangeSetBuilder::default()
    }

    /// 当前实体自身的变更属性名（不展开嵌入对象）
    pub fn own_attributes(&self) -> BTreeSet<&str> {
        self.changes.keys().map(String::as_str).collect()
    }

    /// 所有变更属性的完整路径
    ///
    /// 嵌入对象属性递归展开为 `parent.child` 形式。
    pub fn attributes(&self) -> BTreeSet<String> {
        let mut attributes = BTreeSet::new();
        for name in self.changes.keys() {
            match self.embedded.get(name) {
                None => {
                    attributes.insert(name.clone());
                }
                Some(nested) => {
                    for attribute in nested.attributes() {
                        attributes.insert(format!("{}.{}", name, attribute));
                    }
                }
            }
        }
        attributes
    }

    /// 嵌入对象属性的变更集
    #[inline]
    pub fn embedded_changes(&self, name: &str) -> Option<&AttributeChangeSet> {
        self.embedded.get(name)
    }

    #[inline]
    pub fn is_changed(&self, name: &str) -> bool {
        self.changes.contains_key(name)
    }

    /// 自身属性的旧值
    #[inline]
    pub fn old_value(&self, name: &str) -> Option<&OldValue> {
        self.changes.get(name)
    }

    /// 按完整路径取旧值，支持 `address.city` 形式的嵌入属性路径
    pub fn old_value_ex(&self, path: &str) -> Option<&OldValue> {
        match path.split_once('.') {
            None => self.changes.get(path),
            Some((head, rest)) => self.embedded.get(head)?.old_value_ex(rest),
        }
    }

    /// 是否包含任何变更（递归检查嵌入对象）
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty() || self.embedded.values().any(AttributeChangeSet::has_changes)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_changes()
    }

    /// 合并同一实体的后一次观察
    ///
    /// 已记录的属性保留原有旧值（事务内第一次观察到的旧值代表事务开始前的状态），
    /// 仅补充之前未记录的属性；嵌入对象按同一规则递归合并。
    pub fn merge(mut self, later: AttributeChangeSet) -> AttributeChangeSet {
        for (name, nested) in later.embedded {
            match self.embedded.entry(name) {
                Entry::Occupied(mut entry) => {
                    let merged = std::mem::take(entry.get_mut()).merge(nested);
                    entry.insert(merged);
                }
                // 已记录为普通旧值的属性不再挂嵌套变更
                Entry::Vacant(entry) => {
                    if !self.changes.contains_key(entry.key()) {
                        entry.insert(nested);
                    }
                }
            }
        }
        for (name, old_value) in later.changes {
            self.changes.entry(name).or_insert(old_value);
        }
        self
    }
}

impl fmt::Display for AttributeChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .attributes()
            .into_iter()
            .map(|path| {
                let old_value = self.old_value_ex(&path).unwrap_or(&OldValue::Absent);
                format!("{}: {}", path, old_value)
            })
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "AttributeChangeSet{{{}}}", rendered)
    }
}

// ============================================================================
// 构建器
// ============================================================================

/// [`AttributeChangeSet`] 构建器
#[derive(Debug, Default)]
pub struct AttributeChangeSetBuilder {
    changes: BTreeMap<String, OldValue>,
    embedded: BTreeMap<String, AttributeChangeSet>,
}

impl AttributeChangeSetBuilder {
    /// 添加属性变更；同名属性已存在时忽略
    pub fn add_change(mut self, name: impl Into<String>, old_value: impl Into<OldValue>) -> Self {
        self.push_change(name, old_value);
        self
    }

    /// 添加嵌入对象属性的变更集；同名属性已记录（普通旧值或嵌入变更）时忽略
    pub fn add_embedded_changes(mut self, name: impl Into<String>, changes: AttributeChangeSet) -> Self {
        self.push_embedded_changes(name, changes);
        self
    }

    pub fn push_change(&mut self, name: impl Into<String>, old_value: impl Into<OldValue>) {
        self.changes.entry(name.into()).or_insert_with(|| old_value.into());
    }

    pub fn push_embedded_changes(&mut self, name: impl Into<String>, changes: AttributeChangeSet) {
        let name = name.into();
        if let Entry::Vacant(entry) = self.changes.entry(name.clone()) {
            entry.insert(OldValue::Absent);
            self.embedded.insert(name, changes);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.embedded.is_empty()
    }

    pub fn build(self) -> AttributeChangeSet {
        AttributeChangeSet { changes: self.changes, embedded: self.embedded }
    }
}
