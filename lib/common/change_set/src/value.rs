use std::{borrow::Cow, collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};

use crate::entity::EntityHandle;

// ============================================================================
// 类型与主键
// ============================================================================

/// 实体类型名称（元数据层给出的类名）
///
/// 既可表示运行时类型，也可表示规范类型（canonical type）。
/// 类型名通常为静态字符串，因此使用 `Cow<'static, str>` 避免分配。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(Cow<'static, str>);

impl EntityType {
    /// 使用静态字符串创建（零分配）
    #[inline]
    pub const fn new_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    #[inline]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for EntityType {
    fn from(name: &'static str) -> Self {
        Self::new_static(name)
    }
}

impl From<String> for EntityType {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

/// 主键值
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Long(i64),
    Text(String),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Long(v) => write!(f, "{}", v),
            KeyValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(v: i64) -> Self {
        KeyValue::Long(v)
    }
}

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Text(v)
    }
}

/// 身份令牌：(规范类型, 主键)
///
/// 旧值中出现的实体引用一律转换为身份令牌保存。
/// 事务结束后实体对象可能已被分离或修改，令牌在任何时刻都可以安全比较。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityToken {
    pub entity_type: EntityType,
    pub key: KeyValue,
}

impl IdentityToken {
    #[inline]
    pub fn new(entity_type: impl Into<EntityType>, key: impl Into<KeyValue>) -> Self {
        Self { entity_type: entity_type.into(), key: key.into() }
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.entity_type, self.key)
    }
}

// ============================================================================
// 属性值
// ============================================================================

/// 标量属性值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(v) => write!(f, "{}", v),
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Float(v) => write!(f, "{}", v),
            ScalarValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        ScalarValue::Bool(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        ScalarValue::Int(v)
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        ScalarValue::Float(v)
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        ScalarValue::Text(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        ScalarValue::Text(v)
    }
}

/// 从实体读取到的活动值，或变更监听器上报的原始旧值
///
/// 实体引用以句柄形式出现，只在构建差异的瞬间有效。
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Scalar(ScalarValue),
    Entity(EntityHandle),
    Entities(Vec<EntityHandle>),
}

impl Value {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// 变体名称，用于日志
    pub fn variant_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Scalar(_) => "scalar",
            Value::Entity(_) => "entity",
            Value::Entities(_) => "entities",
        }
    }
}

/// 为标量来源类型批量生成 `From` 实现
macro_rules! impl_from_scalar {
    ($target:ident :: $variant:ident; $($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for $target {
                fn from(v: $source) -> Self {
                    $target::$variant(ScalarValue::from(v))
                }
            }
        )+
    };
}

impl_from_scalar!(Value::Scalar; bool, i64, f64, &str, String);

/// 集合属性的种类（有序 / 无序）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    List,
    Set,
}

/// 变更集中保存的旧值
///
/// 从不持有实体句柄：实体引用保存为身份令牌，集合保存为令牌集合并保留原集合的种类。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OldValue {
    /// 无旧值（null，或创建时只标记属性已赋值）
    Absent,
    Scalar(ScalarValue),
    Ref(IdentityToken),
    List(Vec<IdentityToken>),
    Set(BTreeSet<IdentityToken>),
}

impl OldValue {
    #[inline]
    pub fn is_absent(&self) -> bool {
        matches!(self, OldValue::Absent)
    }

    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            OldValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ref_token(&self) -> Option<&IdentityToken> {
        match self {
            OldValue::Ref(token) => Some(token),
            _ => None,
        }
    }
}

impl fmt::Display for OldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<'a>(tokens: impl Iterator<Item = &'a IdentityToken>) -> String {
            tokens.map(ToString::to_string).collect::<Vec<_>>().join(", ")
        }

        match self {
            OldValue::Absent => f.write_str("null"),
            OldValue::Scalar(v) => write!(f, "{}", v),
            OldValue::Ref(token) => write!(f, "{}", token),
            OldValue::List(tokens) => write!(f, "[{}]", join(tokens.iter())),
            OldValue::Set(tokens) => write!(f, "{{{}}}", join(tokens.iter())),
        }
    }
}

impl_from_scalar!(OldValue::Scalar; bool, i64, f64, &str, String);

impl From<IdentityToken> for OldValue {
    fn from(token: IdentityToken) -> Self {
        OldValue::Ref(token)
    }
}
