use std::{collections::BTreeMap, path::Path};

use change_set::{EntityType, PublishingFlags};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// 变更事件配置
///
/// # 示例
/// ```yaml
/// enabled: true
/// overrides:
///   Invoice:
///     updated: true
///   Order:
///     created: true
///     deleted: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEventConfig {
    /// 全局开关，关闭后所有类型都不产生变更记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// 按规范类型名覆盖元数据中的发布配置
    #[serde(default)]
    pub overrides: BTreeMap<String, PublishingFlags>,
}

fn default_enabled() -> bool {
    true
}

impl Default for ChangeEventConfig {
    fn default() -> Self {
        Self { enabled: default_enabled(), overrides: BTreeMap::new() }
    }
}

impl ChangeEventConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn with_override(mut self, entity_type: impl Into<String>, flags: PublishingFlags) -> Self {
        self.overrides.insert(entity_type.into(), flags);
        self
    }

    pub fn override_for(&self, canonical_type: &EntityType) -> Option<PublishingFlags> {
        self.overrides.get(canonical_type.as_str()).copied()
    }
}
