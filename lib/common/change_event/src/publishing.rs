use std::sync::Arc;

use change_set::{EntityMetadata, EntityType, PublishingFlags};
use dashmap::DashMap;
use tracing::debug;

use crate::config::ChangeEventConfig;

/// 某类型的事件发布信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishingInfo {
    pub enabled: bool,
    pub on_created: bool,
    pub on_updated: bool,
    pub on_deleted: bool,
    /// 规范类型（动态扩展类型解析为原始类型）
    pub declared_type: EntityType,
}

impl PublishingInfo {
    pub fn disabled(declared_type: EntityType) -> Self {
        Self { enabled: false, on_created: false, on_updated: false, on_deleted: false, declared_type }
    }

    pub fn from_flags(flags: PublishingFlags, declared_type: EntityType) -> Self {
        Self {
            enabled: true,
            on_created: flags.created,
            on_updated: flags.updated,
            on_deleted: flags.deleted,
            declared_type,
        }
    }
}

/// 按运行时类型缓存 [`PublishingInfo`]
///
/// 多个事务共享的只读为主的结构。未缓存类型在分片锁之外计算，
/// 并发计算同一类型时先插入者胜出，计算本身幂等。
#[derive(Debug, Default)]
pub struct PublishingInfoCache {
    infos: DashMap<EntityType, Arc<PublishingInfo>>,
    config: ChangeEventConfig,
}

impl PublishingInfoCache {
    pub fn new(config: ChangeEventConfig) -> Self {
        Self { infos: DashMap::new(), config }
    }

    pub fn config(&self) -> &ChangeEventConfig {
        &self.config
    }

    pub fn get<M: EntityMetadata + ?Sized>(&self, metadata: &M, entity_type: &EntityType) -> Arc<PublishingInfo> {
        if let Some(info) = self.infos.get(entity_type) {
            return Arc::clone(info.value());
        }

        let info = Arc::new(self.compute(metadata, entity_type));
        Arc::clone(self.infos.entry(entity_type.clone()).or_insert(info).value())
    }

    fn compute<M: EntityMetadata + ?Sized>(&self, metadata: &M, entity_type: &EntityType) -> PublishingInfo {
        let declared_type = metadata.canonical_type(entity_type);
        if !self.config.enabled {
            return PublishingInfo::disabled(declared_type);
        }

        let flags = self.config.override_for(&declared_type).or_else(|| metadata.publishing_config(&declared_type));
        match flags {
            Some(flags) => PublishingInfo::from_flags(flags, declared_type),
            None => {
                debug!("change events not configured for {}", declared_type);
                PublishingInfo::disabled(declared_type)
            }
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use change_set::test_util::TestMetadata;

    use super::*;

    fn metadata() -> TestMetadata {
        TestMetadata::builder()
            .publishing("Invoice", PublishingFlags::new(false, true, false))
            .extension("ExtInvoice", "Invoice")
            .build()
    }

    #[test]
    fn test_lookup_is_memoized() {
        let metadata = metadata();
        let cache = PublishingInfoCache::default();
        let invoice = EntityType::from("Invoice");

        let first = cache.get(&metadata, &invoice);
        let second = cache.get(&metadata, &invoice);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(metadata.publishing_lookups(), 1);
        assert!(first.enabled && first.on_updated && !first.on_created && !first.on_deleted);
    }

    #[test]
    fn test_extension_resolves_to_original() {
        let metadata = metadata();
        let cache = PublishingInfoCache::default();

        let original = cache.get(&metadata, &EntityType::from("Invoice"));
        let extension = cache.get(&metadata, &EntityType::from("ExtInvoice"));

        assert_eq!(*original, *extension);
        assert_eq!(extension.declared_type, EntityType::from("Invoice"));
    }

    #[test]
    fn test_unconfigured_type_is_disabled() {
        let cache = PublishingInfoCache::default();
        let info = cache.get(&metadata(), &EntityType::from("Customer"));
        assert!(!info.enabled);
    }

    #[test]
    fn test_config_override_and_global_switch() {
        let config = ChangeEventConfig::default().with_override("Invoice", PublishingFlags::ALL);
        let cache = PublishingInfoCache::new(config);
        let info = cache.get(&metadata(), &EntityType::from("ExtInvoice"));
        assert!(info.on_created && info.on_updated && info.on_deleted);

        let switched_off = PublishingInfoCache::new(ChangeEventConfig { enabled: false, ..Default::default() });
        assert!(!switched_off.get(&metadata(), &EntityType::from("Invoice")).enabled);
    }

    #[test]
    fn test_concurrent_lookups_agree() {
        let metadata = Arc::new(metadata());
        let cache = Arc::new(PublishingInfoCache::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metadata = Arc::clone(&metadata);
                let cache = Arc::clone(&cache);
                thread::spawn(move || cache.get(metadata.as_ref(), &EntityType::from("Invoice")))
            })
            .collect();

        let infos: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(infos.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.len(), 1);
    }
}
