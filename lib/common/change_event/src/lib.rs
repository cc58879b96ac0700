//! 实体变更事件
//!
//! 在事务内累加受管实体的变更记录，并在事务提交后发布为事件：
//! - [`PublishingInfoCache`]: 按类型缓存哪些变更种类需要发布
//! - [`ChangeClassifier`]: 判定创建 / 更新 / 删除并构建属性变更集
//! - [`ChangeAccumulator`]: 绑定在 [`TransactionContext`] 上的记录列表，每个实体一条记录
//! - [`ChangeEventPublisher`]: 按第一次观察的顺序把记录交给 [`EventBus`]
//! - [`ChangeEventManager`]: 组合以上组件的入口

pub mod accumulator;
pub mod bus;
pub mod classifier;
pub mod config;
pub mod error;
pub mod event;
pub mod manager;
pub mod publisher;
pub mod publishing;
pub mod record;
pub mod transaction;

// 重新导出核心类型，方便使用
pub use accumulator::{AccumulatorState, ChangeAccumulator};
pub use bus::{ChannelEventBus, EventBus, LoggingEventBus};
pub use classifier::ChangeClassifier;
pub use config::ChangeEventConfig;
pub use error::{ChangeEventError, ConfigError, TransactionError};
pub use event::EntityChangedEvent;
pub use manager::ChangeEventManager;
pub use publisher::ChangeEventPublisher;
pub use publishing::{PublishingInfo, PublishingInfoCache};
pub use record::{has_distinct_subjects, ChangeKind, ChangeRecord};
pub use transaction::{
    TransactionContext, TransactionId, TransactionOutcome, TransactionStatus, TransactionSynchronization,
};
