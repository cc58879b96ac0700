use thiserror::Error;

use crate::transaction::TransactionId;

/// 事务上下文错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("transaction {0} is no longer active")]
    NotActive(TransactionId),

    #[error("resource slot for {0} holds a value of another type")]
    ResourceTypeMismatch(&'static str),
}

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// 变更事件引擎错误
///
/// 单个实体的问题（缺少监听器、属性读取失败等）不会以错误形式返回，
/// 只在日志中记录；这里只包含整个调用无法进行的情况。
#[derive(Debug, Error)]
pub enum ChangeEventError {
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
