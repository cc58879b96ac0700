//! 显式事务上下文
//!
//! 事务资源（按类型绑定，惰性创建）与完成回调。
//! 每个事务只完成一次：提交、回滚或在仍活动时被 drop（视为回滚）。
//! 完成时依次调用已注册的回调，调用期间不持有内部锁，回调中可以解绑资源。

use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::TransactionError;

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(u64);

impl TransactionId {
    fn next() -> Self {
        Self(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionOutcome {
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    /// 正在调用完成回调
    Completing,
    Completed(TransactionOutcome),
}

/// 事务完成回调
pub trait TransactionSynchronization: Send {
    fn after_completion(self: Box<Self>, tx: &TransactionContext, outcome: TransactionOutcome);
}

impl<F> TransactionSynchronization for F
where
    F: FnOnce(&TransactionContext, TransactionOutcome) + Send,
{
    fn after_completion(self: Box<Self>, tx: &TransactionContext, outcome: TransactionOutcome) {
        (*self)(tx, outcome)
    }
}

struct TransactionState {
    status: TransactionStatus,
    resources: HashMap<TypeId, Box<dyn Any + Send>>,
    synchronizations: Vec<Box<dyn TransactionSynchronization>>,
}

pub struct TransactionContext {
    id: TransactionId,
    state: Mutex<TransactionState>,
}

impl TransactionContext {
    pub fn begin() -> Self {
        let id = TransactionId::next();
        debug!("{} begin", id);
        Self {
            id,
            state: Mutex::new(TransactionState {
                status: TransactionStatus::Active,
                resources: HashMap::new(),
                synchronizations: Vec::new(),
            }),
        }
    }

    #[inline]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    // ============================================================================
    // 资源
    // ============================================================================

    /// 访问按类型绑定的资源，未绑定时先以默认值绑定
    ///
    /// # 参数
    /// - `f`: 在持有内部锁期间调用，不能再访问当前事务上下文
    ///
    /// # 返回
    /// - `Ok(T)`: `f` 的返回值
    /// - `Err(TransactionError::NotActive)`: 事务已结束
    pub fn with_resource<R, T>(&self, f: impl FnOnce(&mut R) -> T) -> Result<T, TransactionError>
    where
        R: Default + Send + 'static,
    {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Active {
            return Err(TransactionError::NotActive(self.id));
        }

        let slot = state.resources.entry(TypeId::of::<R>()).or_insert_with(|| Box::new(R::default()));
        let resource =
            slot.downcast_mut::<R>().ok_or(TransactionError::ResourceTypeMismatch(type_name::<R>()))?;
        Ok(f(resource))
    }

    /// 读取已绑定的资源，不触发绑定
    pub fn with_existing_resource<R, T>(&self, f: impl FnOnce(&R) -> T) -> Option<T>
    where
        R: Send + 'static,
    {
        let state = self.state.lock();
        state.resources.get(&TypeId::of::<R>()).and_then(|slot| slot.downcast_ref::<R>()).map(f)
    }

    pub fn has_resource<R: Send + 'static>(&self) -> bool {
        self.state.lock().resources.contains_key(&TypeId::of::<R>())
    }

    pub fn resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// 解绑资源；完成回调执行期间同样可用
    pub fn unbind_resource<R: Send + 'static>(&self) -> Option<R> {
        let slot = self.state.lock().resources.remove(&TypeId::of::<R>())?;
        slot.downcast::<R>().ok().map(|resource| *resource)
    }

    // ============================================================================
    // 完成
    // ============================================================================

    pub fn register_synchronization(
        &self,
        synchronization: impl TransactionSynchronization + 'static,
    ) -> Result<(), TransactionError> {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Active {
            return Err(TransactionError::NotActive(self.id));
        }
        state.synchronizations.push(Box::new(synchronization));
        Ok(())
    }

    pub fn synchronization_count(&self) -> usize {
        self.state.lock().synchronizations.len()
    }

    pub fn commit(&self) -> Result<(), TransactionError> {
        self.complete(TransactionOutcome::Committed)
    }

    pub fn rollback(&self) -> Result<(), TransactionError> {
        self.complete(TransactionOutcome::RolledBack)
    }

    fn complete(&self, outcome: TransactionOutcome) -> Result<(), TransactionError> {
        let synchronizations = {
            let mut state = self.state.lock();
            if state.status != TransactionStatus::Active {
                return Err(TransactionError::NotActive(self.id));
            }
            state.status = TransactionStatus::Completing;
            std::mem::take(&mut state.synchronizations)
        };

        debug!("{} completing as {:?}, {} synchronization(s)", self.id, outcome, synchronizations.len());
        for synchronization in synchronizations {
            synchronization.after_completion(self, outcome);
        }

        self.state.lock().status = TransactionStatus::Completed(outcome);
        Ok(())
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext").field("id", &self.id).field("status", &self.status()).finish()
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if self.is_active() {
            warn!("{} dropped while active, rolling back", self.id);
            let _ = self.complete(TransactionOutcome::RolledBack);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[derive(Debug, Default)]
    struct Counter(u32);

    #[test]
    fn test_resource_binds_lazily() {
        let tx = TransactionContext::begin();
        assert!(!tx.has_resource::<Counter>());
        assert_eq!(tx.with_existing_resource(|c: &Counter| c.0), None);

        tx.with_resource(|c: &mut Counter| c.0 += 1).unwrap();
        tx.with_resource(|c: &mut Counter| c.0 += 1).unwrap();

        assert!(tx.has_resource::<Counter>());
        assert_eq!(tx.with_existing_resource(|c: &Counter| c.0), Some(2));
        assert_eq!(tx.unbind_resource::<Counter>().map(|c| c.0), Some(2));
        assert_eq!(tx.resource_count(), 0);
    }

    #[test]
    fn test_synchronizations_fire_once_with_outcome() {
        let tx = TransactionContext::begin();
        let fired = Arc::new(AtomicUsize::new(0));
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..2 {
            let fired = Arc::clone(&fired);
            let outcomes = Arc::clone(&outcomes);
            tx.register_synchronization(move |_: &TransactionContext, outcome: TransactionOutcome| {
                fired.fetch_add(1, Ordering::SeqCst);
                outcomes.lock().push(outcome);
            })
            .unwrap();
        }

        tx.commit().unwrap();
        assert_eq!(tx.commit(), Err(TransactionError::NotActive(tx.id())));
        assert_eq!(tx.rollback(), Err(TransactionError::NotActive(tx.id())));

        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(*outcomes.lock(), vec![TransactionOutcome::Committed; 2]);
        assert_eq!(tx.status(), TransactionStatus::Completed(TransactionOutcome::Committed));
    }

    #[test]
    fn test_synchronization_can_unbind_resource() {
        let tx = TransactionContext::begin();
        tx.with_resource(|c: &mut Counter| c.0 = 7).unwrap();
        let released = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&released);
        tx.register_synchronization(move |tx: &TransactionContext, _: TransactionOutcome| {
            if let Some(counter) = tx.unbind_resource::<Counter>() {
                seen.store(counter.0 as usize, Ordering::SeqCst);
            }
        })
        .unwrap();

        tx.rollback().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 7);
        assert_eq!(tx.resource_count(), 0);
    }

    #[test]
    fn test_finished_transaction_rejects_access() {
        let tx = TransactionContext::begin();
        tx.rollback().unwrap();

        assert_eq!(tx.with_resource(|c: &mut Counter| c.0), Err(TransactionError::NotActive(tx.id())));
        let registered = tx.register_synchronization(|_: &TransactionContext, _: TransactionOutcome| {});
        assert!(registered.is_err());
    }

    #[test]
    fn test_drop_while_active_rolls_back() {
        let _ = tracing_subscriber::fmt::try_init();
        let outcome = Arc::new(Mutex::new(None));
        {
            let tx = TransactionContext::begin();
            let outcome = Arc::clone(&outcome);
            tx.register_synchronization(move |_: &TransactionContext, o: TransactionOutcome| {
                *outcome.lock() = Some(o);
            })
            .unwrap();
        }
        assert_eq!(*outcome.lock(), Some(TransactionOutcome::RolledBack));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = TransactionContext::begin();
        let b = TransactionContext::begin();
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("tx-"));
    }
}
