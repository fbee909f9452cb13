//! Per-id async locks
//!
//! Entries are created on first use and removed when the last holder or
//! waiter lets go (including a waiter whose future is dropped before it got
//! the lock), so the table only ever contains ids with work in flight.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug)]
struct Slot {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// holders plus waiters
    users: usize,
}

type LockTable = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Debug, Default, Clone)]
pub(crate) struct IdLocks {
    table: LockTable,
}

/// One holder's or waiter's claim on a table entry
#[derive(Debug)]
struct Registration {
    id: String,
    table: LockTable,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        if let Some(slot) = table.get_mut(&self.id) {
            slot.users -= 1;
            if slot.users == 0 {
                table.remove(&self.id);
            }
        }
    }
}

/// Held for the duration of a read-modify-write on one id
#[derive(Debug)]
pub(crate) struct IdGuard {
    _guard: OwnedMutexGuard<()>,
    _registration: Registration,
}

impl IdLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn lock(&self, id: &str) -> IdGuard {
        let mutex = {
            let mut table = self.table.lock();
            let slot = table.entry(id.to_string()).or_insert_with(|| Slot {
                mutex: Arc::new(tokio::sync::Mutex::new(())),
                users: 0,
            });
            slot.users += 1;
            slot.mutex.clone()
        };
        let registration = Registration {
            id: id.to_string(),
            table: self.table.clone(),
        };
        let guard = mutex.lock_owned().await;
        IdGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.table.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_table_is_emptied_after_release() {
        let locks = IdLocks::new();
        {
            let _a = locks.lock("a").await;
            let _b = locks.lock("b").await;
            assert_eq!(locks.len(), 2);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_same_id_is_serialized() {
        let locks = IdLocks::new();
        let active = Arc::new(AtomicU32::new(0));
        let overlap = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let overlap = overlap.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("same").await;
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_no_entry() {
        let locks = IdLocks::new();
        let held = locks.lock("a").await;

        let waited = tokio::time::timeout(Duration::from_millis(20), locks.lock("a")).await;
        assert!(waited.is_err());
        assert_eq!(locks.len(), 1);

        drop(held);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let locks = IdLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok());
    }
}
