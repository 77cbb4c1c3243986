//! Per-name advisory locks.
//!
//! Operations on different clusters never contend. Operations on the same
//! cluster name are serialized so that, for example, two identity changes for
//! one cluster cannot interleave their steps.

use std::collections::HashMap;
use std::sync::Arc;

use hubfleet_core::ClusterName;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;

type NameMutex = Arc<tokio::sync::Mutex<()>>;

/// A set of async locks keyed by cluster name.
#[derive(Debug, Default)]
pub struct NameLocks {
    locks: Mutex<HashMap<ClusterName, NameMutex>>,
}

/// Guard holding one or more name locks; releases them on drop.
#[derive(Debug)]
pub struct NameGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl NameLocks {
    /// Create an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a single name.
    pub async fn lock(&self, name: &ClusterName) -> NameGuard {
        self.lock_all(&[name]).await
    }

    /// Lock several names.
    ///
    /// Names are acquired in sorted order and duplicates are locked once, so
    /// concurrent callers locking overlapping sets cannot deadlock.
    pub async fn lock_all(&self, names: &[&ClusterName]) -> NameGuard {
        let mut sorted: Vec<&ClusterName> = names.to_vec();
        sorted.sort();
        sorted.dedup();

        let mutexes: Vec<NameMutex> = {
            let mut locks = self.locks.lock();
            // Entries only referenced by the map are idle.
            locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            sorted
                .into_iter()
                .map(|name| Arc::clone(locks.entry(name.clone()).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        NameGuard { _guards: guards }
    }

    /// Number of names currently tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Check if no names are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_name(name: &str) -> ClusterName {
        ClusterName::new(name).unwrap()
    }

    #[tokio::test]
    async fn same_name_is_exclusive() {
        let locks = Arc::new(NameLocks::new());
        let name = test_name("east-1");

        let guard = locks.lock(&name).await;

        let contender = {
            let locks = Arc::clone(&locks);
            let name = name.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&name).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let locks = NameLocks::new();
        let _east = locks.lock(&test_name("east-1")).await;
        let _west = tokio::time::timeout(
            Duration::from_secs(1),
            locks.lock(&test_name("west-1")),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn overlapping_sets_do_not_deadlock() {
        let locks = Arc::new(NameLocks::new());
        let a = test_name("a");
        let b = test_name("b");

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let locks = Arc::clone(&locks);
                let (a, b) = (a.clone(), b.clone());
                tokio::spawn(async move {
                    let _guard = if i % 2 == 0 {
                        locks.lock_all(&[&a, &b]).await
                    } else {
                        locks.lock_all(&[&b, &a]).await
                    };
                    tokio::task::yield_now().await;
                })
            })
            .collect();

        let all = futures::future::join_all(tasks);
        tokio::time::timeout(Duration::from_secs(5), all)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_names_lock_once() {
        let locks = NameLocks::new();
        let name = test_name("east-1");
        let _guard = tokio::time::timeout(
            Duration::from_secs(1),
            locks.lock_all(&[&name, &name]),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn idle_entries_are_pruned() {
        let locks = NameLocks::new();
        drop(locks.lock(&test_name("east-1")).await);
        drop(locks.lock(&test_name("west-1")).await);
        assert_eq!(locks.len(), 1);
    }
}
