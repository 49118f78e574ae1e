//! Per-path write serialization
//!
//! Each canonical path gets its own ticket lock, created on first use and
//! kept for the life of the process. Waiters on one path are served in
//! arrival order; different paths never contend.

use dashmap::DashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Default)]
struct TicketState {
    next_ticket: u64,
    now_serving: u64,
}

#[derive(Default)]
pub struct TicketLock {
    state: Mutex<TicketState>,
    turn: Condvar,
}

impl TicketLock {
    fn state(&self) -> MutexGuard<'_, TicketState> {
        // The guarded counters stay consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block until every earlier caller has released.
    pub fn acquire(lock: &Arc<Self>) -> TicketGuard {
        let mut state = lock.state();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        while state.now_serving != ticket {
            state = lock
                .turn
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        TicketGuard {
            lock: Arc::clone(lock),
        }
    }

    /// Callers holding or waiting for this lock.
    pub fn queued(&self) -> u64 {
        let state = self.state();
        state.next_ticket - state.now_serving
    }
}

pub struct TicketGuard {
    lock: Arc<TicketLock>,
}

impl Drop for TicketGuard {
    fn drop(&mut self) {
        let mut state = self.lock.state();
        state.now_serving += 1;
        self.lock.turn.notify_all();
    }
}

#[derive(Default)]
pub struct PathLocks {
    locks: DashMap<PathBuf, Arc<TicketLock>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key for a path: the nearest existing ancestor canonicalized, with the
    /// components below it applied lexically.
    pub fn canonical_key(path: &Path) -> PathBuf {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let components: Vec<Component> = absolute.components().collect();

        for split in (1..=components.len()).rev() {
            let head: PathBuf = components[..split].iter().collect();
            if let Ok(canonical) = head.canonicalize() {
                return components[split..]
                    .iter()
                    .fold(canonical, |mut key, component| {
                        match component {
                            Component::ParentDir => {
                                key.pop();
                            }
                            Component::CurDir => {}
                            other => key.push(other),
                        }
                        key
                    });
            }
        }
        absolute
    }

    pub fn lock_for(&self, path: &Path) -> Arc<TicketLock> {
        let key = Self::canonical_key(path);
        Arc::clone(self.locks.entry(key).or_default().value())
    }

    /// Acquire the lock for `path`, waiting behind earlier callers.
    pub fn acquire(&self, path: &Path) -> TicketGuard {
        TicketLock::acquire(&self.lock_for(path))
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_path_shares_a_lock() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "").unwrap();

        let locks = PathLocks::new();
        let first = locks.lock_for(&file);
        let second = locks.lock_for(&dir.path().join(".").join("a.txt"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(locks.len(), 1);

        locks.lock_for(&dir.path().join("b.txt"));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn test_missing_directories_resolve_to_one_key() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("out")).unwrap();

        let locks = PathLocks::new();
        let direct = locks.lock_for(&dir.path().join("out/a.py"));
        let detour = locks.lock_for(&dir.path().join("out/new/../a.py"));
        assert!(Arc::ptr_eq(&direct, &detour));
        assert_eq!(
            PathLocks::canonical_key(&dir.path().join("out/new/deeper/../b.py")),
            dir.path().canonicalize().unwrap().join("out/new/b.py")
        );
    }

    #[test]
    fn test_waiters_served_in_arrival_order() {
        let lock = Arc::new(TicketLock::default());
        let held = TicketLock::acquire(&lock);
        let (tx, rx) = mpsc::channel();

        let mut handles = vec![];
        for i in 0..4 {
            let waiter = Arc::clone(&lock);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let _guard = TicketLock::acquire(&waiter);
                tx.send(i).unwrap();
            }));
            // Wait until thread i has taken its ticket before starting the next.
            while lock.queued() < i + 2 {
                thread::sleep(Duration::from_millis(1));
            }
        }

        drop(held);
        for handle in handles {
            handle.join().unwrap();
        }
        drop(tx);
        let order: Vec<u64> = rx.iter().collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }
}
