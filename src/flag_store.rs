//! In-memory storage for flags of the active identity. [`FlagStore`] provides concurrent access
//! for readers (flag evaluation) and writers (identify, live updates).
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, RwLock},
};

use serde::Serialize;

use crate::{FlagDescriptor, FlagMap, FlagValue};

/// Previous and current value of a flag that changed.
///
/// `None` means the flag did not exist on that side of the change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagChange<V = FlagValue> {
    /// Value before the change.
    pub previous: Option<V>,
    /// Value after the change.
    pub current: Option<V>,
}

/// Flags whose value changed between two store states, ordered by key.
pub type ChangeSet<V = FlagValue> = BTreeMap<String, FlagChange<V>>;

/// Compute the changes between two flag maps. Only keys whose value differs are included.
pub fn diff<V: PartialEq + Clone>(old: &FlagMap<V>, new: &FlagMap<V>) -> ChangeSet<V> {
    let mut changes = ChangeSet::new();

    for (key, current) in new {
        let previous = old.get(key);
        if previous.map(|it| &it.value) != Some(&current.value) {
            changes.insert(
                key.clone(),
                FlagChange {
                    previous: previous.map(|it| it.value.clone()),
                    current: Some(current.value.clone()),
                },
            );
        }
    }

    for (key, previous) in old {
        if !new.contains_key(key) {
            changes.insert(
                key.clone(),
                FlagChange {
                    previous: Some(previous.value.clone()),
                    current: None,
                },
            );
        }
    }

    changes
}

/// `FlagStore` is a thread-safe (`Sync`) map from flag key to [`FlagDescriptor`].
///
/// The map itself is immutable and is replaced completely on every write. A reader that holds a
/// [`FlagStore::snapshot`] is not affected by further writes.
pub struct FlagStore<V = FlagValue> {
    flags: RwLock<Arc<FlagMap<V>>>,
    /// Serializes writers, so `flags` is only locked for the duration of a pointer swap.
    write_lock: Mutex<()>,
}

impl<V> Default for FlagStore<V> {
    fn default() -> Self {
        FlagStore {
            flags: RwLock::new(Arc::new(FlagMap::new())),
            write_lock: Mutex::new(()),
        }
    }
}

impl<V: PartialEq + Clone> FlagStore<V> {
    /// Create a new empty flag store.
    pub fn new() -> Self {
        FlagStore::default()
    }

    /// Create a store holding `flags`.
    pub fn from_flags(flags: FlagMap<V>) -> Self {
        FlagStore {
            flags: RwLock::new(Arc::new(flags)),
            write_lock: Mutex::new(()),
        }
    }

    /// Descriptor of `key`. `None` means the flag is unknown.
    pub fn get(&self, key: &str) -> Option<Arc<FlagDescriptor<V>>> {
        self.snapshot().get(key).cloned()
    }

    /// Get the current flags. The returned map is not affected by further writes.
    pub fn snapshot(&self) -> Arc<FlagMap<V>> {
        // self.flags.read() should always return Ok(). Err() is possible only if the lock is
        // poisoned (writer panicked while holding the lock), which should never happen.
        let flags = self
            .flags
            .read()
            .expect("thread holding flags lock should not panic");

        flags.clone()
    }

    /// Replace all flags, returning the flags whose value changed.
    pub fn replace_all(&self, flags: FlagMap<V>) -> ChangeSet<V> {
        self.update(|current| {
            let changes = diff(current, &flags);
            (Some(flags), changes)
        })
    }

    /// Set a single flag, returning the change if its value changed.
    ///
    /// The patch is ignored if both the stored and the new descriptor carry a version and the new
    /// one is not newer.
    pub fn apply_patch(&self, key: &str, descriptor: FlagDescriptor<V>) -> ChangeSet<V> {
        self.update(|current| {
            let existing = current.get(key);
            if is_stale(existing.and_then(|it| it.version), descriptor.version) {
                log::debug!(target: "flagwire", flag_key = key; "ignoring out-of-order patch");
                return (None, ChangeSet::new());
            }

            let mut changes = ChangeSet::new();
            if existing.map(|it| &it.value) != Some(&descriptor.value) {
                changes.insert(
                    key.to_owned(),
                    FlagChange {
                        previous: existing.map(|it| it.value.clone()),
                        current: Some(descriptor.value.clone()),
                    },
                );
            }

            let mut flags = (**current).clone();
            flags.insert(key.to_owned(), Arc::new(descriptor));
            (Some(flags), changes)
        })
    }

    /// Remove a single flag, returning the change if the flag existed.
    pub fn apply_delete(&self, key: &str, version: Option<u64>) -> ChangeSet<V> {
        self.update(|current| {
            let Some(existing) = current.get(key) else {
                return (None, ChangeSet::new());
            };
            if is_stale(existing.version, version) {
                log::debug!(target: "flagwire", flag_key = key; "ignoring out-of-order delete");
                return (None, ChangeSet::new());
            }

            let mut changes = ChangeSet::new();
            changes.insert(
                key.to_owned(),
                FlagChange {
                    previous: Some(existing.value.clone()),
                    current: None,
                },
            );

            let mut flags = (**current).clone();
            flags.remove(key);
            (Some(flags), changes)
        })
    }

    fn update(
        &self,
        f: impl FnOnce(&Arc<FlagMap<V>>) -> (Option<FlagMap<V>>, ChangeSet<V>),
    ) -> ChangeSet<V> {
        let _guard = self
            .write_lock
            .lock()
            .expect("thread holding flags write lock should not panic");

        let current = self.snapshot();
        let (new_flags, changes) = f(&current);

        if let Some(new_flags) = new_flags {
            // Constructing new value before requesting the lock to minimize lock span.
            let new_flags = Arc::new(new_flags);
            let mut slot = self
                .flags
                .write()
                .expect("thread holding flags lock should not panic");
            *slot = new_flags;
        }

        changes
    }
}

fn is_stale(existing: Option<u64>, incoming: Option<u64>) -> bool {
    matches!((existing, incoming), (Some(existing), Some(incoming)) if incoming <= existing)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn flags(entries: &[(&str, i32)]) -> FlagMap {
        entries
            .iter()
            .map(|(key, value)| {
                (
                    (*key).to_owned(),
                    Arc::new(FlagDescriptor::new(FlagValue::from(*value))),
                )
            })
            .collect()
    }

    #[test]
    fn absent_key_is_unknown() {
        let store = FlagStore::<FlagValue>::new();
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn replace_all_reports_only_changed_values() {
        let store = FlagStore::from_flags(flags(&[("a", 1), ("b", 2), ("c", 3)]));

        let changes = store.replace_all(flags(&[("a", 1), ("b", 20), ("d", 4)]));

        assert_eq!(changes.len(), 3);
        assert_eq!(
            changes["b"],
            FlagChange {
                previous: Some(2.into()),
                current: Some(20.into())
            }
        );
        assert_eq!(changes["c"].current, None);
        assert_eq!(changes["d"].previous, None);
        assert_eq!(store.get("d").unwrap().value, FlagValue::from(4));
        assert!(store.get("c").is_none());
    }

    #[test]
    fn replace_all_with_equal_values_is_empty_change() {
        let store = FlagStore::from_flags(flags(&[("a", 1)]));
        // Different descriptor instances, same value.
        let mut next = flags(&[("a", 1)]);
        next.insert(
            "a".to_owned(),
            Arc::new(FlagDescriptor::new(FlagValue::from(1)).with_variation_index(0)),
        );

        assert!(store.replace_all(next).is_empty());
        assert_eq!(store.get("a").unwrap().variation_index, Some(0));
    }

    #[test]
    fn patch_produces_single_change() {
        let store = FlagStore::from_flags(flags(&[("a", 1)]));

        let changes = store.apply_patch("a", FlagDescriptor::new(2.into()));

        assert_eq!(changes.len(), 1);
        assert_eq!(changes["a"].previous, Some(1.into()));
        assert_eq!(changes["a"].current, Some(2.into()));
    }

    #[test]
    fn stale_patch_is_ignored() {
        let store = FlagStore::new();
        store.apply_patch("a", FlagDescriptor::new(FlagValue::from(1)).with_version(5));

        let changes = store.apply_patch("a", FlagDescriptor::new(2.into()).with_version(5));

        assert!(changes.is_empty());
        assert_eq!(store.get("a").unwrap().value, FlagValue::from(1));
    }

    #[test]
    fn delete_reports_removed_flag() {
        let store = FlagStore::from_flags(flags(&[("a", 1)]));

        assert!(store.apply_delete("missing", None).is_empty());
        let changes = store.apply_delete("a", None);

        assert_eq!(changes["a"].previous, Some(1.into()));
        assert_eq!(changes["a"].current, None);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn snapshot_is_not_affected_by_writes() {
        let store = FlagStore::from_flags(flags(&[("a", 1)]));
        let before = store.snapshot();

        store.replace_all(flags(&[("a", 2)]));

        assert_eq!(before["a"].value, FlagValue::from(1));
        assert_eq!(store.snapshot()["a"].value, FlagValue::from(2));
    }

    #[test]
    fn can_write_from_another_thread() {
        let store = Arc::new(FlagStore::new());

        {
            let store = store.clone();
            let _ = std::thread::spawn(move || {
                store.replace_all(flags(&[("a", 1)]));
            })
            .join();
        }

        assert!(store.get("a").is_some());
    }
}
