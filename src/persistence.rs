//! Local snapshots of flags, used before the first fetch completes.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{FlagDescriptor, FlagMap, FlagSet, Identity, Result};

/// Where the client gets flags from before the first fetch completes.
#[derive(Debug, Clone, PartialEq)]
pub enum Bootstrap {
    /// Load the last snapshot saved for the identity through [`Persistence`], and save a new one
    /// every time flags change.
    LocalStorage,
    /// Use these flag values.
    Flags(FlagSet),
}

impl Bootstrap {
    pub(crate) fn flags_to_map(flags: &FlagSet) -> FlagMap {
        flags
            .iter()
            .map(|(key, value)| (key.clone(), Arc::new(FlagDescriptor::new(value.clone()))))
            .collect()
    }
}

/// Storage for flag snapshots, keyed by identity.
pub trait Persistence: Send + Sync {
    /// Load the last snapshot saved for `identity`.
    fn load_snapshot(&self, identity: &Identity) -> Result<Option<FlagMap>>;

    /// Save the flags of `identity`, replacing any previous snapshot.
    fn save_snapshot(&self, identity: &Identity, flags: &FlagMap) -> Result<()>;
}

/// [`Persistence`] that keeps snapshots in memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshots: Mutex<HashMap<String, FlagMap>>,
}

impl MemoryPersistence {
    /// Create an empty store.
    pub fn new() -> MemoryPersistence {
        MemoryPersistence::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FlagMap>> {
        self.snapshots
            .lock()
            .expect("thread holding snapshots lock should not panic")
    }
}

impl Persistence for MemoryPersistence {
    fn load_snapshot(&self, identity: &Identity) -> Result<Option<FlagMap>> {
        Ok(self.lock().get(&identity.key).cloned())
    }

    fn save_snapshot(&self, identity: &Identity, flags: &FlagMap) -> Result<()> {
        self.lock().insert(identity.key.clone(), flags.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FlagValue;

    #[test]
    fn snapshots_are_keyed_by_identity() {
        let persistence = MemoryPersistence::new();
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        let flags = Bootstrap::flags_to_map(&[("a".to_owned(), FlagValue::from(1))].into());

        persistence.save_snapshot(&alice, &flags).unwrap();

        assert_eq!(persistence.load_snapshot(&alice).unwrap(), Some(flags));
        assert_eq!(persistence.load_snapshot(&bob).unwrap(), None);
    }
}
