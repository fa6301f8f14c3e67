use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Keyed critical sections for the write path.
///
/// A record update and the audit entries describing it run under the record's key, so a
/// competing writer cannot slip its own update and entries in between. Slots are dropped once
/// no caller holds or waits on them. Never held across an `.await`; a caller never takes the
/// same key twice.
#[derive(Default)]
pub(crate) struct EntityLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EntityLocks {
    pub(crate) fn run<T>(&self, key: &str, critical: impl FnOnce() -> T) -> T {
        let slot = {
            let mut slots = recover(self.slots.lock());
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _held = recover(slot.lock());
            critical()
        };

        let mut slots = recover(self.slots.lock());
        // the map and this handle are the only owners left
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
        result
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        recover(self.slots.lock()).len()
    }
}

fn recover<'a, T>(
    lock: Result<MutexGuard<'a, T>, std::sync::PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    lock.unwrap_or_else(|poisoned| poisoned.into_inner())
}
