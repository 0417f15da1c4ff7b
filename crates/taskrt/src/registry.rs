//! Process-lifetime cache of loaded compiled tasks.
//!
//! Entries are never evicted or refreshed: once a task is loaded for a
//! (device type, optimization space, task string) key, every later request for that key gets
//! the same instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::Device;
use crate::error::{TaskError, TaskResult};
use crate::task::CompiledTask;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskCacheKey {
    pub device: String,
    pub space: u32,
    pub task: String,
}

impl TaskCacheKey {
    pub fn new(device: &str, space: u32, task: &str) -> Self {
        Self {
            device: device.to_string(),
            space,
            task: task.to_string(),
        }
    }
}

pub struct CompiledTaskRegistry<D: Device> {
    entries: Mutex<HashMap<TaskCacheKey, Arc<CompiledTask<D>>>>,
    load_gates: Mutex<HashMap<TaskCacheKey, Arc<Mutex<()>>>>,
}

impl<D: Device + 'static> CompiledTaskRegistry<D> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            load_gates: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached task for the key, invoking `loader` only on the first request.
    ///
    /// Concurrent first requests for one key wait for a single load; a failed load caches
    /// nothing.
    pub fn get_or_create<F>(
        &self,
        device_type: &str,
        space: u32,
        task: &str,
        loader: F,
    ) -> TaskResult<Arc<CompiledTask<D>>>
    where
        F: FnOnce() -> TaskResult<CompiledTask<D>>,
    {
        let key = TaskCacheKey::new(device_type, space, task);
        if let Some(found) = self.get_by_key(&key) {
            return Ok(found);
        }

        let gate = {
            let mut gates = self
                .load_gates
                .lock()
                .map_err(|_| TaskError::execution("task registry load gates poisoned"))?;
            gates
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _gate_lock = gate
            .lock()
            .map_err(|_| TaskError::execution("task registry load gate poisoned"))?;

        if let Some(found) = self.get_by_key(&key) {
            return Ok(found);
        }

        let loaded = Arc::new(loader()?);
        tracing::debug!(
            device = %key.device,
            space = key.space,
            task = %key.task,
            "cached compiled task"
        );
        Ok(self.insert_by_key(key, loaded))
    }

    pub fn contains(&self, device_type: &str, space: u32, task: &str) -> bool {
        self.get(device_type, space, task).is_some()
    }

    pub fn get(&self, device_type: &str, space: u32, task: &str) -> Option<Arc<CompiledTask<D>>> {
        self.get_by_key(&TaskCacheKey::new(device_type, space, task))
    }

    /// Adds an already loaded task. An existing entry for the key is kept and returned.
    pub fn insert(
        &self,
        device_type: &str,
        space: u32,
        task: &str,
        compiled: CompiledTask<D>,
    ) -> Arc<CompiledTask<D>> {
        self.insert_by_key(TaskCacheKey::new(device_type, space, task), Arc::new(compiled))
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn get_by_key(&self, key: &TaskCacheKey) -> Option<Arc<CompiledTask<D>>> {
        self.entries().get(key).cloned()
    }

    fn insert_by_key(
        &self,
        key: TaskCacheKey,
        compiled: Arc<CompiledTask<D>>,
    ) -> Arc<CompiledTask<D>> {
        Arc::clone(self.entries().entry(key).or_insert(compiled))
    }

    // Entries are only ever inserted whole, so a poisoned map is still consistent.
    fn entries(&self) -> MutexGuard<'_, HashMap<TaskCacheKey, Arc<CompiledTask<D>>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: Device + 'static> Default for CompiledTaskRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}
