//! A compiled task: candidates, their dispatch table, and the per-call selection logic.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bench::{Benchmarker, CandidateSelector};
use crate::config::RuntimeOptions;
use crate::device::Device;
use crate::dispatch_table::{DispatchTable, DISPATCH_TABLE_FILE};
use crate::error::{TaskError, TaskResult};
use crate::module::{candidate_symbol, CandidateHandle, ModuleLoader, TaskModule};
use crate::shape_key::{bind_dynamic_dims, derive_key, DispatchKey, DynamicDimBinding};
use crate::signature::{Dimension, TaskSignature};

pub struct CompiledTask<D: Device> {
    task_dir: PathBuf,
    signature: TaskSignature,
    bindings: Vec<DynamicDimBinding>,
    device: Arc<D>,
    module: Arc<dyn TaskModule<D::Tensor>>,
    candidates: Vec<CandidateHandle<D::Tensor>>,
    selector: Arc<dyn CandidateSelector<D>>,
    // Held across lookup, benchmark and record so a key is resolved once per process.
    dispatch: Mutex<DispatchTable>,
    // Symbol values live in module-wide state. Held from binding until the last read of them.
    symbol_binding: Mutex<()>,
}

impl<D: Device> std::fmt::Debug for CompiledTask<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledTask")
            .field("task_dir", &self.task_dir)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

/// Loads a task directory with options taken from the environment.
pub fn load_compiled_task<D: Device + 'static>(
    task_dir: impl AsRef<Path>,
    device: Arc<D>,
    loader: &dyn ModuleLoader<D::Tensor>,
) -> TaskResult<CompiledTask<D>> {
    CompiledTask::load(task_dir, device, loader, &RuntimeOptions::from_env()?)
}

impl<D: Device + 'static> CompiledTask<D> {
    pub fn load(
        task_dir: impl AsRef<Path>,
        device: Arc<D>,
        loader: &dyn ModuleLoader<D::Tensor>,
        options: &RuntimeOptions,
    ) -> TaskResult<Self> {
        let task_dir = task_dir.as_ref().to_path_buf();
        if !task_dir.is_dir() {
            return Err(TaskError::configuration(format!(
                "task directory {} does not exist",
                task_dir.display()
            )));
        }

        let signature = TaskSignature::load(&task_dir)?;
        if signature.device != device.kind() {
            tracing::warn!(
                task = %task_dir.display(),
                compiled_for = %signature.device,
                device = device.kind(),
                "task was compiled for a different device class"
            );
        }
        let bindings = bind_dynamic_dims(&signature)?;

        let module = loader.load(&task_dir, &signature)?;
        let candidates = (0..signature.num_candidates)
            .map(|index| {
                let name = candidate_symbol(index);
                module.candidate(&name).map_err(|err| {
                    TaskError::configuration(format!(
                        "compiled module in {} lacks candidate {name}: {err}",
                        task_dir.display()
                    ))
                })
            })
            .collect::<TaskResult<Vec<_>>>()?;

        options.validate()?;
        let table_path = task_dir.join(DISPATCH_TABLE_FILE);
        let table = if options.recover_corrupt_table {
            DispatchTable::load_or_reset(table_path, &signature.symbols)?
        } else {
            DispatchTable::load(table_path, &signature.symbols)?
        };

        tracing::info!(
            task = %task_dir.display(),
            candidates = candidates.len(),
            symbols = ?signature.symbols,
            dispatch_entries = table.len(),
            "loaded compiled task"
        );

        Ok(Self {
            task_dir,
            signature,
            bindings,
            device,
            module,
            candidates,
            selector: Arc::new(Benchmarker::new(options.bench)?),
            dispatch: Mutex::new(table),
            symbol_binding: Mutex::new(()),
        })
    }

    /// Replaces the benchmarker used for unresolved keys.
    pub fn with_selector(mut self, selector: Arc<dyn CandidateSelector<D>>) -> Self {
        self.selector = selector;
        self
    }

    /// Runs the task, choosing (and on first sight of a shape, benchmarking) a candidate.
    ///
    /// Calls on one task with dynamic dimensions are serialized, since the module sees the
    /// symbol values of the running call.
    pub fn run(&self, inputs: &[D::Tensor]) -> TaskResult<Vec<D::Tensor>> {
        let key = derive_key(&self.bindings, inputs)?;
        let _binding = self.bind(&key)?;
        let mut outputs = self.allocate_outputs()?;
        let index = self.pick_best_candidate(&key, inputs, &mut outputs)?;
        self.candidates[index].launch(inputs, &mut outputs)?;
        Ok(outputs)
    }

    /// [`CompiledTask::run`] for tasks with exactly one output.
    pub fn run_single(&self, inputs: &[D::Tensor]) -> TaskResult<D::Tensor> {
        let mut outputs = self.run(inputs)?;
        match outputs.len() {
            1 => outputs.pop().ok_or_else(|| TaskError::execution("missing task output")),
            count => Err(TaskError::execution(format!(
                "run_single called on a task with {count} outputs"
            ))),
        }
    }

    /// Allocates the declared outputs for the shape identified by `key`.
    pub fn create_outputs(&self, key: &DispatchKey) -> TaskResult<Vec<D::Tensor>> {
        let _binding = self.bind(key)?;
        self.allocate_outputs()
    }

    /// Publishes `key` to the module. The returned guard must outlive every shape query and
    /// launch that reads the bound values.
    fn bind(&self, key: &DispatchKey) -> TaskResult<Option<MutexGuard<'_, ()>>> {
        if self.signature.symbols.is_empty() {
            return Ok(None);
        }
        let guard = self
            .symbol_binding
            .lock()
            .map_err(|_| TaskError::execution("symbol binding mutex poisoned"))?;
        self.module
            .bind_symbols(&self.signature.symbols, key.values())?;
        Ok(Some(guard))
    }

    // Callers hold the binding guard.
    fn allocate_outputs(&self) -> TaskResult<Vec<D::Tensor>> {
        let mut outputs = Vec::with_capacity(self.signature.outputs.len());
        for (index, output) in self.signature.outputs.iter().enumerate() {
            let dims = if output.is_static() {
                output
                    .dims
                    .iter()
                    .filter_map(|dim| match dim {
                        Dimension::Static(size) => Some(*size),
                        Dimension::Symbol(_) => None,
                    })
                    .collect::<Vec<_>>()
            } else {
                let mut queried = vec![0i64; output.rank()];
                self.module.output_shape(index, &mut queried)?;
                output
                    .dims
                    .iter()
                    .zip(queried)
                    .map(|(dim, value)| match dim {
                        Dimension::Static(size) => Ok(*size),
                        Dimension::Symbol(name) => usize::try_from(value).map_err(|_| {
                            TaskError::execution(format!(
                                "output {index} reported size {value} for symbol '{name}'"
                            ))
                        }),
                    })
                    .collect::<TaskResult<Vec<_>>>()?
            };
            outputs.push(self.device.empty(output.dtype, &dims)?);
        }
        Ok(outputs)
    }

    /// Returns the recorded candidate for `key`, benchmarking and recording one if absent.
    ///
    /// Benchmarking launches candidates against `outputs`.
    pub fn pick_best_candidate(
        &self,
        key: &DispatchKey,
        inputs: &[D::Tensor],
        outputs: &mut [D::Tensor],
    ) -> TaskResult<usize> {
        let mut table = self.lock_table()?;
        let index = match table.lookup(key) {
            Some(index) => {
                tracing::debug!(
                    task = %self.task_dir.display(),
                    key = %key,
                    candidate = index,
                    "dispatch hit"
                );
                index
            }
            None => {
                let index = self.selector.select_best(
                    self.device.as_ref(),
                    &self.candidates,
                    inputs,
                    outputs,
                )?;
                self.check_index(index)?;
                tracing::info!(
                    task = %self.task_dir.display(),
                    key = %key,
                    candidate = index,
                    "benchmarked new dispatch key"
                );
                table.record(key.clone(), index)?;
                index
            }
        };
        self.check_index(index)?;
        Ok(index)
    }

    fn check_index(&self, index: usize) -> TaskResult<()> {
        if index >= self.candidates.len() {
            return Err(TaskError::InvalidDispatchEntry {
                index,
                num_candidates: self.candidates.len(),
            });
        }
        Ok(())
    }

    fn lock_table(&self) -> TaskResult<MutexGuard<'_, DispatchTable>> {
        self.dispatch
            .lock()
            .map_err(|_| TaskError::execution("dispatch table mutex poisoned"))
    }

    pub fn signature(&self) -> &TaskSignature {
        &self.signature
    }

    pub fn bindings(&self) -> &[DynamicDimBinding] {
        &self.bindings
    }

    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn num_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Snapshot of the in-memory dispatch decisions, sorted by key.
    pub fn dispatch_entries(&self) -> TaskResult<Vec<(DispatchKey, usize)>> {
        Ok(self.lock_table()?.entries())
    }
}
