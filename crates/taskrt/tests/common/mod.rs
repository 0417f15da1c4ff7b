#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;
use taskrt::{
    CandidateHandle, CandidateSelector, CompiledTask, Dimension, HostDevice, HostTensor,
    ModuleLoader, RuntimeOptions, TaskError, TaskModule, TaskResult, TaskSignature,
};

/// Per-candidate launch counters shared between a loader and the test body.
#[derive(Clone, Default)]
pub struct LaunchLog {
    counts: Arc<Mutex<Vec<usize>>>,
}

impl LaunchLog {
    pub fn count(&self, candidate: usize) -> usize {
        self.counts
            .lock()
            .expect("launch log poisoned")
            .get(candidate)
            .copied()
            .unwrap_or(0)
    }

    fn bump(&self, candidate: usize) {
        let mut counts = self.counts.lock().expect("launch log poisoned");
        if counts.len() <= candidate {
            counts.resize(candidate + 1, 0);
        }
        counts[candidate] += 1;
    }
}

/// In-memory module: candidate `i` writes `input[0][j] + i` into every element of output 0.
pub struct ScriptedModule {
    outputs: Vec<Vec<Dimension>>,
    exported: usize,
    log: LaunchLog,
    bound: Mutex<HashMap<String, i64>>,
    shape_delay: Duration,
}

impl TaskModule<HostTensor> for ScriptedModule {
    fn candidate(&self, name: &str) -> TaskResult<CandidateHandle<HostTensor>> {
        let index = name
            .strip_prefix("launch_")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|index| *index < self.exported)
            .ok_or_else(|| TaskError::execution(format!("symbol {name} not found")))?;
        let log = self.log.clone();
        Ok(Arc::new(
            move |inputs: &[HostTensor], outputs: &mut [HostTensor]| -> TaskResult<()> {
                log.bump(index);
                let source = inputs[0].to_f32_vec()?;
                let target = &mut outputs[0];
                let len = target.as_bytes().len() / 4;
                let values: Vec<f32> = (0..len)
                    .map(|j| source.get(j).copied().unwrap_or(0.0) + index as f32)
                    .collect();
                let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
                target.as_bytes_mut().copy_from_slice(&bytes);
                Ok(())
            },
        ))
    }

    fn bind_symbols(&self, symbols: &[String], values: &[i64]) -> TaskResult<()> {
        let mut bound = self.bound.lock().expect("symbol table poisoned");
        for (symbol, value) in symbols.iter().zip(values) {
            bound.insert(symbol.clone(), *value);
        }
        Ok(())
    }

    fn output_shape(&self, index: usize, dims: &mut [i64]) -> TaskResult<()> {
        // Widens the window between binding and reading the bound values.
        thread::sleep(self.shape_delay);
        let bound = self.bound.lock().expect("symbol table poisoned");
        let signature = self
            .outputs
            .get(index)
            .ok_or_else(|| TaskError::execution(format!("no output {index}")))?;
        for (slot, dim) in dims.iter_mut().zip(signature) {
            *slot = match dim {
                Dimension::Static(size) => *size as i64,
                Dimension::Symbol(name) => *bound
                    .get(name)
                    .ok_or_else(|| TaskError::execution(format!("symbol {name} unbound")))?,
            };
        }
        Ok(())
    }
}

/// Loader producing [`ScriptedModule`]s. `exported` limits how many candidates the module
/// actually exports, regardless of what the metadata claims.
pub struct ScriptedLoader {
    pub exported: usize,
    pub log: LaunchLog,
    pub loads: Arc<AtomicUsize>,
    pub shape_delay: Duration,
}

impl ScriptedLoader {
    pub fn new(exported: usize) -> Self {
        Self {
            exported,
            log: LaunchLog::default(),
            loads: Arc::new(AtomicUsize::new(0)),
            shape_delay: Duration::ZERO,
        }
    }

    /// Makes every output shape query stall for `delay` before reading the bound symbols.
    pub fn with_shape_delay(mut self, delay: Duration) -> Self {
        self.shape_delay = delay;
        self
    }
}

impl ModuleLoader<HostTensor> for ScriptedLoader {
    fn load(
        &self,
        _task_dir: &Path,
        signature: &TaskSignature,
    ) -> TaskResult<Arc<dyn TaskModule<HostTensor>>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedModule {
            outputs: signature.outputs.iter().map(|o| o.dims.clone()).collect(),
            exported: self.exported,
            log: self.log.clone(),
            bound: Mutex::new(HashMap::new()),
            shape_delay: self.shape_delay,
        }))
    }
}

/// Selector that always picks `pick`, counting invocations. Each invocation launches every
/// candidate once so benchmarking leaves the same side effects a real run would.
pub struct CountingSelector {
    pub pick: usize,
    pub calls: AtomicUsize,
}

impl CountingSelector {
    pub fn new(pick: usize) -> Arc<Self> {
        Arc::new(Self {
            pick,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CandidateSelector<HostDevice> for CountingSelector {
    fn select_best(
        &self,
        _device: &HostDevice,
        candidates: &[CandidateHandle<HostTensor>],
        inputs: &[HostTensor],
        outputs: &mut [HostTensor],
    ) -> TaskResult<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for candidate in candidates {
            candidate.launch(inputs, outputs)?;
        }
        Ok(self.pick)
    }
}

/// Writes a task with one symbol `n`, one `[n, 8]` float32 input and a matching output.
pub fn write_row_task(dir: &Path, num_candidates: usize) {
    write_meta(
        dir,
        json!({
            "symbols": ["n"],
            "inputs": [["float32", "n", 8]],
            "outputs": [["float32", "n", 8]],
            "device": "cpu",
            "num_candidates": num_candidates,
            "hidet_version": "0.3.0",
        }),
    );
}

pub fn write_meta(dir: &Path, meta: serde_json::Value) {
    fs::write(dir.join("meta.json"), meta.to_string()).expect("write meta.json");
}

pub fn load_task(
    dir: &Path,
    loader: &ScriptedLoader,
    selector: Arc<CountingSelector>,
) -> TaskResult<CompiledTask<HostDevice>> {
    Ok(
        CompiledTask::load(dir, Arc::new(HostDevice), loader, &RuntimeOptions::default())?
            .with_selector(selector),
    )
}

pub fn rows(n: usize) -> HostTensor {
    let values: Vec<f32> = (0..n * 8).map(|v| v as f32).collect();
    HostTensor::from_f32(&[n, 8], &values).expect("host tensor")
}
