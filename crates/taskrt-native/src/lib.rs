//! Shared-library task modules for `taskrt`.
//!
//! A task directory built for the host carries `lib.so` (`lib.dylib`, `lib.dll`) next to its
//! `meta.json`. The library exports one C entry point per candidate,
//!
//! ```c
//! int launch_0(const TaskrtTensor* inputs, size_t num_inputs,
//!              TaskrtTensor* outputs, size_t num_outputs);
//! ```
//!
//! plus, for tasks with dynamic output dimensions, `get_output_shape(int index, int64_t* dims)`
//! and `set_symbol_value(const char* name, int64_t value)`. All functions return 0 on success.

mod compile;
mod dtype;

use std::ffi::{c_char, c_int, c_void, CString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use taskrt::{
    Candidate, CandidateHandle, HostTensor, ModuleLoader, TaskError, TaskModule, TaskResult,
    TaskSignature, TensorArg,
};

pub use compile::{compile_c, lib_ext};
pub use dtype::dtype_tag;

/// Library file name inside a task directory.
pub const LIBRARY_STEM: &str = "lib";

/// Tensor view handed to compiled entry points.
#[repr(C)]
pub struct TaskrtTensor {
    pub dtype: u32,
    pub rank: u32,
    pub dims: *const i64,
    pub data: *mut c_void,
}

type CLaunch = unsafe extern "C" fn(*const TaskrtTensor, usize, *mut TaskrtTensor, usize) -> c_int;
type CShapeQuery = unsafe extern "C" fn(c_int, *mut i64) -> c_int;
type CSetSymbol = unsafe extern "C" fn(*const c_char, i64) -> c_int;

/// Path of the compiled library inside `task_dir`.
pub fn library_path(task_dir: &Path) -> PathBuf {
    task_dir.join(format!("{LIBRARY_STEM}{}", lib_ext()))
}

/// Loads `lib.so` from task directories.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeModuleLoader;

impl ModuleLoader<HostTensor> for NativeModuleLoader {
    fn load(
        &self,
        task_dir: &Path,
        signature: &TaskSignature,
    ) -> TaskResult<Arc<dyn TaskModule<HostTensor>>> {
        Ok(Arc::new(NativeModule::open(task_dir, signature)?))
    }
}

pub struct NativeModule {
    lib: Arc<Library>,
    path: PathBuf,
    output_shape: Option<CShapeQuery>,
    set_symbol: Option<CSetSymbol>,
}

impl NativeModule {
    pub fn open(task_dir: &Path, signature: &TaskSignature) -> TaskResult<Self> {
        let path = library_path(task_dir);
        if !path.is_file() {
            return Err(TaskError::configuration(format!(
                "compiled library {} does not exist",
                path.display()
            )));
        }
        let lib = unsafe { Library::new(&path) }.map_err(|err| {
            TaskError::configuration(format!("failed to load {}: {err}", path.display()))
        })?;

        let output_shape = unsafe {
            lib.get::<CShapeQuery>(b"get_output_shape")
                .map(|symbol| *symbol)
                .ok()
        };
        let set_symbol = unsafe {
            lib.get::<CSetSymbol>(b"set_symbol_value")
                .map(|symbol| *symbol)
                .ok()
        };
        if signature.outputs.iter().any(|output| !output.is_static()) {
            let missing = [
                ("set_symbol_value", set_symbol.is_none()),
                ("get_output_shape", output_shape.is_none()),
            ];
            if let Some((name, _)) = missing.iter().find(|(_, absent)| *absent) {
                return Err(TaskError::configuration(format!(
                    "{} has dynamic outputs but does not export {name}",
                    path.display()
                )));
            }
        }

        tracing::debug!(
            library = %path.display(),
            candidates = signature.num_candidates,
            "opened task library"
        );
        Ok(Self {
            lib: Arc::new(lib),
            path,
            output_shape,
            set_symbol,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskModule<HostTensor> for NativeModule {
    fn candidate(&self, name: &str) -> TaskResult<CandidateHandle<HostTensor>> {
        let launch = unsafe {
            self.lib
                .get::<CLaunch>(name.as_bytes())
                .map(|symbol| *symbol)
        }
        .map_err(|err| {
            TaskError::configuration(format!(
                "{} does not export {name}: {err}",
                self.path.display()
            ))
        })?;
        Ok(Arc::new(NativeCandidate {
            _lib: Arc::clone(&self.lib),
            name: name.to_string(),
            launch,
        }))
    }

    fn bind_symbols(&self, symbols: &[String], values: &[i64]) -> TaskResult<()> {
        let Some(set_symbol) = self.set_symbol else {
            return Ok(());
        };
        for (symbol, value) in symbols.iter().zip(values) {
            let c_name = CString::new(symbol.as_str()).map_err(|_| {
                TaskError::configuration(format!("symbol name '{symbol}' contains a NUL byte"))
            })?;
            let status = unsafe { set_symbol(c_name.as_ptr(), *value) };
            if status != 0 {
                return Err(TaskError::execution(format!(
                    "set_symbol_value({symbol}, {value}) failed with status {status}"
                )));
            }
        }
        Ok(())
    }

    fn output_shape(&self, index: usize, dims: &mut [i64]) -> TaskResult<()> {
        let query = self.output_shape.ok_or_else(|| {
            TaskError::execution(format!(
                "{} does not export get_output_shape",
                self.path.display()
            ))
        })?;
        let index = c_int::try_from(index)
            .map_err(|_| TaskError::execution(format!("output index {index} out of range")))?;
        let status = unsafe { query(index, dims.as_mut_ptr()) };
        if status != 0 {
            return Err(TaskError::execution(format!(
                "get_output_shape({index}) failed with status {status}"
            )));
        }
        Ok(())
    }
}

struct NativeCandidate {
    // Keeps `launch` valid.
    _lib: Arc<Library>,
    name: String,
    launch: CLaunch,
}

impl Candidate<HostTensor> for NativeCandidate {
    fn launch(&self, inputs: &[HostTensor], outputs: &mut [HostTensor]) -> TaskResult<()> {
        let input_dims = inputs.iter().map(dims_i64).collect::<TaskResult<Vec<_>>>()?;
        let output_dims = outputs.iter().map(dims_i64).collect::<TaskResult<Vec<_>>>()?;

        let input_views = inputs
            .iter()
            .zip(&input_dims)
            .map(|(tensor, dims)| -> TaskResult<TaskrtTensor> {
                Ok(TaskrtTensor {
                    dtype: dtype_tag(tensor.dtype()),
                    rank: rank_u32(dims)?,
                    dims: dims.as_ptr(),
                    data: tensor.as_bytes().as_ptr() as *mut c_void,
                })
            })
            .collect::<TaskResult<Vec<_>>>()?;
        let mut output_views = outputs
            .iter_mut()
            .zip(&output_dims)
            .map(|(tensor, dims)| -> TaskResult<TaskrtTensor> {
                Ok(TaskrtTensor {
                    dtype: dtype_tag(tensor.dtype()),
                    rank: rank_u32(dims)?,
                    dims: dims.as_ptr(),
                    data: tensor.as_bytes_mut().as_mut_ptr() as *mut c_void,
                })
            })
            .collect::<TaskResult<Vec<_>>>()?;

        let status = unsafe {
            (self.launch)(
                input_views.as_ptr(),
                input_views.len(),
                output_views.as_mut_ptr(),
                output_views.len(),
            )
        };
        if status != 0 {
            return Err(TaskError::execution(format!(
                "{} returned status {status}",
                self.name
            )));
        }
        Ok(())
    }
}

fn dims_i64(tensor: &HostTensor) -> TaskResult<Vec<i64>> {
    tensor
        .dims()
        .iter()
        .map(|&dim| {
            i64::try_from(dim).map_err(|_| {
                TaskError::shape_mismatch(format!("dimension {dim} does not fit in int64_t"))
            })
        })
        .collect()
}

fn rank_u32(dims: &[i64]) -> TaskResult<u32> {
    u32::try_from(dims.len()).map_err(|_| {
        TaskError::shape_mismatch(format!("rank {} does not fit in uint32_t", dims.len()))
    })
}
