//! Runtime dispatch for precompiled tensor tasks.
//!
//! A compiled task ships several candidate implementations. At each call the runtime derives a
//! dispatch key from the dynamic input dimensions, looks the key up in a dispatch table
//! persisted next to the task, and on a miss benchmarks every candidate once and appends the
//! winner to the table.

pub mod bench;
pub mod config;
pub mod device;
pub mod dispatch_table;
mod env;
pub mod error;
pub mod module;
pub mod registry;
pub mod shape_key;
pub mod signature;
pub mod task;

pub use bench::{Benchmarker, CandidateSelector};
pub use config::{BenchConfig, RuntimeOptions};
pub use device::{Device, HostDevice, HostTensor, TensorArg};
pub use dispatch_table::DispatchTable;
pub use error::{TaskError, TaskResult};
pub use module::{Candidate, CandidateHandle, ModuleLoader, TaskModule};
pub use registry::{CompiledTaskRegistry, TaskCacheKey};
pub use shape_key::{DispatchKey, DynamicDimBinding};
pub use signature::{DType, Dimension, TaskSignature, TensorSignature};
pub use task::{load_compiled_task, CompiledTask};
