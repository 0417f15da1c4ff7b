//! Boundary to compiled task modules.
//!
//! Loading compiled artifacts is the job of a [`ModuleLoader`]; `taskrt-native` provides one
//! backed by shared libraries. A loaded [`TaskModule`] exports each candidate under the name
//! `launch_{index}` and answers shape queries for the current symbol binding.

use std::path::Path;
use std::sync::Arc;

use crate::error::TaskResult;
use crate::signature::TaskSignature;

/// A precompiled entry point. Inputs are read, outputs are written in place.
pub trait Candidate<T>: Send + Sync {
    fn launch(&self, inputs: &[T], outputs: &mut [T]) -> TaskResult<()>;
}

impl<T, F> Candidate<T> for F
where
    F: Fn(&[T], &mut [T]) -> TaskResult<()> + Send + Sync,
{
    fn launch(&self, inputs: &[T], outputs: &mut [T]) -> TaskResult<()> {
        self(inputs, outputs)
    }
}

pub type CandidateHandle<T> = Arc<dyn Candidate<T>>;

/// Exported symbol name of the candidate at `index`.
pub fn candidate_symbol(index: usize) -> String {
    format!("launch_{index}")
}

pub trait TaskModule<T>: Send + Sync {
    /// Resolves an exported candidate by symbol name.
    fn candidate(&self, name: &str) -> TaskResult<CandidateHandle<T>>;

    /// Publishes the runtime value of each symbol before shape queries and launches.
    ///
    /// The values stay bound until the next call; callers serialize binding with every read.
    fn bind_symbols(&self, _symbols: &[String], _values: &[i64]) -> TaskResult<()> {
        Ok(())
    }

    /// Fills `dims` with the full shape of output `index` at the current binding.
    fn output_shape(&self, index: usize, dims: &mut [i64]) -> TaskResult<()>;
}

pub trait ModuleLoader<T>: Send + Sync {
    fn load(
        &self,
        task_dir: &Path,
        signature: &TaskSignature,
    ) -> TaskResult<Arc<dyn TaskModule<T>>>;
}

impl<T, F> ModuleLoader<T> for F
where
    F: Fn(&Path, &TaskSignature) -> TaskResult<Arc<dyn TaskModule<T>>> + Send + Sync,
{
    fn load(
        &self,
        task_dir: &Path,
        signature: &TaskSignature,
    ) -> TaskResult<Arc<dyn TaskModule<T>>> {
        self(task_dir, signature)
    }
}
