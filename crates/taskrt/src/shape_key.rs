use std::fmt;

use smallvec::SmallVec;

use crate::device::TensorArg;
use crate::error::{TaskError, TaskResult};
use crate::signature::TaskSignature;

/// Where the runtime value of a symbol is read from: the first input dimension that uses it.
///
/// Later occurrences of the same symbol are never cross-checked against this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicDimBinding {
    pub symbol: String,
    pub tensor_index: usize,
    pub dim_index: usize,
}

/// Concrete symbol values for one invocation, in declared symbol order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct DispatchKey(SmallVec<[i64; 4]>);

impl DispatchKey {
    pub fn new(values: impl IntoIterator<Item = i64>) -> Self {
        DispatchKey(values.into_iter().collect())
    }

    pub fn values(&self) -> &[i64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, value) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

impl From<Vec<i64>> for DispatchKey {
    fn from(values: Vec<i64>) -> Self {
        DispatchKey::new(values)
    }
}

/// Binds every declared symbol to its first occurrence among the input signatures.
pub fn bind_dynamic_dims(signature: &TaskSignature) -> TaskResult<Vec<DynamicDimBinding>> {
    signature
        .symbols
        .iter()
        .map(|symbol| {
            signature
                .inputs
                .iter()
                .enumerate()
                .find_map(|(tensor_index, input)| {
                    input
                        .dims
                        .iter()
                        .position(|dim| dim.as_symbol() == Some(symbol.as_str()))
                        .map(|dim_index| DynamicDimBinding {
                            symbol: symbol.clone(),
                            tensor_index,
                            dim_index,
                        })
                })
                .ok_or_else(|| {
                    TaskError::configuration(format!(
                        "symbol '{symbol}' does not appear in any input"
                    ))
                })
        })
        .collect()
}

/// Reads the value of each bound symbol off the live inputs.
pub fn derive_key<T: TensorArg>(
    bindings: &[DynamicDimBinding],
    inputs: &[T],
) -> TaskResult<DispatchKey> {
    let mut key = SmallVec::with_capacity(bindings.len());
    for binding in bindings {
        let tensor = inputs.get(binding.tensor_index).ok_or_else(|| {
            TaskError::shape_mismatch(format!(
                "symbol '{}' is bound to input {}, but only {} inputs were given",
                binding.symbol,
                binding.tensor_index,
                inputs.len()
            ))
        })?;
        let size = tensor.dims().get(binding.dim_index).ok_or_else(|| {
            TaskError::shape_mismatch(format!(
                "symbol '{}' is bound to dimension {} of input {}, which has rank {}",
                binding.symbol,
                binding.dim_index,
                binding.tensor_index,
                tensor.dims().len()
            ))
        })?;
        let value = i64::try_from(*size).map_err(|_| {
            TaskError::shape_mismatch(format!(
                "dimension {size} of input {} does not fit a dispatch key",
                binding.tensor_index
            ))
        })?;
        key.push(value);
    }
    Ok(DispatchKey(key))
}
