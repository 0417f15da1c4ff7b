//! Device boundary: tensor allocation and execution barriers.
//!
//! Device memory management lives outside this crate. Compiled tasks only need to allocate
//! output buffers of a given dtype and shape, read the shape of live tensors, and block until
//! previously issued work has finished.

use crate::error::{TaskError, TaskResult};
use crate::signature::DType;

/// Shape and dtype view of a tensor passed to a compiled candidate.
pub trait TensorArg {
    fn dtype(&self) -> DType;
    fn dims(&self) -> &[usize];
}

pub trait Device: Send + Sync {
    type Tensor: TensorArg + Send;

    /// Device class name as written in task metadata (e.g. "cpu", "cuda").
    fn kind(&self) -> &str;

    /// Allocates an uninitialized-or-zeroed tensor.
    fn empty(&self, dtype: DType, dims: &[usize]) -> TaskResult<Self::Tensor>;

    /// Blocks until all work previously issued to the device has completed.
    fn synchronize(&self) -> TaskResult<()>;
}

/// Dense tensor in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    dtype: DType,
    dims: Vec<usize>,
    data: Vec<u8>,
}

impl HostTensor {
    pub fn zeroed(dtype: DType, dims: &[usize]) -> TaskResult<Self> {
        let byte_len = byte_len(dtype, dims)?;
        Ok(Self {
            dtype,
            dims: dims.to_vec(),
            data: vec![0u8; byte_len],
        })
    }

    pub fn from_bytes(dtype: DType, dims: &[usize], data: Vec<u8>) -> TaskResult<Self> {
        let expected = byte_len(dtype, dims)?;
        if data.len() != expected {
            return Err(TaskError::shape_mismatch(format!(
                "tensor of shape {dims:?} and dtype {dtype} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            dtype,
            dims: dims.to_vec(),
            data,
        })
    }

    pub fn from_f32(dims: &[usize], values: &[f32]) -> TaskResult<Self> {
        let data = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        Self::from_bytes(DType::F32, dims, data)
    }

    pub fn to_f32_vec(&self) -> TaskResult<Vec<f32>> {
        if self.dtype != DType::F32 {
            return Err(TaskError::execution(format!(
                "cannot read {} tensor as float32",
                self.dtype
            )));
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl TensorArg for HostTensor {
    fn dtype(&self) -> DType {
        self.dtype
    }

    fn dims(&self) -> &[usize] {
        &self.dims
    }
}

fn byte_len(dtype: DType, dims: &[usize]) -> TaskResult<usize> {
    dims.iter()
        .try_fold(dtype.size_in_bytes(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| TaskError::execution(format!("tensor byte size overflow for {dims:?}")))
}

/// Host-memory device. Execution is synchronous, so the barrier is a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostDevice;

impl Device for HostDevice {
    type Tensor = HostTensor;

    fn kind(&self) -> &str {
        "cpu"
    }

    fn empty(&self, dtype: DType, dims: &[usize]) -> TaskResult<Self::Tensor> {
        HostTensor::zeroed(dtype, dims)
    }

    fn synchronize(&self) -> TaskResult<()> {
        Ok(())
    }
}
