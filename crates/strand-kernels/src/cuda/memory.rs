//! Typed device buffers and host↔device transfers.

use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaSlice, DeviceRepr, ValidAsZeroBits};

use super::context::{get_device, CudaError};

/// A device-resident buffer of `len` elements of `T` on one CUDA device.
///
/// The element type is kept (unlike an erased byte buffer) because every
/// strand kernel is instantiated per precision and the nucleotide/argmax
/// tensors carry integer elements.
#[derive(Debug)]
pub struct DeviceBuffer<T> {
    inner: CudaSlice<T>,
    device_idx: usize,
    len: usize,
}

impl<T: DeviceRepr + ValidAsZeroBits + Clone> DeviceBuffer<T> {
    /// Allocate a zeroed device buffer.
    pub fn zeros(device_idx: usize, len: usize) -> Result<Self, CudaError> {
        let dev = get_device(device_idx)?;
        let inner = dev
            .alloc_zeros::<T>(len)
            .map_err(|e| CudaError::MemoryError(format!("alloc_zeros({} elems): {}", len, e)))?;
        Ok(Self { inner, device_idx, len })
    }

    /// Copy host elements into a new device buffer (H2D).
    pub fn from_host(device_idx: usize, data: &[T]) -> Result<Self, CudaError> {
        let dev = get_device(device_idx)?;
        let inner = dev
            .htod_sync_copy(data)
            .map_err(|e| CudaError::MemoryError(format!("htod_copy({} elems): {}", data.len(), e)))?;
        Ok(Self { inner, device_idx, len: data.len() })
    }

    /// Copy the buffer back to the host (D2H, synchronous).
    pub fn to_host(&self) -> Result<Vec<T>, CudaError> {
        let dev = self.device()?;
        dev.dtoh_sync_copy(&self.inner)
            .map_err(|e| CudaError::MemoryError(format!("dtoh_sync_copy: {}", e)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn device_idx(&self) -> usize {
        self.device_idx
    }

    /// The underlying slice, for kernel launches.
    pub fn as_cuda_slice(&self) -> &CudaSlice<T> {
        &self.inner
    }

    /// Mutable underlying slice, for kernels writing into this buffer.
    pub fn as_cuda_slice_mut(&mut self) -> &mut CudaSlice<T> {
        &mut self.inner
    }

    pub fn device(&self) -> Result<Arc<CudaDevice>, CudaError> {
        get_device(self.device_idx)
    }
}
