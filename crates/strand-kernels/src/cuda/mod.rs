//! CUDA GPU backend for the strand kernel suite.
//!
//! Provides:
//! - Device context management (lazy singleton per GPU)
//! - Typed device buffers and host↔device transfers
//! - Kernel launcher with NVRTC compilation and module caching
//! - The kernel dispatch functions, one per operation, each colocated
//!   with its shared-memory size computation

pub mod context;
pub mod launch;
pub mod memory;
pub mod ops;

pub use context::{device_count, get_device, is_cuda_available, CudaError};
pub use memory::DeviceBuffer;
pub use ops::{
    convolve_sequence_bwd, convolve_sequence_fwd, convolve_sequence_grad, fully_connected_bwd,
    fully_connected_fwd, fully_connected_grad, gradient_reduce, max_pool_bwd, max_pool_fwd,
    sum_pool_bwd, sum_pool_fwd, DeviceScalar,
};
