//! CUDA kernel launcher with NVRTC compilation and module caching.
//!
//! Compiles the embedded CUDA C++ sources at first use, caches compiled
//! modules per device, and provides launch-config helpers.

use std::collections::HashSet;
use std::sync::Arc;

use cudarc::driver::{CudaDevice, CudaFunction, LaunchConfig};
use parking_lot::Mutex;

use super::context::CudaError;

/// Registry of compiled modules per device. Key: (device_idx, module).
static LOADED: std::sync::OnceLock<Mutex<HashSet<(usize, String)>>> = std::sync::OnceLock::new();

fn loaded_set() -> &'static Mutex<HashSet<(usize, String)>> {
    LOADED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Ensure a module is compiled and loaded on the given device.
/// No-op if already loaded.
pub fn ensure_module(
    device: &Arc<CudaDevice>,
    device_idx: usize,
    module_name: &str,
    source: &str,
    funcs: &[&'static str],
) -> Result<(), CudaError> {
    let key = (device_idx, module_name.to_string());
    {
        let set = loaded_set().lock();
        if set.contains(&key) {
            return Ok(());
        }
    }

    tracing::debug!(module = module_name, device_idx, "compiling CUDA module via NVRTC");
    let ptx = cudarc::nvrtc::compile_ptx(source).map_err(|e| CudaError::PtxCompile {
        module: module_name.to_string(),
        msg: e.to_string(),
    })?;

    device.load_ptx(ptx, module_name, funcs).map_err(|e| CudaError::ModuleLoad {
        module: module_name.to_string(),
        msg: e.to_string(),
    })?;

    loaded_set().lock().insert(key);
    Ok(())
}

/// Get a kernel function handle, loading the module if needed.
pub fn get_or_load_func(
    device: &Arc<CudaDevice>,
    device_idx: usize,
    module_name: &str,
    func_name: &str,
    source: &str,
    funcs: &[&'static str],
) -> Result<CudaFunction, CudaError> {
    ensure_module(device, device_idx, module_name, source, funcs)?;
    device.get_func(module_name, func_name).ok_or_else(|| CudaError::FuncNotFound {
        module: module_name.to_string(),
        func: func_name.to_string(),
    })
}

/// 3D grid of 1D blocks: the (x, y, z) axes index whatever each kernel's
/// contract says (position block / row / filter, window / row / filter, …).
pub fn grid_3d(
    gx: usize,
    gy: usize,
    gz: usize,
    block_size: usize,
    shared_bytes: u32,
) -> LaunchConfig {
    LaunchConfig {
        grid_dim: (gx as u32, gy as u32, gz as u32),
        block_dim: (block_size as u32, 1, 1),
        shared_mem_bytes: shared_bytes,
    }
}

/// 2D grid of 2D blocks (fully-connected forward: column × row-tile).
pub fn grid_2d_block_2d(
    gx: usize,
    gy: usize,
    block_x: usize,
    block_y: usize,
    shared_bytes: u32,
) -> LaunchConfig {
    LaunchConfig {
        grid_dim: (gx as u32, gy as u32, 1),
        block_dim: (block_x as u32, block_y as u32, 1),
        shared_mem_bytes: shared_bytes,
    }
}
