//! Backend abstraction - Multi-backend support
//!
//! NdArray (CPU) is always available; CUDA (GPU) is compiled in with the
//! `cuda` feature and chosen at runtime by `TrainingConfig::cuda`.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

// --------------------------------------------------------------------------------
// BACKEND SELECTION: NdArray always, CUDA behind the feature flag
// --------------------------------------------------------------------------------

pub type CpuBackend = burn_ndarray::NdArray;

/// Autodiff backend for training on the CPU
pub type CpuTrainingBackend = Autodiff<CpuBackend>;

#[cfg(feature = "cuda")]
pub type GpuBackend = burn_cuda::Cuda;

/// Autodiff backend for training on the GPU
#[cfg(feature = "cuda")]
pub type GpuTrainingBackend = Autodiff<GpuBackend>;

/// Get the default CPU device
pub fn cpu_device() -> <CpuBackend as Backend>::Device {
    <CpuBackend as Backend>::Device::default()
}

/// Get the default GPU device
#[cfg(feature = "cuda")]
pub fn gpu_device() -> <GpuBackend as Backend>::Device {
    <GpuBackend as Backend>::Device::default()
}

/// Whether this binary was built with GPU support
pub fn cuda_available() -> bool {
    cfg!(feature = "cuda")
}

/// Get a human-readable name for the backend a run will use
pub fn backend_name(use_cuda: bool) -> &'static str {
    if use_cuda && cuda_available() {
        "CUDA (GPU)"
    } else {
        "NdArray (CPU)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_falls_back_to_cpu() {
        assert_eq!(backend_name(false), "NdArray (CPU)");
        if !cuda_available() {
            assert_eq!(backend_name(true), "NdArray (CPU)");
        }
    }
}
