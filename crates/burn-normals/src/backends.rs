//! Backend support for burn-normals
//!
//! The pipeline is generic over any Burn backend. Enable one via feature flags:
//!
//! - `ndarray`: CPU backend using ndarray (default, no GPU required)
//! - `tch`: PyTorch backend via libtorch
//! - `wgpu`: WebGPU backend (cross-platform GPU support)
//! - `cuda`: Native CUDA backend (NVIDIA GPUs only)
//!
//! ```toml
//! [dependencies]
//! burn-normals = { version = "0.1", default-features = false, features = ["wgpu"] }
//! ```

#[cfg(feature = "ndarray")]
pub use burn_ndarray::{NdArray, NdArrayDevice};

#[cfg(feature = "tch")]
pub use burn_tch::{LibTorch, LibTorchDevice};

#[cfg(feature = "wgpu")]
pub use burn_wgpu::{Wgpu, WgpuDevice};

#[cfg(feature = "cuda")]
pub use burn_cuda::{Cuda, CudaDevice};

/// Backend used when the caller does not pick one
#[cfg(feature = "ndarray")]
pub type DefaultBackend = NdArray<f32>;

#[cfg(all(feature = "tch", not(feature = "ndarray")))]
pub type DefaultBackend = LibTorch;

#[cfg(all(feature = "wgpu", not(any(feature = "ndarray", feature = "tch"))))]
pub type DefaultBackend = Wgpu;

#[cfg(all(
    feature = "cuda",
    not(any(feature = "ndarray", feature = "tch", feature = "wgpu"))
))]
pub type DefaultBackend = Cuda;

/// Default device of [`DefaultBackend`]
#[cfg(any(
    feature = "ndarray",
    feature = "tch",
    feature = "wgpu",
    feature = "cuda"
))]
pub fn default_device() -> <DefaultBackend as burn::tensor::backend::Backend>::Device {
    Default::default()
}
