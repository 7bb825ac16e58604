//! # Kernel pool capability
//!
//! The NAIF kernel pool is process-wide, stateful and not reentrant. Rather than reaching for it
//! as ambient global state, everything in this crate receives a [`KernelPool`] handle:
//!
//! * the [`KernelCatalog`](crate::spice::kernel_catalog::KernelCatalog) furnishes and unloads
//!   kernels through it and asks it which kernels are already loaded;
//! * [`frame_transform`](crate::spice::frame_transform) queries frame transforms;
//! * the segment builders convert between ephemeris time and spacecraft clock ticks.
//!
//! All methods take `&self`: implementations hold their mutable state behind interior
//! mutability, which also makes them `!Sync` and forces callers to serialise access.
//!
//! [`MemoryKernelPool`](crate::spice::memory_pool::MemoryKernelPool) is the in-crate
//! implementation; it keeps frames and clocks in memory and records every call.

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::{Matrix3, Matrix6};
use thiserror::Error;

use super::kernel_type::KernelType;

/// Failure reported by the kernel pool. Callers decide locally whether it is fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("not found in kernel pool: {0}")]
    NotFound(String),

    #[error("kernel pool rejected {path}: {reason}")]
    Rejected { path: String, reason: String },

    #[error("unsupported kernel pool request: {0}")]
    Unsupported(String),
}

pub trait KernelPool {
    /// Load a kernel file into the pool.
    fn furnish(&self, path: &Utf8Path) -> Result<(), PoolError>;

    /// Remove a kernel file from the pool.
    fn unload(&self, path: &Utf8Path) -> Result<(), PoolError>;

    /// By-path lookup of a loaded kernel; returns its type as advertised by the pool.
    fn kernel_info(&self, path: &Utf8Path) -> Option<KernelType>;

    /// Every kernel currently loaded, in load order.
    fn loaded_kernels(&self) -> Vec<(Utf8PathBuf, KernelType)>;

    /// Name of a frame from its integer id.
    fn frame_name(&self, frame_id: i32) -> Result<String, PoolError>;

    /// 6x6 state transform taking states in `from` to states in `to`.
    fn state_transform(&self, from: &str, to: &str, et: f64) -> Result<Matrix6<f64>, PoolError>;

    /// 3x3 rotation taking positions in `from` to positions in `to`.
    fn rotation(&self, from: &str, to: &str, et: f64) -> Result<Matrix3<f64>, PoolError>;

    /// Ephemeris time to continuous spacecraft clock ticks.
    fn et_to_sclk(&self, sclk_code: i32, et: f64) -> Result<f64, PoolError>;

    /// Continuous spacecraft clock ticks to ephemeris time.
    fn sclk_to_et(&self, sclk_code: i32, ticks: f64) -> Result<f64, PoolError>;
}
