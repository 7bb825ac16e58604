//! # SPICE kernel management and segment construction
//!
//! This module turns the pointing and position caches stored in an image label into kernel
//! segments that a CK or SPK writer can consume.
//!
//! ## Pieces
//!
//! - [`kernel_type`]: kernel type enumeration, NAIF id word parsing and type filters.
//! - [`kernel_pool`]: the [`KernelPool`](crate::spice::kernel_pool::KernelPool) trait, the
//!   boundary to the NAIF kernel pool (furnish/unload, frame and clock queries).
//! - [`memory_pool`]: an in-memory pool with linear clocks and a small frame graph.
//! - [`kernel_catalog`]: the kernels an image references, with scoped loading and
//!   unload-on-drop ownership.
//! - [`frame_transform`]: state transforms, rotation algebra and frame chains.
//! - [`camera`]: NAIF ids of the instrument and the extrapolation hooks used for padding.
//! - [`segment`], [`ck_segment`], [`spk_segment`]: segment builders.
//!
//! ## Typical flow
//!
//! ```text
//! Label ──scan──► KernelCatalog ──load_scoped──► KernelPool
//!   │                                               │
//!   └── InstrumentPointing ──► CkSegmentBuilder ◄───┘ frame / clock queries
//!   └── InstrumentPosition ──► SpkSegmentBuilder
//! ```

pub mod camera;
pub mod ck_segment;
pub mod frame_transform;
pub mod kernel_catalog;
pub mod kernel_pool;
pub mod kernel_type;
pub mod memory_pool;
pub mod segment;
pub mod spk_segment;
