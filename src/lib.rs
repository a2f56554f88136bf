#![deny(clippy::all, clippy::perf, clippy::suspicious)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

//! Offloading support for heterogeneous toolchains: host entry tables, AMDGPU kernel metadata,
//! and SPIR-V image containers.

pub mod amdgpu;
pub mod cli;
pub mod config;
pub mod container;
pub mod entry;
pub mod error;
pub mod logging;
pub mod target;

pub use amdgpu::{ImageMetadata, read_kernel_metadata};
pub use container::containerize_openmp_spirv_image;
pub use entry::{ModuleBuilder, OffloadEntry, OffloadKind};
pub use error::{Error, Result};
pub use target::TargetDescriptor;
