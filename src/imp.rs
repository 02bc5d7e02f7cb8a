// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! [Graphics](crate::driver::Graphics) implementations.

mod software;
pub use software::{DriverStats, SoftwareGraphics};

#[cfg(feature = "backend_wgpu")]
mod wgpu;

#[cfg(feature = "backend_wgpu")]
pub use wgpu::{Error as WgpuError, WgpuGraphics};
