// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Restorable images and the engine that owns them. */

pub use engine::{DrawTriangles, DumpError, Engine, EngineConfig};
pub use image::ImageType;
pub use pixel_records::PixelRecords;
pub use registry::{DependencyTracker, DrawSourceDependencies, ImageId, NoDependencies, ShaderId};

pub(crate) mod engine;
pub(crate) mod image;
pub mod pixel_records;
pub(crate) mod registry;
pub(crate) mod shader;
pub mod vertex_algorithms;
pub mod vertex_layout;
