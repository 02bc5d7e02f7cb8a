// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The vertex layout every draw uses.
//!
//! Vertices are [VERTEX_FLOAT_COUNT](crate::driver::VERTEX_FLOAT_COUNT) tightly
//! packed `f32`s.  This module describes that packing so a backend can tell
//! its GPU how to read the vertex buffer.
//!
//! ```
//! use restorable_images::images::vertex_layout::VertexLayout;
//! use restorable_images::driver::VERTEX_FLOAT_COUNT;
//!
//! let layout = VertexLayout::standard();
//! assert_eq!(layout.element_stride(), VERTEX_FLOAT_COUNT * 4);
//! assert_eq!(layout.offset_of("color"), Some(16));
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFieldType {
    F32x2,
    F32x4,
}

impl VertexFieldType {
    /// Size in bytes.
    pub const fn stride(&self) -> usize {
        match self {
            VertexFieldType::F32x2 => 8,
            VertexFieldType::F32x4 => 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VertexField {
    pub name: &'static str,
    pub r#type: VertexFieldType,
}

/// Describes the layout of a vertex buffer.
#[derive(Debug, Clone)]
pub struct VertexLayout {
    pub(crate) fields: Vec<VertexField>,
}

impl VertexLayout {
    /// Destination position, source texel, color.
    pub fn standard() -> Self {
        VertexLayout {
            fields: vec![
                VertexField {
                    name: "dst",
                    r#type: VertexFieldType::F32x2,
                },
                VertexField {
                    name: "src",
                    r#type: VertexFieldType::F32x2,
                },
                VertexField {
                    name: "color",
                    r#type: VertexFieldType::F32x4,
                },
            ],
        }
    }

    pub fn fields(&self) -> &[VertexField] {
        &self.fields
    }

    /// The size in bytes of one vertex.
    pub fn element_stride(&self) -> usize {
        self.fields.iter().map(|f| f.r#type.stride()).sum()
    }

    /// Byte offset of the named field.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        let mut offset = 0;
        for field in &self.fields {
            if field.name == name {
                return Some(offset);
            }
            offset += field.r#type.stride();
        }
        None
    }
}
