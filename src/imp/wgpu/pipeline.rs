// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Render pipelines for `DrawTriangles`.

Every draw uses the same bind group layout:

| binding | contents |
|---------|----------|
| 0 | `Frame` uniform: destination size, source 0 size, source 0 region |
| 1..=4 | source textures 0..=3 (a white texel when unused) |
| 5 | a linear sampler |
| 6 | the draw's `u32` uniforms, as a read-only storage array |

Custom WGSL is appended to [PRELUDE] and must provide `fs_main`.
*/

use std::borrow::Cow;

use wgpu::{
    BindGroupLayout, BindGroupLayoutEntry, BindingType, BlendComponent, BlendState,
    BufferBindingType, ColorTargetState, ColorWrites, CompareFunction, DepthStencilState,
    MultisampleState, PipelineLayout, PolygonMode, PrimitiveState, PrimitiveTopology,
    RenderPipeline, RenderPipelineDescriptor, SamplerBindingType, ShaderStages,
    StencilFaceState, StencilOperation, StencilState, TextureFormat, TextureSampleType,
    TextureViewDimension, VertexAttribute, VertexBufferLayout, VertexState, VertexStepMode,
};

use crate::driver::{Blend, BlendFactor, BlendOperation, BuiltinShader, FillRule, SHADER_SRC_IMAGE_COUNT};
use crate::images::vertex_layout::{VertexFieldType, VertexLayout};

pub(super) const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;
pub(super) const STENCIL_FORMAT: TextureFormat = TextureFormat::Stencil8;

pub(super) const FRAME_BINDING: u32 = 0;
pub(super) const FIRST_SOURCE_BINDING: u32 = 1;
pub(super) const SAMPLER_BINDING: u32 = FIRST_SOURCE_BINDING + SHADER_SRC_IMAGE_COUNT as u32;
pub(super) const UNIFORMS_BINDING: u32 = SAMPLER_BINDING + 1;

/// Vertex stage and bindings shared by every shader.
pub(super) const PRELUDE: &str = r#"
struct Frame {
    dst_size: vec2<f32>,
    src_size: vec2<f32>,
    src_region: vec4<f32>,
}

@group(0) @binding(0) var<uniform> frame: Frame;
@group(0) @binding(1) var src0: texture_2d<f32>;
@group(0) @binding(2) var src1: texture_2d<f32>;
@group(0) @binding(3) var src2: texture_2d<f32>;
@group(0) @binding(4) var src3: texture_2d<f32>;
@group(0) @binding(5) var src_sampler: sampler;
@group(0) @binding(6) var<storage, read> uniforms: array<u32>;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) src: vec2<f32>,
    @location(1) color: vec4<f32>,
}

@vertex
fn vs_main(@location(0) dst: vec2<f32>, @location(1) src: vec2<f32>, @location(2) color: vec4<f32>) -> VertexOutput {
    var out: VertexOutput;
    let ndc = dst / frame.dst_size * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0);
    out.position = vec4<f32>(ndc, 0.0, 1.0);
    out.src = src;
    out.color = color;
    return out;
}

fn texel0(p: vec2<i32>) -> vec4<f32> {
    let lo = vec2<i32>(frame.src_region.xy);
    let hi = vec2<i32>(frame.src_region.zw) - vec2<i32>(1, 1);
    return textureLoad(src0, clamp(p, lo, hi), 0);
}
"#;

const BUILTIN_FRAGMENTS: &str = r#"
@fragment
fn fs_clear(in: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(0.0);
}

@fragment
fn fs_nearest(in: VertexOutput) -> @location(0) vec4<f32> {
    return texel0(vec2<i32>(floor(in.src))) * in.color;
}

@fragment
fn fs_linear(in: VertexOutput) -> @location(0) vec4<f32> {
    let p = in.src - vec2<f32>(0.5);
    let base = floor(p);
    let t = p - base;
    let i = vec2<i32>(base);
    let top = mix(texel0(i), texel0(i + vec2<i32>(1, 0)), t.x);
    let bottom = mix(texel0(i + vec2<i32>(0, 1)), texel0(i + vec2<i32>(1, 1)), t.x);
    return mix(top, bottom, t.y) * in.color;
}
"#;

pub(super) fn builtin_source() -> String {
    format!("{PRELUDE}{BUILTIN_FRAGMENTS}")
}

pub(super) fn custom_source(fragment: &str) -> String {
    format!("{PRELUDE}{fragment}")
}

pub(super) fn builtin_entry_point(builtin: BuiltinShader) -> &'static str {
    match builtin {
        BuiltinShader::Clear => "fs_clear",
        BuiltinShader::Nearest => "fs_nearest",
        BuiltinShader::Linear => "fs_linear",
    }
}

pub(super) const CUSTOM_ENTRY_POINT: &str = "fs_main";

pub(super) fn create_module(device: &wgpu::Device, label: &str, source: String) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
    })
}

/**
Which part of a draw a pipeline performs.

`FillAll` draws in one step.  The other fill rules first count coverage
into the stencil buffer, then draw every pixel with a non-zero count once.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum Stage {
    Color,
    CountNonZero,
    CountEvenOdd,
    StencilledColor,
}

impl Stage {
    pub(super) fn for_fill_rule(fill_rule: FillRule) -> (Option<Stage>, Stage) {
        match fill_rule {
            FillRule::FillAll => (None, Stage::Color),
            FillRule::NonZero => (Some(Stage::CountNonZero), Stage::StencilledColor),
            FillRule::EvenOdd => (Some(Stage::CountEvenOdd), Stage::StencilledColor),
        }
    }

    fn uses_stencil(&self) -> bool {
        !matches!(self, Stage::Color)
    }
}

pub(super) fn bind_group_layout(device: &wgpu::Device) -> BindGroupLayout {
    let mut entries = vec![BindGroupLayoutEntry {
        binding: FRAME_BINDING,
        visibility: ShaderStages::VERTEX_FRAGMENT,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }];
    for i in 0..SHADER_SRC_IMAGE_COUNT as u32 {
        entries.push(BindGroupLayoutEntry {
            binding: FIRST_SOURCE_BINDING + i,
            visibility: ShaderStages::FRAGMENT,
            ty: BindingType::Texture {
                sample_type: TextureSampleType::Float { filterable: true },
                view_dimension: TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    entries.push(BindGroupLayoutEntry {
        binding: SAMPLER_BINDING,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Sampler(SamplerBindingType::Filtering),
        count: None,
    });
    entries.push(BindGroupLayoutEntry {
        binding: UNIFORMS_BINDING,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::Buffer {
            ty: BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    });
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("restorable draw"),
        entries: &entries,
    })
}

pub(super) fn pipeline_layout(device: &wgpu::Device, bind_group_layout: &BindGroupLayout) -> PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("restorable draw"),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    })
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SourceColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSourceColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SourceAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSourceAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DestinationColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDestinationColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DestinationAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDestinationAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_component(src: BlendFactor, dst: BlendFactor, op: BlendOperation) -> BlendComponent {
    let operation = match op {
        BlendOperation::Add => wgpu::BlendOperation::Add,
        BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
        BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOperation::Min => wgpu::BlendOperation::Min,
        BlendOperation::Max => wgpu::BlendOperation::Max,
    };
    //wgpu requires One factors for min/max
    if matches!(op, BlendOperation::Min | BlendOperation::Max) {
        return BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation,
        };
    }
    BlendComponent {
        src_factor: blend_factor(src),
        dst_factor: blend_factor(dst),
        operation,
    }
}

pub(super) fn blend_state(blend: &Blend) -> BlendState {
    BlendState {
        color: blend_component(blend.src_rgb, blend.dst_rgb, blend.op_rgb),
        alpha: blend_component(blend.src_alpha, blend.dst_alpha, blend.op_alpha),
    }
}

fn stencil_state(stage: Stage) -> StencilState {
    let face = |compare, pass_op| StencilFaceState {
        compare,
        fail_op: StencilOperation::Keep,
        depth_fail_op: StencilOperation::Keep,
        pass_op,
    };
    let (front, back) = match stage {
        Stage::Color => (StencilFaceState::IGNORE, StencilFaceState::IGNORE),
        Stage::CountNonZero => (
            face(CompareFunction::Always, StencilOperation::IncrementWrap),
            face(CompareFunction::Always, StencilOperation::DecrementWrap),
        ),
        Stage::CountEvenOdd => (
            face(CompareFunction::Always, StencilOperation::Invert),
            face(CompareFunction::Always, StencilOperation::Invert),
        ),
        //zeroing on pass draws each pixel once
        Stage::StencilledColor => (
            face(CompareFunction::NotEqual, StencilOperation::Zero),
            face(CompareFunction::NotEqual, StencilOperation::Zero),
        ),
    };
    StencilState {
        front,
        back,
        read_mask: 0xff,
        write_mask: 0xff,
    }
}

fn vertex_format(r#type: VertexFieldType) -> wgpu::VertexFormat {
    match r#type {
        VertexFieldType::F32x2 => wgpu::VertexFormat::Float32x2,
        VertexFieldType::F32x4 => wgpu::VertexFormat::Float32x4,
    }
}

fn vertex_attributes(layout: &VertexLayout) -> Vec<VertexAttribute> {
    let mut offset = 0;
    let mut attributes = Vec::new();
    for (f, field) in layout.fields().iter().enumerate() {
        attributes.push(VertexAttribute {
            format: vertex_format(field.r#type),
            offset,
            shader_location: f as u32,
        });
        offset += field.r#type.stride() as u64;
    }
    attributes
}

pub(super) fn create_pipeline(
    device: &wgpu::Device,
    layout: &PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
    blend: &Blend,
    stage: Stage,
) -> RenderPipeline {
    let vertex_layout = VertexLayout::standard();
    let attributes = vertex_attributes(&vertex_layout);
    let vertex_buffers = [VertexBufferLayout {
        array_stride: vertex_layout.element_stride() as u64,
        step_mode: VertexStepMode::Vertex,
        attributes: &attributes,
    }];
    let counting = matches!(stage, Stage::CountNonZero | Stage::CountEvenOdd);
    let color_target_state = ColorTargetState {
        format: COLOR_FORMAT,
        blend: if counting { None } else { Some(blend_state(blend)) },
        write_mask: if counting { ColorWrites::empty() } else { ColorWrites::ALL },
    };
    let depth_stencil = stage.uses_stencil().then(|| DepthStencilState {
        format: STENCIL_FORMAT,
        depth_write_enabled: false,
        depth_compare: CompareFunction::Always,
        stencil: stencil_state(stage),
        bias: Default::default(),
    });
    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("restorable draw"),
        layout: Some(layout),
        vertex: VertexState {
            module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &vertex_buffers,
        },
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            //winding is counted from both faces
            cull_mode: None,
            unclipped_depth: false,
            polygon_mode: PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil,
        multisample: MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            targets: &[Some(color_target_state)],
        }),
        multiview: None,
        cache: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_over_maps_to_premultiplied_alpha() {
        let state = blend_state(&Blend::SOURCE_OVER);
        assert_eq!(state, BlendState::PREMULTIPLIED_ALPHA_BLENDING);
    }

    #[test]
    fn min_max_use_one_factors() {
        let blend = Blend {
            op_rgb: BlendOperation::Max,
            ..Blend::SOURCE_OVER
        };
        let state = blend_state(&blend);
        assert_eq!(state.color.src_factor, wgpu::BlendFactor::One);
        assert_eq!(state.color.dst_factor, wgpu::BlendFactor::One);
        assert_eq!(state.alpha, BlendState::PREMULTIPLIED_ALPHA_BLENDING.alpha);
    }

    #[test]
    fn attributes_follow_the_standard_layout() {
        let attributes = vertex_attributes(&VertexLayout::standard());
        let offsets: Vec<u64> = attributes.iter().map(|a| a.offset).collect();
        assert_eq!(offsets, vec![0, 8, 16]);
    }

    #[test]
    fn bindings_are_contiguous() {
        assert_eq!(SAMPLER_BINDING, 5);
        assert_eq!(UNIFORMS_BINDING, 6);
        assert!(builtin_source().contains("fn fs_linear"));
    }
}
