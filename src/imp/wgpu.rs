// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The wgpu backend.

Reaches Vulkan, Metal, DX12 and OpenGL through wgpu.  Only the OpenGL backend
can lose its resources, so only there do images keep their history.

Each draw is encoded and submitted on its own, which keeps it ordered with
respect to `write_texture` uploads.
*/

mod error;
mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use wgpu::util::DeviceExt;
use wgpu::{Extent3d, Limits, PollType, TexelCopyBufferLayout, TexelCopyTextureInfo, Trace};

use crate::coordinates::Region;
use crate::driver::{
    Blend, DrawTrianglesArgs, Error as DriverError, Graphics, NativeImageId, NativeShaderId,
    PixelsArgs, SHADER_SRC_IMAGE_COUNT, ShaderSource, WritePixelsArgs,
};
pub use error::Error;
use pipeline::Stage;

#[derive(Debug)]
struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    /// Created on the first stencilled draw.
    stencil: Option<wgpu::TextureView>,
}

#[derive(Debug)]
struct Program {
    module: wgpu::ShaderModule,
    entry_point: &'static str,
}

/// Everything that is lost along with the device.
#[derive(Debug)]
struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    backend: wgpu::Backend,
    lost: Arc<AtomicBool>,
    builtin_module: wgpu::ShaderModule,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    white: wgpu::TextureView,
}

impl Gpu {
    async fn create() -> Result<Gpu, Error> {
        let descriptor = wgpu::InstanceDescriptor::from_env_or_default();
        let instance = wgpu::Instance::new(&descriptor);
        let options = wgpu::RequestAdapterOptions {
            power_preference: Default::default(),
            force_fallback_adapter: false,
            compatible_surface: None,
        };
        let adapter = instance
            .request_adapter(&options)
            .await
            .map_err(|_| Error::NoSuchAdapter)?;
        let limits = Limits::downlevel_defaults().using_resolution(adapter.limits());
        let descriptor = wgpu::DeviceDescriptor {
            label: Some("restorable images"),
            required_features: Default::default(),
            required_limits: limits,
            memory_hints: Default::default(),
            trace: Trace::Off,
        };
        let (device, queue) = adapter.request_device(&descriptor).await?;
        let backend = adapter.get_info().backend;

        let lost = Arc::new(AtomicBool::new(false));
        let move_lost = lost.clone();
        device.set_device_lost_callback(move |_reason, message| {
            logwise::error_sync!(
                "wgpu device lost: {message}",
                message = logwise::privacy::LogIt(&message)
            );
            move_lost.store(true, Ordering::Relaxed);
        });

        let builtin_module = pipeline::create_module(&device, "restorable builtins", pipeline::builtin_source());
        let bind_group_layout = pipeline::bind_group_layout(&device);
        let pipeline_layout = pipeline::pipeline_layout(&device, &bind_group_layout);
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("restorable linear"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            lod_min_clamp: 0.0,
            lod_max_clamp: 0.0,
            compare: None,
            anisotropy_clamp: 1,
            border_color: None,
        });
        let white = create_texture(&device, "white", 1, 1);
        queue.write_texture(
            TexelCopyTextureInfo {
                texture: &white,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255; 4],
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        let white = white.create_view(&Default::default());
        logwise::info_sync!(
            "wgpu device ready on {backend}",
            backend = logwise::privacy::LogIt(&backend)
        );
        Ok(Gpu {
            device,
            queue,
            backend,
            lost,
            builtin_module,
            bind_group_layout,
            pipeline_layout,
            sampler,
            white,
        })
    }
}

fn create_texture(device: &wgpu::Device, label: &str, width: u32, height: u32) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: pipeline::COLOR_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    })
}

fn texel_origin(region: &Region) -> wgpu::Origin3d {
    wgpu::Origin3d {
        x: region.min.x as u32,
        y: region.min.y as u32,
        z: 0,
    }
}

fn region_extent(region: &Region) -> Extent3d {
    Extent3d {
        width: region.width() as u32,
        height: region.height() as u32,
        depth_or_array_layers: 1,
    }
}

fn le_bytes_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn le_bytes_u32(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn check_region(texture: &GpuTexture, region: &Region, byte_len: usize) -> Result<(), DriverError> {
    let bounds = Region::from_size(texture.width as i32, texture.height as i32);
    if region.is_empty() || !bounds.contains(region) {
        return Err(DriverError::InvalidArgument(format!(
            "{region:?} is outside a {}x{} texture",
            texture.width, texture.height
        )));
    }
    if byte_len != region.byte_len() {
        return Err(DriverError::InvalidArgument(format!(
            "{byte_len} bytes do not match {region:?}"
        )));
    }
    Ok(())
}

/**
A [Graphics] implementation on a headless wgpu device.

```no_run
use restorable_images::WgpuGraphics;
use restorable_images::images::{Engine, EngineConfig};

let driver = WgpuGraphics::new_headless().expect("no GPU");
let mut engine = Engine::new(driver, EngineConfig::default());
engine.initialize_graphics_driver_state().unwrap();
```
*/
#[derive(Debug)]
pub struct WgpuGraphics {
    gpu: Gpu,
    textures: HashMap<NativeImageId, GpuTexture>,
    programs: HashMap<NativeShaderId, Program>,
    pipelines: HashMap<(NativeShaderId, Blend, Stage), wgpu::RenderPipeline>,
    next_image: u32,
    next_shader: u32,
}

impl WgpuGraphics {
    /// Picks an adapter and creates a device without any surface.
    pub fn new_headless() -> Result<Self, Error> {
        let gpu = test_executors::spin_on(Gpu::create())?;
        Ok(WgpuGraphics {
            gpu,
            textures: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            next_image: 0,
            next_shader: 0,
        })
    }

    /// The native API wgpu picked.
    pub fn backend(&self) -> wgpu::Backend {
        self.gpu.backend
    }

    fn check_device(&self) -> Result<(), DriverError> {
        if self.gpu.lost.load(Ordering::Relaxed) {
            Err(DriverError::DeviceLost)
        } else {
            Ok(())
        }
    }

    fn create_image(&mut self, width: u32, height: u32, label: &str) -> Result<NativeImageId, DriverError> {
        self.check_device()?;
        let max = self.max_image_size();
        if width == 0 || height == 0 || width > max || height > max {
            return Err(DriverError::InvalidArgument(format!(
                "texture size {width}x{height} exceeds {max}"
            )));
        }
        let texture = create_texture(&self.gpu.device, label, width, height);
        let view = texture.create_view(&Default::default());
        let id = NativeImageId(self.next_image);
        self.next_image += 1;
        self.textures.insert(
            id,
            GpuTexture {
                texture,
                view,
                width,
                height,
                stencil: None,
            },
        );
        Ok(id)
    }

    fn ensure_stencil(&mut self, id: NativeImageId) -> Result<(), DriverError> {
        let texture = self.textures.get_mut(&id).ok_or(DriverError::NoSuchImage(id))?;
        if texture.stencil.is_none() {
            let stencil = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("restorable stencil"),
                size: Extent3d {
                    width: texture.width,
                    height: texture.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: pipeline::STENCIL_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            });
            texture.stencil = Some(stencil.create_view(&Default::default()));
        }
        Ok(())
    }

    fn ensure_pipeline(&mut self, shader: NativeShaderId, blend: Blend, stage: Stage) -> Result<(), DriverError> {
        if self.pipelines.contains_key(&(shader, blend, stage)) {
            return Ok(());
        }
        let program = self.programs.get(&shader).ok_or(DriverError::NoSuchShader(shader))?;
        let pipeline = pipeline::create_pipeline(
            &self.gpu.device,
            &self.gpu.pipeline_layout,
            &program.module,
            program.entry_point,
            &blend,
            stage,
        );
        logwise::trace_sync!(
            "created pipeline for shader {shader} {stage}",
            shader = shader.0,
            stage = logwise::privacy::LogIt(&stage)
        );
        self.pipelines.insert((shader, blend, stage), pipeline);
        Ok(())
    }
}

impl Graphics for WgpuGraphics {
    fn initialize(&mut self) -> Result<(), DriverError> {
        self.check_device()
    }

    fn reset(&mut self) -> Result<(), DriverError> {
        self.textures.clear();
        self.programs.clear();
        self.pipelines.clear();
        self.gpu = test_executors::spin_on(Gpu::create())?;
        Ok(())
    }

    fn needs_restoring(&self) -> bool {
        self.gpu.backend == wgpu::Backend::Gl
    }

    fn max_image_size(&self) -> u32 {
        self.gpu.device.limits().max_texture_dimension_2d
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.check_device()
    }

    fn end(&mut self, present: bool) -> Result<(), DriverError> {
        self.check_device()?;
        if present {
            //headless: nothing to present, but let the GPU catch up once per frame
            self.gpu
                .device
                .poll(PollType::Poll)
                .map_err(|e| DriverError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    fn new_image(&mut self, width: u32, height: u32) -> Result<NativeImageId, DriverError> {
        self.create_image(width, height, "restorable image")
    }

    fn new_screen_framebuffer_image(&mut self, width: u32, height: u32) -> Result<NativeImageId, DriverError> {
        //headless devices have no surface; the screen is an offscreen texture
        self.create_image(width, height, "restorable screen")
    }

    fn dispose_image(&mut self, id: NativeImageId) {
        if let Some(texture) = self.textures.remove(&id) {
            texture.texture.destroy();
        }
    }

    fn write_pixels(&mut self, id: NativeImageId, args: &[WritePixelsArgs]) -> Result<(), DriverError> {
        self.check_device()?;
        let texture = self.textures.get(&id).ok_or(DriverError::NoSuchImage(id))?;
        for arg in args {
            check_region(texture, &arg.region, arg.pixels.len())?;
            self.gpu.queue.write_texture(
                TexelCopyTextureInfo {
                    texture: &texture.texture,
                    mip_level: 0,
                    origin: texel_origin(&arg.region),
                    aspect: wgpu::TextureAspect::All,
                },
                &arg.pixels,
                TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(arg.region.width() as u32 * 4),
                    rows_per_image: Some(arg.region.height() as u32),
                },
                region_extent(&arg.region),
            );
        }
        Ok(())
    }

    fn read_pixels(&mut self, id: NativeImageId, args: &mut [PixelsArgs<'_>]) -> Result<(), DriverError> {
        self.check_device()?;
        let texture = self.textures.get(&id).ok_or(DriverError::NoSuchImage(id))?;
        for arg in args.iter_mut() {
            check_region(texture, &arg.region, arg.pixels.len())?;
            let width = arg.region.width() as u32;
            let height = arg.region.height() as u32;
            let row_bytes = width * 4;
            let padded_row_bytes = row_bytes.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
                * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
            let buffer = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("restorable readback"),
                size: (padded_row_bytes * height) as u64,
                usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                mapped_at_creation: false,
            });
            let mut encoder = self
                .gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("restorable readback"),
                });
            encoder.copy_texture_to_buffer(
                TexelCopyTextureInfo {
                    texture: &texture.texture,
                    mip_level: 0,
                    origin: texel_origin(&arg.region),
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &buffer,
                    layout: TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(padded_row_bytes),
                        rows_per_image: None,
                    },
                },
                region_extent(&arg.region),
            );
            self.gpu.queue.submit(Some(encoder.finish()));

            let (sender, receiver) = r#continue::continuation();
            buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
                sender.send(result);
            });
            //without a completed wait the callback may never run
            self.gpu
                .device
                .poll(PollType::Wait)
                .map_err(|e| DriverError::Backend(e.to_string()))?;
            test_executors::spin_on(receiver).map_err(|e| DriverError::Backend(e.to_string()))?;
            {
                let mapped = buffer.slice(..).get_mapped_range();
                for (row, out) in arg.pixels.chunks_exact_mut(row_bytes as usize).enumerate() {
                    let offset = row * padded_row_bytes as usize;
                    out.copy_from_slice(&mapped[offset..offset + row_bytes as usize]);
                }
            }
            buffer.unmap();
        }
        Ok(())
    }

    fn new_shader(&mut self, source: &ShaderSource) -> Result<NativeShaderId, DriverError> {
        self.check_device()?;
        let program = match source {
            ShaderSource::Builtin(builtin) => Program {
                module: self.gpu.builtin_module.clone(),
                entry_point: pipeline::builtin_entry_point(*builtin),
            },
            ShaderSource::Wgsl(fragment) => {
                self.gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
                let module = pipeline::create_module(
                    &self.gpu.device,
                    "restorable custom",
                    pipeline::custom_source(fragment),
                );
                if let Some(err) = test_executors::spin_on(self.gpu.device.pop_error_scope()) {
                    return Err(DriverError::InvalidArgument(err.to_string()));
                }
                Program {
                    module,
                    entry_point: pipeline::CUSTOM_ENTRY_POINT,
                }
            }
        };
        let id = NativeShaderId(self.next_shader);
        self.next_shader += 1;
        self.programs.insert(id, program);
        Ok(id)
    }

    fn dispose_shader(&mut self, id: NativeShaderId) {
        self.programs.remove(&id);
        self.pipelines.retain(|(shader, _, _), _| *shader != id);
    }

    fn draw_triangles(&mut self, args: &DrawTrianglesArgs<'_>) -> Result<(), DriverError> {
        self.check_device()?;
        //buffer slices cannot be empty
        if args.indices.is_empty() {
            return Ok(());
        }
        let (count_stage, color_stage) = Stage::for_fill_rule(args.fill_rule);
        if let Some(stage) = count_stage {
            self.ensure_stencil(args.dst)?;
            self.ensure_pipeline(args.shader, args.blend, stage)?;
        }
        self.ensure_pipeline(args.shader, args.blend, color_stage)?;

        let dst = self.textures.get(&args.dst).ok_or(DriverError::NoSuchImage(args.dst))?;
        let Some(scissor) = args
            .dst_region
            .intersect(&Region::from_size(dst.width as i32, dst.height as i32))
        else {
            return Ok(());
        };

        let mut sources = [&self.gpu.white; SHADER_SRC_IMAGE_COUNT];
        let mut src0_region = Region::from_size(1, 1);
        for (i, src) in args.srcs.iter().enumerate() {
            if let Some(src) = src {
                let texture = self.textures.get(src).ok_or(DriverError::NoSuchImage(*src))?;
                sources[i] = &texture.view;
                if i == 0 {
                    let whole = Region::from_size(texture.width as i32, texture.height as i32);
                    src0_region = if args.src_regions[0].is_empty() {
                        whole
                    } else {
                        args.src_regions[0].intersect(&whole).unwrap_or(whole)
                    };
                }
            }
        }

        let device = &self.gpu.device;
        let frame = [
            dst.width as f32,
            dst.height as f32,
            src0_region.width() as f32,
            src0_region.height() as f32,
            src0_region.min.x as f32,
            src0_region.min.y as f32,
            src0_region.max.x as f32,
            src0_region.max.y as f32,
        ];
        let frame_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("restorable frame"),
            contents: &le_bytes_f32(&frame),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        //storage bindings cannot be empty
        let uniforms = if args.uniforms.is_empty() { &[0][..] } else { args.uniforms };
        let uniforms_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("restorable uniforms"),
            contents: &le_bytes_u32(uniforms),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("restorable vertices"),
            contents: &le_bytes_f32(args.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("restorable indices"),
            contents: &le_bytes_u32(args.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: pipeline::FRAME_BINDING,
            resource: frame_buffer.as_entire_binding(),
        }];
        for (i, view) in sources.iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: pipeline::FIRST_SOURCE_BINDING + i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            });
        }
        entries.push(wgpu::BindGroupEntry {
            binding: pipeline::SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(&self.gpu.sampler),
        });
        entries.push(wgpu::BindGroupEntry {
            binding: pipeline::UNIFORMS_BINDING,
            resource: uniforms_buffer.as_entire_binding(),
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("restorable draw"),
            layout: &self.gpu.bind_group_layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("restorable draw"),
        });
        {
            let depth_stencil_attachment = count_stage.and_then(|_| dst.stencil.as_ref()).map(|view| {
                wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: None,
                    stencil_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Discard,
                    }),
                }
            });
            let color_attachment = wgpu::RenderPassColorAttachment {
                view: &dst.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            };
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("restorable draw"),
                color_attachments: &[Some(color_attachment)],
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_scissor_rect(
                scissor.min.x as u32,
                scissor.min.y as u32,
                scissor.width() as u32,
                scissor.height() as u32,
            );
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            render_pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            render_pass.set_stencil_reference(0);
            let index_count = args.indices.len() as u32;
            for stage in count_stage.into_iter().chain(Some(color_stage)) {
                let Some(pipeline) = self.pipelines.get(&(args.shader, args.blend, stage)) else {
                    return Err(DriverError::NoSuchShader(args.shader));
                };
                render_pass.set_pipeline(pipeline);
                render_pass.draw_indexed(0..index_count, 0, 0..1);
            }
        }
        self.gpu.queue.submit(Some(encoder.finish()));
        Ok(())
    }
}
