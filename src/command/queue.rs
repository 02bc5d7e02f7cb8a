// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use std::collections::HashMap;

use super::image::{Image, Shader};
use crate::coordinates::Region;
use crate::driver::{
    Blend, DrawTrianglesArgs, Error, FillRule, Graphics, NativeImageId, NativeShaderId, PixelsArgs,
    SHADER_SRC_IMAGE_COUNT, ShaderSource, VERTEX_FLOAT_COUNT, WritePixelsArgs,
};

#[derive(Debug)]
struct DrawTrianglesCommand {
    dst: u32,
    srcs: [Option<u32>; SHADER_SRC_IMAGE_COUNT],
    src_regions: [Region; SHADER_SRC_IMAGE_COUNT],
    shader: u32,
    vertices: Vec<f32>,
    indices: Vec<u32>,
    blend: Blend,
    dst_region: Region,
    uniforms: Vec<u32>,
    fill_rule: FillRule,
}

impl DrawTrianglesCommand {
    #[allow(clippy::too_many_arguments)]
    fn can_merge(
        &self,
        dst: u32,
        srcs: &[Option<u32>; SHADER_SRC_IMAGE_COUNT],
        src_regions: &[Region; SHADER_SRC_IMAGE_COUNT],
        shader: u32,
        blend: Blend,
        dst_region: Region,
        uniforms: &[u32],
        fill_rule: FillRule,
    ) -> bool {
        //winding is counted per command, so merged stencil draws would interfere
        self.fill_rule == FillRule::FillAll
            && fill_rule == FillRule::FillAll
            && self.dst == dst
            && &self.srcs == srcs
            && &self.src_regions == src_regions
            && self.shader == shader
            && self.blend == blend
            && self.dst_region == dst_region
            && self.uniforms == uniforms
    }
}

#[derive(Debug)]
enum Command {
    NewImage {
        id: u32,
        width: u32,
        height: u32,
        internal_width: u32,
        internal_height: u32,
        screen: bool,
    },
    DisposeImage {
        id: u32,
    },
    WritePixels {
        id: u32,
        args: Vec<WritePixelsArgs>,
    },
    DrawTriangles(DrawTrianglesCommand),
    NewShader {
        id: u32,
        source: ShaderSource,
    },
    DisposeShader {
        id: u32,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::NewImage { .. } => "new-image",
            Command::DisposeImage { .. } => "dispose-image",
            Command::WritePixels { .. } => "write-pixels",
            Command::DrawTriangles(_) => "draw-triangles",
            Command::NewShader { .. } => "new-shader",
            Command::DisposeShader { .. } => "dispose-shader",
        }
    }
}

/**
An ordered list of graphics operations waiting for submission.

Recording never touches the driver.  [Self::flush] submits everything in
enqueue order and empties the queue.
*/
#[derive(Debug)]
pub(crate) struct CommandQueue {
    commands: Vec<Command>,
    next_image_id: u32,
    next_shader_id: u32,
    native_images: HashMap<u32, NativeImageId>,
    native_shaders: HashMap<u32, NativeShaderId>,
    max_batched_vertex_floats: usize,
}

impl CommandQueue {
    pub fn new(max_batched_vertex_floats: usize) -> Self {
        CommandQueue {
            commands: Vec::new(),
            next_image_id: 0,
            next_shader_id: 0,
            native_images: HashMap::new(),
            native_shaders: HashMap::new(),
            max_batched_vertex_floats,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn new_image(&mut self, width: u32, height: u32, screen: bool) -> Image {
        let image = Image::new(self.next_image_id, width, height, screen);
        self.next_image_id += 1;
        let (internal_width, internal_height) = image.internal_size();
        self.commands.push(Command::NewImage {
            id: image.id,
            width,
            height,
            internal_width,
            internal_height,
            screen: image.is_screen(),
        });
        image
    }

    pub fn dispose_image(&mut self, image: Image) {
        self.commands.push(Command::DisposeImage { id: image.id });
    }

    pub fn new_shader(&mut self, source: ShaderSource) -> Shader {
        let shader = Shader {
            id: self.next_shader_id,
        };
        self.next_shader_id += 1;
        self.commands.push(Command::NewShader {
            id: shader.id,
            source,
        });
        shader
    }

    pub fn dispose_shader(&mut self, shader: Shader) {
        self.commands.push(Command::DisposeShader { id: shader.id });
    }

    pub fn write_pixels(&mut self, image: &Image, pixels: Vec<u8>, region: Region) {
        assert_eq!(
            pixels.len(),
            region.byte_len(),
            "pixel buffer does not match region {region:?}"
        );
        let args = WritePixelsArgs { pixels, region };
        if let Some(Command::WritePixels { id, args: pending }) = self.commands.last_mut() {
            if *id == image.id {
                pending.push(args);
                return;
            }
        }
        self.commands.push(Command::WritePixels {
            id: image.id,
            args: vec![args],
        });
    }

    /**
    Records a draw.  Consecutive compatible draws are merged into one
    submission by appending their vertices and rebasing their indices.
    */
    #[allow(clippy::too_many_arguments)]
    pub fn draw_triangles(
        &mut self,
        dst: &Image,
        srcs: [Option<Image>; SHADER_SRC_IMAGE_COUNT],
        src_regions: [Region; SHADER_SRC_IMAGE_COUNT],
        shader: &Shader,
        vertices: &[f32],
        indices: &[u32],
        blend: Blend,
        dst_region: Region,
        uniforms: &[u32],
        fill_rule: FillRule,
    ) {
        assert!(
            vertices.len() % VERTEX_FLOAT_COUNT == 0,
            "vertex floats must be a multiple of {VERTEX_FLOAT_COUNT}"
        );
        debug_assert!(
            indices
                .iter()
                .all(|i| (*i as usize) < vertices.len() / VERTEX_FLOAT_COUNT),
            "index out of range"
        );
        let src_ids = srcs.map(|s| s.map(|s| s.id));
        if let Some(Command::DrawTriangles(last)) = self.commands.last_mut() {
            if last.can_merge(
                dst.id,
                &src_ids,
                &src_regions,
                shader.id,
                blend,
                dst_region,
                uniforms,
                fill_rule,
            ) && last.vertices.len() + vertices.len() <= self.max_batched_vertex_floats
            {
                let base = (last.vertices.len() / VERTEX_FLOAT_COUNT) as u32;
                last.vertices.extend_from_slice(vertices);
                last.indices.extend(indices.iter().map(|i| i + base));
                return;
            }
        }
        self.commands
            .push(Command::DrawTriangles(DrawTrianglesCommand {
                dst: dst.id,
                srcs: src_ids,
                src_regions,
                shader: shader.id,
                vertices: vertices.to_vec(),
                indices: indices.to_vec(),
                blend,
                dst_region,
                uniforms: uniforms.to_vec(),
                fill_rule,
            }));
    }

    /**
    Submits every pending command to `driver` in enqueue order.

    Nothing happens when the queue is empty, except that the end of a frame is
    still presented.  The first driver error aborts
    the batch and is returned unchanged; the commands after it are dropped.
    */
    pub fn flush<G: Graphics + ?Sized>(&mut self, driver: &mut G, end_of_frame: bool) -> Result<(), Error> {
        if self.commands.is_empty() && !end_of_frame {
            return Ok(());
        }
        let commands = std::mem::take(&mut self.commands);
        logwise::trace_sync!(
            "flushing {count} commands",
            count = commands.len()
        );
        driver.begin()?;
        for command in &commands {
            if let Err(err) = self.execute(driver, command) {
                logwise::error_sync!(
                    "{command} failed during flush: {err}",
                    command = command.name(),
                    err = logwise::privacy::LogIt(&err)
                );
                return Err(err);
            }
        }
        driver.end(end_of_frame)
    }

    /// Flushes, then reads pixels of `image` back from the driver.
    pub fn read_pixels<G: Graphics + ?Sized>(
        &mut self,
        driver: &mut G,
        image: &Image,
        args: &mut [PixelsArgs<'_>],
    ) -> Result<(), Error> {
        self.flush(driver, false)?;
        let native = self.native_image(image.id)?;
        let readback = logwise::perfwarn_begin!("read_pixels from GPU");
        let result = driver.read_pixels(native, args);
        drop(readback);
        result
    }

    /**
    Forgets every pending command and every native id.

    Used after the device was lost, when nothing the driver handed out is
    valid anymore.
    */
    pub fn reset(&mut self) {
        self.commands.clear();
        self.native_images.clear();
        self.native_shaders.clear();
    }

    fn native_image(&self, id: u32) -> Result<NativeImageId, Error> {
        self.native_images
            .get(&id)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("image {id} has no native image")))
    }

    fn native_shader(&self, id: u32) -> Result<NativeShaderId, Error> {
        self.native_shaders
            .get(&id)
            .copied()
            .ok_or_else(|| Error::InvalidArgument(format!("shader {id} has no native shader")))
    }

    fn execute<G: Graphics + ?Sized>(&mut self, driver: &mut G, command: &Command) -> Result<(), Error> {
        match command {
            Command::NewImage {
                id,
                width,
                height,
                internal_width,
                internal_height,
                screen,
            } => {
                let native = if *screen {
                    driver.new_screen_framebuffer_image(*width, *height)?
                } else {
                    driver.new_image(*internal_width, *internal_height)?
                };
                self.native_images.insert(*id, native);
            }
            Command::DisposeImage { id } => {
                if let Some(native) = self.native_images.remove(id) {
                    driver.dispose_image(native);
                }
            }
            Command::WritePixels { id, args } => {
                let native = self.native_image(*id)?;
                driver.write_pixels(native, args)?;
            }
            Command::DrawTriangles(draw) => {
                let mut srcs = [None; SHADER_SRC_IMAGE_COUNT];
                for (native, src) in srcs.iter_mut().zip(draw.srcs.iter()) {
                    if let Some(src) = src {
                        *native = Some(self.native_image(*src)?);
                    }
                }
                let args = DrawTrianglesArgs {
                    dst: self.native_image(draw.dst)?,
                    srcs,
                    src_regions: draw.src_regions,
                    shader: self.native_shader(draw.shader)?,
                    vertices: &draw.vertices,
                    indices: &draw.indices,
                    blend: draw.blend,
                    dst_region: draw.dst_region,
                    uniforms: &draw.uniforms,
                    fill_rule: draw.fill_rule,
                };
                driver.draw_triangles(&args)?;
            }
            Command::NewShader { id, source } => {
                let native = driver.new_shader(source)?;
                self.native_shaders.insert(*id, native);
            }
            Command::DisposeShader { id } => {
                if let Some(native) = self.native_shaders.remove(id) {
                    driver.dispose_shader(native);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BuiltinShader;

    /// Records the calls it receives.
    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
        next: u32,
        fail_draws: bool,
    }

    impl Graphics for Recorder {
        fn initialize(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn reset(&mut self) -> Result<(), Error> {
            Ok(())
        }
        fn needs_restoring(&self) -> bool {
            true
        }
        fn max_image_size(&self) -> u32 {
            4096
        }
        fn begin(&mut self) -> Result<(), Error> {
            self.calls.push("begin".to_string());
            Ok(())
        }
        fn end(&mut self, present: bool) -> Result<(), Error> {
            self.calls.push(format!("end {present}"));
            Ok(())
        }
        fn new_image(&mut self, width: u32, height: u32) -> Result<NativeImageId, Error> {
            self.next += 1;
            self.calls.push(format!("new {width}x{height}"));
            Ok(NativeImageId(self.next))
        }
        fn new_screen_framebuffer_image(&mut self, width: u32, height: u32) -> Result<NativeImageId, Error> {
            self.next += 1;
            self.calls.push(format!("screen {width}x{height}"));
            Ok(NativeImageId(self.next))
        }
        fn dispose_image(&mut self, id: NativeImageId) {
            self.calls.push(format!("dispose {}", id.0));
        }
        fn write_pixels(&mut self, id: NativeImageId, args: &[WritePixelsArgs]) -> Result<(), Error> {
            self.calls.push(format!("write {} x{}", id.0, args.len()));
            Ok(())
        }
        fn read_pixels(&mut self, id: NativeImageId, _args: &mut [PixelsArgs<'_>]) -> Result<(), Error> {
            self.calls.push(format!("read {}", id.0));
            Ok(())
        }
        fn new_shader(&mut self, _source: &ShaderSource) -> Result<NativeShaderId, Error> {
            self.calls.push("shader".to_string());
            Ok(NativeShaderId(0))
        }
        fn dispose_shader(&mut self, _id: NativeShaderId) {}
        fn draw_triangles(&mut self, args: &DrawTrianglesArgs<'_>) -> Result<(), Error> {
            if self.fail_draws {
                return Err(Error::DeviceLost);
            }
            self.calls.push(format!(
                "draw {} v{} i{}",
                args.dst.0,
                args.vertices.len() / VERTEX_FLOAT_COUNT,
                args.indices.len()
            ));
            Ok(())
        }
    }

    fn quad() -> (Vec<f32>, Vec<u32>) {
        (vec![0.0; 4 * VERTEX_FLOAT_COUNT], vec![0, 1, 2, 1, 2, 3])
    }

    #[test]
    fn flush_submits_in_order_and_empties() {
        let mut queue = CommandQueue::new(1 << 16);
        let mut driver = Recorder::default();
        let image = queue.new_image(3, 3, false);
        queue.write_pixels(&image, vec![0; 4], Region::new(0, 0, 1, 1));
        queue.write_pixels(&image, vec![0; 4], Region::new(1, 0, 2, 1));
        assert_eq!(queue.len(), 2, "consecutive writes merge");
        queue.flush(&mut driver, true).unwrap();
        assert!(queue.is_empty());
        assert_eq!(driver.calls, vec!["begin", "new 4x4", "write 1 x2", "end true"]);

        // idempotent when nothing is pending
        queue.flush(&mut driver, false).unwrap();
        assert_eq!(driver.calls.len(), 4);
        queue.flush(&mut driver, true).unwrap();
        assert_eq!(&driver.calls[4..], ["begin", "end true"], "frames are presented anyway");
    }

    #[test]
    fn compatible_draws_merge() {
        let mut queue = CommandQueue::new(1 << 16);
        let mut driver = Recorder::default();
        let image = queue.new_image(4, 4, false);
        let shader = queue.new_shader(ShaderSource::Builtin(BuiltinShader::Nearest));
        let (vertices, indices) = quad();
        let regions = [Region::default(); SHADER_SRC_IMAGE_COUNT];
        let dst_region = Region::from_size(4, 4);
        for _ in 0..3 {
            queue.draw_triangles(&image, [None; 4], regions, &shader, &vertices, &indices, Blend::SOURCE_OVER, dst_region, &[], FillRule::FillAll);
        }
        // a different fill rule breaks the batch
        queue.draw_triangles(&image, [None; 4], regions, &shader, &vertices, &indices, Blend::SOURCE_OVER, dst_region, &[], FillRule::NonZero);
        queue.flush(&mut driver, false).unwrap();
        let draws: Vec<_> = driver.calls.iter().filter(|c| c.starts_with("draw")).cloned().collect();
        assert_eq!(draws, vec!["draw 1 v12 i18", "draw 1 v4 i6"]);
    }

    #[test]
    fn batch_limit_is_respected() {
        let mut queue = CommandQueue::new(4 * VERTEX_FLOAT_COUNT);
        let mut driver = Recorder::default();
        let image = queue.new_image(4, 4, false);
        let shader = queue.new_shader(ShaderSource::Builtin(BuiltinShader::Nearest));
        let (vertices, indices) = quad();
        let regions = [Region::default(); SHADER_SRC_IMAGE_COUNT];
        for _ in 0..2 {
            queue.draw_triangles(&image, [None; 4], regions, &shader, &vertices, &indices, Blend::COPY, Region::from_size(4, 4), &[], FillRule::FillAll);
        }
        queue.flush(&mut driver, false).unwrap();
        assert_eq!(driver.calls.iter().filter(|c| c.starts_with("draw")).count(), 2);
    }

    #[test]
    fn failure_is_propagated_and_queue_emptied() {
        let mut queue = CommandQueue::new(1 << 16);
        let mut driver = Recorder {
            fail_draws: true,
            ..Default::default()
        };
        let image = queue.new_image(4, 4, false);
        let shader = queue.new_shader(ShaderSource::Builtin(BuiltinShader::Clear));
        let (vertices, indices) = quad();
        queue.draw_triangles(&image, [None; 4], [Region::default(); 4], &shader, &vertices, &indices, Blend::CLEAR, Region::from_size(4, 4), &[], FillRule::FillAll);
        queue.write_pixels(&image, vec![0; 4], Region::new(0, 0, 1, 1));
        assert_eq!(queue.flush(&mut driver, false), Err(Error::DeviceLost));
        assert!(queue.is_empty());
        assert!(!driver.calls.iter().any(|c| c.starts_with("write")));
    }

    #[test]
    fn read_pixels_flushes_first() {
        let mut queue = CommandQueue::new(1 << 16);
        let mut driver = Recorder::default();
        let image = queue.new_image(2, 2, true);
        let mut pixels = vec![0; 16];
        let mut args = [PixelsArgs {
            pixels: &mut pixels,
            region: Region::from_size(2, 2),
        }];
        queue.read_pixels(&mut driver, &image, &mut args).unwrap();
        assert_eq!(driver.calls, vec!["begin", "screen 2x2", "end false", "read 1"]);
    }

    #[test]
    fn reset_forgets_native_images() {
        let mut queue = CommandQueue::new(1 << 16);
        let mut driver = Recorder::default();
        let image = queue.new_image(2, 2, false);
        queue.flush(&mut driver, false).unwrap();
        queue.reset();
        let mut pixels = vec![0; 16];
        let mut args = [PixelsArgs {
            pixels: &mut pixels,
            region: Region::from_size(2, 2),
        }];
        assert!(matches!(
            queue.read_pixels(&mut driver, &image, &mut args),
            Err(Error::InvalidArgument(_))
        ));
    }
}
