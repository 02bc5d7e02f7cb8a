// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::command::CommandQueue;
use crate::coordinates::Region;
use crate::driver::{
    Blend, BuiltinShader, Error, FillRule, Graphics, SHADER_SRC_IMAGE_COUNT, ShaderSource,
    VERTEX_FLOAT_COUNT,
};
use crate::images::image::{ImageType, RestorableImage};
use crate::images::registry::{DependencyTracker, ImageId, ImageRegistry, ShaderId};
use crate::images::shader::Shader;
use crate::images::vertex_algorithms::{QUAD_INDICES, quad_vertices};
use crate::pixel_formats::{composite_on_black, png_support, unpremultiply};

const LOG_IMAGE_INFO_ENV: &str = "RESTORABLE_IMAGES_LOG_IMAGE_INFO";

/**
Engine configuration.

```
use restorable_images::images::EngineConfig;

let config = EngineConfig {
    log_image_info: true,
    ..Default::default()
};
assert_eq!(config.restoring, None);
```
*/
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Log every live image at the end of each frame.
    pub log_image_info: bool,
    /// Overrides [Graphics::needs_restoring].  `None` asks the driver.
    pub restoring: Option<bool>,
    /// Upper bound on the vertex floats of one merged draw.
    pub max_batched_vertex_floats: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            log_image_info: false,
            restoring: None,
            max_batched_vertex_floats: u16::MAX as usize * VERTEX_FLOAT_COUNT,
        }
    }
}

impl EngineConfig {
    /**
    The default configuration, adjusted by the environment.

    `RESTORABLE_IMAGES_LOG_IMAGE_INFO` set to anything but `0` or an empty
    string turns on [Self::log_image_info].
    */
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(LOG_IMAGE_INFO_ENV) {
            config.log_image_info = !value.is_empty() && value != "0";
        }
        config
    }
}

/**
Arguments of [Engine::draw_triangles].

Vertices use the layout of [VERTEX_FLOAT_COUNT]; positions are destination
pixels and texture coordinates are source texels.  An empty source region
means the whole source image.
*/
#[derive(Debug, Clone, Copy)]
pub struct DrawTriangles<'a> {
    pub srcs: [Option<ImageId>; SHADER_SRC_IMAGE_COUNT],
    pub vertices: &'a [f32],
    pub indices: &'a [u32],
    pub blend: Blend,
    pub dst_region: Region,
    pub src_regions: [Region; SHADER_SRC_IMAGE_COUNT],
    pub shader: ShaderId,
    pub uniforms: &'a [u32],
    pub fill_rule: FillRule,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DumpError {
    #[error("Can't write dump {0}")]
    Io(#[from] std::io::Error),
    #[error("Can't encode PNG {0}")]
    Encoding(#[from] png::EncodingError),
    #[error("Can't read pixels {0}")]
    Driver(#[from] Error),
}

/**
Owns every restorable image and shader, the command queue, and the driver.

One `Engine` replaces what would otherwise be process-wide state: the
registry, the pending commands and the single native backend all live here,
and every operation goes through it.  It is used from one rendering thread.

# Lifecycle

1. [Self::new] with the chosen backend.
2. [Self::initialize_graphics_driver_state], exactly once.
3. Create and modify images; call [Self::swap_buffers] at every frame boundary.
4. After the device was lost, [Self::restore].
*/
#[derive(Debug)]
pub struct Engine<G: Graphics> {
    driver: G,
    queue: CommandQueue,
    registry: ImageRegistry,
    config: EngineConfig,
    initialized: bool,
    keeps_history: bool,
    builtin_shaders: BTreeMap<BuiltinShader, ShaderId>,
}

impl<G: Graphics> Engine<G> {
    pub fn new(driver: G, config: EngineConfig) -> Self {
        logwise::info_sync!(
            "restorable engine created with {config}",
            config = logwise::privacy::LogIt(&config)
        );
        Engine {
            queue: CommandQueue::new(config.max_batched_vertex_floats),
            driver,
            registry: ImageRegistry::new(),
            config,
            initialized: false,
            keeps_history: false,
            builtin_shaders: BTreeMap::new(),
        }
    }

    /**
    Prepares the driver and creates the builtin shaders.

    # Panics
    If called twice.
    */
    pub fn initialize_graphics_driver_state(&mut self) -> Result<(), Error> {
        assert!(!self.initialized, "restorable: the driver state is already initialized");
        self.driver.initialize()?;
        self.keeps_history = self
            .config
            .restoring
            .unwrap_or_else(|| self.driver.needs_restoring());
        for builtin in [BuiltinShader::Clear, BuiltinShader::Nearest, BuiltinShader::Linear] {
            let shader = Shader::new(&mut self.queue, ShaderSource::Builtin(builtin));
            let id = self.registry.add_shader(shader);
            self.builtin_shaders.insert(builtin, id);
        }
        self.initialized = true;
        logwise::info_sync!(
            "graphics driver ready, keeping history: {keeps}",
            keeps = logwise::privacy::LogIt(&self.keeps_history)
        );
        Ok(())
    }

    fn assert_initialized(&self) {
        assert!(
            self.initialized,
            "restorable: the graphics driver state must be initialized first"
        );
    }

    fn clear_shader(&self) -> crate::command::Shader {
        self.registry
            .shader(self.builtin_shader(BuiltinShader::Clear))
            .command_shader()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn driver(&self) -> &G {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut G {
        &mut self.driver
    }

    /// Largest width or height accepted by [Self::new_image].
    pub fn max_image_size(&self) -> u32 {
        self.driver.max_image_size()
    }

    /// Whether Regular images record their pixels.
    pub fn keeps_history(&self) -> bool {
        self.keeps_history
    }

    /// Commands recorded but not yet submitted to the driver.
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn image_count(&self) -> usize {
        self.registry.len()
    }

    /**
    Creates a transparent image and registers it.

    # Panics
    * before [Self::initialize_graphics_driver_state]
    * if a dimension is zero or larger than [Self::max_image_size]
    */
    pub fn new_image(&mut self, width: u32, height: u32, image_type: ImageType) -> ImageId {
        self.assert_initialized();
        let max = self.max_image_size();
        assert!(
            width > 0 && height > 0 && width <= max && height <= max,
            "restorable: image size {width}x{height} must be within 1..={max}"
        );
        let clear = self.clear_shader();
        let image = RestorableImage::new(
            &mut self.queue,
            &clear,
            width,
            height,
            image_type,
            self.keeps_history,
        );
        self.registry.add(image)
    }

    /**
    Replaces the pixels of `region` with premultiplied RGBA8 `pixels`, or clears
    them to transparent when `pixels` is `None`.

    # Panics
    If `region` is empty or not inside the image, or `pixels` does not hold
    exactly `region.byte_len()` bytes.
    */
    pub fn write_pixels(&mut self, id: ImageId, pixels: Option<&[u8]>, region: Region) {
        self.registry.image(id).check_region(region);
        if let Some(pixels) = pixels {
            assert_eq!(
                pixels.len(),
                region.byte_len(),
                "restorable: pixel buffer does not match {region:?}"
            );
        }
        self.registry.make_stale_if_depending_on(id);
        let clear = self.clear_shader();
        self.registry
            .image_mut(id)
            .write_pixels(&mut self.queue, &clear, pixels, region);
    }

    pub fn clear_pixels(&mut self, id: ImageId, region: Region) {
        self.write_pixels(id, None, region);
    }

    /**
    Draws triangles onto `dst`.

    Nothing happens when there are no vertices.

    # Panics
    If `dst` is also one of the sources.
    */
    pub fn draw_triangles(&mut self, dst: ImageId, draw: DrawTriangles<'_>) {
        if draw.vertices.is_empty() {
            return;
        }
        assert!(
            !draw.srcs.contains(&Some(dst)),
            "restorable: an image cannot be drawn onto itself"
        );
        self.registry.make_stale_if_depending_on(dst);

        let srcs = draw
            .srcs
            .map(|src| src.map(|src| *self.registry.image(src).command_image()));
        let source_ids: Vec<ImageId> = draw.srcs.iter().flatten().copied().collect();
        let shader = self.registry.shader(draw.shader).command_shader();
        self.registry.record_draw(dst, &source_ids, draw.shader);

        self.registry.image_mut(dst).draw_triangles(
            &mut self.queue,
            srcs,
            draw.vertices,
            draw.indices,
            draw.blend,
            draw.dst_region,
            draw.src_regions,
            &shader,
            draw.uniforms,
            draw.fill_rule,
        );
    }

    /**
    Reads pixels from the GPU, flushing pending commands first.

    This stalls until the GPU catches up.
    */
    pub fn read_pixels(&mut self, id: ImageId, pixels: &mut [u8], region: Region) -> Result<(), Error> {
        let image = self.registry.image(id);
        image.check_region(region);
        assert_eq!(
            pixels.len(),
            region.byte_len(),
            "restorable: pixel buffer does not match {region:?}"
        );
        image.read_pixels(&mut self.queue, &mut self.driver, pixels, region)
    }

    /// Reads the recorded history of `region` without touching the GPU.
    pub fn read_recorded_pixels(&self, id: ImageId, pixels: &mut [u8], region: Region) {
        let image = self.registry.image(id);
        image
            .base_pixels()
            .read_pixels(pixels, region, image.width(), image.height());
    }

    /// Forgets the history record whose region is exactly `region`.
    pub fn discard_recorded_pixels(&mut self, id: ImageId, region: Region) {
        self.registry.image_mut(id).base_pixels_mut().clear(region);
    }

    /**
    Grows an image, returning the replacement.

    When the image is already at least `width`×`height`, it is returned as-is.
    Otherwise a new image of the same type, at least as large on each axis as
    both the old image and the request, receives the old contents and the old
    image is disposed.
    */
    pub fn extend(&mut self, id: ImageId, width: u32, height: u32) -> ImageId {
        let old = self.registry.image(id);
        if old.width() >= width && old.height() >= height {
            return id;
        }
        let image_type = old.image_type();
        let old_stale = old.is_stale();
        let (old_internal_width, old_internal_height) = old.internal_size();
        let width = width.max(old.width());
        let height = height.max(old.height());

        let new_id = self.new_image(width, height, image_type);
        let (new_internal_width, new_internal_height) = self.registry.image(new_id).internal_size();
        let copy_width = old_internal_width.min(new_internal_width) as f32;
        let copy_height = old_internal_height.min(new_internal_height) as f32;
        let vertices = quad_vertices(
            [0.0, 0.0, copy_width, copy_height],
            [0.0, 0.0, copy_width, copy_height],
            [1.0; 4],
        );
        let mut srcs = [None; SHADER_SRC_IMAGE_COUNT];
        srcs[0] = Some(id);
        self.draw_triangles(
            new_id,
            DrawTriangles {
                srcs,
                vertices: &vertices,
                indices: &QUAD_INDICES,
                blend: Blend::COPY,
                dst_region: Region::from_size(copy_width as i32, copy_height as i32),
                src_regions: [Region::default(); SHADER_SRC_IMAGE_COUNT],
                shader: self.builtin_shader(BuiltinShader::Nearest),
                uniforms: &[],
                fill_rule: FillRule::FillAll,
            },
        );
        if !old_stale {
            //the copy is exact, so the old history describes the new image too
            let history = self.registry.image(id).base_pixels().clone();
            self.registry.image_mut(new_id).adopt_history(history);
            self.registry.forget_dependencies(new_id);
        }
        self.dispose(id);
        new_id
    }

    /// Releases an image.  Images depending on it are invalidated first.
    pub fn dispose(&mut self, id: ImageId) {
        let mut image = self.registry.remove(id);
        image.dispose(&mut self.queue);
    }

    pub fn internal_size(&self, id: ImageId) -> (u32, u32) {
        self.registry.image(id).internal_size()
    }

    pub fn size(&self, id: ImageId) -> (u32, u32) {
        let image = self.registry.image(id);
        (image.width(), image.height())
    }

    pub fn is_stale(&self, id: ImageId) -> bool {
        self.registry.image(id).is_stale()
    }

    pub fn image_type(&self, id: ImageId) -> ImageType {
        self.registry.image(id).image_type()
    }

    pub fn new_shader(&mut self, source: ShaderSource) -> ShaderId {
        self.assert_initialized();
        let shader = Shader::new(&mut self.queue, source);
        self.registry.add_shader(shader)
    }

    /**
    Releases a shader.  Images drawn with it are invalidated first.

    # Panics
    For builtin shaders.
    */
    pub fn dispose_shader(&mut self, id: ShaderId) {
        assert!(
            !self.builtin_shaders.values().any(|builtin| *builtin == id),
            "restorable: builtin shaders cannot be disposed"
        );
        let mut shader = self.registry.remove_shader(id);
        shader.dispose(&mut self.queue);
    }

    pub fn builtin_shader(&self, builtin: BuiltinShader) -> ShaderId {
        match self.builtin_shaders.get(&builtin) {
            Some(id) => *id,
            None => panic!("restorable: the graphics driver state must be initialized first"),
        }
    }

    /// Sets how draws create dependencies between images.
    pub fn set_dependency_tracker(&mut self, tracker: Box<dyn DependencyTracker>) {
        self.registry.set_tracker(tracker);
    }

    /// Submits every pending command.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.queue.flush(&mut self.driver, false)
    }

    /**
    Ends a frame: submits and presents, then resolves stale images so that
    they can be restored.
    */
    pub fn swap_buffers(&mut self) -> Result<(), Error> {
        if self.config.log_image_info {
            self.log_image_info();
        }
        self.queue.flush(&mut self.driver, true)?;
        self.resolve_stale_images()
    }

    fn log_image_info(&self) {
        for (id, image) in self.registry.images() {
            let (internal_width, internal_height) = image.internal_size();
            logwise::info_sync!(
                "image {id}: {width}x{height} (internal {internal_width}x{internal_height}) {kind} stale={stale}",
                id = id.get(),
                width = image.width(),
                height = image.height(),
                internal_width = internal_width,
                internal_height = internal_height,
                kind = logwise::privacy::LogIt(&image.image_type()),
                stale = logwise::privacy::LogIt(&image.is_stale())
            );
        }
    }

    /**
    Captures the GPU-only contents of every stale image into its history.

    Afterwards no image is stale.  Reads back from the GPU only where the
    history cannot already rebuild the image.
    */
    pub fn resolve_stale_images(&mut self) -> Result<(), Error> {
        for id in self.registry.image_ids() {
            let image = self.registry.image_mut(id);
            if !image.is_stale() {
                continue;
            }
            image.resolve_stale(&mut self.queue, &mut self.driver)?;
            self.registry.forget_dependencies(id);
        }
        Ok(())
    }

    /**
    Rebuilds every shader and image after the device was lost.

    Images whose changes since the last [Self::swap_buffers] were all pixel
    writes are rebuilt from their history.

    # Panics
    If a Regular image was drawn onto after the last [Self::swap_buffers].
    */
    pub fn restore(&mut self) -> Result<(), Error> {
        self.assert_initialized();
        for id in self.registry.image_ids() {
            let image = self.registry.image_mut(id);
            let was_stale = image.is_stale();
            let still_stale = image.settle_recorded_staleness();
            if self.keeps_history && image.image_type() == ImageType::Regular && still_stale {
                panic!("restorable: pixels must not be stale when restoring (image {id:?})");
            }
            if was_stale && !still_stale {
                self.registry.forget_dependencies(id);
            }
        }
        logwise::info_sync!(
            "restoring {images} images after device loss",
            images = self.registry.len()
        );
        self.queue.reset();
        self.driver.reset()?;
        for shader in self.registry.shaders_mut() {
            shader.restore(&mut self.queue);
        }
        let clear = self.clear_shader();
        for image in self.registry.images_mut() {
            image.restore(&mut self.queue, &clear);
        }
        self.registry.reset_last_target();
        self.queue.flush(&mut self.driver, false)
    }

    /**
    Writes `region` of an image to a PNG file.

    Pixels are un-premultiplied, or composited over black when
    `black_background` is set.
    */
    pub fn dump_image(
        &mut self,
        id: ImageId,
        path: impl AsRef<Path>,
        black_background: bool,
        region: Region,
    ) -> Result<(), DumpError> {
        let mut pixels = vec![0; region.byte_len()];
        self.read_pixels(id, &mut pixels, region)?;
        if black_background {
            composite_on_black(&mut pixels);
        } else {
            unpremultiply(&mut pixels);
        }
        let file = File::create(path.as_ref())?;
        png_support::encode_rgba8(
            BufWriter::new(file),
            region.width() as u32,
            region.height() as u32,
            &pixels,
        )?;
        Ok(())
    }

    /**
    Writes every live image to `dir` as `<id>.png`, creating `dir` if needed.

    Returns the written paths.
    */
    pub fn dump_images(&mut self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>, DumpError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut written = Vec::new();
        for id in self.registry.image_ids() {
            let (width, height) = self.size(id);
            let path = dir.join(format!("{}.png", id.get()));
            self.dump_image(id, &path, false, Region::from_size(width as i32, height as i32))?;
            written.push(path);
        }
        logwise::info_sync!("dumped {count} images", count = written.len());
        Ok(written)
    }
}
