// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A CPU backend.

Useful as a reference for what every backend must do, for tests, and for
running where no GPU is available.  It can simulate device loss with
[SoftwareGraphics::lose_device].
*/

mod raster;

use std::collections::HashMap;

use crate::coordinates::{Region, copy_overlap};
use crate::driver::{
    BuiltinShader, DrawTrianglesArgs, Error, Graphics, NativeImageId, NativeShaderId, PixelsArgs,
    SHADER_SRC_IMAGE_COUNT, ShaderSource, WritePixelsArgs,
};
use raster::{Draw, Source, Target};

/// Contents of a freshly created image.  Anything but zero, so missing clears show up.
const UNDEFINED_BYTE: u8 = 0xcd;

const DEFAULT_MAX_IMAGE_SIZE: u32 = 4096;

/// Counts of driver calls since creation or [SoftwareGraphics::reset_stats].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub read_pixels_calls: usize,
    pub write_pixels_calls: usize,
    pub draw_calls: usize,
    pub presents: usize,
}

#[derive(Debug)]
struct Texture {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Texture {
    fn bounds(&self) -> Region {
        Region::from_size(self.width as i32, self.height as i32)
    }

    fn check(&self, region: &Region) -> Result<(), Error> {
        if region.is_empty() || !self.bounds().contains(region) {
            return Err(Error::InvalidArgument(format!(
                "{region:?} is outside a {}x{} image",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/**
Renders on the CPU into plain byte buffers.

```
use restorable_images::SoftwareGraphics;
use restorable_images::images::{Engine, EngineConfig, ImageType};
use restorable_images::coordinates::Region;

let mut engine = Engine::new(SoftwareGraphics::new(), EngineConfig::default());
engine.initialize_graphics_driver_state().unwrap();
let image = engine.new_image(2, 2, ImageType::Regular);
engine.write_pixels(image, Some(&[255; 16]), Region::from_size(2, 2));
let mut pixels = [0; 16];
engine.read_pixels(image, &mut pixels, Region::from_size(2, 2)).unwrap();
assert_eq!(pixels, [255; 16]);
```
*/
#[derive(Debug)]
pub struct SoftwareGraphics {
    images: HashMap<NativeImageId, Texture>,
    shaders: HashMap<NativeShaderId, BuiltinShader>,
    next_image: u32,
    next_shader: u32,
    lost: bool,
    needs_restoring: bool,
    max_image_size: u32,
    stats: DriverStats,
}

impl Default for SoftwareGraphics {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareGraphics {
    pub fn new() -> Self {
        SoftwareGraphics {
            images: HashMap::new(),
            shaders: HashMap::new(),
            next_image: 0,
            next_shader: 0,
            lost: false,
            needs_restoring: true,
            max_image_size: DEFAULT_MAX_IMAGE_SIZE,
            stats: DriverStats::default(),
        }
    }

    /// Sets what [Graphics::needs_restoring] reports.
    pub fn with_needs_restoring(mut self, needs_restoring: bool) -> Self {
        self.needs_restoring = needs_restoring;
        self
    }

    pub fn with_max_image_size(mut self, max_image_size: u32) -> Self {
        self.max_image_size = max_image_size;
        self
    }

    /**
    Simulates losing the device.

    Every image and shader is gone, and every call fails with
    [Error::DeviceLost] until [Graphics::reset].
    */
    pub fn lose_device(&mut self) {
        logwise::warn_sync!(
            "software device lost with {images} images",
            images = self.images.len()
        );
        self.images.clear();
        self.shaders.clear();
        self.lost = true;
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = DriverStats::default();
    }

    /// Number of live native images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn check_device(&self) -> Result<(), Error> {
        if self.lost { Err(Error::DeviceLost) } else { Ok(()) }
    }

    fn create(&mut self, width: u32, height: u32) -> Result<NativeImageId, Error> {
        self.check_device()?;
        if width == 0 || height == 0 || width > self.max_image_size || height > self.max_image_size {
            return Err(Error::InvalidArgument(format!(
                "image size {width}x{height} exceeds {}",
                self.max_image_size
            )));
        }
        let id = NativeImageId(self.next_image);
        self.next_image += 1;
        self.images.insert(
            id,
            Texture {
                width,
                height,
                pixels: vec![UNDEFINED_BYTE; width as usize * height as usize * 4],
            },
        );
        Ok(id)
    }
}

impl Graphics for SoftwareGraphics {
    fn initialize(&mut self) -> Result<(), Error> {
        self.check_device()
    }

    fn reset(&mut self) -> Result<(), Error> {
        self.images.clear();
        self.shaders.clear();
        self.lost = false;
        Ok(())
    }

    fn needs_restoring(&self) -> bool {
        self.needs_restoring
    }

    fn max_image_size(&self) -> u32 {
        self.max_image_size
    }

    fn begin(&mut self) -> Result<(), Error> {
        self.check_device()
    }

    fn end(&mut self, present: bool) -> Result<(), Error> {
        self.check_device()?;
        if present {
            self.stats.presents += 1;
        }
        Ok(())
    }

    fn new_image(&mut self, width: u32, height: u32) -> Result<NativeImageId, Error> {
        self.create(width, height)
    }

    fn new_screen_framebuffer_image(&mut self, width: u32, height: u32) -> Result<NativeImageId, Error> {
        self.create(width, height)
    }

    fn dispose_image(&mut self, id: NativeImageId) {
        self.images.remove(&id);
    }

    fn write_pixels(&mut self, id: NativeImageId, args: &[WritePixelsArgs]) -> Result<(), Error> {
        self.check_device()?;
        let texture = self.images.get_mut(&id).ok_or(Error::NoSuchImage(id))?;
        for arg in args {
            texture.check(&arg.region)?;
            if arg.pixels.len() != arg.region.byte_len() {
                return Err(Error::InvalidArgument(format!(
                    "{} bytes do not match {:?}",
                    arg.pixels.len(),
                    arg.region
                )));
            }
            let bounds = texture.bounds();
            copy_overlap(&arg.pixels, &arg.region, &mut texture.pixels, &bounds);
        }
        self.stats.write_pixels_calls += 1;
        Ok(())
    }

    fn read_pixels(&mut self, id: NativeImageId, args: &mut [PixelsArgs<'_>]) -> Result<(), Error> {
        self.check_device()?;
        let texture = self.images.get(&id).ok_or(Error::NoSuchImage(id))?;
        for arg in args.iter_mut() {
            texture.check(&arg.region)?;
            if arg.pixels.len() != arg.region.byte_len() {
                return Err(Error::InvalidArgument(format!(
                    "{} bytes cannot hold {:?}",
                    arg.pixels.len(),
                    arg.region
                )));
            }
            copy_overlap(&texture.pixels, &texture.bounds(), arg.pixels, &arg.region);
        }
        self.stats.read_pixels_calls += 1;
        Ok(())
    }

    fn new_shader(&mut self, source: &ShaderSource) -> Result<NativeShaderId, Error> {
        self.check_device()?;
        let ShaderSource::Builtin(builtin) = source else {
            return Err(Error::Unsupported(
                "the software backend only runs builtin shaders".to_string(),
            ));
        };
        let id = NativeShaderId(self.next_shader);
        self.next_shader += 1;
        self.shaders.insert(id, *builtin);
        Ok(id)
    }

    fn dispose_shader(&mut self, id: NativeShaderId) {
        self.shaders.remove(&id);
    }

    fn draw_triangles(&mut self, args: &DrawTrianglesArgs<'_>) -> Result<(), Error> {
        self.check_device()?;
        let shader = *self
            .shaders
            .get(&args.shader)
            .ok_or(Error::NoSuchShader(args.shader))?;
        //taken out of the map so sources can be borrowed alongside
        let mut dst = self.images.remove(&args.dst).ok_or(Error::NoSuchImage(args.dst))?;
        let result = (|| -> Result<(), Error> {
            let mut srcs: [Option<Source<'_>>; SHADER_SRC_IMAGE_COUNT] = [None; SHADER_SRC_IMAGE_COUNT];
            for (slot, src) in srcs.iter_mut().zip(args.srcs) {
                if let Some(src) = src {
                    let texture = self.images.get(&src).ok_or(Error::NoSuchImage(src))?;
                    *slot = Some(Source {
                        width: texture.width,
                        height: texture.height,
                        pixels: &texture.pixels,
                    });
                }
            }
            let mut target = Target {
                width: dst.width,
                height: dst.height,
                pixels: &mut dst.pixels,
            };
            raster::draw_triangles(
                &mut target,
                &Draw {
                    shader,
                    srcs,
                    src_regions: args.src_regions,
                    vertices: args.vertices,
                    indices: args.indices,
                    blend: args.blend,
                    dst_region: args.dst_region,
                    fill_rule: args.fill_rule,
                },
            );
            Ok(())
        })();
        self.images.insert(args.dst, dst);
        if result.is_ok() {
            self.stats.draw_calls += 1;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Blend, FillRule};

    #[test]
    fn lost_device_fails_until_reset() {
        let mut driver = SoftwareGraphics::new();
        let id = driver.new_image(2, 2).unwrap();
        driver.lose_device();
        assert_eq!(driver.begin(), Err(Error::DeviceLost));
        assert_eq!(driver.new_image(2, 2), Err(Error::DeviceLost));
        driver.reset().unwrap();
        assert_eq!(
            driver.write_pixels(id, &[]),
            Err(Error::NoSuchImage(id)),
            "images do not survive"
        );
        assert_eq!(driver.image_count(), 0);
    }

    #[test]
    fn new_images_are_undefined() {
        let mut driver = SoftwareGraphics::new();
        let id = driver.new_image(1, 1).unwrap();
        let mut pixel = [0u8; 4];
        driver
            .read_pixels(id, &mut [PixelsArgs { pixels: &mut pixel, region: Region::from_size(1, 1) }])
            .unwrap();
        assert_eq!(pixel, [UNDEFINED_BYTE; 4]);
    }

    #[test]
    fn custom_shaders_are_unsupported() {
        let mut driver = SoftwareGraphics::new();
        assert!(matches!(
            driver.new_shader(&ShaderSource::Wgsl("@fragment fn fs_main() {}".to_string())),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn draw_with_missing_source_keeps_destination() {
        let mut driver = SoftwareGraphics::new();
        let dst = driver.new_image(2, 2).unwrap();
        let shader = driver
            .new_shader(&ShaderSource::Builtin(BuiltinShader::Nearest))
            .unwrap();
        let vertices = crate::images::vertex_algorithms::quad_vertices([0.0, 0.0, 2.0, 2.0], [0.0; 4], [1.0; 4]);
        let mut srcs = [None; SHADER_SRC_IMAGE_COUNT];
        srcs[0] = Some(NativeImageId(42));
        let args = DrawTrianglesArgs {
            dst,
            srcs,
            src_regions: [Region::default(); SHADER_SRC_IMAGE_COUNT],
            shader,
            vertices: &vertices,
            indices: &crate::images::vertex_algorithms::QUAD_INDICES,
            blend: Blend::COPY,
            dst_region: Region::from_size(2, 2),
            uniforms: &[],
            fill_rule: FillRule::FillAll,
        };
        assert_eq!(driver.draw_triangles(&args), Err(Error::NoSuchImage(NativeImageId(42))));
        assert_eq!(driver.image_count(), 1);
        assert_eq!(driver.stats().draw_calls, 0);
    }
}
