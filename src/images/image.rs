// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
One GPU image plus what is needed to rebuild it after device loss.
*/

use crate::command::{CommandQueue, Image, Shader};
use crate::coordinates::Region;
use crate::driver::{
    Blend, Error, FillRule, Graphics, PixelsArgs, SHADER_SRC_IMAGE_COUNT,
};
use crate::images::pixel_records::PixelRecords;
use crate::images::vertex_algorithms::{QUAD_INDICES, quad_vertices};

/// How an image is brought back after the device was lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    /// Contents are rebuilt pixel-exactly from recorded history.
    Regular,
    /// The image backing the display.  Recreated empty; the application redraws it.
    Screen,
    /// Cleared every frame, so recreated empty with no history kept.
    Volatile,
}

/**
Adds `region` to `regions` unless an existing region already contains it,
dropping every existing region that `region` contains.
*/
pub(crate) fn append_region_removing_duplicates(regions: &mut Vec<Region>, region: Region) {
    if regions.iter().any(|r| r.contains(&region)) {
        return;
    }
    regions.retain(|r| !region.contains(r));
    regions.push(region);
}

/// Clears `region` of `image` to transparent black.
pub(crate) fn clear_image(queue: &mut CommandQueue, image: &Image, clear_shader: &Shader, region: Region) {
    let vertices = quad_vertices(
        [
            region.min.x as f32,
            region.min.y as f32,
            region.max.x as f32,
            region.max.y as f32,
        ],
        [0.0; 4],
        [0.0; 4],
    );
    queue.draw_triangles(
        image,
        [None; SHADER_SRC_IMAGE_COUNT],
        [Region::default(); SHADER_SRC_IMAGE_COUNT],
        clear_shader,
        &vertices,
        &QUAD_INDICES,
        Blend::CLEAR,
        region,
        &[],
        FillRule::FillAll,
    );
}

/**
A GPU-backed image that can be rebuilt after the device was lost.

The image becomes *stale* whenever its GPU contents change.  For Regular
images, every stale region is either covered by [PixelRecords] (raw pixel
writes) or listed in `drawn_regions`, whose contents exist only on the GPU
until [Self::resolve_stale] reads them back.
*/
#[derive(Debug)]
pub(crate) struct RestorableImage {
    image: Option<Image>,
    width: u32,
    height: u32,
    image_type: ImageType,
    base_pixels: PixelRecords,
    /// Whether the GPU contents may differ from what can be rebuilt.
    stale: bool,
    /// Valid only while `stale`.  Always empty when history is not kept.
    stale_regions: Vec<Region>,
    /// The stale regions produced by draws or dependency invalidation.
    drawn_regions: Vec<Region>,
    keeps_history: bool,
}

impl RestorableImage {
    /**
    Creates a cleared image.

    The whole internal extent is cleared, not just `width`×`height`: some
    backends leave undefined texels in the padding otherwise.
    */
    pub fn new(
        queue: &mut CommandQueue,
        clear_shader: &Shader,
        width: u32,
        height: u32,
        image_type: ImageType,
        keeps_history: bool,
    ) -> Self {
        let image = queue.new_image(width, height, image_type == ImageType::Screen);
        clear_image(queue, &image, clear_shader, image.internal_region());
        RestorableImage {
            image: Some(image),
            width,
            height,
            image_type,
            base_pixels: PixelRecords::new(),
            stale: false,
            stale_regions: Vec::new(),
            drawn_regions: Vec::new(),
            keeps_history: keeps_history && image_type == ImageType::Regular,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn stale_regions(&self) -> &[Region] {
        &self.stale_regions
    }

    pub fn base_pixels(&self) -> &PixelRecords {
        &self.base_pixels
    }

    pub fn base_pixels_mut(&mut self) -> &mut PixelRecords {
        &mut self.base_pixels
    }

    pub fn bounds(&self) -> Region {
        Region::from_size(self.width as i32, self.height as i32)
    }

    pub fn command_image(&self) -> &Image {
        match &self.image {
            Some(image) => image,
            None => panic!("restorable: the image is already disposed"),
        }
    }

    pub fn internal_size(&self) -> (u32, u32) {
        self.command_image().internal_size()
    }

    /**
    Marks the image stale.

    `region` is the area whose contents changed; `None` means the whole
    image.  `drawn` says the new contents are only known to the GPU.
    */
    pub fn make_stale(&mut self, region: Option<Region>, drawn: bool) {
        self.stale = true;
        if !self.keeps_history {
            return;
        }
        let region = region.unwrap_or_else(|| self.bounds());
        let Some(region) = region.intersect(&self.bounds()) else {
            return;
        };
        append_region_removing_duplicates(&mut self.stale_regions, region);
        if drawn {
            append_region_removing_duplicates(&mut self.drawn_regions, region);
        }
    }

    /// Panics unless `region` is a non-empty part of the image.
    pub fn check_region(&self, region: Region) {
        if region.width() <= 0 || region.height() <= 0 {
            panic!("restorable: width/height must be positive, got {region:?}");
        }
        if !self.bounds().contains(&region) {
            panic!(
                "restorable: out of range {region:?} for a {}x{} image",
                self.width, self.height
            );
        }
    }

    /**
    Replaces the pixels of `region`, or clears them when `pixels` is `None`.

    Images depending on this one must have been invalidated by the caller.
    */
    pub fn write_pixels(
        &mut self,
        queue: &mut CommandQueue,
        clear_shader: &Shader,
        pixels: Option<&[u8]>,
        region: Region,
    ) {
        self.check_region(region);
        let image = *self.command_image();
        match pixels {
            Some(pixels) => queue.write_pixels(&image, pixels.to_vec(), region),
            None => clear_image(queue, &image, clear_shader, region),
        }
        //even if the image is already stale, extend the stale regions
        self.make_stale(Some(region), false);
        if self.keeps_history {
            let recorded = match pixels {
                Some(pixels) => pixels.to_vec(),
                None => vec![0; region.byte_len()],
            };
            self.base_pixels.add_or_replace(recorded, region);
        }
    }

    /**
    Draws triangles onto the image.

    Draws are not recorded in the pixel history; the drawn region stays stale
    until it is read back.
    */
    #[allow(clippy::too_many_arguments)]
    pub fn draw_triangles(
        &mut self,
        queue: &mut CommandQueue,
        srcs: [Option<Image>; SHADER_SRC_IMAGE_COUNT],
        vertices: &[f32],
        indices: &[u32],
        blend: Blend,
        dst_region: Region,
        src_regions: [Region; SHADER_SRC_IMAGE_COUNT],
        shader: &Shader,
        uniforms: &[u32],
        fill_rule: FillRule,
    ) {
        if vertices.is_empty() {
            return;
        }
        self.make_stale(Some(dst_region), true);
        let image = *self.command_image();
        queue.draw_triangles(
            &image,
            srcs,
            src_regions,
            shader,
            vertices,
            indices,
            blend,
            dst_region,
            uniforms,
            fill_rule,
        );
    }

    /// Reads pixels from the GPU.  Flushes pending commands first.
    pub fn read_pixels<G: Graphics + ?Sized>(
        &self,
        queue: &mut CommandQueue,
        driver: &mut G,
        pixels: &mut [u8],
        region: Region,
    ) -> Result<(), Error> {
        let image = *self.command_image();
        queue.read_pixels(driver, &image, &mut [PixelsArgs { pixels, region }])
    }

    /**
    Makes the image non-stale by capturing GPU-only contents into the history.

    Stale regions that came from pixel writes are already recorded and are not
    read back.
    */
    pub fn resolve_stale<G: Graphics + ?Sized>(
        &mut self,
        queue: &mut CommandQueue,
        driver: &mut G,
    ) -> Result<(), Error> {
        if !self.stale {
            return Ok(());
        }
        if !self.keeps_history {
            self.clear_staleness();
            return Ok(());
        }
        let to_read = self.unrecorded_stale_regions();
        if !to_read.is_empty() {
            let mut buffers: Vec<Vec<u8>> = to_read.iter().map(|r| vec![0; r.byte_len()]).collect();
            let mut args: Vec<PixelsArgs<'_>> = buffers
                .iter_mut()
                .zip(to_read.iter())
                .map(|(pixels, region)| PixelsArgs {
                    pixels: pixels.as_mut_slice(),
                    region: *region,
                })
                .collect();
            let image = *self.command_image();
            queue.read_pixels(driver, &image, &mut args)?;
            drop(args);
            for (pixels, region) in buffers.into_iter().zip(to_read) {
                self.base_pixels.add_or_replace(pixels, region);
            }
        }
        self.clear_staleness();
        Ok(())
    }

    /// Stale regions whose contents the history cannot rebuild.
    fn unrecorded_stale_regions(&self) -> Vec<Region> {
        let mut recorded = Vec::new();
        self.base_pixels.append_regions(&mut recorded);
        self.stale_regions
            .iter()
            .filter(|stale| {
                self.drawn_regions.iter().any(|d| d.overlaps(stale))
                    || !recorded.iter().any(|r| r.contains(stale))
            })
            .copied()
            .collect()
    }

    /**
    Clears the staleness if the history alone rebuilds the image, without
    touching the GPU.

    Returns whether the image is still stale.
    */
    pub fn settle_recorded_staleness(&mut self) -> bool {
        if self.stale && self.keeps_history && self.unrecorded_stale_regions().is_empty() {
            self.clear_staleness();
        }
        self.stale
    }

    /**
    Takes over `history` as this image's own.

    Only valid right after this image received an exact copy of the image the
    history belongs to.
    */
    pub fn adopt_history(&mut self, history: PixelRecords) {
        if self.keeps_history {
            self.base_pixels = history;
        }
        self.clear_staleness();
    }

    fn clear_staleness(&mut self) {
        self.stale = false;
        self.stale_regions.clear();
        self.drawn_regions.clear();
    }

    /**
    Recreates the native image after the device was lost.

    The previous native image must already be gone along with the device.

    # Panics
    If a Regular image with history has stale contents that only the GPU knew.
    */
    pub fn restore(&mut self, queue: &mut CommandQueue, clear_shader: &Shader) {
        match self.image_type {
            ImageType::Screen => {
                //the framebuffer may have changed, so the screen is recreated too
                self.image = Some(queue.new_image(self.width, self.height, true));
                self.base_pixels.dispose();
                self.clear_staleness();
            }
            ImageType::Volatile => {
                let image = queue.new_image(self.width, self.height, false);
                clear_image(queue, &image, clear_shader, image.internal_region());
                self.image = Some(image);
                self.clear_staleness();
            }
            ImageType::Regular => {
                if self.keeps_history && self.settle_recorded_staleness() {
                    panic!("restorable: pixels must not be stale when restoring");
                }
                let image = queue.new_image(self.width, self.height, false);
                clear_image(queue, &image, clear_shader, image.internal_region());
                self.base_pixels.apply(queue, &image);
                self.image = Some(image);
                self.clear_staleness();
            }
        }
    }

    /// Releases the native image and the history.
    pub fn dispose(&mut self, queue: &mut CommandQueue) {
        if let Some(image) = self.image.take() {
            queue.dispose_image(image);
        }
        self.base_pixels.dispose();
        self.clear_staleness();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{BuiltinShader, ShaderSource};

    fn setup() -> (CommandQueue, Shader) {
        let mut queue = CommandQueue::new(1 << 16);
        let shader = queue.new_shader(ShaderSource::Builtin(BuiltinShader::Clear));
        (queue, shader)
    }

    #[test]
    fn duplicate_removal() {
        let mut regions = vec![Region::new(0, 0, 2, 2), Region::new(4, 4, 6, 6)];
        append_region_removing_duplicates(&mut regions, Region::new(0, 0, 1, 1));
        assert_eq!(regions.len(), 2);
        append_region_removing_duplicates(&mut regions, Region::new(0, 0, 3, 3));
        assert_eq!(regions, vec![Region::new(4, 4, 6, 6), Region::new(0, 0, 3, 3)]);
    }

    #[test]
    fn write_extends_stale_regions_and_records() {
        let (mut queue, clear) = setup();
        let mut image = RestorableImage::new(&mut queue, &clear, 4, 4, ImageType::Regular, true);
        assert!(!image.is_stale());
        image.write_pixels(&mut queue, &clear, Some(&[1; 16]), Region::new(0, 0, 2, 2));
        image.write_pixels(&mut queue, &clear, None, Region::new(2, 2, 4, 4));
        assert!(image.is_stale());
        assert_eq!(image.stale_regions().len(), 2);
        assert_eq!(image.base_pixels().len(), 2);
    }

    #[test]
    fn volatile_keeps_no_history() {
        let (mut queue, clear) = setup();
        let mut image = RestorableImage::new(&mut queue, &clear, 4, 4, ImageType::Volatile, true);
        image.write_pixels(&mut queue, &clear, Some(&[1; 16]), Region::new(0, 0, 2, 2));
        assert!(image.is_stale());
        assert!(image.stale_regions().is_empty());
        assert!(image.base_pixels().is_empty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn write_out_of_range_panics() {
        let (mut queue, clear) = setup();
        let mut image = RestorableImage::new(&mut queue, &clear, 4, 4, ImageType::Regular, true);
        image.write_pixels(&mut queue, &clear, None, Region::new(3, 3, 5, 5));
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn write_empty_region_panics() {
        let (mut queue, clear) = setup();
        let mut image = RestorableImage::new(&mut queue, &clear, 4, 4, ImageType::Regular, true);
        image.write_pixels(&mut queue, &clear, None, Region::new(1, 1, 1, 3));
    }

    #[test]
    fn empty_draw_changes_nothing() {
        let (mut queue, clear) = setup();
        let mut image = RestorableImage::new(&mut queue, &clear, 4, 4, ImageType::Regular, true);
        let pending = queue.len();
        image.draw_triangles(
            &mut queue,
            [None; SHADER_SRC_IMAGE_COUNT],
            &[],
            &[],
            Blend::COPY,
            Region::from_size(4, 4),
            [Region::default(); SHADER_SRC_IMAGE_COUNT],
            &clear,
            &[],
            FillRule::FillAll,
        );
        assert!(!image.is_stale());
        assert_eq!(queue.len(), pending);
    }

    #[test]
    #[should_panic(expected = "must not be stale")]
    fn restoring_stale_regular_image_panics() {
        let (mut queue, clear) = setup();
        let mut image = RestorableImage::new(&mut queue, &clear, 4, 4, ImageType::Regular, true);
        image.make_stale(None, true);
        queue.reset();
        image.restore(&mut queue, &clear);
    }

    #[test]
    fn written_staleness_settles_from_history() {
        let (mut queue, clear) = setup();
        let mut image = RestorableImage::new(&mut queue, &clear, 4, 4, ImageType::Regular, true);
        image.write_pixels(&mut queue, &clear, Some(&[7; 16]), Region::new(0, 0, 2, 2));
        image.write_pixels(&mut queue, &clear, None, Region::new(2, 2, 4, 4));
        assert!(!image.settle_recorded_staleness());
        assert!(image.stale_regions().is_empty());

        image.write_pixels(&mut queue, &clear, Some(&[7; 16]), Region::new(0, 0, 2, 2));
        image.make_stale(Some(Region::new(1, 1, 3, 3)), true);
        assert!(image.settle_recorded_staleness(), "drawn contents need a readback");
    }

    #[test]
    fn restoring_written_regular_image_uses_history() {
        let (mut queue, clear) = setup();
        let mut image = RestorableImage::new(&mut queue, &clear, 4, 4, ImageType::Regular, true);
        image.write_pixels(&mut queue, &clear, Some(&[7; 16]), Region::new(0, 0, 2, 2));
        queue.reset();
        image.restore(&mut queue, &clear);
        assert!(!image.is_stale());
        assert_eq!(image.base_pixels().len(), 1);
    }

    #[test]
    fn screen_restore_discards_history() {
        let (mut queue, clear) = setup();
        let mut image = RestorableImage::new(&mut queue, &clear, 4, 4, ImageType::Screen, true);
        image.make_stale(None, true);
        queue.reset();
        image.restore(&mut queue, &clear);
        assert!(!image.is_stale());
        assert!(image.base_pixels().is_empty());
        assert!(image.command_image().is_screen());
    }
}
