// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
CPU-side pixel history of one image.

[PixelRecords] is the ground truth used to rebuild an image after the device
was lost, without asking the GPU.  Each record is a region plus exactly
`region.byte_len()` bytes of premultiplied RGBA8.
*/

use crate::command::{CommandQueue, Image};
use crate::coordinates::{Region, copy_overlap};

#[derive(Debug, Clone, PartialEq, Eq)]
struct PixelsRecord {
    region: Region,
    pixels: Vec<u8>,
}

/**
A log of raw pixel writes, keyed by region.

Regions are kept free of containment duplicates:

* adding a region removes every record the new region contains;
* adding a region that an existing record already contains leaves the set of
  regions unchanged, and the new bytes are written into the records it
  overlaps instead.

Records are kept in insertion order, and later records win wherever records
overlap.
*/
#[derive(Debug, Default, Clone)]
pub struct PixelRecords {
    records: Vec<PixelsRecord>,
}

impl PixelRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /**
    Records `pixels` for `region`.

    # Panics
    If `pixels` is not exactly `region.byte_len()` bytes.
    */
    pub fn add_or_replace(&mut self, pixels: Vec<u8>, region: Region) {
        assert_eq!(
            pixels.len(),
            region.byte_len(),
            "pixel records: {} bytes do not match region {region:?}",
            pixels.len()
        );
        if self.records.iter().any(|r| r.region.contains(&region)) {
            //the region is already tracked; keep the regions, refresh the bytes
            for record in self
                .records
                .iter_mut()
                .filter(|r| r.region.overlaps(&region))
            {
                copy_overlap(&pixels, &region, &mut record.pixels, &record.region);
            }
            return;
        }
        self.records.retain(|r| !region.contains(&r.region));
        self.records.push(PixelsRecord { region, pixels });
    }

    /**
    Forgets the record whose region is exactly `region`.

    No-op when there is no exact match.  Records that merely overlap `region`
    are not clipped.
    */
    pub fn clear(&mut self, region: Region) {
        self.records.retain(|r| r.region != region);
    }

    /**
    Replays every record onto `image` in insertion order.

    The image is not cleared first.
    */
    pub(crate) fn apply(&self, queue: &mut CommandQueue, image: &Image) {
        for record in &self.records {
            queue.write_pixels(image, record.pixels.clone(), record.region);
        }
    }

    /**
    Fills `pixels` with the recorded contents of `region`.

    Records are composited in insertion order.  Pixels without history, or
    every pixel when nothing was ever recorded, are transparent black.  This
    never touches the GPU.
    */
    pub fn read_pixels(&self, pixels: &mut [u8], region: Region, image_width: u32, image_height: u32) {
        assert_eq!(
            pixels.len(),
            region.byte_len(),
            "pixel records: output buffer does not match region {region:?}"
        );
        debug_assert!(
            Region::from_size(image_width as i32, image_height as i32).contains(&region),
            "region {region:?} is outside {image_width}x{image_height}"
        );
        pixels.fill(0);
        for record in &self.records {
            copy_overlap(&record.pixels, &record.region, pixels, &region);
        }
    }

    /// Appends the region of every record to `regions`.
    pub fn append_regions(&self, regions: &mut Vec<Region>) {
        regions.extend(self.records.iter().map(|r| r.region));
    }

    /// Releases every buffer.
    pub fn dispose(&mut self) {
        self.records = Vec::new();
    }
}
