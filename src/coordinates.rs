// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Integer pixel coordinates.

All images use the same raster coordinate system:

```text
           x
      0 ────────▶
      │ ┌───────┐
    y │ │       │
      │ │       │
      │ │       │
      ▼ └───────┘
 ```
*/

/// A pixel position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const ZERO: Point = Point { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Point { x, y }
    }
}

/**
A half-open rectangle of pixels.

`min` is inclusive and `max` is exclusive, so `Region::new(0, 0, 2, 2)` covers
exactly four pixels.  A region whose `max` is not strictly greater than `min`
on either axis is empty.

```
use restorable_images::coordinates::Region;

let outer = Region::new(0, 0, 4, 4);
let inner = Region::new(1, 1, 3, 3);
assert!(outer.contains(&inner));
assert!(!inner.contains(&outer));
assert_eq!(inner.area(), 4);
```
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Region {
    pub min: Point,
    pub max: Point,
}

impl Region {
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Region {
            min: Point { x: x0, y: y0 },
            max: Point { x: x1, y: y1 },
        }
    }

    /// The region `[0, width) × [0, height)`.
    pub const fn from_size(width: i32, height: i32) -> Self {
        Region::new(0, 0, width, height)
    }

    pub const fn width(&self) -> i32 {
        self.max.x - self.min.x
    }

    pub const fn height(&self) -> i32 {
        self.max.y - self.min.y
    }

    pub const fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y
    }

    /// Number of pixels, zero for empty regions.
    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width() as usize * self.height() as usize
        }
    }

    /// Number of RGBA8 bytes needed to hold the region.
    pub fn byte_len(&self) -> usize {
        self.area() * 4
    }

    /**
    Whether `other` lies entirely inside this region.

    An empty region is contained in every region.
    */
    pub fn contains(&self, other: &Region) -> bool {
        if other.is_empty() {
            return true;
        }
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
    }

    pub fn contains_point(&self, p: Point) -> bool {
        self.min.x <= p.x && p.x < self.max.x && self.min.y <= p.y && p.y < self.max.y
    }

    /// The overlapping part of both regions, or `None` when they do not overlap.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let r = Region::new(
            self.min.x.max(other.min.x),
            self.min.y.max(other.min.y),
            self.max.x.min(other.max.x),
            self.max.y.min(other.max.y),
        );
        if r.is_empty() { None } else { Some(r) }
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.intersect(other).is_some()
    }
}

/**
Copies the pixels of `src_region` that also lie in `dst_region` from `src` into `dst`.

Both buffers are tightly packed RGBA8 laid out over their own region.
*/
pub(crate) fn copy_overlap(src: &[u8], src_region: &Region, dst: &mut [u8], dst_region: &Region) {
    let Some(overlap) = src_region.intersect(dst_region) else {
        return;
    };
    let row_bytes = overlap.width() as usize * 4;
    let src_stride = src_region.width() as usize * 4;
    let dst_stride = dst_region.width() as usize * 4;
    for y in overlap.min.y..overlap.max.y {
        let src_offset = (y - src_region.min.y) as usize * src_stride
            + (overlap.min.x - src_region.min.x) as usize * 4;
        let dst_offset = (y - dst_region.min.y) as usize * dst_stride
            + (overlap.min.x - dst_region.min.x) as usize * 4;
        dst[dst_offset..dst_offset + row_bytes]
            .copy_from_slice(&src[src_offset..src_offset + row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_regions() {
        assert!(Region::new(2, 2, 2, 4).is_empty());
        assert!(Region::new(3, 0, 1, 4).is_empty());
        assert_eq!(Region::new(3, 0, 1, 4).area(), 0);
        assert!(Region::new(0, 0, 1, 1).contains(&Region::new(5, 5, 5, 5)));
    }

    #[test]
    fn intersection() {
        let a = Region::new(0, 0, 4, 4);
        let b = Region::new(2, 2, 6, 6);
        assert_eq!(a.intersect(&b), Some(Region::new(2, 2, 4, 4)));
        assert_eq!(a.intersect(&Region::new(4, 0, 8, 4)), None);
        assert!(!a.overlaps(&Region::new(0, 4, 4, 8)));
    }

    #[test]
    fn copy_overlap_places_rows() {
        // 2x2 source at (1,1) copied into a 4x4 destination at origin
        let src = [1u8; 16];
        let mut dst = [0u8; 64];
        copy_overlap(&src, &Region::new(1, 1, 3, 3), &mut dst, &Region::from_size(4, 4));
        for y in 0..4 {
            for x in 0..4 {
                let expected = if (1..3).contains(&x) && (1..3).contains(&y) { 1 } else { 0 };
                assert_eq!(dst[(y * 4 + x) * 4], expected, "pixel ({x},{y})");
            }
        }
    }
}
