// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use crate::coordinates::Region;

/**
Rounds an image dimension up to the size the backend allocates.

Non-screen images are padded to a power of two.
*/
pub(crate) fn internal_image_size(x: u32) -> u32 {
    assert!(x > 0, "image size must be positive");
    x.next_power_of_two()
}

/**
An image at the command level.

The native image behind it only exists once the queue that created it has
been flushed.  `Image` is a plain handle; ownership of the native resource is
tracked by whoever holds it (a restorable image) and released through
[CommandQueue::dispose_image](super::CommandQueue::dispose_image).
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Image {
    pub(super) id: u32,
    internal_width: u32,
    internal_height: u32,
    screen: bool,
}

impl Image {
    pub(super) fn new(id: u32, width: u32, height: u32, screen: bool) -> Self {
        let (internal_width, internal_height) = if screen {
            (width, height)
        } else {
            (internal_image_size(width), internal_image_size(height))
        };
        Image {
            id,
            internal_width,
            internal_height,
            screen,
        }
    }

    pub fn is_screen(&self) -> bool {
        self.screen
    }

    /// The backend-padded allocation size, at least the logical size.
    pub fn internal_size(&self) -> (u32, u32) {
        (self.internal_width, self.internal_height)
    }

    pub fn internal_region(&self) -> Region {
        Region::from_size(self.internal_width as i32, self.internal_height as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Shader {
    pub(super) id: u32,
}
