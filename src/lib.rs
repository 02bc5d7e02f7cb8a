// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! restorable_images keeps GPU images alive across device loss.

Some graphics APIs, notably OpenGL on mobile and in browsers, can drop every
texture at any moment.  This crate sits between a 2D renderer and the native
driver and makes that survivable:

* Image contents are remembered as a base snapshot plus a history of
  region writes, so a lost image can be rebuilt exactly.
* Draw and upload commands are batched into a queue and submitted to the
  driver on flush, merging consecutive compatible draws.
* When an image is drawn into, its remembered contents are marked stale and
  resolved by reading the GPU back once per frame, at [Engine::swap_buffers].

# Layers

| Layer | Module | Sees |
|-------|--------|------|
| Restorable images | [images] | [ImageId](images::ImageId)s, logical sizes, history |
| Command queue | internal | batched commands, internal (power of two) sizes |
| Driver | [driver] | native ids, raw vertices and bytes |

# Backends

Exactly one [Graphics](driver::Graphics) implementation backs an [Engine].

* [SoftwareGraphics] renders on the CPU.  It can simulate device loss, which
  makes it the backend of choice for tests.
* `WgpuGraphics`, behind the `backend_wgpu` feature, renders through
  [wgpu](https://wgpu.rs).  Only its OpenGL backend keeps history.

# Example

```
use restorable_images::SoftwareGraphics;
use restorable_images::coordinates::Region;
use restorable_images::images::{Engine, EngineConfig, ImageType};

let mut engine = Engine::new(SoftwareGraphics::new(), EngineConfig::default());
engine.initialize_graphics_driver_state().unwrap();

let image = engine.new_image(4, 4, ImageType::Regular);
engine.write_pixels(image, Some(&[255; 64]), Region::from_size(4, 4));
engine.swap_buffers().unwrap();

engine.driver_mut().lose_device();
engine.restore().unwrap();

let mut pixels = [0; 64];
engine.read_pixels(image, &mut pixels, Region::from_size(4, 4)).unwrap();
assert_eq!(pixels, [255; 64]);
```
*/

pub mod coordinates;
pub mod driver;
mod command;
pub mod images;
pub mod pixel_formats;
mod imp;

pub use images::Engine;
pub use imp::{DriverStats, SoftwareGraphics};

#[cfg(feature = "backend_wgpu")]
pub use imp::{WgpuError, WgpuGraphics};
