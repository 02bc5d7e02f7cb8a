// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The wgpu backend against a real adapter.  Skipped where none exists.

#![cfg(feature = "backend_wgpu")]

use restorable_images::WgpuGraphics;
use restorable_images::coordinates::Region;
use restorable_images::driver::{Blend, BuiltinShader, FillRule, SHADER_SRC_IMAGE_COUNT};
use restorable_images::images::vertex_algorithms::{QUAD_INDICES, quad_vertices};
use restorable_images::images::{DrawTriangles, Engine, EngineConfig, ImageType};
use restorable_images::pixel_formats::solid;

fn engine() -> Option<Engine<WgpuGraphics>> {
    let driver = match WgpuGraphics::new_headless() {
        Ok(driver) => driver,
        Err(e) => {
            println!("skipping, no wgpu device: {e}");
            return None;
        }
    };
    logwise::info_sync!(
        "testing on {backend}",
        backend = logwise::privacy::LogIt(&driver.backend())
    );
    let mut engine = Engine::new(
        driver,
        EngineConfig {
            restoring: Some(true),
            ..Default::default()
        },
    );
    engine.initialize_graphics_driver_state().unwrap();
    Some(engine)
}

#[test]
fn written_pixels_read_back() {
    let Some(mut engine) = engine() else { return };
    //an odd width exercises row padding
    let image = engine.new_image(3, 2, ImageType::Regular);
    let pixels = solid([10, 20, 30, 255], 6);
    engine.write_pixels(image, Some(&pixels), Region::from_size(3, 2));
    let mut read = vec![0; pixels.len()];
    engine.read_pixels(image, &mut read, Region::from_size(3, 2)).unwrap();
    assert_eq!(read, pixels);
}

#[test]
fn copies_survive_a_reset() {
    let Some(mut engine) = engine() else { return };
    let src = engine.new_image(4, 4, ImageType::Regular);
    engine.write_pixels(src, Some(&solid([255, 0, 0, 255], 16)), Region::from_size(4, 4));
    let dst = engine.new_image(4, 4, ImageType::Regular);
    let vertices = quad_vertices([0.0, 0.0, 2.0, 4.0], [0.0, 0.0, 2.0, 4.0], [1.0; 4]);
    let mut srcs = [None; SHADER_SRC_IMAGE_COUNT];
    srcs[0] = Some(src);
    let shader = engine.builtin_shader(BuiltinShader::Nearest);
    engine.draw_triangles(
        dst,
        DrawTriangles {
            srcs,
            vertices: &vertices,
            indices: &QUAD_INDICES,
            blend: Blend::COPY,
            dst_region: Region::from_size(4, 4),
            src_regions: [Region::default(); SHADER_SRC_IMAGE_COUNT],
            shader,
            uniforms: &[],
            fill_rule: FillRule::FillAll,
        },
    );
    engine.swap_buffers().unwrap();
    let mut before = vec![0; 64];
    engine.read_pixels(dst, &mut before, Region::from_size(4, 4)).unwrap();
    assert_eq!(&before[..4], &[255, 0, 0, 255]);
    assert_eq!(&before[8..12], &[0; 4]);

    engine.restore().unwrap();
    let mut after = vec![0; 64];
    engine.read_pixels(dst, &mut after, Region::from_size(4, 4)).unwrap();
    assert_eq!(after, before);
}
