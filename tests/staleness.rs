// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! When images go stale, and what it costs to make them fresh again.

use restorable_images::SoftwareGraphics;
use restorable_images::coordinates::Region;
use restorable_images::driver::{Blend, BuiltinShader, FillRule, SHADER_SRC_IMAGE_COUNT};
use restorable_images::images::vertex_algorithms::{QUAD_INDICES, quad_vertices};
use restorable_images::images::{
    DrawSourceDependencies, DrawTriangles, Engine, EngineConfig, ImageId, ImageType,
};
use restorable_images::pixel_formats::solid;

const GREEN: [u8; 4] = [0, 255, 0, 255];

fn engine_with(driver: SoftwareGraphics, config: EngineConfig) -> Engine<SoftwareGraphics> {
    let mut engine = Engine::new(driver, config);
    engine.initialize_graphics_driver_state().unwrap();
    engine
}

fn engine() -> Engine<SoftwareGraphics> {
    engine_with(SoftwareGraphics::new(), EngineConfig::default())
}

fn draw_copy(engine: &mut Engine<SoftwareGraphics>, dst: ImageId, src: ImageId) {
    let (width, height) = engine.size(src);
    let rect = [0.0, 0.0, width as f32, height as f32];
    let vertices = quad_vertices(rect, rect, [1.0; 4]);
    let mut srcs = [None; SHADER_SRC_IMAGE_COUNT];
    srcs[0] = Some(src);
    let shader = engine.builtin_shader(BuiltinShader::Nearest);
    engine.draw_triangles(
        dst,
        DrawTriangles {
            srcs,
            vertices: &vertices,
            indices: &QUAD_INDICES,
            blend: Blend::SOURCE_OVER,
            dst_region: Region::from_size(width as i32, height as i32),
            src_regions: [Region::default(); SHADER_SRC_IMAGE_COUNT],
            shader,
            uniforms: &[],
            fill_rule: FillRule::FillAll,
        },
    );
}

#[test]
fn written_images_resolve_without_readback() {
    let mut engine = engine();
    let image = engine.new_image(8, 8, ImageType::Regular);
    engine.write_pixels(image, Some(&solid(GREEN, 64)), Region::from_size(8, 8));
    engine.write_pixels(image, Some(&solid(GREEN, 4)), Region::new(2, 2, 4, 4));
    assert!(engine.is_stale(image));
    engine.swap_buffers().unwrap();
    assert!(!engine.is_stale(image));
    assert_eq!(engine.driver().stats().read_pixels_calls, 0);
    assert_eq!(engine.driver().stats().presents, 1);
}

#[test]
fn partly_written_images_need_no_readback() {
    let mut engine = engine();
    let image = engine.new_image(8, 8, ImageType::Regular);
    engine.write_pixels(image, Some(&solid(GREEN, 4)), Region::new(0, 0, 2, 2));
    engine.swap_buffers().unwrap();
    assert_eq!(engine.driver().stats().read_pixels_calls, 0, "the write is recorded");

    let mut recorded = [0; 16];
    engine.read_recorded_pixels(image, &mut recorded, Region::new(0, 0, 2, 2));
    assert_eq!(recorded.to_vec(), solid(GREEN, 4));
}

#[test]
fn drawn_images_are_read_back_once() {
    let mut engine = engine();
    let src = engine.new_image(4, 4, ImageType::Regular);
    engine.write_pixels(src, Some(&solid(GREEN, 16)), Region::from_size(4, 4));
    let dst = engine.new_image(4, 4, ImageType::Regular);
    draw_copy(&mut engine, dst, src);
    assert!(engine.is_stale(dst));

    engine.swap_buffers().unwrap();
    assert!(!engine.is_stale(dst));
    assert_eq!(engine.driver().stats().read_pixels_calls, 1);

    let mut recorded = [0; 64];
    engine.read_recorded_pixels(dst, &mut recorded, Region::from_size(4, 4));
    assert_eq!(recorded.to_vec(), solid(GREEN, 16), "the readback became history");

    engine.driver_mut().reset_stats();
    engine.swap_buffers().unwrap();
    assert_eq!(engine.driver().stats().read_pixels_calls, 0, "nothing changed since");
    assert_eq!(engine.driver().stats().presents, 1);
}

#[test]
fn volatile_images_never_read_back() {
    let mut engine = engine();
    let src = engine.new_image(4, 4, ImageType::Regular);
    let volatile = engine.new_image(4, 4, ImageType::Volatile);
    draw_copy(&mut engine, volatile, src);
    assert!(engine.is_stale(volatile));
    engine.swap_buffers().unwrap();
    assert!(!engine.is_stale(volatile));
    assert_eq!(engine.driver().stats().read_pixels_calls, 0);
}

#[test]
#[should_panic(expected = "pixels must not be stale when restoring")]
fn restoring_a_stale_image_panics() {
    let mut engine = engine();
    let src = engine.new_image(4, 4, ImageType::Regular);
    let dst = engine.new_image(4, 4, ImageType::Regular);
    draw_copy(&mut engine, dst, src);
    engine.driver_mut().lose_device();
    let _ = engine.restore();
}

#[test]
fn backends_that_never_lose_skip_history() {
    let mut engine = engine_with(
        SoftwareGraphics::new().with_needs_restoring(false),
        EngineConfig::default(),
    );
    assert!(!engine.keeps_history());
    let src = engine.new_image(4, 4, ImageType::Regular);
    engine.write_pixels(src, Some(&solid(GREEN, 16)), Region::from_size(4, 4));
    let dst = engine.new_image(4, 4, ImageType::Regular);
    draw_copy(&mut engine, dst, src);
    engine.swap_buffers().unwrap();
    assert_eq!(engine.driver().stats().read_pixels_calls, 0);

    let mut recorded = [1; 64];
    engine.read_recorded_pixels(src, &mut recorded, Region::from_size(4, 4));
    assert_eq!(recorded, [0; 64], "nothing was recorded");

    //still stale here, yet nothing is expected to survive
    draw_copy(&mut engine, dst, src);
    engine.driver_mut().lose_device();
    engine.restore().unwrap();
    let mut pixels = [1; 64];
    engine.read_pixels(dst, &mut pixels, Region::from_size(4, 4)).unwrap();
    assert_eq!(pixels, [0; 64]);
}

#[test]
fn configuration_overrides_the_backend() {
    let engine = engine_with(
        SoftwareGraphics::new().with_needs_restoring(false),
        EngineConfig {
            restoring: Some(true),
            ..Default::default()
        },
    );
    assert!(engine.keeps_history());
}

#[test]
fn discarded_history_reads_as_transparent() {
    let mut engine = engine();
    let image = engine.new_image(4, 4, ImageType::Regular);
    engine.write_pixels(image, Some(&solid(GREEN, 16)), Region::from_size(4, 4));
    engine.swap_buffers().unwrap();
    engine.discard_recorded_pixels(image, Region::from_size(4, 4));

    let mut recorded = [1; 64];
    engine.read_recorded_pixels(image, &mut recorded, Region::from_size(4, 4));
    assert_eq!(recorded, [0; 64]);
}

#[test]
fn extended_images_do_not_depend_on_their_originals() {
    let mut engine = engine();
    engine.set_dependency_tracker(Box::new(DrawSourceDependencies::default()));
    let small = engine.new_image(2, 2, ImageType::Regular);
    engine.write_pixels(small, Some(&solid(GREEN, 4)), Region::from_size(2, 2));
    engine.swap_buffers().unwrap();
    let large = engine.extend(small, 4, 4);
    assert!(!engine.is_stale(large));
    engine.swap_buffers().unwrap();
    assert_eq!(engine.driver().stats().read_pixels_calls, 0);
}

#[test]
fn dependents_are_captured_before_their_source_changes() {
    let mut engine = engine();
    engine.set_dependency_tracker(Box::new(DrawSourceDependencies::default()));
    let src = engine.new_image(4, 4, ImageType::Regular);
    engine.write_pixels(src, Some(&solid(GREEN, 16)), Region::from_size(4, 4));
    let dst = engine.new_image(4, 4, ImageType::Regular);
    draw_copy(&mut engine, dst, src);

    // the source changes in the same frame; dst already holds the old result
    engine.clear_pixels(src, Region::from_size(4, 4));
    assert!(engine.is_stale(dst));
    engine.swap_buffers().unwrap();

    engine.driver_mut().lose_device();
    engine.restore().unwrap();
    let mut pixels = [0; 64];
    engine.read_pixels(dst, &mut pixels, Region::from_size(4, 4)).unwrap();
    assert_eq!(pixels.to_vec(), solid(GREEN, 16));
    engine.read_pixels(src, &mut pixels, Region::from_size(4, 4)).unwrap();
    assert_eq!(pixels, [0; 64]);
}
