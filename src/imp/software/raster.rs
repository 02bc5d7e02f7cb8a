// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A small triangle rasterizer for premultiplied RGBA8 images.

Pixels are sampled at their centers.  Edges follow the top-left rule, so two
triangles sharing an edge never both cover a pixel on it.
*/

use crate::coordinates::Region;
use crate::driver::{
    Blend, BlendFactor, BlendOperation, BuiltinShader, FillRule, SHADER_SRC_IMAGE_COUNT,
    VERTEX_FLOAT_COUNT,
};
use crate::pixel_formats::{BYTES_PER_PIXEL, f32_to_unorm, unorm_to_f32};

type Rgba = [f32; 4];

pub(super) struct Target<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a mut [u8],
}

#[derive(Clone, Copy)]
pub(super) struct Source<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [u8],
}

impl Source<'_> {
    fn texel(&self, x: i32, y: i32) -> Rgba {
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let p = &self.pixels[offset..offset + BYTES_PER_PIXEL];
        [
            unorm_to_f32(p[0]),
            unorm_to_f32(p[1]),
            unorm_to_f32(p[2]),
            unorm_to_f32(p[3]),
        ]
    }
}

pub(super) struct Draw<'a> {
    pub shader: BuiltinShader,
    pub srcs: [Option<Source<'a>>; SHADER_SRC_IMAGE_COUNT],
    pub src_regions: [Region; SHADER_SRC_IMAGE_COUNT],
    pub vertices: &'a [f32],
    pub indices: &'a [u32],
    pub blend: Blend,
    pub dst_region: Region,
    pub fill_rule: FillRule,
}

#[derive(Clone, Copy)]
struct Vertex {
    x: f64,
    y: f64,
    src: [f32; 2],
    color: Rgba,
}

impl Vertex {
    fn read(vertices: &[f32], index: u32) -> Vertex {
        let v = &vertices[index as usize * VERTEX_FLOAT_COUNT..(index as usize + 1) * VERTEX_FLOAT_COUNT];
        Vertex {
            x: v[0] as f64,
            y: v[1] as f64,
            src: [v[2], v[3]],
            color: [v[4], v[5], v[6], v[7]],
        }
    }
}

fn edge(a: &Vertex, b: &Vertex, px: f64, py: f64) -> f64 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

fn is_top_left(a: &Vertex, b: &Vertex) -> bool {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    (dy == 0.0 && dx > 0.0) || dy < 0.0
}

struct Triangle {
    v: [Vertex; 3],
    area: f64,
    /// +1 for clockwise on screen, -1 otherwise.
    winding: i32,
}

impl Triangle {
    fn new(a: Vertex, b: Vertex, c: Vertex) -> Option<Triangle> {
        let area = edge(&a, &b, c.x, c.y);
        if area == 0.0 {
            None
        } else if area > 0.0 {
            Some(Triangle { v: [a, b, c], area, winding: 1 })
        } else {
            Some(Triangle { v: [a, c, b], area: -area, winding: -1 })
        }
    }

    /// Pixels whose centers may be covered, clipped to `clip`.
    fn bounds(&self, clip: &Region) -> Option<Region> {
        let xs = self.v.map(|v| v.x);
        let ys = self.v.map(|v| v.y);
        let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min).floor() as i32;
        let min_y = ys.iter().copied().fold(f64::INFINITY, f64::min).floor() as i32;
        let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max).ceil() as i32;
        let max_y = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max).ceil() as i32;
        Region::new(min_x, min_y, max_x, max_y).intersect(clip)
    }

    /// Barycentric weights of the center of pixel `(x, y)`, if covered.
    fn cover(&self, x: i32, y: i32) -> Option<[f64; 3]> {
        let px = x as f64 + 0.5;
        let py = y as f64 + 0.5;
        let [a, b, c] = &self.v;
        let w0 = edge(b, c, px, py);
        let w1 = edge(c, a, px, py);
        let w2 = edge(a, b, px, py);
        let inside = |w: f64, from: &Vertex, to: &Vertex| w > 0.0 || (w == 0.0 && is_top_left(from, to));
        if inside(w0, b, c) && inside(w1, c, a) && inside(w2, a, b) {
            Some([w0 / self.area, w1 / self.area, w2 / self.area])
        } else {
            None
        }
    }

    fn interpolate(&self, weights: [f64; 3]) -> ([f32; 2], Rgba) {
        let mut src = [0.0f32; 2];
        let mut color = [0.0f32; 4];
        for (vertex, weight) in self.v.iter().zip(weights) {
            let weight = weight as f32;
            for (s, v) in src.iter_mut().zip(vertex.src) {
                *s += v * weight;
            }
            for (c, v) in color.iter_mut().zip(vertex.color) {
                *c += v * weight;
            }
        }
        (src, color)
    }
}

fn sample_bounds(source: &Source<'_>, region: Region) -> Region {
    let whole = Region::from_size(source.width as i32, source.height as i32);
    if region.is_empty() {
        whole
    } else {
        region.intersect(&whole).unwrap_or(whole)
    }
}

fn nearest(source: &Source<'_>, bounds: &Region, pos: [f32; 2]) -> Rgba {
    let x = (pos[0].floor() as i32).clamp(bounds.min.x, bounds.max.x - 1);
    let y = (pos[1].floor() as i32).clamp(bounds.min.y, bounds.max.y - 1);
    source.texel(x, y)
}

fn linear(source: &Source<'_>, bounds: &Region, pos: [f32; 2]) -> Rgba {
    let fx = pos[0] - 0.5;
    let fy = pos[1] - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let tx = fx - x0;
    let ty = fy - y0;
    let clamp_x = |x: i32| x.clamp(bounds.min.x, bounds.max.x - 1);
    let clamp_y = |y: i32| y.clamp(bounds.min.y, bounds.max.y - 1);
    let (x0, y0) = (x0 as i32, y0 as i32);
    let t00 = source.texel(clamp_x(x0), clamp_y(y0));
    let t10 = source.texel(clamp_x(x0 + 1), clamp_y(y0));
    let t01 = source.texel(clamp_x(x0), clamp_y(y0 + 1));
    let t11 = source.texel(clamp_x(x0 + 1), clamp_y(y0 + 1));
    let mut out = [0.0; 4];
    for c in 0..4 {
        let top = t00[c] * (1.0 - tx) + t10[c] * tx;
        let bottom = t01[c] * (1.0 - tx) + t11[c] * tx;
        out[c] = top * (1.0 - ty) + bottom * ty;
    }
    out
}

fn fragment(draw: &Draw<'_>, src: [f32; 2], color: Rgba) -> Rgba {
    let texel = match (draw.shader, draw.srcs[0]) {
        (BuiltinShader::Clear, _) => return [0.0; 4],
        //untextured draws behave as if sampling white
        (_, None) => [1.0; 4],
        (BuiltinShader::Nearest, Some(source)) => {
            nearest(&source, &sample_bounds(&source, draw.src_regions[0]), src)
        }
        (BuiltinShader::Linear, Some(source)) => {
            linear(&source, &sample_bounds(&source, draw.src_regions[0]), src)
        }
    };
    [
        texel[0] * color[0],
        texel[1] * color[1],
        texel[2] * color[2],
        texel[3] * color[3],
    ]
}

fn factor(factor: BlendFactor, src: &Rgba, dst: &Rgba, channel: usize) -> f32 {
    match factor {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SourceColor => src[channel],
        BlendFactor::OneMinusSourceColor => 1.0 - src[channel],
        BlendFactor::SourceAlpha => src[3],
        BlendFactor::OneMinusSourceAlpha => 1.0 - src[3],
        BlendFactor::DestinationColor => dst[channel],
        BlendFactor::OneMinusDestinationColor => 1.0 - dst[channel],
        BlendFactor::DestinationAlpha => dst[3],
        BlendFactor::OneMinusDestinationAlpha => 1.0 - dst[3],
    }
}

fn operate(op: BlendOperation, s: f32, d: f32, raw_s: f32, raw_d: f32) -> f32 {
    match op {
        BlendOperation::Add => s + d,
        BlendOperation::Subtract => s - d,
        BlendOperation::ReverseSubtract => d - s,
        //factors do not apply to min/max
        BlendOperation::Min => raw_s.min(raw_d),
        BlendOperation::Max => raw_s.max(raw_d),
    }
}

fn blend(blend: &Blend, src: &Rgba, dst: &Rgba) -> Rgba {
    let mut out = [0.0; 4];
    for (c, out) in out.iter_mut().enumerate() {
        let (sf, df, op) = if c < 3 {
            (blend.src_rgb, blend.dst_rgb, blend.op_rgb)
        } else {
            (blend.src_alpha, blend.dst_alpha, blend.op_alpha)
        };
        let s = src[c] * factor(sf, src, dst, c);
        let d = dst[c] * factor(df, src, dst, c);
        *out = operate(op, s, d, src[c], dst[c]);
    }
    out
}

fn shade(target: &mut Target<'_>, draw: &Draw<'_>, triangle: &Triangle, x: i32, y: i32, weights: [f64; 3]) {
    let (src, color) = triangle.interpolate(weights);
    let fragment = fragment(draw, src, color);
    let offset = (y as usize * target.width as usize + x as usize) * BYTES_PER_PIXEL;
    let pixel = &mut target.pixels[offset..offset + BYTES_PER_PIXEL];
    let current = [
        unorm_to_f32(pixel[0]),
        unorm_to_f32(pixel[1]),
        unorm_to_f32(pixel[2]),
        unorm_to_f32(pixel[3]),
    ];
    let result = blend(&draw.blend, &fragment, &current);
    for (p, r) in pixel.iter_mut().zip(result) {
        *p = f32_to_unorm(r);
    }
}

/// Rasterizes `draw` into `target`, clipped to the draw's destination region.
pub(super) fn draw_triangles(target: &mut Target<'_>, draw: &Draw<'_>) {
    let Some(clip) = draw
        .dst_region
        .intersect(&Region::from_size(target.width as i32, target.height as i32))
    else {
        return;
    };
    let triangles: Vec<Triangle> = draw
        .indices
        .chunks_exact(3)
        .filter_map(|i| {
            Triangle::new(
                Vertex::read(draw.vertices, i[0]),
                Vertex::read(draw.vertices, i[1]),
                Vertex::read(draw.vertices, i[2]),
            )
        })
        .collect();

    match draw.fill_rule {
        FillRule::FillAll => {
            for triangle in &triangles {
                let Some(bounds) = triangle.bounds(&clip) else {
                    continue;
                };
                for y in bounds.min.y..bounds.max.y {
                    for x in bounds.min.x..bounds.max.x {
                        if let Some(weights) = triangle.cover(x, y) {
                            shade(target, draw, triangle, x, y, weights);
                        }
                    }
                }
            }
        }
        FillRule::NonZero | FillRule::EvenOdd => {
            let width = clip.width() as usize;
            let mut winding = vec![0i32; clip.area()];
            let mut first: Vec<Option<(usize, [f64; 3])>> = vec![None; clip.area()];
            for (t, triangle) in triangles.iter().enumerate() {
                let Some(bounds) = triangle.bounds(&clip) else {
                    continue;
                };
                for y in bounds.min.y..bounds.max.y {
                    for x in bounds.min.x..bounds.max.x {
                        if let Some(weights) = triangle.cover(x, y) {
                            let i = (y - clip.min.y) as usize * width + (x - clip.min.x) as usize;
                            winding[i] += triangle.winding;
                            first[i].get_or_insert((t, weights));
                        }
                    }
                }
            }
            for y in clip.min.y..clip.max.y {
                for x in clip.min.x..clip.max.x {
                    let i = (y - clip.min.y) as usize * width + (x - clip.min.x) as usize;
                    let filled = match draw.fill_rule {
                        FillRule::EvenOdd => winding[i] % 2 != 0,
                        _ => winding[i] != 0,
                    };
                    if let (true, Some((t, weights))) = (filled, first[i]) {
                        shade(target, draw, &triangles[t], x, y, weights);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::vertex_algorithms::{QUAD_INDICES, quad_vertices};

    fn draw<'a>(vertices: &'a [f32], indices: &'a [u32], blend: Blend, fill_rule: FillRule) -> Draw<'a> {
        Draw {
            shader: BuiltinShader::Nearest,
            srcs: [None; SHADER_SRC_IMAGE_COUNT],
            src_regions: [Region::default(); SHADER_SRC_IMAGE_COUNT],
            vertices,
            indices,
            blend,
            dst_region: Region::from_size(4, 4),
            fill_rule,
        }
    }

    fn alpha_at(pixels: &[u8], width: usize, x: usize, y: usize) -> u8 {
        pixels[(y * width + x) * 4 + 3]
    }

    #[test]
    fn quad_covers_each_pixel_once() {
        let mut pixels = vec![0u8; 4 * 4 * 4];
        let vertices = quad_vertices([0.0, 0.0, 4.0, 4.0], [0.0; 4], [0.5; 4]);
        let mut target = Target { width: 4, height: 4, pixels: &mut pixels };
        draw_triangles(&mut target, &draw(&vertices, &QUAD_INDICES, Blend::SOURCE_OVER, FillRule::FillAll));
        // a pixel covered twice would end up at 0.75
        assert!(pixels.chunks(4).all(|p| p[3] == 128), "{pixels:?}");
    }

    #[test]
    fn clipped_to_destination_region() {
        let mut pixels = vec![0u8; 4 * 4 * 4];
        let vertices = quad_vertices([0.0, 0.0, 4.0, 4.0], [0.0; 4], [1.0; 4]);
        let mut d = draw(&vertices, &QUAD_INDICES, Blend::COPY, FillRule::FillAll);
        d.dst_region = Region::new(1, 1, 3, 3);
        let mut target = Target { width: 4, height: 4, pixels: &mut pixels };
        draw_triangles(&mut target, &d);
        assert_eq!(alpha_at(&pixels, 4, 0, 0), 0);
        assert_eq!(alpha_at(&pixels, 4, 1, 1), 255);
        assert_eq!(alpha_at(&pixels, 4, 3, 2), 0);
    }

    #[test]
    fn nearest_copies_texels() {
        let src_pixels: Vec<u8> = (0..4u8).flat_map(|i| [i * 10, 0, 0, 255]).collect();
        let source = Source { width: 2, height: 2, pixels: &src_pixels };
        let mut pixels = vec![0u8; 2 * 2 * 4];
        let vertices = quad_vertices([0.0, 0.0, 2.0, 2.0], [0.0, 0.0, 2.0, 2.0], [1.0; 4]);
        let mut d = draw(&vertices, &QUAD_INDICES, Blend::COPY, FillRule::FillAll);
        d.srcs[0] = Some(source);
        d.dst_region = Region::from_size(2, 2);
        let mut target = Target { width: 2, height: 2, pixels: &mut pixels };
        draw_triangles(&mut target, &d);
        assert_eq!(pixels, src_pixels);
    }

    #[test]
    fn overlapping_quads_fill_rules() {
        // the same quad twice, both wound the same way
        let quad = quad_vertices([0.0, 0.0, 2.0, 2.0], [0.0; 4], [0.5; 4]);
        let vertices: Vec<f32> = quad.iter().chain(quad.iter()).copied().collect();
        let indices: Vec<u32> = QUAD_INDICES
            .iter()
            .copied()
            .chain(QUAD_INDICES.iter().map(|i| i + 4))
            .collect();

        let mut pixels = vec![0u8; 4 * 4 * 4];
        let mut target = Target { width: 4, height: 4, pixels: &mut pixels };
        draw_triangles(&mut target, &draw(&vertices, &indices, Blend::SOURCE_OVER, FillRule::NonZero));
        assert_eq!(alpha_at(&pixels, 4, 0, 0), 128, "drawn once");

        let mut pixels = vec![0u8; 4 * 4 * 4];
        let mut target = Target { width: 4, height: 4, pixels: &mut pixels };
        draw_triangles(&mut target, &draw(&vertices, &indices, Blend::SOURCE_OVER, FillRule::EvenOdd));
        assert_eq!(alpha_at(&pixels, 4, 0, 0), 0, "even winding is a hole");

        let mut pixels = vec![0u8; 4 * 4 * 4];
        let mut target = Target { width: 4, height: 4, pixels: &mut pixels };
        draw_triangles(&mut target, &draw(&vertices, &indices, Blend::SOURCE_OVER, FillRule::FillAll));
        assert!(alpha_at(&pixels, 4, 0, 0) > 128, "drawn twice");
    }

    #[test]
    fn clear_shader_writes_transparent() {
        let mut pixels = vec![200u8; 2 * 2 * 4];
        let vertices = quad_vertices([0.0, 0.0, 2.0, 2.0], [0.0; 4], [0.0; 4]);
        let mut d = draw(&vertices, &QUAD_INDICES, Blend::CLEAR, FillRule::FillAll);
        d.shader = BuiltinShader::Clear;
        let mut target = Target { width: 2, height: 2, pixels: &mut pixels };
        draw_triangles(&mut target, &d);
        assert!(pixels.iter().all(|p| *p == 0));
    }
}
