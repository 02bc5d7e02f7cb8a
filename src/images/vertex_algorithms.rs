// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Implements common vertex algorithms.

# Example

```
use restorable_images::images::vertex_algorithms::{QUAD_INDICES, quad_vertices};
use restorable_images::driver::VERTEX_FLOAT_COUNT;

// copy a 16x16 source to (8,8)..(24,24), untinted
let vertices = quad_vertices([8.0, 8.0, 24.0, 24.0], [0.0, 0.0, 16.0, 16.0], [1.0; 4]);
assert_eq!(vertices.len(), 4 * VERTEX_FLOAT_COUNT);
assert_eq!(QUAD_INDICES.len(), 6);
```
*/

use crate::driver::VERTEX_FLOAT_COUNT;

/**
Indices drawing the output of [quad_vertices] as two triangles.

```text
 0 ─────── 1
 │       ╱ │
 │  0  ╱   │
 │   ╱  1  │
 │ ╱       │
 2 ─────── 3
```
*/
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 1, 2, 3];

/**
Vertices for an axis-aligned quad.

`dst` and `src` are `[x0, y0, x1, y1]` in destination pixels and source texels.
`color` is a premultiplied color scale.
*/
pub fn quad_vertices(dst: [f32; 4], src: [f32; 4], color: [f32; 4]) -> [f32; 4 * VERTEX_FLOAT_COUNT] {
    let [dx0, dy0, dx1, dy1] = dst;
    let [sx0, sy0, sx1, sy1] = src;
    let [r, g, b, a] = color;
    [
        dx0, dy0, sx0, sy0, r, g, b, a, //
        dx1, dy0, sx1, sy0, r, g, b, a, //
        dx0, dy1, sx0, sy1, r, g, b, a, //
        dx1, dy1, sx1, sy1, r, g, b, a,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corners() {
        let v = quad_vertices([1.0, 2.0, 3.0, 4.0], [5.0, 6.0, 7.0, 8.0], [0.5; 4]);
        let corner = |i: usize| (v[i * VERTEX_FLOAT_COUNT], v[i * VERTEX_FLOAT_COUNT + 1]);
        assert_eq!(corner(0), (1.0, 2.0));
        assert_eq!(corner(1), (3.0, 2.0));
        assert_eq!(corner(2), (1.0, 4.0));
        assert_eq!(corner(3), (3.0, 4.0));
        assert_eq!(v[3 * VERTEX_FLOAT_COUNT + 2], 7.0);
        assert_eq!(v[VERTEX_FLOAT_COUNT - 1], 0.5);
    }
}
