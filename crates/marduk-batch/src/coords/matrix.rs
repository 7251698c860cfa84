use core::ops::Mul;

use super::{Rect, Vec2};

/// Column-major 4x4 matrix, laid out like a `mat4x4<f32>` uniform.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Mat4 {
    pub cols: [[f32; 4]; 4],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mat4 {
    #[inline]
    pub const fn identity() -> Self {
        Self {
            cols: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    #[inline]
    pub const fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::identity();
        m.cols[3] = [x, y, z, 1.0];
        m
    }

    #[inline]
    pub const fn scale(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::identity();
        m.cols[0][0] = x;
        m.cols[1][1] = y;
        m.cols[2][2] = z;
        m
    }

    /// Orthographic projection.
    ///
    /// `top` and `bottom` are passed in screen order, so `top < bottom` maps
    /// a y-down rectangle to y-up clip space.
    pub fn ortho(left: f32, right: f32, top: f32, bottom: f32, near: f32, far: f32) -> Self {
        let w = right - left;
        let h = top - bottom;
        let d = far - near;
        Self {
            cols: [
                [2.0 / w, 0.0, 0.0, 0.0],
                [0.0, 2.0 / h, 0.0, 0.0],
                [0.0, 0.0, -2.0 / d, 0.0],
                [-(right + left) / w, -(top + bottom) / h, -(far + near) / d, 1.0],
            ],
        }
    }

    pub fn transform_point(&self, p: Vec2) -> Vec2 {
        let c = &self.cols;
        let x = c[0][0] * p.x + c[1][0] * p.y + c[3][0];
        let y = c[0][1] * p.x + c[1][1] * p.y + c[3][1];
        let w = c[0][3] * p.x + c[1][3] * p.y + c[3][3];
        if w != 0.0 && w != 1.0 {
            Vec2::new(x / w, y / w)
        } else {
            Vec2::new(x, y)
        }
    }

    /// Axis-aligned bounds of the transformed corners of `rect`.
    pub fn transform_bounds(&self, rect: Rect) -> Rect {
        let r = rect.normalized();
        let max = r.max();
        let pts = [
            self.transform_point(r.origin),
            self.transform_point(Vec2::new(max.x, r.origin.y)),
            self.transform_point(max),
            self.transform_point(Vec2::new(r.origin.x, max.y)),
        ];
        let mut min_p = pts[0];
        let mut max_p = pts[0];
        for p in &pts[1..] {
            min_p = min_p.min(*p);
            max_p = max_p.max(*p);
        }
        Rect::new(min_p.x, min_p.y, max_p.x - min_p.x, max_p.y - min_p.y)
    }
}

impl Mul for Mat4 {
    type Output = Mat4;

    /// `self * rhs`: `rhs` is applied first.
    fn mul(self, rhs: Mat4) -> Mat4 {
        let mut out = [[0.0f32; 4]; 4];
        for (col, out_col) in out.iter_mut().enumerate() {
            for (row, cell) in out_col.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.cols[k][row] * rhs.cols[col][k]).sum();
            }
        }
        Mat4 { cols: out }
    }
}
