use super::{Rect, Vec2};

/// Rectangle with elliptical corners.
///
/// Corners are ordered top-left, top-right, bottom-right, bottom-left; each
/// corner is a `(width, height)` radius pair.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct RoundedRect {
    pub bounds: Rect,
    pub corners: [Vec2; 4],
}

impl RoundedRect {
    #[inline]
    pub const fn new(bounds: Rect, corners: [Vec2; 4]) -> Self {
        Self { bounds, corners }
    }

    /// Rounded rect with square corners.
    #[inline]
    pub const fn from_rect(bounds: Rect) -> Self {
        Self {
            bounds,
            corners: [Vec2::zero(); 4],
        }
    }

    /// True when every corner is square.
    pub fn is_rectilinear(&self) -> bool {
        self.corners.iter().all(|c| c.is_zero())
    }

    /// Uniform encoding: `[x, y, w, h]` followed by the four corner pairs.
    ///
    /// The first four floats form the "bounds" part that is always uploaded;
    /// the remaining eight are only sent when a corner changed.
    pub fn to_uniform(&self) -> [f32; 12] {
        let b = self.bounds;
        let c = self.corners;
        [
            b.origin.x, b.origin.y, b.size.x, b.size.y,
            c[0].x, c[0].y, c[1].x, c[1].y,
            c[2].x, c[2].y, c[3].x, c[3].y,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_layout_is_bounds_then_corners() {
        let rr = RoundedRect::new(
            Rect::new(1.0, 2.0, 3.0, 4.0),
            [Vec2::new(5.0, 6.0), Vec2::new(7.0, 8.0), Vec2::new(9.0, 10.0), Vec2::new(11.0, 12.0)],
        );
        let u = rr.to_uniform();
        assert_eq!(&u[..4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&u[4..], &[5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        assert!(!rr.is_rectilinear());
        assert!(RoundedRect::from_rect(rr.bounds).is_rectilinear());
    }
}
