use super::Vec2;

/// Axis-aligned rectangle (top-left origin).
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Rect {
    pub origin: Vec2,
    pub size: Vec2,
}

impl Rect {
    #[inline]
    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self {
            origin: Vec2::new(x, y),
            size: Vec2::new(w, h),
        }
    }

    #[inline]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    #[inline]
    pub fn max(self) -> Vec2 {
        Vec2::new(self.origin.x + self.size.x, self.origin.y + self.size.y)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.size.x <= 0.0 || self.size.y <= 0.0
    }

    /// A rectangle with a zero or NaN extent draws nothing.
    ///
    /// Negative extents are still considered visible; they are normalized
    /// before use.
    #[inline]
    pub fn is_invisible(self) -> bool {
        self.size.x == 0.0 || self.size.y == 0.0 || self.size.x.is_nan() || self.size.y.is_nan()
    }

    /// Normalizes the rectangle so width/height are non-negative.
    #[inline]
    pub fn normalized(self) -> Self {
        let mut x = self.origin.x;
        let mut y = self.origin.y;
        let mut w = self.size.x;
        let mut h = self.size.y;

        if w < 0.0 {
            x += w;
            w = -w;
        }
        if h < 0.0 {
            y += h;
            h = -h;
        }

        Rect::new(x, y, w, h)
    }

    #[inline]
    pub fn offset(self, by: Vec2) -> Self {
        Self {
            origin: self.origin + by,
            size: self.size,
        }
    }

    /// Inclusive overlap test used for culling.
    ///
    /// Touching edges count as overlapping, so a node sitting exactly on the
    /// clip border is still drawn.
    #[inline]
    pub fn intersects(self, other: Rect) -> bool {
        let a = self.normalized();
        let b = other.normalized();
        let a_max = a.max();
        let b_max = b.max();

        a.origin.x <= b_max.x && b.origin.x <= a_max.x && a.origin.y <= b_max.y && b.origin.y <= a_max.y
    }

    /// Strict intersection; `None` when the overlap has no area.
    #[inline]
    pub fn intersect(self, other: Rect) -> Option<Rect> {
        let a = self.normalized();
        let b = other.normalized();

        let x0 = a.origin.x.max(b.origin.x);
        let y0 = a.origin.y.max(b.origin.y);
        let x1 = (a.origin.x + a.size.x).min(b.origin.x + b.size.x);
        let y1 = (a.origin.y + a.size.y).min(b.origin.y + b.size.y);

        let w = x1 - x0;
        let h = y1 - y0;

        if w <= 0.0 || h <= 0.0 {
            None
        } else {
            Some(Rect::new(x0, y0, w, h))
        }
    }

    /// Smallest rectangle containing both.
    pub fn union(self, other: Rect) -> Rect {
        let a = self.normalized();
        let b = other.normalized();
        let x0 = a.origin.x.min(b.origin.x);
        let y0 = a.origin.y.min(b.origin.y);
        let x1 = a.max().x.max(b.max().x);
        let y1 = a.max().y.max(b.max().y);
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: f32, y: f32, w: f32, h: f32) -> Rect { Rect::new(x, y, w, h) }

    // ── normalized ────────────────────────────────────────────────────────

    #[test]
    fn normalized_negative_extents() {
        let n = r(10.0, 10.0, -4.0, -3.0).normalized();
        assert_eq!(n, r(6.0, 7.0, 4.0, 3.0));
    }

    // ── is_invisible ──────────────────────────────────────────────────────

    #[test]
    fn zero_or_nan_extent_is_invisible() {
        assert!(r(0.0, 0.0, 0.0, 5.0).is_invisible());
        assert!(r(0.0, 0.0, 5.0, 0.0).is_invisible());
        assert!(r(0.0, 0.0, f32::NAN, 5.0).is_invisible());
        assert!(!r(0.0, 0.0, -5.0, 5.0).is_invisible());
        assert!(!r(0.0, 0.0, 1.0, 1.0).is_invisible());
    }

    // ── intersects ────────────────────────────────────────────────────────

    #[test]
    fn intersects_counts_touching_edges() {
        let a = r(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(r(10.0, 0.0, 10.0, 10.0)));
        assert!(a.intersects(r(10.0, 10.0, 1.0, 1.0)));
        assert!(!a.intersects(r(10.5, 0.0, 10.0, 10.0)));
    }

    // ── intersect ─────────────────────────────────────────────────────────

    #[test]
    fn intersect_overlapping() {
        let a = r(0.0, 0.0, 10.0, 10.0);
        let b = r(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.intersect(b), Some(r(5.0, 5.0, 5.0, 5.0)));
    }

    #[test]
    fn intersect_touching_edge_returns_none() {
        let a = r(0.0, 0.0, 10.0, 10.0);
        let b = r(10.0, 0.0, 10.0, 10.0);
        assert!(a.intersect(b).is_none());
    }

    // ── union / offset / scale ────────────────────────────────────────────

    #[test]
    fn union_covers_both() {
        let u = r(0.0, 0.0, 5.0, 5.0).union(r(10.0, -2.0, 5.0, 5.0));
        assert_eq!(u, r(0.0, -2.0, 15.0, 7.0));
    }

    #[test]
    fn offset_moves_origin_only() {
        let moved = r(1.0, 2.0, 3.0, 4.0).offset(Vec2::new(10.0, 20.0));
        assert_eq!(moved, r(11.0, 22.0, 3.0, 4.0));
    }
}
