use core::ops::{Add, AddAssign, Neg, Sub, SubAssign};

/// 2D point or extent. Units depend on the space it lives in: node
/// coordinates inside the render job, device pixels after the modelview.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    #[inline]
    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }

    /// Component-wise minimum.
    #[inline]
    pub fn min(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x.min(other.x), self.y.min(other.y))
    }

    /// Component-wise maximum.
    #[inline]
    pub fn max(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x.max(other.x), self.y.max(other.y))
    }
}

macro_rules! componentwise {
    ($op:ident, $f:ident, $assign:ident, $fa:ident, $sym:tt) => {
        impl $op for Vec2 {
            type Output = Vec2;
            #[inline]
            fn $f(self, rhs: Vec2) -> Vec2 {
                Vec2::new(self.x $sym rhs.x, self.y $sym rhs.y)
            }
        }

        impl $assign for Vec2 {
            #[inline]
            fn $fa(&mut self, rhs: Vec2) {
                *self = *self $sym rhs;
            }
        }
    };
}

componentwise!(Add, add, AddAssign, add_assign, +);
componentwise!(Sub, sub, SubAssign, sub_assign, -);

impl Neg for Vec2 {
    type Output = Vec2;
    #[inline]
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_accumulate_and_unwind() {
        let mut offset = Vec2::zero();
        offset += Vec2::new(5.0, 7.0);
        offset += Vec2::new(1.0, -2.0);
        offset -= Vec2::new(1.0, -2.0);
        assert_eq!(offset, Vec2::new(5.0, 7.0));
        assert_eq!(-offset, Vec2::new(-5.0, -7.0));
    }

    #[test]
    fn min_max_are_componentwise() {
        let a = Vec2::new(1.0, 8.0);
        let b = Vec2::new(4.0, 2.0);
        assert_eq!(a.min(b), Vec2::new(1.0, 2.0));
        assert_eq!(a.max(b), Vec2::new(4.0, 8.0));
    }
}
