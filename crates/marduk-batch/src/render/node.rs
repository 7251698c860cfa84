use crate::coords::{ColorRgba, Mat4, Rect, Vec2};
use crate::driver::TextureId;

/// Scene tree consumed by [`RenderJob`](super::RenderJob).
///
/// Bounds are in the node's local coordinate space. Containers cache the
/// union of their children's bounds.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderNode {
    Container { bounds: Rect, children: Vec<RenderNode> },
    /// Wraps its child in a driver debug group.
    Debug { message: String, child: Box<RenderNode> },
    Offset { offset: Vec2, child: Box<RenderNode> },
    Transform { transform: Mat4, child: Box<RenderNode> },
    Clip { clip: Rect, child: Box<RenderNode> },
    Color { bounds: Rect, color: ColorRgba },
    Texture { bounds: Rect, texture: TextureId },
}

impl RenderNode {
    pub fn container(children: Vec<RenderNode>) -> Self {
        let bounds = children
            .iter()
            .map(RenderNode::bounds)
            .reduce(Rect::union)
            .unwrap_or_else(Rect::zero);
        Self::Container { bounds, children }
    }

    pub fn debug(message: impl Into<String>, child: RenderNode) -> Self {
        Self::Debug { message: message.into(), child: Box::new(child) }
    }

    pub fn offset(dx: f32, dy: f32, child: RenderNode) -> Self {
        Self::Offset { offset: Vec2::new(dx, dy), child: Box::new(child) }
    }

    pub fn transform(transform: Mat4, child: RenderNode) -> Self {
        Self::Transform { transform, child: Box::new(child) }
    }

    pub fn clip(clip: Rect, child: RenderNode) -> Self {
        Self::Clip { clip, child: Box::new(child) }
    }

    pub fn color(bounds: Rect, color: ColorRgba) -> Self {
        Self::Color { bounds, color }
    }

    pub fn texture(bounds: Rect, texture: TextureId) -> Self {
        Self::Texture { bounds, texture }
    }

    /// Bounds in the parent's coordinate space.
    pub fn bounds(&self) -> Rect {
        match self {
            Self::Container { bounds, .. } | Self::Color { bounds, .. } | Self::Texture { bounds, .. } => *bounds,
            Self::Debug { child, .. } => child.bounds(),
            Self::Offset { offset, child } => child.bounds().offset(*offset),
            Self::Transform { transform, child } => transform.transform_bounds(child.bounds()),
            Self::Clip { clip, child } => clip.intersect(child.bounds()).unwrap_or_else(Rect::zero),
        }
    }

    /// Zero or NaN extent: nothing to draw.
    #[inline]
    pub fn is_invisible(&self) -> bool {
        self.bounds().is_invisible()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_bounds_are_union_of_children() {
        let tree = RenderNode::container(vec![
            RenderNode::color(Rect::new(0.0, 0.0, 10.0, 10.0), ColorRgba::white()),
            RenderNode::offset(20.0, 0.0, RenderNode::color(Rect::new(0.0, 0.0, 5.0, 5.0), ColorRgba::black())),
        ]);
        assert_eq!(tree.bounds(), Rect::new(0.0, 0.0, 25.0, 10.0));
    }

    #[test]
    fn empty_container_is_invisible() {
        assert!(RenderNode::container(Vec::new()).is_invisible());
    }

    #[test]
    fn disjoint_clip_is_invisible() {
        let node = RenderNode::clip(
            Rect::new(100.0, 100.0, 5.0, 5.0),
            RenderNode::color(Rect::new(0.0, 0.0, 10.0, 10.0), ColorRgba::white()),
        );
        assert!(node.is_invisible());
    }
}
