// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Integer and float geometry used by surfaces.

All surfaces use the same logical coordinate system regardless of how their backing
texture is stored:

```text
           x
      0 ────────▶
      │ ┌───────┐
    y │ │       │
      │ │       │
      │ │       │
      ▼ └───────┘
```

Bottom-left storage is handled at the device boundary by flipping rows.
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IPoint {
    pub x: i32,
    pub y: i32,
}

impl IPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        IPoint { x, y }
    }
    pub const fn is_zero(&self) -> bool {
        self.x == 0 && self.y == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ISize {
    pub width: i32,
    pub height: i32,
}

impl ISize {
    pub const fn new(width: i32, height: i32) -> Self {
        ISize { width, height }
    }
    /// True if either dimension is zero or negative.
    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
    pub const fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}

/// Half-open integer rectangle: `left..right` by `top..bottom`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IRect {
    pub const fn from_ltrb(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        IRect {
            left,
            top,
            right,
            bottom,
        }
    }
    /// Edges past `i32::MAX` saturate, so far-off rectangles stay far off instead of wrapping.
    pub const fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        IRect::from_ltrb(x, y, x.saturating_add(width), y.saturating_add(height))
    }
    pub const fn from_size(size: ISize) -> Self {
        IRect::from_xywh(0, 0, size.width, size.height)
    }
    pub const fn from_pt_size(pt: IPoint, size: ISize) -> Self {
        IRect::from_xywh(pt.x, pt.y, size.width, size.height)
    }
    pub const fn x(&self) -> i32 {
        self.left
    }
    pub const fn y(&self) -> i32 {
        self.top
    }
    pub const fn width(&self) -> i32 {
        self.right.saturating_sub(self.left)
    }
    pub const fn height(&self) -> i32 {
        self.bottom.saturating_sub(self.top)
    }
    pub const fn size(&self) -> ISize {
        ISize::new(self.width(), self.height())
    }
    pub const fn top_left(&self) -> IPoint {
        IPoint::new(self.left, self.top)
    }
    pub const fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// The overlap of two rectangles, or `None` if they do not overlap.
    pub fn intersect(&self, other: &IRect) -> Option<IRect> {
        let r = IRect::from_ltrb(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() { None } else { Some(r) }
    }

    /// True if `other` is non-empty and lies entirely inside `self`.
    pub fn contains(&self, other: &IRect) -> bool {
        !other.is_empty()
            && self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }

    pub const fn offset(&self, dx: i32, dy: i32) -> IRect {
        IRect::from_ltrb(self.left + dx, self.top + dy, self.right + dx, self.bottom + dy)
    }

    /// Mirrors the rectangle vertically inside a surface of the given height.
    pub const fn flip_y(&self, height: i32) -> IRect {
        IRect::from_ltrb(self.left, height - self.bottom, self.right, height - self.top)
    }
}

/// Float rectangle used for the local (source) side of a draw.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub const fn from_ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Rect {
            left,
            top,
            right,
            bottom,
        }
    }
    pub fn width(&self) -> f32 {
        self.right - self.left
    }
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

impl From<IRect> for Rect {
    fn from(r: IRect) -> Self {
        Rect::from_ltrb(r.left as f32, r.top as f32, r.right as f32, r.bottom as f32)
    }
}

/// Clips a copy so that both the source rectangle and the destination rectangle
/// (placed at `dst_point`) lie within their surfaces.  Returns the clipped pair, or
/// `None` when nothing is left to copy.
pub(crate) fn clip_src_rect_and_dst_point(
    dst_size: ISize,
    dst_point: IPoint,
    src_size: ISize,
    src_rect: IRect,
) -> Option<(IRect, IPoint)> {
    let mut src = src_rect;
    let mut dst = dst_point;
    // clip the left edge to src and dst bounds, adjusting dst point if needed
    if src.left < 0 {
        dst.x = dst.x.saturating_sub(src.left);
        src.left = 0;
    }
    if dst.x < 0 {
        src.left = src.left.saturating_sub(dst.x);
        dst.x = 0;
    }
    if src.top < 0 {
        dst.y = dst.y.saturating_sub(src.top);
        src.top = 0;
    }
    if dst.y < 0 {
        src.top = src.top.saturating_sub(dst.y);
        dst.y = 0;
    }
    if dst.x >= dst_size.width || dst.y >= dst_size.height {
        return None;
    }
    // clip the right and bottom edges against both surfaces
    src.right = src.right.min(src_size.width);
    if src.width() > dst_size.width - dst.x {
        src.right = src.left + dst_size.width - dst.x;
    }
    src.bottom = src.bottom.min(src_size.height);
    if src.height() > dst_size.height - dst.y {
        src.bottom = src.top + dst_size.height - dst.y;
    }
    if src.is_empty() { None } else { Some((src, dst)) }
}
