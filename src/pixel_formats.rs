// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Color types, alpha types and image descriptions.
//!
//! This module describes pixel memory on both sides of the device boundary:
//!
//! - [`ColorType`] is the client-visible layout of one pixel (channel order and depth).
//! - [`AlphaType`] says whether color channels are premultiplied by alpha.
//! - [`ColorSpace`] is the transfer function the values are encoded with.
//! - [`BackendFormat`] is the device-side texel format a texture is allocated with.
//!
//! A surface pairs one backend format with one color type; the [`Caps`](crate::caps::Caps)
//! decide which color types may be read from or written to each format.
//!
//! # Examples
//!
//! ```
//! use ganesh::coordinates::ISize;
//! use ganesh::pixel_formats::{AlphaType, ColorType, ImageInfo};
//!
//! let info = ImageInfo::new(ISize::new(4, 2), ColorType::Rgba8888, AlphaType::Premul, None);
//! assert_eq!(info.min_row_bytes(), 16);
//! assert_eq!(info.compute_byte_size(20), 36);
//! ```

pub mod convert;
pub mod yuv;

use crate::coordinates::{IPoint, IRect, ISize};

pub use half::f16;

bitflags::bitflags! {
    /// Which channels a color type stores.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelFlags: u8 {
        const RED = 0x1;
        const GREEN = 0x2;
        const BLUE = 0x4;
        const ALPHA = 0x8;
        const GRAY = 0x10;
        const RGB = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits();
        const RGBA = Self::RGB.bits() | Self::ALPHA.bits();
    }
}

/// Client-visible pixel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorType {
    Unknown,
    /// One byte of alpha.
    Alpha8,
    /// One byte of luminance, opaque.
    Gray8,
    /// Four bytes, the last one ignored and read back as opaque.
    Rgb888x,
    Rgba8888,
    Bgra8888,
    /// Four little-endian half floats.
    RgbaF16,
}

impl ColorType {
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            ColorType::Unknown => 0,
            ColorType::Alpha8 | ColorType::Gray8 => 1,
            ColorType::Rgb888x | ColorType::Rgba8888 | ColorType::Bgra8888 => 4,
            ColorType::RgbaF16 => 8,
        }
    }

    pub const fn channel_flags(self) -> ChannelFlags {
        match self {
            ColorType::Unknown => ChannelFlags::empty(),
            ColorType::Alpha8 => ChannelFlags::ALPHA,
            ColorType::Gray8 => ChannelFlags::GRAY,
            ColorType::Rgb888x => ChannelFlags::RGB,
            ColorType::Rgba8888 | ColorType::Bgra8888 | ColorType::RgbaF16 => ChannelFlags::RGBA,
        }
    }

    /// True if the color type has no alpha channel, so every pixel is opaque.
    pub fn is_opaque(self) -> bool {
        !self.channel_flags().contains(ChannelFlags::ALPHA) && self != ColorType::Unknown
    }

    pub fn is_alpha_only(self) -> bool {
        self.channel_flags() == ChannelFlags::ALPHA
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlphaType {
    Unknown,
    Opaque,
    Premul,
    Unpremul,
}

/// Transfer function of the stored values.  Both spaces share the sRGB gamut.
///
/// A missing color space (`None` wherever an `Option<ColorSpace>` appears) is treated
/// as sRGB by conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    Srgb,
    SrgbLinear,
}

impl ColorSpace {
    pub const fn gamma_is_linear(self) -> bool {
        matches!(self, ColorSpace::SrgbLinear)
    }
    pub const fn make_linear_gamma(self) -> ColorSpace {
        ColorSpace::SrgbLinear
    }
}

/// Color type, alpha type and color space of some pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorInfo {
    color_type: ColorType,
    alpha_type: AlphaType,
    color_space: Option<ColorSpace>,
}

impl ColorInfo {
    pub const fn new(
        color_type: ColorType,
        alpha_type: AlphaType,
        color_space: Option<ColorSpace>,
    ) -> Self {
        ColorInfo {
            color_type,
            alpha_type,
            color_space,
        }
    }
    pub const fn color_type(&self) -> ColorType {
        self.color_type
    }
    pub const fn alpha_type(&self) -> AlphaType {
        self.alpha_type
    }
    pub const fn color_space(&self) -> Option<ColorSpace> {
        self.color_space
    }
    pub const fn bytes_per_pixel(&self) -> usize {
        self.color_type.bytes_per_pixel()
    }
    pub const fn make_color_type(self, color_type: ColorType) -> Self {
        ColorInfo { color_type, ..self }
    }
    pub const fn make_alpha_type(self, alpha_type: AlphaType) -> Self {
        ColorInfo { alpha_type, ..self }
    }
    pub const fn make_color_space(self, color_space: Option<ColorSpace>) -> Self {
        ColorInfo {
            color_space,
            ..self
        }
    }
}

/// Dimensions plus [`ColorInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageInfo {
    color_info: ColorInfo,
    dimensions: ISize,
}

impl ImageInfo {
    pub const fn new(
        dimensions: ISize,
        color_type: ColorType,
        alpha_type: AlphaType,
        color_space: Option<ColorSpace>,
    ) -> Self {
        ImageInfo {
            color_info: ColorInfo::new(color_type, alpha_type, color_space),
            dimensions,
        }
    }
    pub const fn from_color_info(color_info: ColorInfo, dimensions: ISize) -> Self {
        ImageInfo {
            color_info,
            dimensions,
        }
    }
    /// Alpha-only image, premultiplied.
    pub const fn alpha8(dimensions: ISize) -> Self {
        ImageInfo::new(dimensions, ColorType::Alpha8, AlphaType::Premul, None)
    }
    pub const fn color_info(&self) -> ColorInfo {
        self.color_info
    }
    pub const fn color_type(&self) -> ColorType {
        self.color_info.color_type
    }
    pub const fn alpha_type(&self) -> AlphaType {
        self.color_info.alpha_type
    }
    pub const fn color_space(&self) -> Option<ColorSpace> {
        self.color_info.color_space
    }
    pub const fn dimensions(&self) -> ISize {
        self.dimensions
    }
    pub const fn width(&self) -> i32 {
        self.dimensions.width
    }
    pub const fn height(&self) -> i32 {
        self.dimensions.height
    }
    pub const fn bytes_per_pixel(&self) -> usize {
        self.color_info.bytes_per_pixel()
    }
    pub const fn min_row_bytes(&self) -> usize {
        if self.dimensions.width <= 0 {
            return 0;
        }
        self.dimensions.width as usize * self.bytes_per_pixel()
    }
    /// Bytes spanned by the image with the given row stride.  The last row is tight.
    pub const fn compute_byte_size(&self, row_bytes: usize) -> usize {
        if self.dimensions.height <= 0 {
            return 0;
        }
        (self.dimensions.height as usize - 1) * row_bytes + self.min_row_bytes()
    }
    /// Non-empty with known color and alpha types.
    pub fn is_valid(&self) -> bool {
        !self.dimensions.is_empty()
            && self.color_type() != ColorType::Unknown
            && self.alpha_type() != AlphaType::Unknown
    }
    pub const fn make_dimensions(self, dimensions: ISize) -> Self {
        ImageInfo { dimensions, ..self }
    }
    pub const fn make_color_type(self, color_type: ColorType) -> Self {
        ImageInfo {
            color_info: self.color_info.make_color_type(color_type),
            ..self
        }
    }
    pub const fn make_alpha_type(self, alpha_type: AlphaType) -> Self {
        ImageInfo {
            color_info: self.color_info.make_alpha_type(alpha_type),
            ..self
        }
    }
    pub const fn make_color_space(self, color_space: Option<ColorSpace>) -> Self {
        ImageInfo {
            color_info: self.color_info.make_color_space(color_space),
            ..self
        }
    }
}

/// Texel format a device allocates textures with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    R8Unorm,
    Rgba16Float,
}

impl BackendFormat {
    pub const fn bytes_per_texel(self) -> usize {
        match self {
            BackendFormat::R8Unorm => 1,
            BackendFormat::Rgba8Unorm | BackendFormat::Bgra8Unorm => 4,
            BackendFormat::Rgba16Float => 8,
        }
    }
}

/// Read-only view of client pixels.
#[derive(Debug, Clone, Copy)]
pub struct Pixmap<'a> {
    info: ImageInfo,
    pixels: &'a [u8],
    row_bytes: usize,
}

/// Writable view of client pixels.
#[derive(Debug)]
pub struct PixmapMut<'a> {
    info: ImageInfo,
    pixels: &'a mut [u8],
    row_bytes: usize,
}

/// Shared by both pixmap kinds: the row-bytes and storage checks.
fn check_storage(info: &ImageInfo, len: usize, row_bytes: usize) -> Result<(), crate::Error> {
    let bpp = info.bytes_per_pixel();
    if bpp == 0 {
        return Err(crate::Error::InvalidImageInfo);
    }
    let min_row_bytes = info.min_row_bytes();
    if row_bytes % bpp != 0 || row_bytes < min_row_bytes {
        return Err(crate::Error::InvalidRowBytes {
            row_bytes,
            min_row_bytes,
        });
    }
    if len < info.compute_byte_size(row_bytes) {
        return Err(crate::Error::InvalidRowBytes {
            row_bytes,
            min_row_bytes,
        });
    }
    Ok(())
}

/// Clips `(pt, dims)` against a surface and returns the sub-rectangle of the pixmap
/// that remains, plus the moved point.
fn clip_to_surface(dims: ISize, surface: ISize, pt: IPoint) -> Option<(IRect, IPoint)> {
    let surface_rect = IRect::from_size(surface);
    let wanted = IRect::from_pt_size(pt, dims);
    let clipped = surface_rect.intersect(&wanted)?;
    let sub = clipped.offset(-pt.x, -pt.y);
    Some((sub, clipped.top_left()))
}

fn byte_offset(info: &ImageInfo, row_bytes: usize, x: i32, y: i32) -> usize {
    y as usize * row_bytes + x as usize * info.bytes_per_pixel()
}

impl<'a> Pixmap<'a> {
    /// Wraps `pixels`, failing when row bytes or the slice length cannot hold `info`.
    pub fn new(info: ImageInfo, pixels: &'a [u8], row_bytes: usize) -> Result<Self, crate::Error> {
        check_storage(&info, pixels.len(), row_bytes)?;
        Ok(Pixmap {
            info,
            pixels,
            row_bytes,
        })
    }
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }
    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }
    pub fn dimensions(&self) -> ISize {
        self.info.dimensions()
    }
    pub fn row(&self, y: i32) -> &'a [u8] {
        let start = y as usize * self.row_bytes;
        &self.pixels[start..start + self.info.min_row_bytes()]
    }
    /// Same memory, reinterpreted with a different color type of equal pixel size.
    pub(crate) fn with_color_type(self, color_type: ColorType) -> Self {
        debug_assert_eq!(color_type.bytes_per_pixel(), self.info.bytes_per_pixel());
        Pixmap {
            info: self.info.make_color_type(color_type),
            ..self
        }
    }
    /// The part of this pixmap that lands inside a surface of `surface` size when placed at `pt`.
    pub(crate) fn clip(self, surface: ISize, pt: IPoint) -> Option<(Pixmap<'a>, IPoint)> {
        let (sub, pt) = clip_to_surface(self.dimensions(), surface, pt)?;
        let start = byte_offset(&self.info, self.row_bytes, sub.left, sub.top);
        Some((
            Pixmap {
                info: self.info.make_dimensions(sub.size()),
                pixels: &self.pixels[start..],
                row_bytes: self.row_bytes,
            },
            pt,
        ))
    }
}

impl<'a> PixmapMut<'a> {
    pub fn new(
        info: ImageInfo,
        pixels: &'a mut [u8],
        row_bytes: usize,
    ) -> Result<Self, crate::Error> {
        check_storage(&info, pixels.len(), row_bytes)?;
        Ok(PixmapMut {
            info,
            pixels,
            row_bytes,
        })
    }
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }
    pub fn dimensions(&self) -> ISize {
        self.info.dimensions()
    }
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut *self.pixels
    }
    pub fn as_pixmap(&self) -> Pixmap<'_> {
        Pixmap {
            info: self.info,
            pixels: &*self.pixels,
            row_bytes: self.row_bytes,
        }
    }
    pub fn row_mut(&mut self, y: i32) -> &mut [u8] {
        let start = y as usize * self.row_bytes;
        let len = self.info.min_row_bytes();
        &mut self.pixels[start..start + len]
    }
    pub(crate) fn with_color_type(self, color_type: ColorType) -> Self {
        debug_assert_eq!(color_type.bytes_per_pixel(), self.info.bytes_per_pixel());
        PixmapMut {
            info: self.info.make_color_type(color_type),
            ..self
        }
    }
    pub(crate) fn clip(self, surface: ISize, pt: IPoint) -> Option<(PixmapMut<'a>, IPoint)> {
        let (sub, pt) = clip_to_surface(self.dimensions(), surface, pt)?;
        let start = byte_offset(&self.info, self.row_bytes, sub.left, sub.top);
        Some((
            PixmapMut {
                info: self.info.make_dimensions(sub.size()),
                pixels: &mut self.pixels[start..],
                row_bytes: self.row_bytes,
            },
            pt,
        ))
    }
}
