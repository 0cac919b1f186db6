// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! CPU pixel conversion.
//!
//! [`convert_pixels`] is the single conversion pass used on both sides of every pixel transfer:
//! each pixel is loaded into a [`Float4`], run through the [`XformSteps`] between the two
//! [`ColorInfo`]s and stored in the destination layout.  An optional vertical flip is folded
//! into the same pass.

use super::{AlphaType, ColorInfo, ColorSpace, ColorType, Pixmap, PixmapMut, f16};

/// Unpacked color with channels normally in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Float4 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Float4 {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Float4 { r, g, b, a }
    }
    pub(crate) fn scale(self, s: f32) -> Self {
        Float4::new(self.r * s, self.g * s, self.b * s, self.a * s)
    }
    pub(crate) fn add(self, o: Float4) -> Self {
        Float4::new(self.r + o.r, self.g + o.g, self.b + o.b, self.a + o.a)
    }
    pub(crate) fn map_rgb(self, f: impl Fn(f32) -> f32) -> Self {
        Float4::new(f(self.r), f(self.g), f(self.b), self.a)
    }
}

/// sRGB transfer function, encoded to linear.
#[inline]
pub fn srgb_to_linear(encoded: f32) -> f32 {
    if encoded <= 0.04045 {
        encoded / 12.92
    } else {
        ((encoded + 0.055) / 1.055).powf(2.4)
    }
}

/// sRGB transfer function, linear to encoded.
#[inline]
pub fn linear_to_srgb(linear: f32) -> f32 {
    if linear <= 0.0031308 {
        12.92 * linear
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    }
}

/// Operations needed to move colors from one [`ColorInfo`] to another.
///
/// Both color spaces share a gamut, so only transfer functions and alpha handling vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct XformSteps {
    pub unpremul: bool,
    pub linearize: bool,
    pub encode: bool,
    pub premul: bool,
}

impl XformSteps {
    pub fn new(
        src_cs: Option<ColorSpace>,
        src_at: AlphaType,
        dst_cs: Option<ColorSpace>,
        dst_at: AlphaType,
    ) -> Self {
        // opaque outputs keep whatever the input was
        let dst_at = if dst_at == AlphaType::Opaque {
            src_at
        } else {
            dst_at
        };
        let src = src_cs.unwrap_or(ColorSpace::Srgb);
        let dst = dst_cs.unwrap_or(src);
        if src == dst && src_at == dst_at {
            return XformSteps::default();
        }
        let mut steps = XformSteps {
            unpremul: src_at == AlphaType::Premul,
            linearize: !src.gamma_is_linear(),
            encode: !dst.gamma_is_linear(),
            premul: src_at != AlphaType::Opaque && dst_at == AlphaType::Premul,
        };
        if src.gamma_is_linear() == dst.gamma_is_linear() {
            steps.linearize = false;
            steps.encode = false;
        }
        // unpremul followed by premul is a no-op without a non-linear step between them
        if !steps.linearize && !steps.encode && steps.unpremul && steps.premul {
            steps.unpremul = false;
            steps.premul = false;
        }
        steps
    }

    pub fn between(src: &ColorInfo, dst: &ColorInfo) -> Self {
        XformSteps::new(
            src.color_space(),
            src.alpha_type(),
            dst.color_space(),
            dst.alpha_type(),
        )
    }

    /// True if a transfer function changes; alpha handling alone does not count.
    pub fn needs_color_conversion(&self) -> bool {
        self.linearize || self.encode
    }

    pub fn is_identity(&self) -> bool {
        *self == XformSteps::default()
    }

    pub fn apply(&self, mut c: Float4) -> Float4 {
        if self.unpremul {
            let inv = if c.a == 0.0 { 0.0 } else { 1.0 / c.a };
            c = c.map_rgb(|v| v * inv);
        }
        if self.linearize {
            c = c.map_rgb(srgb_to_linear);
        }
        if self.encode {
            c = c.map_rgb(linear_to_srgb);
        }
        if self.premul {
            let a = c.a;
            c = c.map_rgb(|v| v * a);
        }
        c
    }
}

#[inline]
fn unorm(v: u8) -> f32 {
    v as f32 * (1.0 / 255.0)
}

#[inline]
pub(crate) fn to_unorm(v: f32) -> u8 {
    // NaN lands on zero
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// Reads one pixel of `color_type` from the front of `bytes`.
pub(crate) fn load_pixel(color_type: ColorType, bytes: &[u8]) -> Float4 {
    match color_type {
        ColorType::Unknown => Float4::default(),
        ColorType::Alpha8 => Float4::new(0.0, 0.0, 0.0, unorm(bytes[0])),
        ColorType::Gray8 => {
            let g = unorm(bytes[0]);
            Float4::new(g, g, g, 1.0)
        }
        ColorType::Rgb888x => Float4::new(unorm(bytes[0]), unorm(bytes[1]), unorm(bytes[2]), 1.0),
        ColorType::Rgba8888 => Float4::new(
            unorm(bytes[0]),
            unorm(bytes[1]),
            unorm(bytes[2]),
            unorm(bytes[3]),
        ),
        ColorType::Bgra8888 => Float4::new(
            unorm(bytes[2]),
            unorm(bytes[1]),
            unorm(bytes[0]),
            unorm(bytes[3]),
        ),
        ColorType::RgbaF16 => {
            let h = |i: usize| f16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]).to_f32();
            Float4::new(h(0), h(1), h(2), h(3))
        }
    }
}

/// Writes one pixel of `color_type` to the front of `out`.
pub(crate) fn store_pixel(color_type: ColorType, c: Float4, out: &mut [u8]) {
    match color_type {
        ColorType::Unknown => {}
        ColorType::Alpha8 => out[0] = to_unorm(c.a),
        ColorType::Gray8 => out[0] = to_unorm(0.2126 * c.r + 0.7152 * c.g + 0.0722 * c.b),
        ColorType::Rgb888x => {
            out[0] = to_unorm(c.r);
            out[1] = to_unorm(c.g);
            out[2] = to_unorm(c.b);
            out[3] = 0xFF;
        }
        ColorType::Rgba8888 => {
            out[0] = to_unorm(c.r);
            out[1] = to_unorm(c.g);
            out[2] = to_unorm(c.b);
            out[3] = to_unorm(c.a);
        }
        ColorType::Bgra8888 => {
            out[0] = to_unorm(c.b);
            out[1] = to_unorm(c.g);
            out[2] = to_unorm(c.r);
            out[3] = to_unorm(c.a);
        }
        ColorType::RgbaF16 => {
            for (i, v) in [c.r, c.g, c.b, c.a].into_iter().enumerate() {
                out[2 * i..2 * i + 2].copy_from_slice(&f16::from_f32(v).to_le_bytes());
            }
        }
    }
}

/// Converts `src` into `dst`, which must have the same dimensions.
///
/// Returns `false` if either side has an unknown color type or the dimensions differ.
/// When `flip_y` is set the first source row lands in the last destination row.
pub fn convert_pixels(mut dst: PixmapMut<'_>, src: Pixmap<'_>, flip_y: bool) -> bool {
    if dst.dimensions() != src.dimensions() {
        return false;
    }
    let dst_ct = dst.info().color_type();
    let src_ct = src.info().color_type();
    if dst_ct == ColorType::Unknown || src_ct == ColorType::Unknown {
        return false;
    }
    let height = src.dimensions().height;
    let steps = XformSteps::between(&src.info().color_info(), &dst.info().color_info());

    if steps.is_identity() && dst_ct == src_ct {
        for y in 0..height {
            let dst_y = if flip_y { height - 1 - y } else { y };
            dst.row_mut(dst_y).copy_from_slice(src.row(y));
        }
        return true;
    }

    let src_bpp = src_ct.bytes_per_pixel();
    let dst_bpp = dst_ct.bytes_per_pixel();
    for y in 0..height {
        let dst_y = if flip_y { height - 1 - y } else { y };
        let src_row = src.row(y);
        let dst_row = dst.row_mut(dst_y);
        for (s, d) in src_row
            .chunks_exact(src_bpp)
            .zip(dst_row.chunks_exact_mut(dst_bpp))
        {
            store_pixel(dst_ct, steps.apply(load_pixel(src_ct, s)), d);
        }
    }
    true
}
