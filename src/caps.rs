// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Backend capabilities.
//!
//! [`Caps`] is a plain struct of knobs plus the predicates the surface I/O pipeline consults
//! to choose between fast paths and fallbacks.  A device reports its caps once when a
//! [`DirectContext`](crate::context::DirectContext) is created; tests flip individual fields
//! to drive the fallback paths.

use crate::coordinates::{IRect, ISize};
use crate::pixel_formats::{BackendFormat, ColorType};

bitflags::bitflags! {
    /// How buffers may be mapped into host memory.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u8 {
        /// Buffers can be mapped at all.
        const CAN_MAP = 0x1;
        /// A sub-range of a buffer can be mapped.
        const SUBSET = 0x2;
        /// Mapping for reading completes asynchronously.
        const ASYNC_READ = 0x4;
    }
}

/// Whether a wrapped surface's pixels may be read directly.  Surfaces the context allocates
/// itself are always readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceReadPixelsSupport {
    Supported,
    /// The surface must be drawn into a plain 2D texture first.
    CopyToTexture2D,
    Unsupported,
}

/// Color type a read must use for a given format, and the offset alignment a transfer buffer
/// needs for it.  An alignment of zero means transfers are not possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedRead {
    pub color_type: ColorType,
    pub offset_alignment_for_transfer_buffer: usize,
}

/// Color type a write must use for a given format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupportedWrite {
    pub color_type: ColorType,
    pub offset_alignment_for_transfer_buffer: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Caps {
    pub max_texture_size: i32,
    pub mipmap_support: bool,
    pub map_buffer_flags: MapFlags,
    /// Blocks at or below this size are staged on the CPU instead of mapped.
    pub buffer_map_threshold: usize,
    /// Upload staging memory must never expose uninitialized bytes.
    pub must_clear_uploaded_buffer_data: bool,
    pub transfer_from_surface_to_buffer_support: bool,
    pub transfer_from_buffer_to_texture_support: bool,
    pub transfer_buffer_row_bytes_alignment: usize,
    pub read_pixels_row_bytes_support: bool,
    pub write_pixels_row_bytes_support: bool,
    pub surface_read_pixels_support: SurfaceReadPixelsSupport,
    /// Render targets cannot be written with `write_pixels`; writes go through a draw.
    pub writes_require_draw: bool,
    pub avoid_write_pixels_fast_path: bool,
    pub half_float_renderable: bool,
    /// Copies may change size (a filtered blit).
    pub supports_scaled_copies: bool,
}

impl Caps {
    /// Capabilities of the CPU reference device.
    pub fn soft() -> Self {
        Caps {
            max_texture_size: 8192,
            mipmap_support: true,
            map_buffer_flags: MapFlags::CAN_MAP | MapFlags::SUBSET | MapFlags::ASYNC_READ,
            buffer_map_threshold: 1 << 15,
            must_clear_uploaded_buffer_data: false,
            transfer_from_surface_to_buffer_support: true,
            transfer_from_buffer_to_texture_support: true,
            transfer_buffer_row_bytes_alignment: 4,
            read_pixels_row_bytes_support: true,
            write_pixels_row_bytes_support: true,
            surface_read_pixels_support: SurfaceReadPixelsSupport::Supported,
            writes_require_draw: false,
            avoid_write_pixels_fast_path: false,
            half_float_renderable: true,
            supports_scaled_copies: true,
        }
    }

    pub fn is_format_texturable(&self, _format: BackendFormat) -> bool {
        true
    }

    pub fn is_format_renderable(&self, format: BackendFormat) -> bool {
        match format {
            BackendFormat::Rgba16Float => self.half_float_renderable,
            _ => true,
        }
    }

    /// Format a surface of `color_type` is allocated with, if any.
    pub fn default_backend_format(
        &self,
        color_type: ColorType,
        renderable: bool,
    ) -> Option<BackendFormat> {
        let format = match color_type {
            ColorType::Unknown => return None,
            ColorType::Alpha8 | ColorType::Gray8 => BackendFormat::R8Unorm,
            ColorType::Rgb888x | ColorType::Rgba8888 => BackendFormat::Rgba8Unorm,
            ColorType::Bgra8888 => BackendFormat::Bgra8Unorm,
            ColorType::RgbaF16 => BackendFormat::Rgba16Float,
        };
        if renderable && !self.is_format_renderable(format) {
            return None;
        }
        Some(format)
    }

    pub fn are_color_type_and_format_compatible(
        &self,
        color_type: ColorType,
        format: BackendFormat,
    ) -> bool {
        self.default_backend_format(color_type, false) == Some(format)
    }

    fn native_color_type(format: BackendFormat, surface_color_type: ColorType) -> ColorType {
        match format {
            BackendFormat::R8Unorm => surface_color_type,
            BackendFormat::Rgba8Unorm => ColorType::Rgba8888,
            BackendFormat::Bgra8Unorm => ColorType::Bgra8888,
            BackendFormat::Rgba16Float => ColorType::RgbaF16,
        }
    }

    pub fn supported_read_pixels_color_type(
        &self,
        src_color_type: ColorType,
        format: BackendFormat,
        _dst_color_type: ColorType,
    ) -> SupportedRead {
        let color_type = Caps::native_color_type(format, src_color_type);
        SupportedRead {
            color_type,
            offset_alignment_for_transfer_buffer: color_type.bytes_per_pixel(),
        }
    }

    pub fn supported_write_pixels_color_type(
        &self,
        surface_color_type: ColorType,
        format: BackendFormat,
        _src_color_type: ColorType,
    ) -> SupportedWrite {
        let color_type = Caps::native_color_type(format, surface_color_type);
        SupportedWrite {
            color_type,
            offset_alignment_for_transfer_buffer: color_type.bytes_per_pixel(),
        }
    }

    pub fn surface_supports_write_pixels(&self, renderable: bool) -> bool {
        !(renderable && self.writes_require_draw)
    }

    pub fn surface_supports_read_pixels(&self, wrapped: bool) -> SurfaceReadPixelsSupport {
        if wrapped {
            self.surface_read_pixels_support
        } else {
            SurfaceReadPixelsSupport::Supported
        }
    }

    pub fn is_color_type_renderable(&self, color_type: ColorType) -> bool {
        self.default_backend_format(color_type, true).is_some()
    }

    /// Both rectangles must lie inside their surfaces and the formats must match.
    /// Differing sizes additionally need scaled copy support.
    pub fn can_copy_surface(
        &self,
        dst_format: BackendFormat,
        dst_size: ISize,
        dst_rect: IRect,
        src_format: BackendFormat,
        src_size: ISize,
        src_rect: IRect,
    ) -> bool {
        if dst_format != src_format {
            return false;
        }
        if !IRect::from_size(dst_size).contains(&dst_rect)
            || !IRect::from_size(src_size).contains(&src_rect)
        {
            return false;
        }
        dst_rect.size() == src_rect.size() || self.supports_scaled_copies
    }
}

impl Default for Caps {
    fn default() -> Self {
        Caps::soft()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f16_falls_out_when_not_renderable() {
        let mut caps = Caps::soft();
        assert_eq!(
            caps.default_backend_format(ColorType::RgbaF16, true),
            Some(BackendFormat::Rgba16Float)
        );
        caps.half_float_renderable = false;
        assert_eq!(caps.default_backend_format(ColorType::RgbaF16, true), None);
        assert_eq!(
            caps.default_backend_format(ColorType::RgbaF16, false),
            Some(BackendFormat::Rgba16Float)
        );
    }

    #[test]
    fn r8_reads_as_surface_color_type() {
        let caps = Caps::soft();
        let read = caps.supported_read_pixels_color_type(
            ColorType::Gray8,
            BackendFormat::R8Unorm,
            ColorType::Rgba8888,
        );
        assert_eq!(read.color_type, ColorType::Gray8);
        assert_eq!(read.offset_alignment_for_transfer_buffer, 1);
    }

    #[test]
    fn scaled_copies_need_support() {
        let mut caps = Caps::soft();
        let size = ISize::new(8, 8);
        let f = BackendFormat::Rgba8Unorm;
        let small = IRect::from_xywh(0, 0, 4, 4);
        let big = IRect::from_xywh(0, 0, 8, 8);
        assert!(caps.can_copy_surface(f, size, big, f, size, small));
        caps.supports_scaled_copies = false;
        assert!(!caps.can_copy_surface(f, size, big, f, size, small));
        assert!(caps.can_copy_surface(f, size, small, f, size, small));
        assert!(!caps.can_copy_surface(f, size, small, BackendFormat::Bgra8Unorm, size, small));
    }
}
