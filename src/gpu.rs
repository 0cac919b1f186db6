// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The device seam.

[`Gpu`] is implemented once per backend.  The rest of the crate only talks to a device through
this trait and through backend-opaque handles ([`TextureHandle`], [`BufferHandle`], [`Fence`]).

Rectangles passed to the pixel operations are in *storage* coordinates: row 0 is the first row
the device stores.  Surfaces with a [`Origin::BottomLeft`] origin are flipped by the caller
before the device is reached.  [`Gpu::draw`] is the exception: it receives logical rectangles
and the origins of the target and of every sampled texture, since a real backend folds the flip
into its vertex transform.

The `*_checked` helpers in this module perform the argument validation every backend would
otherwise repeat, and log when the device rejects a call.
*/

use crate::caps::Caps;
use crate::coordinates::{IRect, ISize, Rect};
use crate::effects::FragmentProcessor;
use crate::pixel_formats::{BackendFormat, ColorType};
use std::fmt::Debug;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                $name(raw)
            }
            pub const fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// A device texture.
    TextureHandle
);
handle!(
    /// A device buffer.
    BufferHandle
);
handle!(
    /// A point in the device's submission stream.  Fences signal in insertion order.
    Fence
);

/// Which row of the logical image is stored first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    TopLeft,
    BottomLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Filter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    Vertex,
    Index,
    /// Staging for uploads.
    XferCpuToGpu,
    /// Staging for readbacks.
    XferGpuToCpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessPattern {
    /// Rewritten often; eligible for scratch reuse.
    Dynamic,
    /// Written once.
    Static,
    /// Written once and used once.
    Stream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub dimensions: ISize,
    pub format: BackendFormat,
    pub renderable: bool,
    pub mipmapped: bool,
    pub protected: bool,
}

impl TextureDesc {
    pub fn gpu_memory_size(&self) -> usize {
        let base = self.dimensions.area().max(0) as usize * self.format.bytes_per_texel();
        // a full chain adds about a third
        if self.mipmapped { base + base / 3 } else { base }
    }
}

/// Pixels for one mip level.
#[derive(Debug, Clone, Copy)]
pub struct MipLevel<'a> {
    pub pixels: &'a [u8],
    pub row_bytes: usize,
}

/// The render target of [`Gpu::draw`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawTarget {
    pub texture: TextureHandle,
    pub color_type: ColorType,
    pub origin: Origin,
    pub backing: ISize,
}

/// Device operations.  Backends receive validated arguments.
pub trait Gpu: Send + Sync + Debug {
    fn create_texture(&self, desc: &TextureDesc) -> Option<TextureHandle>;
    fn delete_texture(&self, texture: TextureHandle);

    fn create_buffer(
        &self,
        size: usize,
        buffer_type: BufferType,
        access: AccessPattern,
    ) -> Option<BufferHandle>;
    fn delete_buffer(&self, buffer: BufferHandle);
    /// Maps the whole buffer.  The returned memory is a host view of the buffer contents.
    fn map_buffer(&self, buffer: BufferHandle) -> Option<Box<[u8]>>;
    /// Ends a mapping.  `written` carries the host view back when it was modified.
    fn unmap_buffer(&self, buffer: BufferHandle, written: Option<&[u8]>);
    fn update_buffer(&self, buffer: BufferHandle, offset: usize, data: &[u8]) -> bool;

    fn read_pixels(
        &self,
        texture: TextureHandle,
        rect: IRect,
        surface_color_type: ColorType,
        dst_color_type: ColorType,
        dst: &mut [u8],
        row_bytes: usize,
    ) -> bool;
    fn write_pixels(
        &self,
        texture: TextureHandle,
        rect: IRect,
        surface_color_type: ColorType,
        src_color_type: ColorType,
        levels: &[MipLevel<'_>],
    ) -> bool;
    #[allow(clippy::too_many_arguments)]
    fn transfer_pixels_to(
        &self,
        texture: TextureHandle,
        rect: IRect,
        texture_color_type: ColorType,
        buffer_color_type: ColorType,
        buffer: BufferHandle,
        offset: usize,
        row_bytes: usize,
    ) -> bool;
    /// Copies `rect` into `buffer` at `offset`, `row_bytes` apart.
    #[allow(clippy::too_many_arguments)]
    fn transfer_pixels_from(
        &self,
        texture: TextureHandle,
        rect: IRect,
        surface_color_type: ColorType,
        buffer_color_type: ColorType,
        buffer: BufferHandle,
        offset: usize,
        row_bytes: usize,
    ) -> bool;
    fn copy_surface(
        &self,
        dst: TextureHandle,
        dst_rect: IRect,
        src: TextureHandle,
        src_rect: IRect,
        filter: Filter,
    ) -> bool;
    /// Fills `dst_rect` of the target by evaluating `fp` over `local_rect`.
    fn draw(
        &self,
        target: &DrawTarget,
        dst_rect: IRect,
        local_rect: Rect,
        fp: &FragmentProcessor,
    ) -> bool;
    fn resolve_render_target(&self, texture: TextureHandle);

    fn insert_fence(&self) -> Fence;
    /// Polls a fence without blocking.
    fn wait_fence(&self, fence: Fence) -> bool;
    fn delete_fence(&self, fence: Fence);
    /// Hands recorded work to the device.  With `sync_cpu` this returns once it has finished.
    fn submit(&self, sync_cpu: bool) -> bool;
}

/// Number of levels below the base for a full mip chain.
pub(crate) fn mip_level_count(dimensions: ISize) -> usize {
    let largest = dimensions.width.max(dimensions.height).max(1) as u32;
    (u32::BITS - 1 - largest.leading_zeros()) as usize
}

fn row_bytes_ok(caps: &Caps, row_bytes: usize, bpp: usize, width: i32, supported: bool) -> bool {
    let min_row_bytes = bpp * width as usize;
    if !supported || !caps.read_pixels_row_bytes_support && !caps.write_pixels_row_bytes_support {
        return row_bytes == min_row_bytes;
    }
    row_bytes >= min_row_bytes && row_bytes % bpp == 0
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn read_pixels_checked(
    gpu: &dyn Gpu,
    caps: &Caps,
    texture: TextureHandle,
    backing: ISize,
    rect: IRect,
    surface_color_type: ColorType,
    dst_color_type: ColorType,
    dst: &mut [u8],
    row_bytes: usize,
) -> bool {
    if !IRect::from_size(backing).contains(&rect) {
        return false;
    }
    let bpp = dst_color_type.bytes_per_pixel();
    if bpp == 0
        || !row_bytes_ok(caps, row_bytes, bpp, rect.width(), caps.read_pixels_row_bytes_support)
    {
        return false;
    }
    let needed = (rect.height() as usize - 1) * row_bytes + bpp * rect.width() as usize;
    if dst.len() < needed {
        return false;
    }
    let ok = gpu.read_pixels(
        texture,
        rect,
        surface_color_type,
        dst_color_type,
        dst,
        row_bytes,
    );
    if !ok {
        logwise::warn_sync!(
            "device read of {rect} from {texture} failed",
            rect = logwise::privacy::LogIt(rect),
            texture = logwise::privacy::LogIt(texture)
        );
    }
    ok
}

/// Validates the level chain the way every backend expects it: each level halves the
/// previous one, row bytes fit the caps and the chain ends at 1x1.
fn validate_texel_levels(
    dimensions: ISize,
    color_type: ColorType,
    levels: &[MipLevel<'_>],
    caps: &Caps,
) -> bool {
    let bpp = color_type.bytes_per_pixel();
    if bpp == 0 || levels.is_empty() {
        return false;
    }
    let (mut w, mut h) = (dimensions.width, dimensions.height);
    for (i, level) in levels.iter().enumerate() {
        if !row_bytes_ok(caps, level.row_bytes, bpp, w, caps.write_pixels_row_bytes_support) {
            return false;
        }
        let needed = (h as usize - 1) * level.row_bytes + bpp * w as usize;
        if level.pixels.len() < needed {
            return false;
        }
        if w == 1 && h == 1 {
            if i != levels.len() - 1 {
                return false;
            }
        } else {
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
    }
    true
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn write_pixels_checked(
    gpu: &dyn Gpu,
    caps: &Caps,
    texture: TextureHandle,
    backing: ISize,
    rect: IRect,
    surface_color_type: ColorType,
    src_color_type: ColorType,
    levels: &[MipLevel<'_>],
) -> bool {
    match levels.len() {
        0 => return false,
        1 => {
            if !IRect::from_size(backing).contains(&rect) {
                return false;
            }
        }
        _ => {
            if rect != IRect::from_size(backing) {
                return false;
            }
        }
    }
    if !validate_texel_levels(rect.size(), src_color_type, levels, caps) {
        return false;
    }
    let ok = gpu.write_pixels(texture, rect, surface_color_type, src_color_type, levels);
    if !ok {
        logwise::warn_sync!(
            "device write of {rect} to {texture} failed",
            rect = logwise::privacy::LogIt(rect),
            texture = logwise::privacy::LogIt(texture)
        );
    }
    ok
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn transfer_pixels_from_checked(
    gpu: &dyn Gpu,
    caps: &Caps,
    texture: TextureHandle,
    backing: ISize,
    rect: IRect,
    surface_color_type: ColorType,
    buffer_color_type: ColorType,
    buffer: BufferHandle,
    offset: usize,
    row_bytes: usize,
) -> bool {
    if !IRect::from_size(backing).contains(&rect) {
        return false;
    }
    if row_bytes < buffer_color_type.bytes_per_pixel() * rect.width() as usize {
        return false;
    }
    let alignment = caps
        .supported_read_pixels_color_type(
            surface_color_type,
            caps.default_backend_format(surface_color_type, false)
                .unwrap_or(BackendFormat::Rgba8Unorm),
            buffer_color_type,
        )
        .offset_alignment_for_transfer_buffer;
    debug_assert!(alignment != 0 && offset % alignment == 0);
    let ok = gpu.transfer_pixels_from(
        texture,
        rect,
        surface_color_type,
        buffer_color_type,
        buffer,
        offset,
        row_bytes,
    );
    if !ok {
        logwise::warn_sync!(
            "device transfer of {rect} from {texture} failed",
            rect = logwise::privacy::LogIt(rect),
            texture = logwise::privacy::LogIt(texture)
        );
    }
    ok
}
