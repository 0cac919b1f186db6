// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Pixel I/O on surfaces.

A [`SurfaceContext`] pairs a surface with the color info its contents are interpreted in, and
is the entry point for moving pixels between client memory and the device:

* [`read_pixels`](SurfaceContext::read_pixels) and [`write_pixels`](SurfaceContext::write_pixels)
  are synchronous.  A read flushes outstanding work and waits for the device.
* [`copy`](SurfaceContext::copy) and the draw-based operations only record work; it runs on the
  next flush.
* The async reads in [`async_read`] deliver their result through a finished callback.

A [`SurfaceFillContext`] is a surface context on a render target, which can additionally be
filled with a [`FragmentProcessor`].

All rectangles and points taken by this module are logical: `(0, 0)` is the top-left pixel as
the client sees it, whatever the surface's [`Origin`].
*/

pub mod async_read;
pub mod rescale;

use crate::Error;
use crate::async_read_result::{PixelConverter, PixelTransferResult};
use crate::caps::SurfaceReadPixelsSupport;
use crate::context::{ContextId, DirectContext, FlushInfo, SyncCpu};
use crate::coordinates::{IPoint, IRect, ISize, Rect, clip_src_rect_and_dst_point};
use crate::drawing_manager::{OwnedMipLevel, RenderTask};
use crate::effects::{FragmentProcessor, SampledTexture};
use crate::gpu::{self, AccessPattern, BufferType, Filter, Origin, TextureDesc};
use crate::mapped_buffer_manager::ResourceRef;
use crate::pixel_formats::convert::{XformSteps, convert_pixels};
use crate::pixel_formats::{AlphaType, ColorInfo, ColorType, ImageInfo, Pixmap, PixmapMut};
use crate::resource_provider::BackingFit;
use crate::surface_proxy::{SurfaceAccess, SurfaceProxy, SurfaceProxyView};
use std::ops::Deref;

pub use async_read::ReadPixelsCallback;
pub use rescale::{RescaleGamma, RescaleMode};

fn alpha_types_compatible(a: AlphaType, b: AlphaType) -> bool {
    (a == AlphaType::Unknown) == (b == AlphaType::Unknown)
}

fn is_rgba_or_bgra_8888(color_type: ColorType) -> bool {
    matches!(color_type, ColorType::Rgba8888 | ColorType::Bgra8888)
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

#[derive(Debug, Clone)]
pub struct SurfaceContext {
    context_id: ContextId,
    read_view: SurfaceProxyView,
    color_info: ColorInfo,
}

impl SurfaceContext {
    pub(crate) fn new(context_id: ContextId, read_view: SurfaceProxyView, color_info: ColorInfo) -> Self {
        SurfaceContext {
            context_id,
            read_view,
            color_info,
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn color_info(&self) -> ColorInfo {
        self.color_info
    }

    pub fn image_info(&self) -> ImageInfo {
        ImageInfo::from_color_info(self.color_info, self.dimensions())
    }

    pub fn dimensions(&self) -> ISize {
        self.read_view.dimensions()
    }

    pub fn width(&self) -> i32 {
        self.dimensions().width
    }

    pub fn height(&self) -> i32 {
        self.dimensions().height
    }

    pub fn origin(&self) -> Origin {
        self.read_view.origin()
    }

    pub fn proxy(&self) -> &SurfaceProxy {
        self.read_view.proxy()
    }

    pub fn read_view(&self) -> &SurfaceProxyView {
        &self.read_view
    }

    fn bounds(&self) -> IRect {
        IRect::from_size(self.dimensions())
    }

    /// This surface as a fill target, if it is renderable.
    pub fn as_fill(&self) -> Option<SurfaceFillContext> {
        self.proxy()
            .is_renderable()
            .then(|| SurfaceFillContext::new(self.clone()))
    }

    /// How a processor samples this surface, clamped to `subset`.  Instantiates the proxy.
    pub(crate) fn sampled_texture(&self, ctx: &DirectContext, subset: IRect) -> Result<SampledTexture, Error> {
        if !ctx.instantiate(self.proxy()) {
            return Err(Error::InstantiationFailed);
        }
        self.read_view
            .sampled(self.color_info.color_type(), subset)
            .ok_or(Error::NotTexturable)
    }

    /// Copies `src_rect` into a new non-renderable texture with this surface's format,
    /// origin and color info.  The copy is recorded, not executed.
    pub(crate) fn copy_to_texture(
        &self,
        ctx: &DirectContext,
        src_rect: IRect,
        fit: BackingFit,
    ) -> Result<SurfaceContext, Error> {
        let proxy = self.proxy();
        let desc = TextureDesc {
            dimensions: src_rect.size(),
            format: proxy.backend_format(),
            renderable: false,
            mipmapped: false,
            protected: proxy.is_protected(),
        };
        let copy = SurfaceContext::new(
            self.context_id,
            SurfaceProxyView::new(
                SurfaceProxy::new(desc, fit, true, SurfaceAccess::ReadWrite),
                self.origin(),
            ),
            self.color_info,
        );
        let dst_rect = IRect::from_size(src_rect.size());
        copy.copy_from_view(ctx, &self.read_view, src_rect, dst_rect, Filter::Nearest)?;
        Ok(copy)
    }

    /// Reads the pixels at `pt` into `dst`, converting to `dst`'s color info.  The part of
    /// `dst` that falls outside this surface is left untouched.
    pub fn read_pixels(&self, ctx: &DirectContext, dst: PixmapMut<'_>, pt: IPoint) -> Result<(), Error> {
        ctx.check_usable(self.context_id)?;
        let dst_info = *dst.info();
        if dst_info.color_type() == ColorType::Unknown {
            return Err(Error::InvalidImageInfo);
        }
        let src_ct = self.color_info.color_type();
        if src_ct == ColorType::Unknown {
            return Err(Error::UnsupportedColorType(src_ct));
        }
        if !alpha_types_compatible(self.color_info.alpha_type(), dst_info.alpha_type()) {
            return Err(Error::IncompatibleAlphaType);
        }
        let Some((mut dst, pt)) = dst.clip(self.dimensions(), pt) else {
            return Err(Error::EmptyRect);
        };
        let proxy = self.proxy();
        if proxy.framebuffer_only() {
            return Err(Error::FramebufferOnly);
        }
        if !ctx.instantiate(proxy) {
            return Err(Error::InstantiationFailed);
        }

        let caps = ctx.caps();
        let read_support = caps.surface_supports_read_pixels(proxy.is_wrapped());
        if read_support == SurfaceReadPixelsSupport::Unsupported {
            return Err(Error::UnsupportedColorType(src_ct));
        }
        let dst_ct = dst.info().color_type();
        let steps = XformSteps::between(&self.color_info, &dst.info().color_info());
        let canvas2d = steps.unpremul
            && !steps.needs_color_conversion()
            && is_rgba_or_bgra_8888(dst_ct)
            && proxy.is_texturable()
            && is_rgba_or_bgra_8888(src_ct)
            && ctx.valid_pm_upm_conversion_exists();

        if read_support == SurfaceReadPixelsSupport::CopyToTexture2D || canvas2d {
            let dims = dst.dimensions();
            let src_rect = IRect::from_pt_size(pt, dims);
            let temp = if proxy.is_texturable() {
                let color_info = if canvas2d {
                    ColorInfo::new(
                        ColorType::Rgba8888,
                        dst.info().alpha_type(),
                        self.color_info.color_space(),
                    )
                } else {
                    self.color_info
                };
                let sfc = ctx
                    .make_sfc(
                        ImageInfo::from_color_info(color_info, dims),
                        BackingFit::Approx,
                        Origin::TopLeft,
                    )
                    .ok_or(Error::AllocationFailed)?;
                let texture = FragmentProcessor::texture(
                    self.sampled_texture(ctx, self.bounds())?,
                    Filter::Nearest,
                );
                let fp = if canvas2d {
                    FragmentProcessor::pm_to_upm(texture)
                } else {
                    texture
                };
                sfc.fill_rect_to_rect_with_fp(
                    ctx,
                    Rect::from(src_rect),
                    IRect::from_size(dims),
                    fp,
                    vec![proxy.clone()],
                )?;
                sfc.into_surface_context()
            } else {
                self.copy_to_texture(ctx, src_rect, BackingFit::Exact)?
            };
            logwise::trace_sync!(
                "reading {src_rect} through an intermediate texture",
                src_rect = logwise::privacy::LogIt(src_rect)
            );
            return temp.read_pixels(ctx, dst, IPoint::new(0, 0));
        }

        let supported = caps.supported_read_pixels_color_type(src_ct, proxy.backend_format(), dst_ct);
        let read_ct = supported.color_type;
        let flip = self.origin() == Origin::BottomLeft;
        let make_tight = !caps.read_pixels_row_bytes_support
            && dst.row_bytes() != dst.info().min_row_bytes();
        let convert = steps.unpremul
            || steps.premul
            || steps.needs_color_conversion()
            || flip
            || make_tight
            || dst_ct != read_ct;

        let dims = dst.dimensions();
        let mut rect = IRect::from_pt_size(pt, dims);
        if flip {
            rect = rect.flip_y(proxy.backing_dimensions().height);
        }
        let Some(texture) = proxy.texture() else {
            return Err(Error::InstantiationFailed);
        };

        ctx.flush_surface(proxy, FlushInfo::default());
        ctx.submit(SyncCpu::Yes);

        let device = ctx.gpu();
        if convert {
            let tmp_info = ImageInfo::new(
                dims,
                read_ct,
                self.color_info.alpha_type(),
                self.color_info.color_space(),
            );
            let tmp_row_bytes = tmp_info.min_row_bytes();
            let mut tmp = vec![0u8; tmp_info.compute_byte_size(tmp_row_bytes)];
            if !gpu::read_pixels_checked(
                device.as_ref(),
                caps,
                texture,
                proxy.backing_dimensions(),
                rect,
                src_ct,
                read_ct,
                &mut tmp,
                tmp_row_bytes,
            ) {
                return Err(Error::DeviceFailure);
            }
            let tmp = Pixmap::new(tmp_info, &tmp, tmp_row_bytes)?;
            if !convert_pixels(dst, tmp, flip) {
                return Err(Error::UnsupportedColorType(dst_ct));
            }
        } else {
            let row_bytes = dst.row_bytes();
            if !gpu::read_pixels_checked(
                device.as_ref(),
                caps,
                texture,
                proxy.backing_dimensions(),
                rect,
                src_ct,
                read_ct,
                dst.pixels_mut(),
                row_bytes,
            ) {
                return Err(Error::DeviceFailure);
            }
        }
        Ok(())
    }

    /// Writes `src` at `pt`.  Pixels of `src` that fall outside the surface are dropped.
    pub fn write_pixels(&self, ctx: &DirectContext, src: Pixmap<'_>, pt: IPoint) -> Result<(), Error> {
        ctx.check_usable(self.context_id)?;
        let Some((src, pt)) = src.clip(self.dimensions(), pt) else {
            return Err(Error::EmptyRect);
        };
        self.internal_write_pixels(ctx, &[src], pt)
    }

    /// Writes a complete mip chain.  A single level must cover the whole surface; more levels
    /// need a mipmapped surface and must halve down to 1x1 with identical color info.
    pub fn write_pixels_levels(&self, ctx: &DirectContext, levels: &[Pixmap<'_>]) -> Result<(), Error> {
        ctx.check_usable(self.context_id)?;
        let [base, rest @ ..] = levels else {
            return Err(Error::InvalidImageInfo);
        };
        if base.dimensions() != self.dimensions() {
            return Err(Error::InvalidImageInfo);
        }
        if rest.is_empty() {
            return self.internal_write_pixels(ctx, levels, IPoint::new(0, 0));
        }
        if !self.proxy().is_mipmapped() || rest.len() != gpu::mip_level_count(self.dimensions()) {
            return Err(Error::InvalidImageInfo);
        }
        let color_info = base.info().color_info();
        let mut expected = base.dimensions();
        for level in rest {
            expected = ISize::new((expected.width / 2).max(1), (expected.height / 2).max(1));
            if level.dimensions() != expected || level.info().color_info() != color_info {
                return Err(Error::InvalidImageInfo);
            }
        }
        self.internal_write_pixels(ctx, levels, IPoint::new(0, 0))
    }

    fn internal_write_pixels(&self, ctx: &DirectContext, src: &[Pixmap<'_>], pt: IPoint) -> Result<(), Error> {
        let proxy = self.proxy();
        if proxy.read_only() {
            return Err(Error::ReadOnly);
        }
        let Some(base) = src.first() else {
            return Err(Error::InvalidImageInfo);
        };
        let src_ct = base.info().color_type();
        if src_ct == ColorType::Unknown {
            return Err(Error::InvalidImageInfo);
        }
        let dst_ct = self.color_info.color_type();
        if dst_ct == ColorType::Unknown {
            return Err(Error::UnsupportedColorType(dst_ct));
        }
        if !alpha_types_compatible(base.info().alpha_type(), self.color_info.alpha_type()) {
            return Err(Error::IncompatibleAlphaType);
        }
        if proxy.framebuffer_only() {
            return Err(Error::FramebufferOnly);
        }
        if !ctx.instantiate(proxy) {
            return Err(Error::InstantiationFailed);
        }

        let caps = ctx.caps();
        let steps = XformSteps::between(&base.info().color_info(), &self.color_info);
        let renderable = proxy.is_renderable();
        let canvas2d = !caps.avoid_write_pixels_fast_path
            && steps.premul
            && !steps.needs_color_conversion()
            && is_rgba_or_bgra_8888(src_ct)
            && src.len() == 1
            && renderable
            && is_rgba_or_bgra_8888(dst_ct)
            && ctx.valid_pm_upm_conversion_exists();

        if (!caps.surface_supports_write_pixels(renderable) || canvas2d) && src.len() == 1 {
            return self.write_through_temp(ctx, *base, pt, canvas2d);
        }

        let allowed = caps
            .supported_write_pixels_color_type(dst_ct, proxy.backend_format(), src_ct)
            .color_type;
        let flip = self.origin() == Origin::BottomLeft;
        let convert_all = steps.premul
            || steps.unpremul
            || steps.needs_color_conversion()
            || flip
            || src_ct != allowed;
        let must_be_tight = !caps.write_pixels_row_bytes_support;

        let mut levels = Vec::with_capacity(src.len());
        for level in src {
            let tight = level.info().min_row_bytes();
            if convert_all || (must_be_tight && level.row_bytes() != tight) {
                let info = ImageInfo::from_color_info(
                    self.color_info.make_color_type(allowed),
                    level.dimensions(),
                );
                let row_bytes = info.min_row_bytes();
                let mut pixels = vec![0u8; info.compute_byte_size(row_bytes)];
                if !convert_pixels(PixmapMut::new(info, &mut pixels, row_bytes)?, *level, flip) {
                    return Err(Error::UnsupportedColorType(src_ct));
                }
                levels.push(OwnedMipLevel { pixels, row_bytes });
            } else {
                let len = level.info().compute_byte_size(level.row_bytes());
                levels.push(OwnedMipLevel {
                    pixels: level.pixels()[..len].to_vec(),
                    row_bytes: level.row_bytes(),
                });
            }
        }

        let mut rect = IRect::from_pt_size(pt, base.dimensions());
        if flip {
            rect = rect.flip_y(proxy.backing_dimensions().height);
        }
        ctx.drawing_manager().add_task(RenderTask::WritePixels {
            dst: proxy.clone(),
            rect,
            surface_color_type: dst_ct,
            src_color_type: allowed,
            levels,
        });
        Ok(())
    }

    /// Uploads `src` into a temporary texture, then draws it into place, or copies it when
    /// this surface cannot be drawn to.
    fn write_through_temp(&self, ctx: &DirectContext, src: Pixmap<'_>, pt: IPoint, canvas2d: bool) -> Result<(), Error> {
        let dims = src.dimensions();
        let temp_color_info = if canvas2d {
            ColorInfo::new(
                ColorType::Rgba8888,
                AlphaType::Unpremul,
                self.color_info.color_space(),
            )
        } else {
            self.color_info
        };
        let temp = ctx
            .make_sc(
                ImageInfo::from_color_info(temp_color_info, dims),
                Origin::TopLeft,
                false,
            )
            .ok_or(Error::AllocationFailed)?;
        temp.write_pixels(ctx, src, IPoint::new(0, 0))?;

        let Some(fill) = self.as_fill() else {
            return self.copy(ctx, &temp, IRect::from_size(dims), pt);
        };
        let texture = FragmentProcessor::texture(
            temp.sampled_texture(ctx, IRect::from_size(dims))?,
            Filter::Nearest,
        );
        let fp = if canvas2d {
            FragmentProcessor::upm_to_pm(texture)
        } else {
            texture
        };
        fill.fill_rect_to_rect_with_fp(
            ctx,
            Rect::from(IRect::from_size(dims)),
            IRect::from_pt_size(pt, dims),
            fp,
            vec![temp.proxy().clone()],
        )
    }

    /// Records a copy of `src_rect` from `src` to `dst_point`.  Both sides are clipped first.
    pub fn copy(&self, ctx: &DirectContext, src: &SurfaceContext, src_rect: IRect, dst_point: IPoint) -> Result<(), Error> {
        ctx.check_usable(self.context_id)?;
        ctx.check_usable(src.context_id)?;
        let (src_rect, dst_point) =
            clip_src_rect_and_dst_point(self.dimensions(), dst_point, src.dimensions(), src_rect)
                .ok_or(Error::EmptyRect)?;
        let dst_rect = IRect::from_pt_size(dst_point, src_rect.size());
        self.copy_from_view(ctx, src.read_view(), src_rect, dst_rect, Filter::Nearest)
    }

    /// Records a copy that may change size, resampling with `filter`.
    pub fn copy_scaled(
        &self,
        ctx: &DirectContext,
        src: &SurfaceContext,
        src_rect: IRect,
        dst_rect: IRect,
        filter: Filter,
    ) -> Result<(), Error> {
        ctx.check_usable(self.context_id)?;
        ctx.check_usable(src.context_id)?;
        self.copy_from_view(ctx, src.read_view(), src_rect, dst_rect, filter)
    }

    fn copy_from_view(
        &self,
        ctx: &DirectContext,
        src: &SurfaceProxyView,
        src_rect: IRect,
        dst_rect: IRect,
        filter: Filter,
    ) -> Result<(), Error> {
        let dst_proxy = self.proxy();
        let src_proxy = src.proxy();
        if dst_proxy.read_only() {
            return Err(Error::ReadOnly);
        }
        if dst_proxy.framebuffer_only() || src_proxy.framebuffer_only() {
            return Err(Error::FramebufferOnly);
        }
        if src.origin() != self.origin() {
            return Err(Error::CopyUnsupported);
        }
        if !ctx.caps().can_copy_surface(
            dst_proxy.backend_format(),
            dst_proxy.dimensions(),
            dst_rect,
            src_proxy.backend_format(),
            src_proxy.dimensions(),
            src_rect,
        ) {
            return Err(Error::CopyUnsupported);
        }
        if !ctx.instantiate(src_proxy) || !ctx.instantiate(dst_proxy) {
            return Err(Error::InstantiationFailed);
        }
        if filter == Filter::Linear
            && src_rect.size() != dst_rect.size()
            && !src_proxy.is_functionally_exact()
        {
            // filtering would pull in texels past the logical edge
            let backing = src_proxy.backing_dimensions();
            if (src_rect.right == src_proxy.width() && backing.width > src_proxy.width())
                || (src_rect.bottom == src_proxy.height() && backing.height > src_proxy.height())
            {
                return Err(Error::CopyUnsupported);
            }
        }
        ctx.drawing_manager().add_task(RenderTask::Copy {
            dst: dst_proxy.clone(),
            dst_rect,
            src: src_proxy.clone(),
            src_rect,
            filter,
            origin: self.origin(),
        });
        Ok(())
    }

    /// Records a transfer of `rect` into a new buffer, read back as `dst_color_type`.
    ///
    /// Returns `None` when the backend cannot transfer from this surface or when `rect` is not
    /// inside it.  The result converts on mapping whenever the device's read color type
    /// differs or the rows have to be flipped.
    pub fn transfer_pixels(
        &self,
        ctx: &DirectContext,
        dst_color_type: ColorType,
        rect: IRect,
    ) -> Option<PixelTransferResult> {
        if ctx.check_usable(self.context_id).is_err()
            || dst_color_type == ColorType::Unknown
            || !self.bounds().contains(&rect)
        {
            return None;
        }
        let proxy = self.proxy();
        if proxy.framebuffer_only() || !ctx.instantiate(proxy) {
            return None;
        }
        let caps = ctx.caps();
        let src_ct = self.color_info.color_type();
        let supported = caps.supported_read_pixels_color_type(src_ct, proxy.backend_format(), dst_color_type);
        let read_ct = supported.color_type;
        // channels the caller wants and the surface has must survive the read
        let lost = !read_ct.channel_flags() & dst_color_type.channel_flags() & src_ct.channel_flags();
        if !lost.is_empty()
            || read_ct == ColorType::Unknown
            || !caps.transfer_from_surface_to_buffer_support
            || supported.offset_alignment_for_transfer_buffer == 0
        {
            return None;
        }

        let dims = rect.size();
        let alignment = caps.transfer_buffer_row_bytes_alignment.max(1);
        let row_bytes = align_up(read_ct.bytes_per_pixel() * dims.width as usize, alignment);
        let size = row_bytes * dims.height as usize;
        let messages = ctx.message_sender();
        let (result_ref, task_ref, handle) = {
            let mut provider = ctx.provider();
            let id = provider.create_buffer(size, BufferType::XferGpuToCpu, AccessPattern::Stream, false)?;
            let result_ref = ResourceRef::adopt(id, messages.clone());
            let handle = provider.buffer_handle(id)?;
            provider.add_ref(id);
            (result_ref, ResourceRef::adopt(id, messages), handle)
        };

        let flip = self.origin() == Origin::BottomLeft;
        let src_rect = if flip {
            rect.flip_y(proxy.backing_dimensions().height)
        } else {
            rect
        };
        ctx.drawing_manager().add_task(RenderTask::TransferFrom {
            src: proxy.clone(),
            rect: src_rect,
            surface_color_type: src_ct,
            buffer_color_type: read_ct,
            buffer: task_ref,
            handle,
            offset: 0,
            row_bytes,
        });

        if read_ct == dst_color_type && !flip {
            return Some(PixelTransferResult::new(result_ref, handle, row_bytes, None));
        }
        let alpha_type = self.color_info.alpha_type();
        let src_info = ImageInfo::new(dims, read_ct, alpha_type, None);
        let dst_info = ImageInfo::new(dims, dst_color_type, alpha_type, None);
        let dst_row_bytes = dst_info.min_row_bytes();
        let converter: PixelConverter = Box::new(move |dst, src| {
            match (
                PixmapMut::new(dst_info, dst, dst_row_bytes),
                Pixmap::new(src_info, src, row_bytes),
            ) {
                (Ok(dst), Ok(src)) => convert_pixels(dst, src, flip),
                _ => false,
            }
        });
        Some(PixelTransferResult::new(
            result_ref,
            handle,
            dst_row_bytes,
            Some(converter),
        ))
    }
}

/// A surface context on a render target.
#[derive(Debug, Clone)]
pub struct SurfaceFillContext {
    surface: SurfaceContext,
}

impl Deref for SurfaceFillContext {
    type Target = SurfaceContext;

    fn deref(&self) -> &SurfaceContext {
        &self.surface
    }
}

impl SurfaceFillContext {
    pub(crate) fn new(surface: SurfaceContext) -> Self {
        debug_assert!(surface.proxy().is_renderable());
        SurfaceFillContext { surface }
    }

    pub fn into_surface_context(self) -> SurfaceContext {
        self.surface
    }

    /// Fills `dst_rect` with `fp`, which is evaluated at the matching point of `local`.
    /// The destination is clipped to the surface and `local` shrinks along with it.
    ///
    /// `sampled` must hold every surface `fp` reads from; they stay alive until the fill has
    /// run on the device.
    pub fn fill_rect_to_rect_with_fp(
        &self,
        ctx: &DirectContext,
        local: Rect,
        dst_rect: IRect,
        fp: FragmentProcessor,
        sampled: Vec<SurfaceProxy>,
    ) -> Result<(), Error> {
        ctx.check_usable(self.context_id())?;
        let proxy = self.proxy();
        if proxy.read_only() {
            return Err(Error::ReadOnly);
        }
        if dst_rect.is_empty() {
            return Err(Error::EmptyRect);
        }
        let clipped = self.bounds().intersect(&dst_rect).ok_or(Error::EmptyRect)?;
        let local = if clipped == dst_rect {
            local
        } else {
            let sx = local.width() / dst_rect.width() as f32;
            let sy = local.height() / dst_rect.height() as f32;
            Rect::from_ltrb(
                local.left + (clipped.left - dst_rect.left) as f32 * sx,
                local.top + (clipped.top - dst_rect.top) as f32 * sy,
                local.left + (clipped.right - dst_rect.left) as f32 * sx,
                local.top + (clipped.bottom - dst_rect.top) as f32 * sy,
            )
        };
        if !ctx.instantiate(proxy) {
            return Err(Error::InstantiationFailed);
        }
        ctx.drawing_manager().add_task(RenderTask::Fill {
            dst: proxy.clone(),
            color_type: self.color_info().color_type(),
            origin: self.origin(),
            dst_rect: clipped,
            local_rect: local,
            fp,
            sampled,
        });
        Ok(())
    }

    /// Fills the whole surface, with local coordinates equal to device coordinates.
    pub fn fill_with_fp(&self, ctx: &DirectContext, fp: FragmentProcessor, sampled: Vec<SurfaceProxy>) -> Result<(), Error> {
        let bounds = self.bounds();
        self.fill_rect_to_rect_with_fp(ctx, Rect::from(bounds), bounds, fp, sampled)
    }
}

#[cfg(all(test, feature = "backend_soft"))]
mod tests {
    use super::*;
    use crate::caps::Caps;
    use crate::context::ContextOptions;
    use crate::gpu::Gpu;
    use crate::imp::SoftGpu;
    use std::sync::Arc;

    fn context() -> (Arc<SoftGpu>, DirectContext) {
        let gpu = Arc::new(SoftGpu::new());
        let context = DirectContext::new(gpu.clone(), Caps::soft(), ContextOptions::default());
        (gpu, context)
    }

    fn info(ct: ColorType, at: AlphaType, w: i32, h: i32) -> ImageInfo {
        ImageInfo::new(ISize::new(w, h), ct, at, None)
    }

    fn pattern(w: i32, h: i32) -> Vec<u8> {
        (0..w * h)
            .flat_map(|i| [i as u8, (i * 3) as u8, (i * 7) as u8, 255])
            .collect()
    }

    fn read_all(ctx: &DirectContext, sc: &SurfaceContext, info: ImageInfo) -> Vec<u8> {
        let rb = info.min_row_bytes();
        let mut out = vec![0u8; info.compute_byte_size(rb)];
        sc.read_pixels(ctx, PixmapMut::new(info, &mut out, rb).unwrap(), IPoint::new(0, 0))
            .unwrap();
        out
    }

    #[test]
    fn writes_are_deferred_until_a_read() {
        let (gpu, ctx) = context();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 3, 2);
        let sc = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
        let src = pattern(3, 2);
        sc.write_pixels(&ctx, Pixmap::new(i, &src, 12).unwrap(), IPoint::new(0, 0))
            .unwrap();
        assert_eq!(gpu.stats().writes, 0);
        assert_eq!(read_all(&ctx, &sc, i), src);
        assert_eq!(gpu.stats().writes, 1);
    }

    #[test]
    fn bottom_left_surfaces_read_back_upright() {
        let (_gpu, ctx) = context();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 2, 3);
        let sc = ctx.make_sc(i, Origin::BottomLeft, false).unwrap();
        let src = pattern(2, 3);
        sc.write_pixels(&ctx, Pixmap::new(i, &src, 8).unwrap(), IPoint::new(0, 0))
            .unwrap();
        assert_eq!(read_all(&ctx, &sc, i), src);

        // a single row read from the top of the surface
        let row_info = info(ColorType::Rgba8888, AlphaType::Premul, 2, 1);
        let mut row = vec![0u8; 8];
        sc.read_pixels(&ctx, PixmapMut::new(row_info, &mut row, 8).unwrap(), IPoint::new(0, 0))
            .unwrap();
        assert_eq!(row, src[..8]);
    }

    #[test]
    fn partially_outside_reads_leave_the_rest_alone() {
        let (_gpu, ctx) = context();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 2, 2);
        let sc = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
        let src = pattern(2, 2);
        sc.write_pixels(&ctx, Pixmap::new(i, &src, 8).unwrap(), IPoint::new(0, 0))
            .unwrap();

        let mut out = vec![0xAAu8; 16];
        sc.read_pixels(&ctx, PixmapMut::new(i, &mut out, 8).unwrap(), IPoint::new(1, 1))
            .unwrap();
        assert_eq!(out[..12], [0xAA; 12]);
        assert_eq!(out[12..], src[12..]);

        let mut out = vec![0u8; 16];
        assert_eq!(
            sc.read_pixels(&ctx, PixmapMut::new(i, &mut out, 8).unwrap(), IPoint::new(2, 0)),
            Err(Error::EmptyRect)
        );
    }

    #[test]
    fn unknown_alpha_does_not_mix_with_known() {
        let (_gpu, ctx) = context();
        let sc = ctx
            .make_sc(info(ColorType::Rgba8888, AlphaType::Premul, 1, 1), Origin::TopLeft, false)
            .unwrap();
        let mut out = vec![0u8; 4];
        let dst = PixmapMut::new(info(ColorType::Rgba8888, AlphaType::Unknown, 1, 1), &mut out, 4).unwrap();
        assert_eq!(
            sc.read_pixels(&ctx, dst, IPoint::new(0, 0)),
            Err(Error::IncompatibleAlphaType)
        );
    }

    #[test]
    fn bgra_reads_swap_on_the_cpu() {
        let (_gpu, ctx) = context();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 1, 1);
        let sc = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
        sc.write_pixels(&ctx, Pixmap::new(i, &[10, 20, 30, 255], 4).unwrap(), IPoint::new(0, 0))
            .unwrap();
        let bgra = info(ColorType::Bgra8888, AlphaType::Premul, 1, 1);
        assert_eq!(read_all(&ctx, &sc, bgra), [30, 20, 10, 255]);
    }

    #[test]
    fn writes_that_require_a_draw_still_land() {
        let gpu = Arc::new(SoftGpu::new());
        let caps = Caps {
            writes_require_draw: true,
            ..Caps::soft()
        };
        let ctx = DirectContext::new(gpu.clone(), caps, ContextOptions::default());
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 2, 2);
        let sfc = ctx.make_sfc(i, BackingFit::Exact, Origin::TopLeft).unwrap();
        let src = pattern(2, 2);
        sfc.write_pixels(&ctx, Pixmap::new(i, &src, 8).unwrap(), IPoint::new(0, 0))
            .unwrap();
        assert_eq!(read_all(&ctx, &sfc, i), src);
        assert!(gpu.stats().draws >= 1);
    }

    #[test]
    fn read_only_surfaces_refuse_writes_and_copies() {
        let (gpu, ctx) = context();
        let desc = TextureDesc {
            dimensions: ISize::new(2, 2),
            format: crate::pixel_formats::BackendFormat::Rgba8Unorm,
            renderable: false,
            mipmapped: false,
            protected: false,
        };
        let texture = gpu.create_texture(&desc).unwrap();
        let color_info = ColorInfo::new(ColorType::Rgba8888, AlphaType::Premul, None);
        let wrapped = ctx
            .wrap_backend_texture(
                texture,
                desc,
                color_info,
                Origin::TopLeft,
                crate::resource_provider::Ownership::Adopted,
                false,
                SurfaceAccess::ReadOnly,
            )
            .unwrap();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 2, 2);
        let src = pattern(2, 2);
        assert_eq!(
            wrapped.write_pixels(&ctx, Pixmap::new(i, &src, 8).unwrap(), IPoint::new(0, 0)),
            Err(Error::ReadOnly)
        );
        let other = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
        assert_eq!(
            wrapped.copy(&ctx, &other, IRect::from_xywh(0, 0, 2, 2), IPoint::new(0, 0)),
            Err(Error::ReadOnly)
        );
    }

    #[test]
    fn copies_are_clipped_to_both_surfaces() {
        let (_gpu, ctx) = context();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 2, 2);
        let src = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
        let dst = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
        let pixels = pattern(2, 2);
        src.write_pixels(&ctx, Pixmap::new(i, &pixels, 8).unwrap(), IPoint::new(0, 0))
            .unwrap();
        dst.write_pixels(&ctx, Pixmap::new(i, &[0; 16], 8).unwrap(), IPoint::new(0, 0))
            .unwrap();
        dst.copy(&ctx, &src, IRect::from_xywh(0, 0, 2, 2), IPoint::new(1, 0))
            .unwrap();
        let out = read_all(&ctx, &dst, i);
        assert_eq!(out[4..8], pixels[0..4]);
        assert_eq!(out[12..16], pixels[8..12]);
        assert_eq!(out[0..4], [0; 4]);
        assert_eq!(
            dst.copy(&ctx, &src, IRect::from_xywh(0, 0, 2, 2), IPoint::new(2, 2)),
            Err(Error::EmptyRect)
        );
    }

    #[test]
    fn copies_between_origins_are_refused() {
        let (_gpu, ctx) = context();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 2, 2);
        let src = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
        let dst = ctx.make_sc(i, Origin::BottomLeft, false).unwrap();
        assert_eq!(
            dst.copy(&ctx, &src, IRect::from_xywh(0, 0, 2, 2), IPoint::new(0, 0)),
            Err(Error::CopyUnsupported)
        );
    }

    #[test]
    fn mip_chains_must_halve() {
        let (_gpu, ctx) = context();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 4, 2);
        let sc = ctx.make_sc(i, Origin::TopLeft, true).unwrap();
        let l0 = vec![1u8; 32];
        let l1 = vec![2u8; 8];
        let l2 = vec![3u8; 4];
        let levels = [
            Pixmap::new(i, &l0, 16).unwrap(),
            Pixmap::new(i.make_dimensions(ISize::new(2, 1)), &l1, 8).unwrap(),
            Pixmap::new(i.make_dimensions(ISize::new(1, 1)), &l2, 4).unwrap(),
        ];
        sc.write_pixels_levels(&ctx, &levels).unwrap();
        assert_eq!(read_all(&ctx, &sc, i), l0);

        let skipped = [levels[0], levels[2]];
        assert_eq!(
            sc.write_pixels_levels(&ctx, &skipped),
            Err(Error::InvalidImageInfo)
        );
    }

    #[test]
    fn transfers_from_bottom_left_convert_on_map() {
        let (gpu, ctx) = context();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 2, 2);
        let sc = ctx.make_sc(i, Origin::BottomLeft, false).unwrap();
        let src = pattern(2, 2);
        sc.write_pixels(&ctx, Pixmap::new(i, &src, 8).unwrap(), IPoint::new(0, 0))
            .unwrap();
        let transfer = sc
            .transfer_pixels(&ctx, ColorType::Rgba8888, IRect::from_xywh(0, 0, 2, 2))
            .unwrap();
        assert!(transfer.converts());
        ctx.flush_and_submit(SyncCpu::Yes);
        let mut result = crate::async_read_result::AsyncReadResult::new();
        assert!(result.add_transfer_result(transfer, ISize::new(2, 2), gpu.as_ref()));
        assert_eq!(result.data(0), &src[..]);
    }

    #[test]
    fn fills_clip_their_local_rect() {
        let (_gpu, ctx) = context();
        let i = info(ColorType::Rgba8888, AlphaType::Premul, 2, 1);
        let src = ctx.make_sc(i, Origin::TopLeft, false).unwrap();
        src.write_pixels(&ctx, Pixmap::new(i, &[1, 1, 1, 255, 2, 2, 2, 255], 8).unwrap(), IPoint::new(0, 0))
            .unwrap();
        let dst = ctx.make_sfc(i, BackingFit::Exact, Origin::TopLeft).unwrap();
        let fp = FragmentProcessor::texture(
            src.sampled_texture(&ctx, IRect::from_xywh(0, 0, 2, 1)).unwrap(),
            Filter::Nearest,
        );
        // the clipped destination keeps the left half of the local rect
        dst.fill_rect_to_rect_with_fp(
            &ctx,
            Rect::from_ltrb(0.0, 0.0, 2.0, 1.0),
            IRect::from_xywh(1, 0, 2, 1),
            fp.clone(),
            vec![src.proxy().clone()],
        )
        .unwrap();
        let out = read_all(&ctx, &dst, i);
        assert_eq!(out[4..8], [1, 1, 1, 255]);
        assert_eq!(
            dst.fill_rect_to_rect_with_fp(
                &ctx,
                Rect::from_ltrb(0.0, 0.0, 1.0, 1.0),
                IRect::from_xywh(5, 0, 1, 1),
                fp,
                vec![],
            ),
            Err(Error::EmptyRect)
        );
    }
}
