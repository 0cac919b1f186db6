// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Asynchronous readback.

Every async read ends in exactly one call of its [`ReadPixelsCallback`]: with the pixels, or
with `None` on failure.  When the backend can transfer from surfaces to buffers the read is
recorded as a transfer and the callback runs from the finished proc of the flush that carries
it, so clients must keep calling
[`check_async_work_completion`](crate::context::DirectContext::check_async_work_completion).
Without transfer support the read happens synchronously and the callback runs before the call
returns.

YUV 4:2:0 reads draw the source into one alpha-only target per plane and read those back
together.  A failure on any plane fails the whole read.
*/

use super::{RescaleGamma, RescaleMode, SurfaceContext, SurfaceFillContext};
use crate::Error;
use crate::async_read_result::{AsyncReadResult, PixelTransferResult};
use crate::context::{DirectContext, FlushInfo};
use crate::coordinates::{IPoint, IRect, ISize, Rect};
use crate::effects::FragmentProcessor;
use crate::finish_callbacks::FinishedProc;
use crate::gpu::{Filter, Origin};
use crate::pixel_formats::yuv::{YuvColorSpace, row_to_alpha};
use crate::pixel_formats::{AlphaType, ColorSpace, ColorType, ImageInfo, PixmapMut};
use crate::resource_provider::BackingFit;

/// Receives the result of an async read.  `None` means the read failed.
pub type ReadPixelsCallback = Box<dyn FnOnce(Option<AsyncReadResult>)>;

/// Reads `rect` of `sc` into a heap plane right away.
fn read_into_plane(
    ctx: &DirectContext,
    sc: &SurfaceContext,
    rect: IRect,
    color_type: ColorType,
) -> Result<(Box<[u8]>, usize), Error> {
    let color_info = sc.color_info();
    let info = ImageInfo::new(
        rect.size(),
        color_type,
        color_info.alpha_type(),
        color_info.color_space(),
    );
    let row_bytes = info.min_row_bytes();
    let mut pixels = vec![0u8; info.compute_byte_size(row_bytes)];
    sc.read_pixels(
        ctx,
        PixmapMut::new(info, &mut pixels, row_bytes)?,
        rect.top_left(),
    )?;
    Ok((pixels.into_boxed_slice(), row_bytes))
}

/// Flushes `sc` with a finished proc that maps every transfer into one result.
fn deliver_when_finished(
    ctx: &DirectContext,
    sc: &SurfaceContext,
    transfers: Vec<(PixelTransferResult, ISize)>,
    callback: ReadPixelsCallback,
) {
    let gpu = ctx.gpu().clone();
    let abandoned = ctx.abandoned_flag();
    let finished: FinishedProc = Box::new(move || {
        if abandoned.get() {
            callback(None);
            return;
        }
        let mut result = AsyncReadResult::new();
        for (transfer, dimensions) in transfers {
            if !result.add_transfer_result(transfer, dimensions, gpu.as_ref()) {
                callback(None);
                return;
            }
        }
        callback(Some(result));
    });
    ctx.flush_surface(
        sc.proxy(),
        FlushInfo {
            finished_proc: Some(finished),
        },
    );
}

impl SurfaceContext {
    /// Reads `rect` as `color_type` without waiting for the device.
    pub fn async_read_pixels(
        &self,
        ctx: &DirectContext,
        rect: IRect,
        color_type: ColorType,
        callback: ReadPixelsCallback,
    ) {
        if ctx.check_usable(self.context_id()).is_err()
            || self.proxy().is_protected()
            || color_type == ColorType::Unknown
            || !self.bounds().contains(&rect)
        {
            callback(None);
            return;
        }
        let Some(transfer) = self.transfer_pixels(ctx, color_type, rect) else {
            match read_into_plane(ctx, self, rect, color_type) {
                Ok((pixels, row_bytes)) => {
                    let mut result = AsyncReadResult::new();
                    result.add_cpu_plane(pixels, row_bytes);
                    callback(Some(result));
                }
                Err(error) => {
                    logwise::info_sync!(
                        "synchronous fallback read of {rect} failed: {error}",
                        rect = logwise::privacy::LogIt(rect),
                        error = logwise::privacy::LogIt(&error)
                    );
                    callback(None);
                }
            }
            return;
        };
        deliver_when_finished(ctx, self, vec![(transfer, rect.size())], callback);
    }

    /// Rescales `src_rect` to `info`'s size and color info, then reads the result
    /// asynchronously.  Without any change to apply the read goes straight to this surface.
    pub fn async_rescale_and_read_pixels(
        &self,
        ctx: &DirectContext,
        info: ImageInfo,
        src_rect: IRect,
        gamma: RescaleGamma,
        mode: RescaleMode,
        callback: ReadPixelsCallback,
    ) {
        if ctx.check_usable(self.context_id()).is_err()
            || !self.bounds().contains(&src_rect)
            || self.proxy().framebuffer_only()
            || info.dimensions().is_empty()
            || info.color_type() == ColorType::Unknown
        {
            callback(None);
            return;
        }
        let color_info = self.color_info();
        let needs_rescale = src_rect.size() != info.dimensions()
            || self.origin() == Origin::BottomLeft
            || color_info.alpha_type() != info.alpha_type()
            || color_info.color_space() != info.color_space();

        let caps = ctx.caps();
        let (src_ct, format) = if needs_rescale {
            match caps.default_backend_format(info.color_type(), true) {
                Some(format) => (info.color_type(), format),
                None => {
                    callback(None);
                    return;
                }
            }
        } else {
            (color_info.color_type(), self.proxy().backend_format())
        };
        let read_ct = caps
            .supported_read_pixels_color_type(src_ct, format, info.color_type())
            .color_type;
        let lost = !read_ct.channel_flags() & info.color_type().channel_flags() & src_ct.channel_flags();
        if read_ct == ColorType::Unknown || !lost.is_empty() {
            callback(None);
            return;
        }

        if !needs_rescale {
            let rect = IRect::from_pt_size(src_rect.top_left(), info.dimensions());
            self.async_read_pixels(ctx, rect, info.color_type(), callback);
            return;
        }
        let Some(temp) = self.rescale(ctx, info, Origin::TopLeft, src_rect, gamma, mode) else {
            callback(None);
            return;
        };
        temp.async_read_pixels(
            ctx,
            IRect::from_size(info.dimensions()),
            info.color_type(),
            callback,
        );
    }

    /// Rescales `src_rect` to `dst_size` and reads it back as Y, U and V planes, plus an alpha
    /// plane when `read_alpha` is set.  U and V are half size in each dimension, so `dst_size`
    /// must be even.
    #[allow(clippy::too_many_arguments)]
    pub fn async_rescale_and_read_pixels_yuv420(
        &self,
        ctx: &DirectContext,
        yuv_color_space: YuvColorSpace,
        read_alpha: bool,
        dst_color_space: Option<ColorSpace>,
        src_rect: IRect,
        dst_size: ISize,
        gamma: RescaleGamma,
        mode: RescaleMode,
        callback: ReadPixelsCallback,
    ) {
        if ctx.check_usable(self.context_id()).is_err()
            || !self.bounds().contains(&src_rect)
            || dst_size.is_empty()
            || dst_size.width % 2 != 0
            || dst_size.height % 2 != 0
            || self.proxy().framebuffer_only()
            || self.proxy().is_protected()
        {
            callback(None);
            return;
        }
        match self.draw_yuv_planes(ctx, yuv_color_space, read_alpha, dst_color_space, src_rect, dst_size, gamma, mode) {
            Ok(planes) => read_yuv_planes(ctx, planes, callback),
            Err(error) => {
                logwise::info_sync!(
                    "drawing yuv planes from {src_rect} failed: {error}",
                    src_rect = logwise::privacy::LogIt(src_rect),
                    error = logwise::privacy::LogIt(&error)
                );
                callback(None);
            }
        }
    }

    /// Draws the plane targets in Y, U, V, A order.
    #[allow(clippy::too_many_arguments)]
    fn draw_yuv_planes(
        &self,
        ctx: &DirectContext,
        yuv_color_space: YuvColorSpace,
        read_alpha: bool,
        dst_color_space: Option<ColorSpace>,
        src_rect: IRect,
        dst_size: ISize,
        gamma: RescaleGamma,
        mode: RescaleMode,
    ) -> Result<Vec<SurfaceFillContext>, Error> {
        let needs_rescale =
            src_rect.size() != dst_size || self.color_info().color_space() != dst_color_space;
        let (source, origin) = if needs_rescale {
            let info = ImageInfo::new(dst_size, ColorType::Rgba8888, AlphaType::Premul, dst_color_space);
            let rescaled = self
                .rescale(ctx, info, Origin::TopLeft, src_rect, gamma, mode)
                .ok_or(Error::AllocationFailed)?;
            (rescaled.into_surface_context(), IPoint::new(0, 0))
        } else if !self.proxy().is_texturable() {
            (
                self.copy_to_texture(ctx, src_rect, BackingFit::Approx)?,
                IPoint::new(0, 0),
            )
        } else {
            (self.clone(), src_rect.top_left())
        };

        let full = ImageInfo::alpha8(dst_size);
        let half = full.make_dimensions(ISize::new(dst_size.width / 2, dst_size.height / 2));
        let make_plane = |info: ImageInfo| {
            ctx.make_sfc_with_fallback(info, BackingFit::Approx, Origin::TopLeft)
                .ok_or(Error::AllocationFailed)
        };
        let sampled = source.sampled_texture(ctx, IRect::from_size(source.dimensions()))?;
        let base = yuv_color_space.rgb_to_yuv();
        let local = Rect::from(IRect::from_pt_size(origin, dst_size));

        let mut plan = vec![
            (make_plane(full)?, Some(0), Filter::Nearest),
            (make_plane(half)?, Some(1), Filter::Linear),
            (make_plane(half)?, Some(2), Filter::Linear),
        ];
        if read_alpha {
            plan.push((make_plane(full)?, None, Filter::Nearest));
        }
        let mut planes = Vec::with_capacity(plan.len());
        for (plane, row, filter) in plan {
            let texture = FragmentProcessor::texture(sampled, filter);
            let fp = match row {
                Some(row) => FragmentProcessor::color_matrix(
                    texture,
                    row_to_alpha(&base, row),
                    false,
                    true,
                    false,
                ),
                None => texture,
            };
            let dst_rect = IRect::from_size(plane.dimensions());
            plane.fill_rect_to_rect_with_fp(ctx, local, dst_rect, fp, vec![source.proxy().clone()])?;
            planes.push(plane);
        }
        Ok(planes)
    }
}

/// Reads every plane as alpha-only pixels and hands them to `callback` together.
fn read_yuv_planes(ctx: &DirectContext, planes: Vec<SurfaceFillContext>, callback: ReadPixelsCallback) {
    let Some(first) = planes.first() else {
        callback(None);
        return;
    };
    let caps = ctx.caps();
    let supported = caps.supported_read_pixels_color_type(
        first.color_info().color_type(),
        first.proxy().backend_format(),
        ColorType::Alpha8,
    );
    if supported.color_type == ColorType::Unknown {
        callback(None);
        return;
    }

    if !caps.transfer_from_surface_to_buffer_support || supported.offset_alignment_for_transfer_buffer == 0 {
        let mut result = AsyncReadResult::new();
        for plane in &planes {
            match read_into_plane(ctx, plane, IRect::from_size(plane.dimensions()), ColorType::Alpha8) {
                Ok((pixels, row_bytes)) => result.add_cpu_plane(pixels, row_bytes),
                Err(error) => {
                    logwise::info_sync!(
                        "synchronous yuv plane read failed: {error}",
                        error = logwise::privacy::LogIt(&error)
                    );
                    callback(None);
                    return;
                }
            }
        }
        callback(Some(result));
        return;
    }

    let mut transfers = Vec::with_capacity(planes.len());
    for plane in &planes {
        let rect = IRect::from_size(plane.dimensions());
        let Some(transfer) = plane.transfer_pixels(ctx, ColorType::Alpha8, rect) else {
            callback(None);
            return;
        };
        transfers.push((transfer, rect.size()));
    }
    deliver_when_finished(ctx, first, transfers, callback);
}

#[cfg(all(test, feature = "backend_soft"))]
mod tests {
    use super::*;
    use crate::caps::Caps;
    use crate::context::{ContextOptions, SyncCpu};
    use crate::imp::SoftGpu;
    use crate::pixel_formats::Pixmap;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn gradient(ctx: &DirectContext, w: i32, h: i32) -> (SurfaceContext, Vec<u8>) {
        let info = ImageInfo::new(ISize::new(w, h), ColorType::Rgba8888, AlphaType::Premul, None);
        let sc = ctx.make_sc(info, Origin::TopLeft, false).unwrap();
        let pixels: Vec<u8> = (0..w * h)
            .flat_map(|i| [(i * 10) as u8, (i * 5) as u8, 200, 255])
            .collect();
        sc.write_pixels(ctx, Pixmap::new(info, &pixels, info.min_row_bytes()).unwrap(), IPoint::new(0, 0))
            .unwrap();
        (sc, pixels)
    }

    type Slot = Rc<RefCell<Option<Option<AsyncReadResult>>>>;

    fn slot() -> (Slot, ReadPixelsCallback) {
        let slot: Slot = Rc::new(RefCell::new(None));
        let out = slot.clone();
        (slot, Box::new(move |result| *out.borrow_mut() = Some(result)))
    }

    #[test]
    fn async_reads_wait_for_the_device() {
        let gpu = Arc::new(SoftGpu::new());
        gpu.set_auto_complete(false);
        let ctx = DirectContext::new(gpu.clone(), Caps::soft(), ContextOptions::default());
        let (sc, pixels) = gradient(&ctx, 4, 2);
        let (slot, callback) = slot();
        sc.async_read_pixels(&ctx, IRect::from_xywh(0, 0, 4, 2), ColorType::Rgba8888, callback);
        ctx.submit(SyncCpu::No);
        ctx.check_async_work_completion();
        assert!(slot.borrow().is_none());

        gpu.complete_all();
        ctx.check_async_work_completion();
        let result = slot.borrow_mut().take().unwrap().unwrap();
        assert_eq!(result.count(), 1);
        assert!(result.is_mapped(0));
        let row_bytes = result.row_bytes(0);
        for y in 0..2 {
            assert_eq!(
                result.data(0)[y * row_bytes..y * row_bytes + 16],
                pixels[y * 16..y * 16 + 16]
            );
        }
    }

    #[test]
    fn reads_outside_the_surface_fail_immediately() {
        let gpu = Arc::new(SoftGpu::new());
        let ctx = DirectContext::new(gpu, Caps::soft(), ContextOptions::default());
        let (sc, _) = gradient(&ctx, 2, 2);
        let (slot, callback) = slot();
        sc.async_read_pixels(&ctx, IRect::from_xywh(1, 1, 2, 2), ColorType::Rgba8888, callback);
        assert!(matches!(*slot.borrow(), Some(None)));
    }

    #[test]
    fn yuv_planes_have_the_right_sizes() {
        let gpu = Arc::new(SoftGpu::new());
        let ctx = DirectContext::new(gpu, Caps::soft(), ContextOptions::default());
        let (sc, _) = gradient(&ctx, 4, 4);
        let (slot, callback) = slot();
        sc.async_rescale_and_read_pixels_yuv420(
            &ctx,
            YuvColorSpace::Jpeg,
            true,
            None,
            IRect::from_xywh(0, 0, 4, 4),
            ISize::new(4, 4),
            RescaleGamma::Src,
            RescaleMode::Nearest,
            callback,
        );
        ctx.flush_and_submit(SyncCpu::Yes);
        let result = slot.borrow_mut().take().unwrap().unwrap();
        assert_eq!(result.count(), 4);
        assert_eq!(result.row_bytes(0), 4);
        // half-width chroma rows are padded to the transfer row alignment
        assert!(result.row_bytes(1) >= 2);
        assert_eq!(result.row_bytes(1), result.row_bytes(2));
        // alpha plane copies the opaque source
        assert!(result.data(3)[..16].iter().all(|&a| a == 255));
    }

    #[test]
    fn odd_yuv_sizes_are_refused() {
        let gpu = Arc::new(SoftGpu::new());
        let ctx = DirectContext::new(gpu, Caps::soft(), ContextOptions::default());
        let (sc, _) = gradient(&ctx, 4, 4);
        let (slot, callback) = slot();
        sc.async_rescale_and_read_pixels_yuv420(
            &ctx,
            YuvColorSpace::Rec709,
            false,
            None,
            IRect::from_xywh(0, 0, 4, 4),
            ISize::new(3, 4),
            RescaleGamma::Src,
            RescaleMode::Linear,
            callback,
        );
        assert!(matches!(*slot.borrow(), Some(None)));
    }
}
