// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Multi-pass rescaling.
//!
//! Repeated modes move toward the final size by at most a factor of two per axis and pass.
//! Intermediate results live in approximate-fit scratch targets that are dropped as soon as
//! the next pass has sampled them.  Any color conversion to the destination is folded into the
//! last pass.

use super::{SurfaceContext, SurfaceFillContext};
use crate::Error;
use crate::context::DirectContext;
use crate::coordinates::{IRect, ISize, Rect};
use crate::effects::{BicubicDirection, FragmentProcessor};
use crate::gpu::{Filter, Origin};
use crate::pixel_formats::convert::XformSteps;
use crate::pixel_formats::{AlphaType, ColorType, ImageInfo};
use crate::resource_provider::BackingFit;

/// Whether rescaling filters encoded values or linear light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RescaleGamma {
    #[default]
    Src,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RescaleMode {
    Nearest,
    /// A single bilinear pass.
    #[default]
    Linear,
    /// Bilinear passes that change each axis by at most 2x.
    RepeatedLinear,
    /// Bicubic passes that change each axis by at most 2x.
    RepeatedCubic,
}

/// Next size along one axis: halve or double toward `dst`, never overshooting it.
fn step_toward(src: i32, dst: i32) -> i32 {
    if src > dst {
        ((src + 1) / 2).max(dst)
    } else if src < dst {
        (src * 2).min(dst)
    } else {
        dst
    }
}

impl SurfaceContext {
    /// Rescales `src_rect` into a new render target of `info`'s size.  The target falls back to
    /// a renderable color type when `info`'s cannot be drawn to.
    pub fn rescale(
        &self,
        ctx: &DirectContext,
        info: ImageInfo,
        origin: Origin,
        src_rect: IRect,
        gamma: RescaleGamma,
        mode: RescaleMode,
    ) -> Option<SurfaceFillContext> {
        let sfc = ctx.make_sfc_with_fallback(info, BackingFit::Exact, origin)?;
        let dst_rect = IRect::from_size(sfc.dimensions());
        match self.rescale_into(ctx, &sfc, dst_rect, src_rect, gamma, mode) {
            Ok(()) => Some(sfc),
            Err(error) => {
                logwise::info_sync!(
                    "rescaling {src_rect} to {dimensions} failed: {error}",
                    src_rect = logwise::privacy::LogIt(src_rect),
                    dimensions = logwise::privacy::LogIt(info.dimensions()),
                    error = logwise::privacy::LogIt(&error)
                );
                None
            }
        }
    }

    /// Rescales `src_rect` of this surface into `dst_rect` of `dst`.
    pub fn rescale_into(
        &self,
        ctx: &DirectContext,
        dst: &SurfaceFillContext,
        dst_rect: IRect,
        src_rect: IRect,
        mut gamma: RescaleGamma,
        mut mode: RescaleMode,
    ) -> Result<(), Error> {
        ctx.check_usable(self.context_id())?;
        ctx.check_usable(dst.context_id())?;
        if !self.bounds().contains(&src_rect) || !dst.bounds().contains(&dst_rect) {
            return Err(Error::EmptyRect);
        }
        if self.proxy().framebuffer_only() {
            return Err(Error::FramebufferOnly);
        }

        let mut src_rect = src_rect;
        let mut input = if self.proxy().is_texturable() {
            self.clone()
        } else {
            let copy = self.copy_to_texture(ctx, src_rect, BackingFit::Approx)?;
            src_rect = IRect::from_size(src_rect.size());
            copy
        };

        let final_size = dst_rect.size();
        if final_size == src_rect.size() {
            gamma = RescaleGamma::Src;
            mode = RescaleMode::Nearest;
        }

        if gamma == RescaleGamma::Linear
            && let Some(color_space) = input.color_info().color_space()
            && !color_space.gamma_is_linear()
        {
            let linear_info = ImageInfo::new(
                src_rect.size(),
                ColorType::RgbaF16,
                dst.color_info().alpha_type(),
                Some(color_space.make_linear_gamma()),
            );
            let linear = ctx
                .make_sfc_with_fallback(linear_info, BackingFit::Approx, dst.origin())
                .ok_or(Error::AllocationFailed)?;
            let steps = XformSteps::between(&input.color_info(), &linear.color_info());
            let fp = FragmentProcessor::color_space_xform(
                FragmentProcessor::texture(input.sampled_texture(ctx, src_rect)?, Filter::Nearest),
                steps,
            );
            linear.fill_rect_to_rect_with_fp(
                ctx,
                Rect::from(src_rect),
                IRect::from_size(src_rect.size()),
                fp,
                vec![input.proxy().clone()],
            )?;
            logwise::trace_sync!(
                "linearized {src_rect} before rescaling",
                src_rect = logwise::privacy::LogIt(src_rect)
            );
            input = linear.into_surface_context();
            src_rect = IRect::from_size(src_rect.size());
        }

        loop {
            let next = match mode {
                RescaleMode::RepeatedLinear | RescaleMode::RepeatedCubic => ISize::new(
                    step_toward(src_rect.width(), final_size.width),
                    step_toward(src_rect.height(), final_size.height),
                ),
                RescaleMode::Nearest | RescaleMode::Linear => final_size,
            };
            let is_final = next == final_size;
            let (step_dst, step_dst_rect, steps) = if is_final {
                (
                    dst.clone(),
                    dst_rect,
                    XformSteps::between(&input.color_info(), &dst.color_info()),
                )
            } else {
                let temp = ctx
                    .make_sfc_with_fallback(
                        ImageInfo::from_color_info(input.color_info(), next),
                        BackingFit::Approx,
                        Origin::TopLeft,
                    )
                    .ok_or(Error::AllocationFailed)?;
                let rect = IRect::from_size(next);
                (temp, rect, XformSteps::default())
            };

            if mode == RescaleMode::RepeatedCubic {
                let direction = if next.width == src_rect.width() {
                    BicubicDirection::Y
                } else if next.height == src_rect.height() {
                    BicubicDirection::X
                } else {
                    BicubicDirection::XY
                };
                let premul_clamp = input.color_info().alpha_type() == AlphaType::Premul;
                let fp = FragmentProcessor::color_space_xform(
                    FragmentProcessor::bicubic(
                        input.sampled_texture(ctx, src_rect)?,
                        direction,
                        premul_clamp,
                    ),
                    steps,
                );
                step_dst.fill_rect_to_rect_with_fp(
                    ctx,
                    Rect::from(src_rect),
                    step_dst_rect,
                    fp,
                    vec![input.proxy().clone()],
                )?;
            } else {
                let filter = if mode == RescaleMode::Nearest {
                    Filter::Nearest
                } else {
                    Filter::Linear
                };
                let copied = steps.is_identity()
                    && input.origin() == step_dst.origin()
                    && step_dst
                        .copy_scaled(ctx, &input, src_rect, step_dst_rect, filter)
                        .is_ok();
                if !copied {
                    let fp = FragmentProcessor::color_space_xform(
                        FragmentProcessor::texture(input.sampled_texture(ctx, src_rect)?, filter),
                        steps,
                    );
                    step_dst.fill_rect_to_rect_with_fp(
                        ctx,
                        Rect::from(src_rect),
                        step_dst_rect,
                        fp,
                        vec![input.proxy().clone()],
                    )?;
                }
            }
            logwise::trace_sync!(
                "rescale pass {from} -> {next}",
                from = logwise::privacy::LogIt(src_rect.size()),
                next = logwise::privacy::LogIt(next)
            );

            if is_final {
                return Ok(());
            }
            input = step_dst.into_surface_context();
            src_rect = IRect::from_size(next);
        }
    }
}
