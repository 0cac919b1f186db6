// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Fragment processors: per-pixel programs a device evaluates when filling a rectangle.
//!
//! Processor trees are plain owned values.  They are built per draw, moved into the
//! recorded task and dropped once the device has consumed them, so no allocator is shared
//! between contexts.

use crate::coordinates::{IRect, ISize};
use crate::gpu::{Filter, Origin, TextureHandle};
use crate::pixel_formats::ColorType;
use crate::pixel_formats::convert::XformSteps;
use crate::pixel_formats::yuv::ColorMatrix;

/// A texture as seen by a processor.  Sampling coordinates are logical (top-left origin)
/// and are clamped to `subset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampledTexture {
    pub texture: TextureHandle,
    pub color_type: ColorType,
    pub origin: Origin,
    /// Allocated size, which can exceed the logical size for approximate-fit textures.
    pub backing: ISize,
    pub subset: IRect,
}

/// Axes a bicubic pass filters along; the other axis is sampled at texel centers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BicubicDirection {
    X,
    Y,
    XY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PmConversion {
    ToUnpremul,
    ToPremul,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentProcessor {
    Texture {
        texture: SampledTexture,
        filter: Filter,
    },
    /// Catmull-Rom filtering.  With `premul_clamp` the color channels are clamped to alpha.
    Bicubic {
        texture: SampledTexture,
        direction: BicubicDirection,
        premul_clamp: bool,
    },
    ColorMatrix {
        child: Box<FragmentProcessor>,
        matrix: ColorMatrix,
        unpremul_input: bool,
        clamp_output: bool,
        premul_output: bool,
    },
    ColorSpaceXform {
        child: Box<FragmentProcessor>,
        steps: XformSteps,
    },
    /// Alpha conversion that quantizes to 8 bits on every step so that
    /// premul -> unpremul -> premul is stable.
    PmConversion {
        child: Box<FragmentProcessor>,
        conversion: PmConversion,
    },
}

impl FragmentProcessor {
    pub fn texture(texture: SampledTexture, filter: Filter) -> Self {
        FragmentProcessor::Texture { texture, filter }
    }

    pub fn bicubic(texture: SampledTexture, direction: BicubicDirection, premul_clamp: bool) -> Self {
        FragmentProcessor::Bicubic {
            texture,
            direction,
            premul_clamp,
        }
    }

    pub fn color_matrix(
        child: FragmentProcessor,
        matrix: ColorMatrix,
        unpremul_input: bool,
        clamp_output: bool,
        premul_output: bool,
    ) -> Self {
        FragmentProcessor::ColorMatrix {
            child: Box::new(child),
            matrix,
            unpremul_input,
            clamp_output,
            premul_output,
        }
    }

    /// Wraps `child` in a color space transform, or returns it untouched when the
    /// steps do nothing.
    pub fn color_space_xform(child: FragmentProcessor, steps: XformSteps) -> Self {
        if steps.is_identity() {
            return child;
        }
        FragmentProcessor::ColorSpaceXform {
            child: Box::new(child),
            steps,
        }
    }

    pub fn pm_to_upm(child: FragmentProcessor) -> Self {
        FragmentProcessor::PmConversion {
            child: Box::new(child),
            conversion: PmConversion::ToUnpremul,
        }
    }

    pub fn upm_to_pm(child: FragmentProcessor) -> Self {
        FragmentProcessor::PmConversion {
            child: Box::new(child),
            conversion: PmConversion::ToPremul,
        }
    }

    /// Every texture the tree samples.
    pub fn sampled_textures(&self) -> Vec<TextureHandle> {
        let mut out = Vec::new();
        self.visit_textures(&mut out);
        out
    }

    fn visit_textures(&self, out: &mut Vec<TextureHandle>) {
        match self {
            FragmentProcessor::Texture { texture, .. }
            | FragmentProcessor::Bicubic { texture, .. } => out.push(texture.texture),
            FragmentProcessor::ColorMatrix { child, .. }
            | FragmentProcessor::ColorSpaceXform { child, .. }
            | FragmentProcessor::PmConversion { child, .. } => child.visit_textures(out),
        }
    }
}
