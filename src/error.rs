// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Errors returned by synchronous surface I/O.
//!
//! Every failure is all-or-nothing from the caller's point of view.  When an operation returns
//! an error after device work was already recorded, the destination contents are undefined but
//! no other resource has been touched.

use crate::pixel_formats::ColorType;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The context was abandoned; no device work is possible.
    Abandoned,
    /// The surface was created by a different context than the one passed in.
    ContextMismatch,
    /// The image info has an unknown color type, unknown alpha type or empty dimensions.
    InvalidImageInfo,
    /// Row bytes are not a multiple of the pixel size or are smaller than a tight row.
    InvalidRowBytes { row_bytes: usize, min_row_bytes: usize },
    /// After clipping against the surface nothing remains.
    EmptyRect,
    /// Exactly one of the two alpha types is unknown.
    IncompatibleAlphaType,
    /// The backing texture could not be allocated.
    InstantiationFailed,
    /// The surface cannot be read, copied from or written with pixels.
    FramebufferOnly,
    /// The surface cannot be written.
    ReadOnly,
    /// No legal path exists for this color type on this backend.
    UnsupportedColorType(ColorType),
    /// The backend has no texture format for this color type.
    UnsupportedFormat(ColorType),
    /// The surface must be renderable for this operation.
    NotRenderable,
    /// The surface has no texture a draw could sample.
    NotTexturable,
    /// The source and destination cannot be copied between.
    CopyUnsupported,
    /// A buffer or texture allocation failed.
    AllocationFailed,
    /// The device rejected an operation.
    DeviceFailure,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Abandoned => write!(f, "context was abandoned"),
            Error::ContextMismatch => write!(f, "surface belongs to a different context"),
            Error::InvalidImageInfo => write!(f, "image info is not well formed"),
            Error::InvalidRowBytes {
                row_bytes,
                min_row_bytes,
            } => write!(
                f,
                "row bytes {row_bytes} are invalid (tight row is {min_row_bytes} bytes)"
            ),
            Error::EmptyRect => write!(f, "rectangle does not intersect the surface"),
            Error::IncompatibleAlphaType => write!(f, "alpha types are incompatible"),
            Error::InstantiationFailed => write!(f, "surface could not be instantiated"),
            Error::FramebufferOnly => write!(f, "surface is framebuffer-only"),
            Error::ReadOnly => write!(f, "surface is read-only"),
            Error::UnsupportedColorType(ct) => write!(f, "color type {ct:?} is not supported"),
            Error::UnsupportedFormat(ct) => write!(f, "no backend format for {ct:?}"),
            Error::NotRenderable => write!(f, "surface is not renderable"),
            Error::NotTexturable => write!(f, "surface cannot be sampled"),
            Error::CopyUnsupported => write!(f, "surfaces cannot be copied between"),
            Error::AllocationFailed => write!(f, "allocation failed"),
            Error::DeviceFailure => write!(f, "device operation failed"),
        }
    }
}
