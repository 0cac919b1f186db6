// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Backend selection.
//!
//! Only the CPU reference device ships in-tree.  Other devices implement
//! [`Gpu`](crate::gpu::Gpu) out of tree and are handed to
//! [`DirectContext::new`](crate::context::DirectContext::new).

#[cfg(feature = "backend_soft")]
mod soft;

#[cfg(feature = "backend_soft")]
pub use soft::{SoftGpu, SoftStats};
