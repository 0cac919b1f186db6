// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! ganesh is the device-facing core of a 2D graphics backend.

It owns three things a renderer needs underneath its draw calls:

| Layer                | Types                                                      | Responsibility                                             |
|----------------------|------------------------------------------------------------|------------------------------------------------------------|
| Resource cache       | [`resource::GpuResource`], [`resource_cache::ResourceCache`] | Ownership, budgeting, scratch reuse and purging            |
| Buffer pools         | [`buffer_alloc_pool::BufferAllocPool`]                     | Sub-allocating vertex and index data out of large blocks   |
| Surface I/O          | [`surface_context::SurfaceContext`]                        | Reads, writes, copies, rescaling and async readback        |

Everything hangs off a [`DirectContext`], which wraps one device implementing
[`gpu::Gpu`] and its [`caps::Caps`].

# Threading

A context and everything created from it belong to one thread; the types are `!Send`.
Different contexts may live on different threads.  Devices themselves are `Send + Sync`.

# Completion

Device work is recorded and runs when the context is flushed.  Completion is reported through
finished procs, which run from [`DirectContext::check_async_work_completion`] once the device
signals the fence inserted for them.  There is no background thread; clients pump completion
themselves.

# Backends

With the default `backend_soft` feature the crate ships [`SoftGpu`], a CPU reference device
used by the tests.  Other devices implement [`gpu::Gpu`] out of tree.

```
use ganesh::{DirectContext, ContextOptions, SoftGpu, caps::Caps};
use ganesh::gpu::Origin;
use ganesh::coordinates::{IPoint, ISize};
use ganesh::pixel_formats::{AlphaType, ColorType, ImageInfo, Pixmap};
use std::sync::Arc;

let context = DirectContext::new(Arc::new(SoftGpu::new()), Caps::soft(), ContextOptions::default());
let info = ImageInfo::new(ISize::new(1, 1), ColorType::Rgba8888, AlphaType::Premul, None);
let surface = context.make_sc(info, Origin::TopLeft, false).unwrap();
surface
    .write_pixels(&context, Pixmap::new(info, &[1, 2, 3, 255], 4).unwrap(), IPoint::new(0, 0))
    .unwrap();
```
*/

pub mod async_read_result;
pub mod buffer_alloc_pool;
pub mod caps;
pub mod context;
pub mod coordinates;
pub mod cpu_buffer_cache;
mod drawing_manager;
pub mod effects;
mod error;
pub mod finish_callbacks;
pub mod gpu;
mod imp;
mod mapped_buffer_manager;
pub mod pixel_formats;
pub mod resource;
pub mod resource_cache;
pub mod resource_provider;
pub mod surface_context;
pub mod surface_proxy;

pub use context::{ContextId, ContextOptions, DirectContext, FlushInfo, SyncCpu};
pub use error::Error;
#[cfg(feature = "backend_soft")]
pub use imp::{SoftGpu, SoftStats};
pub use surface_context::{SurfaceContext, SurfaceFillContext};
