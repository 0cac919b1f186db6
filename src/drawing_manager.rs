// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Deferred device work.
//!
//! Surface contexts record [`RenderTask`]s instead of calling the device directly.  On flush the
//! tasks run in recording order.  Every resource a task touched is given a pending read or
//! write, and the caller completes those once the device signals that the work is done.
//!
//! Rectangles handed to write and transfer tasks are in storage coordinates.  Copy and fill
//! tasks take logical rectangles plus the origin they are laid out in.

use crate::caps::Caps;
use crate::coordinates::{IRect, Rect};
use crate::effects::FragmentProcessor;
use crate::gpu::{self, BufferHandle, DrawTarget, Filter, MipLevel, Origin};
use crate::mapped_buffer_manager::{MessageSender, ResourceRef};
use crate::pixel_formats::ColorType;
use crate::resource::{IoType, ResourceId};
use crate::resource_provider::ResourceProvider;
use crate::surface_proxy::SurfaceProxy;
use std::cell::RefCell;

/// Pixels of one mip level, owned by the task that uploads them.
#[derive(Debug, Clone)]
pub(crate) struct OwnedMipLevel {
    pub(crate) pixels: Vec<u8>,
    pub(crate) row_bytes: usize,
}

#[derive(Debug)]
pub(crate) enum RenderTask {
    WritePixels {
        dst: SurfaceProxy,
        rect: IRect,
        surface_color_type: ColorType,
        src_color_type: ColorType,
        levels: Vec<OwnedMipLevel>,
    },
    TransferFrom {
        src: SurfaceProxy,
        rect: IRect,
        surface_color_type: ColorType,
        buffer_color_type: ColorType,
        buffer: ResourceRef,
        handle: BufferHandle,
        offset: usize,
        row_bytes: usize,
    },
    Copy {
        dst: SurfaceProxy,
        dst_rect: IRect,
        src: SurfaceProxy,
        src_rect: IRect,
        filter: Filter,
        origin: Origin,
    },
    Fill {
        dst: SurfaceProxy,
        color_type: ColorType,
        origin: Origin,
        dst_rect: IRect,
        local_rect: Rect,
        fp: FragmentProcessor,
        /// Keeps every texture `fp` samples alive until the task has run.
        sampled: Vec<SurfaceProxy>,
    },
}

/// Resources that got a pending read or write during a flush.
pub(crate) type PendingIo = Vec<(ResourceId, IoType)>;

struct Executor<'a> {
    provider: &'a mut ResourceProvider,
    messages: &'a MessageSender,
    caps: &'a Caps,
    io: PendingIo,
}

impl Executor<'_> {
    fn target(&mut self, proxy: &SurfaceProxy) -> Option<(crate::gpu::TextureHandle, ResourceId)> {
        if !proxy.instantiate(self.provider, self.messages) {
            return None;
        }
        Some((proxy.texture()?, proxy.resource()?))
    }

    fn begin_io(&mut self, id: ResourceId, io: IoType) {
        self.provider.add_pending_io(id, io);
        self.io.push((id, io));
    }

    fn execute(&mut self, task: &RenderTask) -> bool {
        let gpu = self.provider.gpu().clone();
        match task {
            RenderTask::WritePixels {
                dst,
                rect,
                surface_color_type,
                src_color_type,
                levels,
            } => {
                let Some((texture, id)) = self.target(dst) else {
                    return false;
                };
                let mips: Vec<MipLevel<'_>> = levels
                    .iter()
                    .map(|l| MipLevel {
                        pixels: &l.pixels,
                        row_bytes: l.row_bytes,
                    })
                    .collect();
                self.begin_io(id, IoType::Write);
                gpu::write_pixels_checked(
                    gpu.as_ref(),
                    self.caps,
                    texture,
                    dst.backing_dimensions(),
                    *rect,
                    *surface_color_type,
                    *src_color_type,
                    &mips,
                )
            }
            RenderTask::TransferFrom {
                src,
                rect,
                surface_color_type,
                buffer_color_type,
                buffer,
                handle,
                offset,
                row_bytes,
            } => {
                let Some((texture, id)) = self.target(src) else {
                    return false;
                };
                self.begin_io(id, IoType::Read);
                self.begin_io(buffer.id(), IoType::Write);
                gpu::transfer_pixels_from_checked(
                    gpu.as_ref(),
                    self.caps,
                    texture,
                    src.backing_dimensions(),
                    *rect,
                    *surface_color_type,
                    *buffer_color_type,
                    *handle,
                    *offset,
                    *row_bytes,
                )
            }
            RenderTask::Copy {
                dst,
                dst_rect,
                src,
                src_rect,
                filter,
                origin,
            } => {
                let (Some((dst_texture, dst_id)), Some((src_texture, src_id))) =
                    (self.target(dst), self.target(src))
                else {
                    return false;
                };
                let (dst_rect, src_rect) = match origin {
                    Origin::TopLeft => (*dst_rect, *src_rect),
                    Origin::BottomLeft => (
                        dst_rect.flip_y(dst.backing_dimensions().height),
                        src_rect.flip_y(src.backing_dimensions().height),
                    ),
                };
                self.begin_io(src_id, IoType::Read);
                self.begin_io(dst_id, IoType::Write);
                gpu.copy_surface(dst_texture, dst_rect, src_texture, src_rect, *filter)
            }
            RenderTask::Fill {
                dst,
                color_type,
                origin,
                dst_rect,
                local_rect,
                fp,
                sampled,
            } => {
                let Some((texture, id)) = self.target(dst) else {
                    return false;
                };
                for proxy in sampled {
                    if let Some(sampled_id) = proxy.resource() {
                        self.begin_io(sampled_id, IoType::Read);
                    }
                }
                self.begin_io(id, IoType::Write);
                let target = DrawTarget {
                    texture,
                    color_type: *color_type,
                    origin: *origin,
                    backing: dst.backing_dimensions(),
                };
                gpu.draw(&target, *dst_rect, *local_rect, fp)
            }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct DrawingManager {
    tasks: RefCell<Vec<RenderTask>>,
}

impl DrawingManager {
    pub(crate) fn new() -> Self {
        DrawingManager::default()
    }

    pub(crate) fn add_task(&self, task: RenderTask) {
        self.tasks.borrow_mut().push(task);
    }

    pub(crate) fn has_work(&self) -> bool {
        !self.tasks.borrow().is_empty()
    }

    /// Drops every recorded task without running it.
    pub(crate) fn clear(&self) {
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        drop(tasks);
    }

    /// Runs every recorded task.  Returns the pending IO the caller must complete once the
    /// device has finished.
    pub(crate) fn flush(
        &self,
        provider: &mut ResourceProvider,
        messages: &MessageSender,
        caps: &Caps,
    ) -> PendingIo {
        let tasks = std::mem::take(&mut *self.tasks.borrow_mut());
        if tasks.is_empty() {
            return PendingIo::new();
        }
        let mut executor = Executor {
            provider,
            messages,
            caps,
            io: PendingIo::new(),
        };
        let count = tasks.len();
        for task in &tasks {
            if !executor.execute(task) {
                logwise::warn_sync!("render task failed: {task}", task = task.name());
            }
        }
        logwise::trace_sync!("flushed {count} render tasks", count = count);
        executor.io
    }
}

impl RenderTask {
    fn name(&self) -> &'static str {
        match self {
            RenderTask::WritePixels { .. } => "write pixels",
            RenderTask::TransferFrom { .. } => "transfer from surface",
            RenderTask::Copy { .. } => "copy",
            RenderTask::Fill { .. } => "fill",
        }
    }
}

#[cfg(all(test, feature = "backend_soft"))]
mod tests {
    use super::*;
    use crate::coordinates::ISize;
    use crate::gpu::{Gpu, TextureDesc};
    use crate::imp::SoftGpu;
    use crate::mapped_buffer_manager::MappedBufferManager;
    use crate::pixel_formats::BackendFormat;
    use crate::resource_provider::BackingFit;
    use crate::surface_proxy::SurfaceAccess;
    use std::sync::Arc;

    fn proxy(w: i32, h: i32) -> SurfaceProxy {
        let desc = TextureDesc {
            dimensions: ISize::new(w, h),
            format: BackendFormat::Rgba8Unorm,
            renderable: true,
            mipmapped: false,
            protected: false,
        };
        SurfaceProxy::new(desc, BackingFit::Exact, true, SurfaceAccess::ReadWrite)
    }

    #[test]
    fn tasks_run_in_order_and_leave_pending_io() {
        let gpu = Arc::new(SoftGpu::new());
        let caps = Caps::soft();
        let mut provider = ResourceProvider::new(gpu.clone(), Arc::new(caps.clone()), 10, 1 << 20);
        let manager = MappedBufferManager::new();
        let manager_sender = manager.sender();
        let drawing = DrawingManager::new();

        let a = proxy(2, 1);
        let b = proxy(2, 1);
        drawing.add_task(RenderTask::WritePixels {
            dst: a.clone(),
            rect: IRect::from_xywh(0, 0, 2, 1),
            surface_color_type: ColorType::Rgba8888,
            src_color_type: ColorType::Rgba8888,
            levels: vec![OwnedMipLevel {
                pixels: vec![1, 2, 3, 4, 5, 6, 7, 8],
                row_bytes: 8,
            }],
        });
        drawing.add_task(RenderTask::Copy {
            dst: b.clone(),
            dst_rect: IRect::from_xywh(0, 0, 1, 1),
            src: a.clone(),
            src_rect: IRect::from_xywh(1, 0, 1, 1),
            filter: Filter::Nearest,
            origin: Origin::TopLeft,
        });
        assert!(drawing.has_work());
        let io = drawing.flush(&mut provider, &manager_sender, &caps);
        assert!(!drawing.has_work());
        let a_id = a.resource().unwrap();
        let b_id = b.resource().unwrap();
        assert_eq!(
            io,
            vec![
                (a_id, IoType::Write),
                (a_id, IoType::Read),
                (b_id, IoType::Write)
            ]
        );
        assert_eq!(provider.cache().get(a_id).map(|r| r.pending_io()), Some(2));

        let mut out = [0u8; 4];
        let texture = b.texture().unwrap();
        gpu.read_pixels(
            texture,
            IRect::from_xywh(0, 0, 1, 1),
            ColorType::Rgba8888,
            ColorType::Rgba8888,
            &mut out,
            4,
        );
        assert_eq!(out, [5, 6, 7, 8]);

        for (id, kind) in io {
            provider.complete_pending_io(id, kind);
        }
        assert_eq!(provider.cache().get(a_id).map(|r| r.pending_io()), Some(0));
    }

    #[test]
    fn cleared_tasks_never_reach_the_device() {
        let gpu = Arc::new(SoftGpu::new());
        let caps = Caps::soft();
        let mut provider = ResourceProvider::new(gpu.clone(), Arc::new(caps.clone()), 10, 1 << 20);
        let manager = MappedBufferManager::new();
        let drawing = DrawingManager::new();
        drawing.add_task(RenderTask::WritePixels {
            dst: proxy(1, 1),
            rect: IRect::from_xywh(0, 0, 1, 1),
            surface_color_type: ColorType::Rgba8888,
            src_color_type: ColorType::Rgba8888,
            levels: vec![OwnedMipLevel {
                pixels: vec![0; 4],
                row_bytes: 4,
            }],
        });
        drawing.clear();
        assert!(drawing.flush(&mut provider, &manager.sender(), &caps).is_empty());
        assert_eq!(gpu.stats().writes, 0);
    }
}
