// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The direct context: one device, its caps and everything that caches device objects for it.

A [`DirectContext`] owns the resource cache, the deferred render task list, the finish
callback queue and the deferred resource message queue.  Surface contexts borrow it for every
operation.  The context is single-owner: it is neither `Send` nor `Sync`, and each of its
collaborators is only touched from the thread that owns it.

Work is recorded first and handed to the device on [`DirectContext::flush`].  Completion is
polled: [`DirectContext::check_async_work_completion`] runs the finish callbacks whose fences
have signaled, which is also when async reads deliver their results.

# Examples

```
use ganesh::caps::Caps;
use ganesh::context::{ContextOptions, DirectContext, SyncCpu};
use ganesh::coordinates::{IPoint, ISize};
use ganesh::gpu::Origin;
use ganesh::SoftGpu;
use ganesh::pixel_formats::{AlphaType, ColorType, ImageInfo, Pixmap, PixmapMut};
use std::sync::Arc;

let context = DirectContext::new(Arc::new(SoftGpu::new()), Caps::soft(), ContextOptions::default());
let info = ImageInfo::new(ISize::new(2, 2), ColorType::Rgba8888, AlphaType::Premul, None);
let surface = context.make_sc(info, Origin::TopLeft, false).unwrap();

let pixels = [0x40u8; 16];
surface
    .write_pixels(&context, Pixmap::new(info, &pixels, 8).unwrap(), IPoint::new(0, 0))
    .unwrap();
let mut back = [0u8; 16];
surface
    .read_pixels(&context, PixmapMut::new(info, &mut back, 8).unwrap(), IPoint::new(0, 0))
    .unwrap();
assert_eq!(back, pixels);
context.flush_and_submit(SyncCpu::Yes);
```
*/

use crate::buffer_alloc_pool::{BufferAllocPool, IndexBufferAllocPool, VertexBufferAllocPool};
use crate::caps::Caps;
use crate::coordinates::{IPoint, IRect, ISize};
use crate::cpu_buffer_cache::{CpuBufferCache, DEFAULT_BUFFER_SIZE};
use crate::drawing_manager::DrawingManager;
use crate::effects::FragmentProcessor;
use crate::error::Error;
use crate::finish_callbacks::{FinishCallbacks, FinishedProc};
use crate::gpu::{BufferType, Filter, Gpu, Origin, TextureDesc, TextureHandle};
use crate::mapped_buffer_manager::{MappedBufferManager, MessageSender, ResourceMessage, ResourceRef};
use crate::pixel_formats::{AlphaType, ColorInfo, ColorType, ImageInfo, Pixmap, PixmapMut};
use crate::resource::{BackendObject, BudgetedType, UniqueKey};
use crate::resource_cache::{ResourceCache, ResourceMemoryStats};
use crate::resource_provider::{BackingFit, Ownership, ResourceProvider};
use crate::surface_context::{SurfaceContext, SurfaceFillContext};
use crate::surface_proxy::{SurfaceAccess, SurfaceProxy, SurfaceProxyView};
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Identifies the context a surface was made by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u32);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "context#{}", self.0)
    }
}

/// Tunables fixed at context creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub max_resource_count: usize,
    pub max_resource_bytes: usize,
    /// How many default-size CPU staging buffers are kept for reuse.
    pub max_cpu_buffers_to_cache: usize,
    /// Never use the draw-based premul/unpremul conversion for 8888 reads and writes.
    pub disable_pm_upm_fast_path: bool,
    /// Default block size of buffer pools made by the context.
    pub buffer_block_size: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            max_resource_count: 8192,
            max_resource_bytes: 96 * (1 << 20),
            max_cpu_buffers_to_cache: 6,
            disable_pm_upm_fast_path: false,
            buffer_block_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Options for one flush.
#[derive(Default)]
pub struct FlushInfo {
    /// Called once the device has finished the flushed work.  Always called, even when the
    /// flush fails or the context is torn down first.
    pub finished_proc: Option<FinishedProc>,
}

impl Debug for FlushInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushInfo")
            .field("finished_proc", &self.finished_proc.is_some())
            .finish()
    }
}

/// Whether a submit waits for the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncCpu {
    No,
    Yes,
}

pub struct DirectContext {
    id: ContextId,
    gpu: Arc<dyn Gpu>,
    caps: Arc<Caps>,
    options: ContextOptions,
    provider: Rc<RefCell<ResourceProvider>>,
    drawing_manager: DrawingManager,
    finish_callbacks: FinishCallbacks,
    mapped_buffer_manager: MappedBufferManager,
    cpu_buffer_cache: Rc<CpuBufferCache>,
    abandoned: Rc<Cell<bool>>,
    pm_upm_conversion: Cell<Option<bool>>,
}

impl Debug for DirectContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectContext")
            .field("id", &self.id)
            .field("gpu", &self.gpu)
            .field("abandoned", &self.abandoned.get())
            .field("finish_callbacks", &self.finish_callbacks)
            .finish()
    }
}

const PM_UPM_CHECK_SIZE: i32 = 256;

impl DirectContext {
    pub fn new(gpu: Arc<dyn Gpu>, caps: Caps, options: ContextOptions) -> Self {
        let caps = Arc::new(caps);
        let provider = ResourceProvider::new(
            gpu.clone(),
            caps.clone(),
            options.max_resource_count,
            options.max_resource_bytes,
        );
        let id = ContextId::next();
        logwise::info_sync!(
            "created {id} on {gpu}",
            id = logwise::privacy::LogIt(id),
            gpu = logwise::privacy::LogIt(&gpu)
        );
        DirectContext {
            id,
            finish_callbacks: FinishCallbacks::new(gpu.clone()),
            gpu,
            caps,
            cpu_buffer_cache: CpuBufferCache::new(options.max_cpu_buffers_to_cache),
            options,
            provider: Rc::new(RefCell::new(provider)),
            drawing_manager: DrawingManager::new(),
            mapped_buffer_manager: MappedBufferManager::new(),
            abandoned: Rc::new(Cell::new(false)),
            pm_upm_conversion: Cell::new(None),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    pub fn gpu(&self) -> &Arc<dyn Gpu> {
        &self.gpu
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.get()
    }

    /// Read access to the cache.  Do not hold the guard across calls into the context.
    pub fn resource_cache(&self) -> Ref<'_, ResourceCache> {
        Ref::map(self.provider.borrow(), |p| p.cache())
    }

    fn process_messages(&self) {
        let mut provider = self.provider.borrow_mut();
        self.mapped_buffer_manager
            .process(&mut provider, self.abandoned.get());
    }

    /// Hands every recorded task to the device.  Returns `false` once abandoned; the
    /// finished proc is still called.
    pub fn flush(&self, info: FlushInfo) -> bool {
        self.process_messages();
        if self.is_abandoned() {
            if let Some(proc) = info.finished_proc {
                proc();
            }
            return false;
        }
        let io = {
            let mut provider = self.provider.borrow_mut();
            let messages = self.mapped_buffer_manager.sender();
            self.drawing_manager.flush(&mut provider, &messages, &self.caps)
        };
        if !io.is_empty() || info.finished_proc.is_some() {
            let messages = self.mapped_buffer_manager.sender();
            let proc = info.finished_proc;
            self.finish_callbacks.add(Box::new(move || {
                for (id, kind) in io {
                    messages.send(ResourceMessage::CompleteIo(id, kind));
                }
                if let Some(proc) = proc {
                    proc();
                }
            }));
        }
        self.process_messages();
        true
    }

    /// Flushes the work `proxy` depends on.  Tasks are not tracked per surface, so this
    /// flushes everything.
    pub(crate) fn flush_surface(&self, proxy: &SurfaceProxy, info: FlushInfo) -> bool {
        logwise::trace_sync!(
            "flushing for a {dimensions} surface",
            dimensions = logwise::privacy::LogIt(proxy.dimensions())
        );
        self.flush(info)
    }

    pub fn submit(&self, sync: SyncCpu) -> bool {
        if self.is_abandoned() {
            return false;
        }
        let ok = self.gpu.submit(sync == SyncCpu::Yes);
        if sync == SyncCpu::Yes {
            self.check_async_work_completion();
        }
        ok
    }

    pub fn flush_and_submit(&self, sync: SyncCpu) -> bool {
        let flushed = self.flush(FlushInfo::default());
        self.submit(sync) && flushed
    }

    /// Runs the finish callbacks whose work has completed, then applies the resource messages
    /// they produced.
    pub fn check_async_work_completion(&self) {
        if !self.finish_callbacks.is_empty() {
            self.finish_callbacks.check();
        }
        self.process_messages();
    }

    /// Marks the device as lost.  Resources are forgotten without device calls, recorded work
    /// is dropped and every outstanding finished proc runs.
    pub fn abandon(&self) {
        if self.abandoned.replace(true) {
            return;
        }
        logwise::info_sync!("abandoning {id}", id = logwise::privacy::LogIt(self.id));
        self.drawing_manager.clear();
        self.provider.borrow_mut().abandon();
        self.process_messages();
        self.finish_callbacks.call_all(false);
        self.process_messages();
        self.cpu_buffer_cache.release_all();
    }

    /// Waits for the device, frees every resource through it, then abandons.
    pub fn release_resources_and_abandon(&self) {
        if self.is_abandoned() {
            return;
        }
        logwise::info_sync!(
            "releasing resources of {id} and abandoning",
            id = logwise::privacy::LogIt(self.id)
        );
        self.flush_and_submit(SyncCpu::Yes);
        self.finish_callbacks.call_all(true);
        self.process_messages();
        self.provider.borrow_mut().cache_mut().release_all();
        self.abandoned.set(true);
        self.provider.borrow_mut().abandon();
        self.cpu_buffer_cache.release_all();
    }

    /// Waits for outstanding work and frees every resource nothing references.
    pub fn free_gpu_resources(&self) {
        if self.is_abandoned() {
            return;
        }
        self.flush_and_submit(SyncCpu::Yes);
        self.provider
            .borrow_mut()
            .cache_mut()
            .purge_unlocked_resources(None, false);
        self.cpu_buffer_cache.release_all();
    }

    pub fn purge_unlocked_resources(&self, scratch_only: bool) {
        self.process_messages();
        self.provider
            .borrow_mut()
            .cache_mut()
            .purge_unlocked_resources(None, scratch_only);
    }

    pub fn purge_unlocked_resources_bytes(&self, bytes_to_purge: usize, prefer_scratch: bool) {
        self.process_messages();
        self.provider
            .borrow_mut()
            .cache_mut()
            .purge_unlocked_resources_bytes(bytes_to_purge, prefer_scratch);
    }

    /// Purges resources that have been unused for at least `not_used_for`.
    pub fn perform_deferred_cleanup(&self, not_used_for: Duration) {
        self.process_messages();
        let Some(cutoff) = Instant::now().checked_sub(not_used_for) else {
            return;
        };
        self.provider
            .borrow_mut()
            .cache_mut()
            .purge_resources_not_used_since(cutoff);
    }

    pub fn set_resource_cache_limits(&self, max_count: usize, max_bytes: usize) {
        self.provider
            .borrow_mut()
            .cache_mut()
            .set_limits(max_count, max_bytes);
    }

    fn make_pool(&self, buffer_type: BufferType) -> BufferAllocPool {
        BufferAllocPool::new(
            self.provider.clone(),
            self.mapped_buffer_manager.sender(),
            buffer_type,
            Some(self.cpu_buffer_cache.clone()),
            self.options.buffer_block_size,
        )
    }

    pub fn make_vertex_pool(&self) -> VertexBufferAllocPool {
        VertexBufferAllocPool::new(self.make_pool(BufferType::Vertex))
    }

    pub fn make_index_pool(&self) -> IndexBufferAllocPool {
        IndexBufferAllocPool::new(self.make_pool(BufferType::Index))
    }

    fn make_proxy(
        &self,
        info: &ImageInfo,
        fit: BackingFit,
        renderable: bool,
        mipmapped: bool,
    ) -> Option<SurfaceProxy> {
        let d = info.dimensions();
        if self.is_abandoned()
            || d.is_empty()
            || d.width > self.caps.max_texture_size
            || d.height > self.caps.max_texture_size
            || (mipmapped && !self.caps.mipmap_support)
        {
            return None;
        }
        let format = self
            .caps
            .default_backend_format(info.color_type(), renderable)?;
        let desc = TextureDesc {
            dimensions: d,
            format,
            renderable,
            mipmapped,
            protected: false,
        };
        Some(SurfaceProxy::new(desc, fit, true, SurfaceAccess::ReadWrite))
    }

    /// A sampleable, non-renderable surface of exactly `info`'s size.
    pub fn make_sc(&self, info: ImageInfo, origin: Origin, mipmapped: bool) -> Option<SurfaceContext> {
        let proxy = self.make_proxy(&info, BackingFit::Exact, false, mipmapped)?;
        Some(SurfaceContext::new(
            self.id,
            SurfaceProxyView::new(proxy, origin),
            info.color_info(),
        ))
    }

    /// A render target for `info`.
    pub fn make_sfc(&self, info: ImageInfo, fit: BackingFit, origin: Origin) -> Option<SurfaceFillContext> {
        let proxy = self.make_proxy(&info, fit, true, false)?;
        Some(SurfaceFillContext::new(SurfaceContext::new(
            self.id,
            SurfaceProxyView::new(proxy, origin),
            info.color_info(),
        )))
    }

    /// Like [`make_sfc`](Self::make_sfc), but swaps in a renderable color type with at least
    /// the same channels when `info`'s color type cannot be rendered to.
    pub fn make_sfc_with_fallback(
        &self,
        info: ImageInfo,
        fit: BackingFit,
        origin: Origin,
    ) -> Option<SurfaceFillContext> {
        if let Some(sfc) = self.make_sfc(info, fit, origin) {
            return Some(sfc);
        }
        let fallback = match info.color_type() {
            ColorType::Alpha8 | ColorType::Bgra8888 | ColorType::RgbaF16 => ColorType::Rgba8888,
            ColorType::Gray8 => ColorType::Rgb888x,
            _ => return None,
        };
        logwise::trace_sync!(
            "{color_type} is not renderable, using {fallback}",
            color_type = logwise::privacy::LogIt(info.color_type()),
            fallback = logwise::privacy::LogIt(fallback)
        );
        self.make_sfc(info.make_color_type(fallback), fit, origin)
    }

    /// Adopts or borrows an existing device texture as a surface.  A `cacheable` texture stays
    /// in the cache after its last surface goes away for as long as it holds a unique key.
    #[allow(clippy::too_many_arguments)]
    pub fn wrap_backend_texture(
        &self,
        texture: TextureHandle,
        desc: TextureDesc,
        color_info: ColorInfo,
        origin: Origin,
        ownership: Ownership,
        cacheable: bool,
        access: SurfaceAccess,
    ) -> Option<SurfaceContext> {
        if self.is_abandoned()
            || !self
                .caps
                .are_color_type_and_format_compatible(color_info.color_type(), desc.format)
        {
            return None;
        }
        let id = self
            .provider
            .borrow_mut()
            .wrap_backend_texture(texture, &desc, ownership, cacheable)?;
        let resource = ResourceRef::adopt(id, self.mapped_buffer_manager.sender());
        let proxy = SurfaceProxy::instantiated(desc, false, true, access, resource, texture);
        Some(SurfaceContext::new(
            self.id,
            SurfaceProxyView::new(proxy, origin),
            color_info,
        ))
    }

    /// Gives the texture behind `surface` the unique key `key`, taking the key from any other
    /// texture holding it.  Instantiates the surface.  Returns `false` when the texture cannot
    /// hold a key, which is the case for unbudgeted textures that were not wrapped.
    pub fn assign_unique_key(&self, surface: &SurfaceContext, key: UniqueKey) -> bool {
        if self.check_usable(surface.context_id()).is_err() || !self.instantiate(surface.proxy()) {
            return false;
        }
        let Some(id) = surface.proxy().resource() else {
            return false;
        };
        self.provider.borrow_mut().assign_unique_key(id, key)
    }

    pub fn remove_unique_key(&self, surface: &SurfaceContext) {
        if surface.context_id() != self.id {
            return;
        }
        if let Some(id) = surface.proxy().resource() {
            self.provider.borrow_mut().remove_unique_key(id);
        }
    }

    /// A surface over the cached texture holding `key`.  `None` when no texture holds it or
    /// `color_info` does not fit the texture's format.
    pub fn find_surface_by_unique_key(
        &self,
        key: &UniqueKey,
        color_info: ColorInfo,
        origin: Origin,
        access: SurfaceAccess,
    ) -> Option<SurfaceContext> {
        let mut provider = self.provider.borrow_mut();
        let id = provider.find_by_unique_key(key)?;
        let found = provider.cache().get(id).and_then(|r| match r.object() {
            BackendObject::Texture { handle, desc } => Some((
                *handle,
                *desc,
                r.budgeted_type() == BudgetedType::Budgeted,
                r.refs_wrapped_objects(),
            )),
            BackendObject::Buffer { .. } => None,
        });
        let usable = found.filter(|(_, desc, _, _)| {
            self.caps
                .are_color_type_and_format_compatible(color_info.color_type(), desc.format)
        });
        let Some((texture, desc, budgeted, wrapped)) = usable else {
            logwise::trace_sync!(
                "{id} holds the key but cannot back a {color_type} surface",
                id = logwise::privacy::LogIt(id),
                color_type = logwise::privacy::LogIt(color_info.color_type())
            );
            provider.unref(id);
            return None;
        };
        drop(provider);
        let resource = ResourceRef::adopt(id, self.mapped_buffer_manager.sender());
        let proxy = SurfaceProxy::instantiated(desc, budgeted, wrapped, access, resource, texture);
        Some(SurfaceContext::new(
            self.id,
            SurfaceProxyView::new(proxy, origin),
            color_info,
        ))
    }

    /// Starts or stops charging the texture behind `surface` to the cache budget.  Wrapped
    /// textures are never charged and keyed textures stay charged.
    pub fn set_budgeted(&self, surface: &SurfaceContext, budgeted: bool) {
        if surface.context_id() != self.id {
            return;
        }
        if let Some(id) = surface.proxy().resource() {
            self.provider.borrow_mut().set_budgeted(id, budgeted);
        }
    }

    /// Reports every cached resource: its size, how it is budgeted and which keys it holds.
    /// Resources wrapping external objects are only reported with `include_wrapped`.
    pub fn dump_memory_statistics(&self, include_wrapped: bool) -> Vec<ResourceMemoryStats> {
        self.resource_cache().dump_memory_statistics(include_wrapped)
    }

    pub(crate) fn check_usable(&self, owner: ContextId) -> Result<(), Error> {
        if self.is_abandoned() {
            return Err(Error::Abandoned);
        }
        if owner != self.id {
            return Err(Error::ContextMismatch);
        }
        Ok(())
    }

    pub(crate) fn provider(&self) -> RefMut<'_, ResourceProvider> {
        self.provider.borrow_mut()
    }

    pub(crate) fn message_sender(&self) -> MessageSender {
        self.mapped_buffer_manager.sender()
    }

    pub(crate) fn drawing_manager(&self) -> &DrawingManager {
        &self.drawing_manager
    }

    pub(crate) fn abandoned_flag(&self) -> Rc<Cell<bool>> {
        self.abandoned.clone()
    }

    pub(crate) fn instantiate(&self, proxy: &SurfaceProxy) -> bool {
        let messages = self.mapped_buffer_manager.sender();
        proxy.instantiate(&mut self.provider.borrow_mut(), &messages)
    }

    /// Whether drawing premul to unpremul and back is lossless on this device for every 8-bit
    /// premultiplied color.  Checked once and remembered for the life of the context.
    pub(crate) fn valid_pm_upm_conversion_exists(&self) -> bool {
        if self.options.disable_pm_upm_fast_path {
            return false;
        }
        if let Some(known) = self.pm_upm_conversion.get() {
            return known;
        }
        let valid = self.check_pm_upm_round_trip().is_ok();
        logwise::info_sync!(
            "premul round trip on {id} preserves values: {valid}",
            id = logwise::privacy::LogIt(self.id),
            valid = logwise::privacy::LogIt(valid)
        );
        self.pm_upm_conversion.set(Some(valid));
        valid
    }

    fn check_pm_upm_round_trip(&self) -> Result<(), Error> {
        const SIZE: usize = PM_UPM_CHECK_SIZE as usize;
        let dims = ISize::new(PM_UPM_CHECK_SIZE, PM_UPM_CHECK_SIZE);
        // every premultiplied value: alpha is the row, color the smaller of row and column
        let mut src = vec![0u8; SIZE * SIZE * 4];
        for (i, px) in src.chunks_exact_mut(4).enumerate() {
            let (x, y) = ((i % SIZE) as u8, (i / SIZE) as u8);
            let c = x.min(y);
            px.copy_from_slice(&[c, c, c, y]);
        }
        let pm_info = ImageInfo::new(dims, ColorType::Rgba8888, AlphaType::Premul, None);
        let upm_info = pm_info.make_alpha_type(AlphaType::Unpremul);
        let bounds = IRect::from_size(dims);
        let origin = IPoint::new(0, 0);

        let data = self
            .make_sc(pm_info, Origin::TopLeft, false)
            .ok_or(Error::AllocationFailed)?;
        let read = self
            .make_sfc(upm_info, BackingFit::Exact, Origin::TopLeft)
            .ok_or(Error::AllocationFailed)?;
        let temp = self
            .make_sfc(pm_info, BackingFit::Exact, Origin::TopLeft)
            .ok_or(Error::AllocationFailed)?;
        data.write_pixels(self, Pixmap::new(pm_info, &src, SIZE * 4)?, origin)?;

        let texture_fp = |sc: &SurfaceContext| -> Result<FragmentProcessor, Error> {
            let sampled = sc.sampled_texture(self, bounds)?;
            Ok(FragmentProcessor::texture(sampled, Filter::Nearest))
        };

        read.fill_with_fp(
            self,
            FragmentProcessor::pm_to_upm(texture_fp(&data)?),
            vec![data.proxy().clone()],
        )?;
        let mut first = vec![0u8; SIZE * SIZE * 4];
        read.read_pixels(self, PixmapMut::new(upm_info, &mut first, SIZE * 4)?, origin)?;

        temp.fill_with_fp(
            self,
            FragmentProcessor::upm_to_pm(texture_fp(&*read)?),
            vec![read.proxy().clone()],
        )?;
        read.fill_with_fp(
            self,
            FragmentProcessor::pm_to_upm(texture_fp(&*temp)?),
            vec![temp.proxy().clone()],
        )?;
        let mut second = vec![0u8; SIZE * SIZE * 4];
        read.read_pixels(self, PixmapMut::new(upm_info, &mut second, SIZE * 4)?, origin)?;

        for y in 0..SIZE {
            // columns past the diagonal repeat the diagonal
            let row = y * SIZE * 4;
            let len = (y + 1) * 4;
            if first[row..row + len] != second[row..row + len] {
                return Err(Error::DeviceFailure);
            }
        }
        Ok(())
    }
}

impl Drop for DirectContext {
    fn drop(&mut self) {
        if !self.is_abandoned() {
            self.flush_and_submit(SyncCpu::Yes);
            self.finish_callbacks.call_all(true);
            self.process_messages();
            self.provider.borrow_mut().cache_mut().release_all();
            self.abandoned.set(true);
            // pools may still hold the provider
            self.provider.borrow_mut().abandon();
        } else {
            self.finish_callbacks.call_all(false);
            self.process_messages();
        }
        self.cpu_buffer_cache.release_all();
        logwise::info_sync!("dropped {id}", id = logwise::privacy::LogIt(self.id));
    }
}
