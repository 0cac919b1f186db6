// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Creation and lookup of textures and buffers.
//!
//! [`ResourceProvider`] is the only place resources are made.  It validates requests against
//! the [`Caps`], prefers recycling scratch resources from the [`ResourceCache`], and registers
//! whatever it creates.

use crate::caps::Caps;
use crate::coordinates::ISize;
use crate::gpu::{AccessPattern, BufferHandle, BufferType, Gpu, TextureDesc, TextureHandle};
use crate::resource::{BackendObject, GpuResource, IoType, ResourceId, ScratchKey, UniqueKey};
use crate::resource_cache::{ResourceCache, ScratchPendingIo};
use std::sync::Arc;

/// How closely a texture's allocation must match the requested size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackingFit {
    Exact,
    /// Rounded up to a size bin so allocations can be recycled.
    Approx,
}

/// Who frees a wrapped backend object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    Borrowed,
    Adopted,
}

const MIN_APPROX_SIZE: i32 = 16;
const MAGIC_TOLERANCE: i32 = 1024;
const MIN_SCRATCH_BUFFER_SIZE: usize = 1 << 12;

/// Bins a dimension for approximate fit: powers of two up to 1024, then the power of two or
/// the midpoint between two powers of two.
pub(crate) fn make_approx(dimensions: ISize) -> ISize {
    fn adjust(value: i32) -> i32 {
        let value = value.max(MIN_APPROX_SIZE) as u32;
        let ceil = value.next_power_of_two() as i32;
        if value as i32 <= MAGIC_TOLERANCE {
            return ceil;
        }
        let floor = ceil >> 1;
        let mid = floor + (floor >> 1);
        if value as i32 <= mid { mid } else { ceil }
    }
    ISize::new(adjust(dimensions.width), adjust(dimensions.height))
}

pub(crate) struct ResourceProvider {
    cache: ResourceCache,
    gpu: Arc<dyn Gpu>,
    caps: Arc<Caps>,
    abandoned: bool,
}

impl ResourceProvider {
    pub(crate) fn new(gpu: Arc<dyn Gpu>, caps: Arc<Caps>, max_count: usize, max_bytes: usize) -> Self {
        ResourceProvider {
            cache: ResourceCache::new(gpu.clone(), max_count, max_bytes),
            gpu,
            caps,
            abandoned: false,
        }
    }

    pub(crate) fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub(crate) fn cache_mut(&mut self) -> &mut ResourceCache {
        &mut self.cache
    }

    pub(crate) fn gpu(&self) -> &Arc<dyn Gpu> {
        &self.gpu
    }

    pub(crate) fn caps(&self) -> &Arc<Caps> {
        &self.caps
    }

    pub(crate) fn abandon(&mut self) {
        self.abandoned = true;
        self.cache.abandon_all();
    }

    fn validate_texture_desc(&self, desc: &TextureDesc) -> bool {
        let d = desc.dimensions;
        !d.is_empty()
            && d.width <= self.caps.max_texture_size
            && d.height <= self.caps.max_texture_size
            && self.caps.is_format_texturable(desc.format)
            && (!desc.renderable || self.caps.is_format_renderable(desc.format))
            && (!desc.mipmapped || self.caps.mipmap_support)
    }

    fn find_scratch_texture(&mut self, desc: &TextureDesc) -> Option<ResourceId> {
        let key = ScratchKey::for_texture(desc);
        self.cache
            .find_and_ref_scratch_resource(&key, desc.gpu_memory_size(), ScratchPendingIo::Prefer)
    }

    fn make_texture(&mut self, desc: &TextureDesc, budgeted: bool) -> Option<ResourceId> {
        let handle = self.gpu.create_texture(desc)?;
        let resource = GpuResource::new(BackendObject::Texture { handle, desc: *desc }, true);
        Some(self.cache.register(resource, budgeted))
    }

    /// A texture of exactly `desc`, recycled when possible.
    pub(crate) fn create_texture(&mut self, desc: &TextureDesc, budgeted: bool) -> Option<ResourceId> {
        if self.abandoned || !self.validate_texture_desc(desc) {
            return None;
        }
        if !desc.mipmapped {
            if let Some(id) = self.find_scratch_texture(desc) {
                if !budgeted {
                    self.cache.resource_access(id).make_unbudgeted();
                }
                logwise::trace_sync!(
                    "recycled {id} for {dimensions}",
                    id = logwise::privacy::LogIt(id),
                    dimensions = logwise::privacy::LogIt(desc.dimensions)
                );
                return Some(id);
            }
        }
        self.make_texture(desc, budgeted)
    }

    /// A budgeted texture at least as large as `desc`, binned when `fit` is approximate.
    pub(crate) fn find_or_make_scratch_texture(
        &mut self,
        desc: &TextureDesc,
        fit: BackingFit,
    ) -> Option<ResourceId> {
        if self.abandoned || !self.validate_texture_desc(desc) {
            return None;
        }
        let mut desc = *desc;
        if fit == BackingFit::Approx {
            desc.dimensions = make_approx(desc.dimensions);
            if !self.validate_texture_desc(&desc) {
                desc.dimensions = ISize::new(
                    desc.dimensions.width.min(self.caps.max_texture_size),
                    desc.dimensions.height.min(self.caps.max_texture_size),
                );
            }
        }
        if let Some(id) = self.find_scratch_texture(&desc) {
            return Some(id);
        }
        self.make_texture(&desc, true)
    }

    /// A buffer of at least `size` bytes.  Dynamic buffers are binned to a power of two so they
    /// can be recycled; other access patterns get exactly `size`.
    pub(crate) fn create_buffer(
        &mut self,
        size: usize,
        buffer_type: BufferType,
        access: AccessPattern,
        zero_init: bool,
    ) -> Option<ResourceId> {
        if self.abandoned || size == 0 {
            return None;
        }
        let id = if access == AccessPattern::Dynamic {
            let alloc_size = size.max(MIN_SCRATCH_BUFFER_SIZE).next_power_of_two();
            let key = ScratchKey::for_buffer(alloc_size, buffer_type, access);
            match self
                .cache
                .find_and_ref_scratch_resource(&key, alloc_size, ScratchPendingIo::Require)
            {
                Some(id) => id,
                None => self.make_buffer(alloc_size, buffer_type, access)?,
            }
        } else {
            self.make_buffer(size, buffer_type, access)?
        };
        if zero_init {
            if let Some(BackendObject::Buffer { handle, size, .. }) =
                self.cache.get(id).map(|r| *r.object())
            {
                if !self.gpu.update_buffer(handle, 0, &vec![0; size]) {
                    logwise::warn_sync!("zeroing {id} failed", id = logwise::privacy::LogIt(id));
                }
            }
        }
        Some(id)
    }

    fn make_buffer(
        &mut self,
        size: usize,
        buffer_type: BufferType,
        access: AccessPattern,
    ) -> Option<ResourceId> {
        let handle = self.gpu.create_buffer(size, buffer_type, access)?;
        let resource = GpuResource::new(
            BackendObject::Buffer {
                handle,
                size,
                buffer_type,
                access,
            },
            true,
        );
        Some(self.cache.register(resource, true))
    }

    /// Adopts an external texture into the cache.
    pub(crate) fn wrap_backend_texture(
        &mut self,
        handle: TextureHandle,
        desc: &TextureDesc,
        ownership: Ownership,
        cacheable: bool,
    ) -> Option<ResourceId> {
        if self.abandoned || !self.validate_texture_desc(desc) {
            return None;
        }
        let resource = GpuResource::new(
            BackendObject::Texture {
                handle,
                desc: *desc,
            },
            ownership == Ownership::Adopted,
        );
        Some(self.cache.register_wrapped(resource, cacheable))
    }

    /// The resource holding `key`, reffed for the caller.
    pub(crate) fn find_by_unique_key(&mut self, key: &UniqueKey) -> Option<ResourceId> {
        if self.abandoned {
            return None;
        }
        self.cache.find_and_ref_unique_resource(key)
    }

    /// Whether `id` holds `key` afterwards.
    pub(crate) fn assign_unique_key(&mut self, id: ResourceId, key: UniqueKey) -> bool {
        if self.abandoned {
            return false;
        }
        self.cache.resource_access(id).set_unique_key(key.clone());
        self.cache.get(id).and_then(|r| r.unique_key()) == Some(&key)
    }

    pub(crate) fn remove_unique_key(&mut self, id: ResourceId) {
        self.cache.resource_access(id).remove_unique_key();
    }

    pub(crate) fn set_budgeted(&mut self, id: ResourceId, budgeted: bool) {
        if budgeted {
            self.cache.resource_access(id).make_budgeted();
        } else {
            self.cache.resource_access(id).make_unbudgeted();
        }
    }

    pub(crate) fn texture_handle(&self, id: ResourceId) -> Option<TextureHandle> {
        self.cache.get(id).and_then(|r| r.object().texture())
    }

    pub(crate) fn buffer_handle(&self, id: ResourceId) -> Option<BufferHandle> {
        self.cache.get(id).and_then(|r| r.object().buffer())
    }

    pub(crate) fn add_ref(&mut self, id: ResourceId) {
        self.cache.resource_access(id).add_ref();
    }

    pub(crate) fn unref(&mut self, id: ResourceId) {
        self.cache.resource_access(id).unref();
    }

    pub(crate) fn add_pending_io(&mut self, id: ResourceId, io: IoType) {
        self.cache.resource_access(id).add_pending_io(io);
    }

    pub(crate) fn complete_pending_io(&mut self, id: ResourceId, io: IoType) {
        self.cache.resource_access(id).complete_pending_io(io);
    }
}

#[cfg(all(test, feature = "backend_soft"))]
mod tests {
    use super::*;
    use crate::imp::SoftGpu;
    use crate::pixel_formats::BackendFormat;

    fn provider() -> (Arc<SoftGpu>, ResourceProvider) {
        let gpu = Arc::new(SoftGpu::new());
        let p = ResourceProvider::new(gpu.clone(), Arc::new(Caps::soft()), 100, 1 << 24);
        (gpu, p)
    }

    fn desc(w: i32, h: i32) -> TextureDesc {
        TextureDesc {
            dimensions: ISize::new(w, h),
            format: BackendFormat::Rgba8Unorm,
            renderable: true,
            mipmapped: false,
            protected: false,
        }
    }

    #[test]
    fn approx_bins() {
        assert_eq!(make_approx(ISize::new(3, 17)), ISize::new(16, 32));
        assert_eq!(make_approx(ISize::new(1024, 1025)), ISize::new(1024, 1536));
        assert_eq!(make_approx(ISize::new(1537, 3000)), ISize::new(2048, 3072));
    }

    #[test]
    fn approx_textures_are_recycled() {
        let (gpu, mut p) = provider();
        let a = p
            .find_or_make_scratch_texture(&desc(10, 12), BackingFit::Approx)
            .unwrap();
        assert_eq!(
            p.cache().get(a).map(|r| r.gpu_memory_size()),
            Some(16 * 16 * 4)
        );
        p.unref(a);
        let b = p
            .find_or_make_scratch_texture(&desc(14, 9), BackingFit::Approx)
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(gpu.stats().textures_created, 1);
    }

    #[test]
    fn invalid_descs_are_rejected() {
        let (_gpu, mut p) = provider();
        assert!(p.create_texture(&desc(0, 4), true).is_none());
        assert!(p.create_texture(&desc(9000, 4), true).is_none());
    }

    #[test]
    fn dynamic_buffers_round_up_and_recycle() {
        let (gpu, mut p) = provider();
        let a = p
            .create_buffer(5000, BufferType::Vertex, AccessPattern::Dynamic, false)
            .unwrap();
        assert_eq!(p.cache().get(a).map(|r| r.gpu_memory_size()), Some(8192));
        p.unref(a);
        let b = p
            .create_buffer(6000, BufferType::Vertex, AccessPattern::Dynamic, true)
            .unwrap();
        assert_eq!(a, b);
        let exact = p
            .create_buffer(100, BufferType::XferGpuToCpu, AccessPattern::Stream, false)
            .unwrap();
        assert_eq!(p.cache().get(exact).map(|r| r.gpu_memory_size()), Some(100));
        assert_eq!(gpu.stats().buffers_created, 2);
    }

    #[test]
    fn borrowed_wraps_are_not_deleted() {
        let (gpu, mut p) = provider();
        let d = desc(4, 4);
        let handle = gpu.create_texture(&d).unwrap();
        let id = p
            .wrap_backend_texture(handle, &d, Ownership::Borrowed, false)
            .unwrap();
        p.unref(id);
        assert!(p.cache().get(id).is_none());
        assert_eq!(gpu.live_texture_count(), 1);
    }
}
