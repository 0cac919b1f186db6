// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
GPU-backed allocations and their lifetime state.

A [`GpuResource`] is owned by the [`ResourceCache`](crate::resource_cache::ResourceCache)
arena and is addressed everywhere else by its [`ResourceId`].  Two independent counters keep
a resource alive: ordinary references, and pending I/O (device work recorded against the
resource that has not yet completed).

The lifecycle is a small state machine:

```text
            ref / begin I/O
   Live  <------------------  PendingDestroy
    |  ----------------------->     |
    |    last ref and I/O gone      |
    |                               |  purge, release or abandon
    +-------------> Destroyed <-----+
        release or abandon
```

Entering `PendingDestroy` is what the cache is notified about.  A resource that is destroyed
while still referenced keeps counting its references so outstanding holders can drop them
safely; every other operation on it is a no-op.
*/

pub mod key;
pub mod unique_id;

pub use key::{Domain, ResourceType, ScratchKey, UniqueKey};
pub use unique_id::ResourceId;

use crate::gpu::{AccessPattern, BufferHandle, BufferType, Gpu, TextureDesc, TextureHandle};
use std::time::Instant;

/// How a resource is charged against the cache budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BudgetedType {
    /// Counts against the budget.
    Budgeted,
    /// Wraps an external object.  Kept in the cache while it has a unique key, never charged.
    UnbudgetedCacheable,
    /// Neither charged nor kept for reuse.
    UnbudgetedUncacheable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoType {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Referenced or has pending I/O.
    Live,
    /// No references and no pending I/O; the cache decides whether to keep it.
    PendingDestroy,
    /// The backend object was freed or discarded.
    Destroyed,
}

bitflags::bitflags! {
    /// What a count change told the cache.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RefNotification: u8 {
        const REF_CNT_REACHED_ZERO = 0x1;
        const ALL_CNTS_REACHED_ZERO = 0x2;
    }
}

/// The device object behind a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendObject {
    Texture {
        handle: TextureHandle,
        desc: TextureDesc,
    },
    Buffer {
        handle: BufferHandle,
        size: usize,
        buffer_type: BufferType,
        access: AccessPattern,
    },
}

impl BackendObject {
    pub fn gpu_memory_size(&self) -> usize {
        match self {
            BackendObject::Texture { desc, .. } => desc.gpu_memory_size(),
            BackendObject::Buffer { size, .. } => *size,
        }
    }

    pub fn texture(&self) -> Option<TextureHandle> {
        match self {
            BackendObject::Texture { handle, .. } => Some(*handle),
            BackendObject::Buffer { .. } => None,
        }
    }

    pub fn buffer(&self) -> Option<BufferHandle> {
        match self {
            BackendObject::Buffer { handle, .. } => Some(*handle),
            BackendObject::Texture { .. } => None,
        }
    }

    fn delete(&self, gpu: &dyn Gpu) {
        match self {
            BackendObject::Texture { handle, .. } => gpu.delete_texture(*handle),
            BackendObject::Buffer { handle, .. } => gpu.delete_buffer(*handle),
        }
    }
}

#[derive(Debug)]
pub struct GpuResource {
    id: ResourceId,
    object: BackendObject,
    gpu_memory_size: usize,
    pub(crate) budgeted: BudgetedType,
    pub(crate) refs_wrapped_objects: bool,
    owns_backend_object: bool,
    pub(crate) scratch_key: Option<ScratchKey>,
    pub(crate) unique_key: Option<UniqueKey>,
    pub(crate) refs: u32,
    pub(crate) pending_reads: u32,
    pub(crate) pending_writes: u32,
    destroyed: bool,
    pub(crate) timestamp: u64,
    pub(crate) in_purgeable_queue: bool,
    pub(crate) time_when_purgeable: Option<Instant>,
}

impl GpuResource {
    /// A fresh, unregistered resource holding one reference.
    pub(crate) fn new(object: BackendObject, owns_backend_object: bool) -> Self {
        GpuResource {
            id: ResourceId::next(),
            gpu_memory_size: object.gpu_memory_size(),
            object,
            budgeted: BudgetedType::UnbudgetedUncacheable,
            refs_wrapped_objects: false,
            owns_backend_object,
            scratch_key: None,
            unique_key: None,
            refs: 1,
            pending_reads: 0,
            pending_writes: 0,
            destroyed: false,
            timestamp: 0,
            in_purgeable_queue: false,
            time_when_purgeable: None,
        }
    }

    /// Structural key for resources that can be recycled.  Textures always qualify; buffers
    /// only when they are dynamic with a power of two size.
    pub(crate) fn compute_scratch_key(&self) -> Option<ScratchKey> {
        match &self.object {
            BackendObject::Texture { desc, .. } => Some(ScratchKey::for_texture(desc)),
            BackendObject::Buffer {
                size,
                buffer_type,
                access,
                ..
            } => (*access == AccessPattern::Dynamic && size.is_power_of_two())
                .then(|| ScratchKey::for_buffer(*size, *buffer_type, *access)),
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn object(&self) -> &BackendObject {
        &self.object
    }

    pub fn gpu_memory_size(&self) -> usize {
        self.gpu_memory_size
    }

    pub fn budgeted_type(&self) -> BudgetedType {
        self.budgeted
    }

    pub fn refs_wrapped_objects(&self) -> bool {
        self.refs_wrapped_objects
    }

    pub fn scratch_key(&self) -> Option<&ScratchKey> {
        self.scratch_key.as_ref()
    }

    pub fn unique_key(&self) -> Option<&UniqueKey> {
        self.unique_key.as_ref()
    }

    pub fn ref_count(&self) -> u32 {
        self.refs
    }

    pub fn pending_io(&self) -> u32 {
        self.pending_reads + self.pending_writes
    }

    pub fn has_pending_io(&self) -> bool {
        self.pending_io() > 0
    }

    pub fn was_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn lifecycle(&self) -> Lifecycle {
        if self.destroyed {
            Lifecycle::Destroyed
        } else if self.refs == 0 && !self.has_pending_io() {
            Lifecycle::PendingDestroy
        } else {
            Lifecycle::Live
        }
    }

    pub fn time_when_purgeable(&self) -> Option<Instant> {
        self.time_when_purgeable
    }

    /// No references, no pending I/O, and not a wrapped resource the cache holds on to
    /// through its unique key.
    pub fn is_purgeable(&self) -> bool {
        self.refs == 0
            && !self.has_pending_io()
            && !(self.budgeted == BudgetedType::UnbudgetedCacheable && self.unique_key.is_some())
    }

    /// Whether a scratch lookup may hand this resource out.
    pub(crate) fn is_usable_as_scratch(&self) -> bool {
        self.unique_key.is_none()
            && self.budgeted == BudgetedType::Budgeted
            && self.scratch_key.is_some()
            && !self.refs_wrapped_objects
    }

    /// Frees the backend object.  Only the first call on a resource does anything.
    pub(crate) fn release_backend(&mut self, gpu: &dyn Gpu) {
        if self.destroyed {
            return;
        }
        if self.owns_backend_object {
            self.object.delete(gpu);
        }
        self.destroyed = true;
    }

    /// Forgets the backend object without talking to the device.
    pub(crate) fn abandon_backend(&mut self) {
        self.destroyed = true;
    }
}
