// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The registry of every live [`GpuResource`] for one context.

The cache owns resources in an arena keyed by [`ResourceId`].  Scratch and unique indices
hold ids, never references, so removing a resource only has to clear index entries.

Purgeable resources sit in an LRU queue ordered by the time they became purgeable.  Budget
enforcement walks that queue oldest first.  Count changes on a resource (refs and pending
I/O) go through [`ResourceAccess`], which is handed out only inside the crate.

Resources released or abandoned while somebody still references them move to an orphan set.
They keep counting references there, and are dropped when the last one goes away.
*/

use crate::gpu::Gpu;
use crate::resource::{
    BackendObject, BudgetedType, GpuResource, IoType, RefNotification, ResourceId, ScratchKey, UniqueKey,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

pub const DEFAULT_MAX_RESOURCE_COUNT: usize = 8192;
pub const DEFAULT_MAX_RESOURCE_BYTES: usize = 96 * (1 << 20);

/// Whether a scratch lookup may return a resource that still has pending I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScratchPendingIo {
    Allow,
    /// Prefer an idle resource.  When none exists and a new resource would fit in the budget,
    /// return nothing so the caller allocates instead.
    Prefer,
    Require,
}

/// Counters kept for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub inserted: usize,
    pub released: usize,
    pub abandoned: usize,
    pub purged: usize,
    pub became_purgeable: usize,
    pub scratch_hits: usize,
    pub unique_hits: usize,
}

/// One resource in a [`ResourceCache::dump_memory_statistics`] report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMemoryStats {
    pub id: ResourceId,
    /// `"texture"` or `"buffer"`.
    pub kind: &'static str,
    pub size: usize,
    pub budgeted: BudgetedType,
    pub purgeable: bool,
    pub has_scratch_key: bool,
    pub has_unique_key: bool,
    pub wrapped: bool,
}

pub struct ResourceCache {
    gpu: Arc<dyn Gpu>,
    resources: HashMap<ResourceId, GpuResource>,
    orphans: HashMap<ResourceId, GpuResource>,
    purgeable_queue: BTreeMap<u64, ResourceId>,
    scratch_map: HashMap<ScratchKey, Vec<ResourceId>>,
    unique_map: HashMap<UniqueKey, ResourceId>,
    timestamp: u64,
    max_count: usize,
    max_bytes: usize,
    bytes: usize,
    budgeted_count: usize,
    budgeted_bytes: usize,
    purgeable_bytes: usize,
    stats: CacheStats,
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("count", &self.resources.len())
            .field("bytes", &self.bytes)
            .field("budgeted_count", &self.budgeted_count)
            .field("budgeted_bytes", &self.budgeted_bytes)
            .field("purgeable_bytes", &self.purgeable_bytes)
            .field("orphans", &self.orphans.len())
            .finish()
    }
}

impl ResourceCache {
    pub(crate) fn new(gpu: Arc<dyn Gpu>, max_count: usize, max_bytes: usize) -> Self {
        ResourceCache {
            gpu,
            resources: HashMap::new(),
            orphans: HashMap::new(),
            purgeable_queue: BTreeMap::new(),
            scratch_map: HashMap::new(),
            unique_map: HashMap::new(),
            timestamp: 0,
            max_count,
            max_bytes,
            bytes: 0,
            budgeted_count: 0,
            budgeted_bytes: 0,
            purgeable_bytes: 0,
            stats: CacheStats::default(),
        }
    }

    fn next_timestamp(&mut self) -> u64 {
        self.timestamp += 1;
        self.timestamp
    }

    pub fn get_resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn get_budgeted_resource_count(&self) -> usize {
        self.budgeted_count
    }

    pub fn get_resource_bytes(&self) -> usize {
        self.bytes
    }

    pub fn get_budgeted_resource_bytes(&self) -> usize {
        self.budgeted_bytes
    }

    pub fn get_purgeable_bytes(&self) -> usize {
        self.purgeable_bytes
    }

    pub fn get_max_resource_count(&self) -> usize {
        self.max_count
    }

    pub fn get_max_resource_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Resources destroyed while still referenced.
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    pub fn get(&self, id: ResourceId) -> Option<&GpuResource> {
        self.resources.get(&id).or_else(|| self.orphans.get(&id))
    }

    pub fn over_budget(&self) -> bool {
        self.budgeted_count > self.max_count || self.budgeted_bytes > self.max_bytes
    }

    fn would_fit(&self, bytes: usize) -> bool {
        self.budgeted_bytes + bytes <= self.max_bytes && self.budgeted_count < self.max_count
    }

    /// Inserts a freshly created resource, budgeted or not.  The caller keeps the one
    /// reference the resource was created with.
    pub(crate) fn register(&mut self, mut resource: GpuResource, budgeted: bool) -> ResourceId {
        resource.budgeted = if budgeted {
            BudgetedType::Budgeted
        } else {
            BudgetedType::UnbudgetedUncacheable
        };
        resource.scratch_key = resource.compute_scratch_key();
        self.insert(resource)
    }

    /// Inserts a resource wrapping an external object.  Wrapped resources never get a scratch
    /// key and are never charged to the budget.
    pub(crate) fn register_wrapped(
        &mut self,
        mut resource: GpuResource,
        cacheable: bool,
    ) -> ResourceId {
        resource.budgeted = if cacheable {
            BudgetedType::UnbudgetedCacheable
        } else {
            BudgetedType::UnbudgetedUncacheable
        };
        resource.refs_wrapped_objects = true;
        resource.scratch_key = None;
        self.insert(resource)
    }

    fn insert(&mut self, mut resource: GpuResource) -> ResourceId {
        let id = resource.id();
        debug_assert!(
            !self.resources.contains_key(&id),
            "{id} registered twice"
        );
        resource.timestamp = self.next_timestamp();
        let size = resource.gpu_memory_size();
        self.bytes += size;
        if resource.budgeted == BudgetedType::Budgeted {
            self.budgeted_count += 1;
            self.budgeted_bytes += size;
        }
        if let Some(key) = &resource.scratch_key {
            self.scratch_map.entry(key.clone()).or_default().push(id);
        }
        logwise::info_sync!(
            "registered {id} ({size} bytes, {budgeted})",
            id = logwise::privacy::LogIt(id),
            size = size,
            budgeted = logwise::privacy::LogIt(resource.budgeted)
        );
        self.resources.insert(id, resource);
        self.stats.inserted += 1;
        self.purge_as_needed();
        id
    }

    /// The narrow interface count and key changes go through.
    pub(crate) fn resource_access(&mut self, id: ResourceId) -> ResourceAccess<'_> {
        ResourceAccess { cache: self, id }
    }

    fn remove_from_purgeable_queue(&mut self, id: ResourceId) {
        let Some(r) = self.resources.get_mut(&id) else {
            return;
        };
        if r.in_purgeable_queue {
            r.in_purgeable_queue = false;
            r.time_when_purgeable = None;
            let (ts, size) = (r.timestamp, r.gpu_memory_size());
            self.purgeable_queue.remove(&ts);
            self.purgeable_bytes -= size;
        }
    }

    fn ref_and_make_mru(&mut self, id: ResourceId) {
        self.remove_from_purgeable_queue(id);
        let ts = self.next_timestamp();
        if let Some(r) = self.resources.get_mut(&id) {
            r.refs += 1;
            r.timestamp = ts;
        }
    }

    /// Takes a resource out of the cache, freeing (or discarding) its backend object.
    /// Resources that are already gone are ignored.
    fn remove(&mut self, id: ResourceId, abandon: bool) {
        self.remove_from_purgeable_queue(id);
        let Some(mut r) = self.resources.remove(&id) else {
            return;
        };
        if abandon {
            r.abandon_backend();
            self.stats.abandoned += 1;
        } else {
            r.release_backend(self.gpu.as_ref());
            self.stats.released += 1;
        }
        let size = r.gpu_memory_size();
        self.bytes -= size;
        if r.budgeted == BudgetedType::Budgeted {
            self.budgeted_count -= 1;
            self.budgeted_bytes -= size;
        }
        if let Some(key) = &r.scratch_key {
            if let Some(ids) = self.scratch_map.get_mut(key) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.scratch_map.remove(key);
                }
            }
        }
        if let Some(key) = &r.unique_key {
            if self.unique_map.get(key) == Some(&id) {
                self.unique_map.remove(key);
            }
        }
        let what = if abandon { "abandoned" } else { "released" };
        logwise::info_sync!(
            "{what} {id} ({size} bytes)",
            what = what,
            id = logwise::privacy::LogIt(id),
            size = size
        );
        if r.refs > 0 || r.has_pending_io() {
            self.orphans.insert(id, r);
        }
    }

    /// Releases `id` if it is registered, as if the owner had called `release()` on it.
    pub(crate) fn release(&mut self, id: ResourceId) {
        self.remove(id, false);
    }

    pub(crate) fn abandon(&mut self, id: ResourceId) {
        self.remove(id, true);
    }

    fn notify_cnt_reached_zero(&mut self, id: ResourceId, flags: RefNotification) {
        if !flags.contains(RefNotification::ALL_CNTS_REACHED_ZERO) {
            // a later completion of pending I/O notifies again
            return;
        }
        let ts = self.next_timestamp();
        let Some(r) = self.resources.get_mut(&id) else {
            return;
        };
        if !r.is_purgeable() {
            return;
        }
        debug_assert!(!r.in_purgeable_queue);
        r.timestamp = ts;
        r.in_purgeable_queue = true;
        r.time_when_purgeable = Some(Instant::now());
        let size = r.gpu_memory_size();
        let budgeted = r.budgeted;
        let has_key = r.scratch_key.is_some() || r.unique_key.is_some();
        let unbudgeted_scratch = !r.refs_wrapped_objects && r.scratch_key.is_some();
        self.purgeable_queue.insert(ts, id);
        self.purgeable_bytes += size;
        self.stats.became_purgeable += 1;

        if budgeted == BudgetedType::Budgeted {
            if has_key && !self.over_budget() {
                return;
            }
        } else if unbudgeted_scratch && self.would_fit(size) {
            // still useful as scratch, so start charging it
            self.resource_access(id).make_budgeted();
            return;
        }
        logwise::trace_sync!(
            "releasing {id} as it became purgeable",
            id = logwise::privacy::LogIt(id)
        );
        self.release(id);
    }

    /// Re-runs the purgeable decision after a key change.
    fn reevaluate(&mut self, id: ResourceId) {
        let idle = self
            .resources
            .get(&id)
            .is_some_and(|r| r.refs == 0 && !r.has_pending_io());
        if idle {
            self.remove_from_purgeable_queue(id);
            self.notify_cnt_reached_zero(
                id,
                RefNotification::REF_CNT_REACHED_ZERO | RefNotification::ALL_CNTS_REACHED_ZERO,
            );
        }
    }

    fn change_unique_key(&mut self, id: ResourceId, key: UniqueKey) {
        if let Some(&old) = self.unique_map.get(&key) {
            if old == id {
                return;
            }
            let steal_whole = self
                .resources
                .get(&old)
                .is_some_and(|r| r.scratch_key.is_none() && r.is_purgeable());
            if steal_whole {
                self.release(old);
            } else {
                self.remove_unique_key(old);
            }
        }
        let Some(r) = self.resources.get_mut(&id) else {
            return;
        };
        match r.unique_key.replace(key.clone()) {
            Some(previous) => {
                self.unique_map.remove(&previous);
            }
            None => {
                // the resource is no longer fungible
                if let Some(scratch) = &r.scratch_key {
                    if let Some(ids) = self.scratch_map.get_mut(scratch) {
                        ids.retain(|other| *other != id);
                        if ids.is_empty() {
                            self.scratch_map.remove(scratch);
                        }
                    }
                }
            }
        }
        self.unique_map.insert(key, id);
    }

    fn remove_unique_key(&mut self, id: ResourceId) {
        let Some(r) = self.resources.get_mut(&id) else {
            return;
        };
        let Some(key) = r.unique_key.take() else {
            return;
        };
        if let Some(scratch) = &r.scratch_key {
            self.scratch_map.entry(scratch.clone()).or_default().push(id);
        }
        if self.unique_map.get(&key) == Some(&id) {
            self.unique_map.remove(&key);
        }
        self.reevaluate(id);
    }

    /// Finds an idle resource with `key`, refs it and makes it most recently used.
    pub(crate) fn find_and_ref_scratch_resource(
        &mut self,
        key: &ScratchKey,
        size: usize,
        pending_io: ScratchPendingIo,
    ) -> Option<ResourceId> {
        let find = |cache: &Self, reject_pending_io: bool| -> Option<ResourceId> {
            cache.scratch_map.get(key)?.iter().copied().find(|id| {
                cache.resources.get(id).is_some_and(|r| {
                    r.refs == 0
                        && r.is_usable_as_scratch()
                        && !(reject_pending_io && r.has_pending_io())
                })
            })
        };
        if pending_io != ScratchPendingIo::Allow {
            if let Some(id) = find(self, true) {
                self.ref_and_make_mru(id);
                self.stats.scratch_hits += 1;
                return Some(id);
            }
            if pending_io == ScratchPendingIo::Require || self.would_fit(size) {
                return None;
            }
        }
        let id = find(self, false)?;
        self.ref_and_make_mru(id);
        self.stats.scratch_hits += 1;
        Some(id)
    }

    pub(crate) fn find_and_ref_unique_resource(&mut self, key: &UniqueKey) -> Option<ResourceId> {
        let id = *self.unique_map.get(key)?;
        self.ref_and_make_mru(id);
        self.stats.unique_hits += 1;
        Some(id)
    }

    /// Every resource in the cache, ordered by id.  Resources wrapping external objects are
    /// left out unless `include_wrapped` is set.
    pub fn dump_memory_statistics(&self, include_wrapped: bool) -> Vec<ResourceMemoryStats> {
        let mut report: Vec<ResourceMemoryStats> = self
            .resources
            .values()
            .filter(|r| include_wrapped || !r.refs_wrapped_objects)
            .map(|r| ResourceMemoryStats {
                id: r.id(),
                kind: match r.object() {
                    BackendObject::Texture { .. } => "texture",
                    BackendObject::Buffer { .. } => "buffer",
                },
                size: r.gpu_memory_size(),
                budgeted: r.budgeted,
                purgeable: r.is_purgeable(),
                has_scratch_key: r.scratch_key.is_some(),
                has_unique_key: r.unique_key.is_some(),
                wrapped: r.refs_wrapped_objects,
            })
            .collect();
        report.sort_by_key(|entry| entry.id);
        logwise::trace_sync!(
            "dumped {count} of {total} resources",
            count = report.len(),
            total = self.resources.len()
        );
        report
    }

    pub fn has_unique_key(&self, key: &UniqueKey) -> bool {
        self.unique_map.contains_key(key)
    }

    /// Releases least recently used purgeable resources until the budget is met or nothing
    /// purgeable remains.
    pub fn purge_as_needed(&mut self) {
        while self.over_budget() {
            let Some((_, &id)) = self.purgeable_queue.first_key_value() else {
                break;
            };
            logwise::trace_sync!("purging {id} to meet budget", id = logwise::privacy::LogIt(id));
            self.stats.purged += 1;
            self.release(id);
        }
    }

    /// Releases purgeable resources.  With `purge_time`, only those purgeable since before that
    /// instant; with `scratch_only`, only those without a unique key.
    pub fn purge_unlocked_resources(&mut self, purge_time: Option<Instant>, scratch_only: bool) {
        let victims: Vec<ResourceId> = self
            .purgeable_queue
            .values()
            .copied()
            .filter(|id| {
                self.resources.get(id).is_some_and(|r| {
                    let old_enough = match (purge_time, r.time_when_purgeable) {
                        (Some(limit), Some(t)) => t < limit,
                        (Some(_), None) => false,
                        (None, _) => true,
                    };
                    old_enough && !(scratch_only && r.unique_key.is_some())
                })
            })
            .collect();
        for id in victims {
            self.stats.purged += 1;
            self.release(id);
        }
    }

    pub fn purge_resources_not_used_since(&mut self, purge_time: Instant) {
        self.purge_unlocked_resources(Some(purge_time), false);
    }

    /// Frees at least `bytes_to_purge` bytes if enough are purgeable.  With `prefer_scratch`,
    /// resources without a unique key go first.
    pub fn purge_unlocked_resources_bytes(&mut self, bytes_to_purge: usize, prefer_scratch: bool) {
        let target = self.bytes.saturating_sub(bytes_to_purge);
        let mut still_over = target < self.bytes;
        if prefer_scratch && bytes_to_purge < self.purgeable_bytes {
            let scratch: Vec<(ResourceId, usize)> = self
                .purgeable_queue
                .values()
                .filter_map(|id| {
                    let r = self.resources.get(id)?;
                    r.unique_key.is_none().then_some((*id, r.gpu_memory_size()))
                })
                .collect();
            let mut freed = 0;
            let mut victims = Vec::new();
            for (id, size) in scratch {
                if !still_over {
                    break;
                }
                freed += size;
                victims.push(id);
                still_over = target < self.bytes - freed;
            }
            for id in victims {
                self.stats.purged += 1;
                self.release(id);
            }
        }
        if still_over {
            let saved = self.max_bytes;
            self.max_bytes = target;
            self.purge_as_needed();
            self.max_bytes = saved;
        }
    }

    pub fn set_limits(&mut self, max_count: usize, max_bytes: usize) {
        self.max_count = max_count;
        self.max_bytes = max_bytes;
        self.purge_as_needed();
    }

    /// Releases every resource through the device.  Referenced ones become orphans.
    pub(crate) fn release_all(&mut self) {
        let ids: Vec<ResourceId> = self.resources.keys().copied().collect();
        for id in ids {
            self.release(id);
        }
        debug_assert!(self.scratch_map.is_empty() && self.unique_map.is_empty());
    }

    /// Forgets every resource without device calls.  Referenced ones become orphans.
    pub(crate) fn abandon_all(&mut self) {
        let ids: Vec<ResourceId> = self.resources.keys().copied().collect();
        for id in ids {
            self.abandon(id);
        }
    }
}

impl Drop for ResourceCache {
    fn drop(&mut self) {
        if !self.resources.is_empty() {
            logwise::info_sync!(
                "dropping cache with {count} live resources",
                count = self.resources.len()
            );
            self.release_all();
        }
    }
}

/// Count and key operations on one resource.
///
/// Every operation is a no-op when the resource is unknown.  Operations on a destroyed
/// resource only adjust its counts.
pub(crate) struct ResourceAccess<'a> {
    cache: &'a mut ResourceCache,
    id: ResourceId,
}

impl ResourceAccess<'_> {
    pub(crate) fn add_ref(self) {
        if self.cache.resources.contains_key(&self.id) {
            self.cache.remove_from_purgeable_queue(self.id);
            if let Some(r) = self.cache.resources.get_mut(&self.id) {
                r.refs += 1;
            }
        } else if let Some(r) = self.cache.orphans.get_mut(&self.id) {
            r.refs += 1;
        }
    }

    pub(crate) fn unref(self) {
        if let Some(r) = self.cache.resources.get_mut(&self.id) {
            debug_assert!(r.refs > 0, "{} unreffed below zero", self.id);
            r.refs = r.refs.saturating_sub(1);
            if r.refs == 0 {
                let mut flags = RefNotification::REF_CNT_REACHED_ZERO;
                if !r.has_pending_io() {
                    flags |= RefNotification::ALL_CNTS_REACHED_ZERO;
                }
                self.cache.notify_cnt_reached_zero(self.id, flags);
            }
        } else if let Some(r) = self.cache.orphans.get_mut(&self.id) {
            r.refs = r.refs.saturating_sub(1);
            self.drop_orphan_if_idle();
        }
    }

    pub(crate) fn add_pending_io(self, io: IoType) {
        let r = match self.cache.resources.get_mut(&self.id) {
            Some(r) => r,
            None => match self.cache.orphans.get_mut(&self.id) {
                Some(r) => r,
                None => return,
            },
        };
        match io {
            IoType::Read => r.pending_reads += 1,
            IoType::Write => r.pending_writes += 1,
        }
    }

    pub(crate) fn complete_pending_io(self, io: IoType) {
        fn complete(r: &mut GpuResource, io: IoType) {
            let counter = match io {
                IoType::Read => &mut r.pending_reads,
                IoType::Write => &mut r.pending_writes,
            };
            debug_assert!(*counter > 0);
            *counter = counter.saturating_sub(1);
        }
        if let Some(r) = self.cache.resources.get_mut(&self.id) {
            complete(r, io);
            if r.refs == 0 && !r.has_pending_io() {
                self.cache
                    .notify_cnt_reached_zero(self.id, RefNotification::ALL_CNTS_REACHED_ZERO);
            }
        } else if let Some(r) = self.cache.orphans.get_mut(&self.id) {
            complete(r, io);
            self.drop_orphan_if_idle();
        }
    }

    fn drop_orphan_if_idle(self) {
        let idle = self
            .cache
            .orphans
            .get(&self.id)
            .is_some_and(|r| r.refs == 0 && !r.has_pending_io());
        if idle {
            logwise::trace_sync!("dropping orphaned {id}", id = logwise::privacy::LogIt(self.id));
            self.cache.orphans.remove(&self.id);
        }
    }

    /// Installs `key`, taking it from any resource that holds it.  Ignored for resources that
    /// are neither budgeted nor wrapped.
    pub(crate) fn set_unique_key(self, key: UniqueKey) {
        let Some(r) = self.cache.resources.get(&self.id) else {
            return;
        };
        if r.budgeted != BudgetedType::Budgeted && !r.refs_wrapped_objects {
            return;
        }
        self.cache.change_unique_key(self.id, key);
    }

    pub(crate) fn remove_unique_key(self) {
        self.cache.remove_unique_key(self.id);
    }

    /// Uncacheable to budgeted.  Wrapped resources never become budgeted.
    pub(crate) fn make_budgeted(self) {
        let Some(r) = self.cache.resources.get_mut(&self.id) else {
            return;
        };
        if r.refs_wrapped_objects || r.budgeted != BudgetedType::UnbudgetedUncacheable {
            return;
        }
        r.budgeted = BudgetedType::Budgeted;
        let size = r.gpu_memory_size();
        self.cache.budgeted_count += 1;
        self.cache.budgeted_bytes += size;
        self.cache.purge_as_needed();
    }

    /// Budgeted to uncacheable, for resources without a unique key.  An idle resource stays
    /// in the purgeable queue, uncharged, until it is purged.  It is not re-budgeted the way
    /// an unbudgeted scratch resource is when its last reference goes away.
    pub(crate) fn make_unbudgeted(self) {
        let Some(r) = self.cache.resources.get_mut(&self.id) else {
            return;
        };
        if r.budgeted != BudgetedType::Budgeted || r.unique_key.is_some() {
            return;
        }
        r.budgeted = BudgetedType::UnbudgetedUncacheable;
        let size = r.gpu_memory_size();
        self.cache.budgeted_count -= 1;
        self.cache.budgeted_bytes -= size;
    }

    pub(crate) fn release(self) {
        self.cache.release(self.id);
    }

    pub(crate) fn abandon(self) {
        self.cache.abandon(self.id);
    }
}

#[cfg(all(test, feature = "backend_soft"))]
mod tests {
    use super::*;
    use crate::coordinates::ISize;
    use crate::gpu::TextureDesc;
    use crate::imp::SoftGpu;
    use crate::pixel_formats::BackendFormat;
    use crate::resource::{BackendObject, Domain, Lifecycle};

    fn desc(w: i32) -> TextureDesc {
        TextureDesc {
            dimensions: ISize::new(w, w),
            format: BackendFormat::Rgba8Unorm,
            renderable: false,
            mipmapped: false,
            protected: false,
        }
    }

    fn setup(max_count: usize, max_bytes: usize) -> (Arc<SoftGpu>, ResourceCache) {
        let gpu = Arc::new(SoftGpu::new());
        let cache = ResourceCache::new(gpu.clone(), max_count, max_bytes);
        (gpu, cache)
    }

    fn texture(gpu: &SoftGpu, w: i32) -> GpuResource {
        let desc = desc(w);
        let handle = gpu.create_texture(&desc).unwrap();
        GpuResource::new(BackendObject::Texture { handle, desc }, true)
    }

    fn key(n: u32) -> UniqueKey {
        thread_local! {
            static DOMAIN: Domain = Domain::generate();
        }
        DOMAIN.with(|d| UniqueKey::new(*d, [n]))
    }

    #[test]
    fn purgeable_only_when_refs_and_io_are_zero() {
        let (_gpu, mut cache) = setup(100, 1 << 20);
        let id = cache.register(texture(&_gpu, 4), true);
        cache.resource_access(id).add_pending_io(IoType::Read);
        cache.resource_access(id).unref();
        let r = cache.get(id).unwrap();
        assert!(!r.is_purgeable());
        assert_eq!(r.lifecycle(), Lifecycle::Live);
        assert_eq!(cache.get_purgeable_bytes(), 0);

        cache.resource_access(id).complete_pending_io(IoType::Read);
        let r = cache.get(id).unwrap();
        assert!(r.is_purgeable());
        assert_eq!(r.lifecycle(), Lifecycle::PendingDestroy);
        assert_eq!(cache.get_purgeable_bytes(), 64);
        assert_eq!(cache.stats().became_purgeable, 1);
    }

    #[test]
    fn teardown_is_idempotent() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let a = cache.register(texture(&gpu, 4), true);
        let b = cache.register(texture(&gpu, 4), true);
        cache.resource_access(a).abandon();
        cache.resource_access(a).release();
        cache.resource_access(b).release();
        cache.resource_access(b).release();
        cache.resource_access(b).abandon();
        assert_eq!(gpu.stats().textures_deleted, 1);
        assert_eq!(cache.stats().released, 1);
        assert_eq!(cache.stats().abandoned, 1);
        assert_eq!(cache.get_resource_count(), 0);
        // still referenced by their creators
        assert_eq!(cache.orphan_count(), 2);
        cache.resource_access(a).unref();
        cache.resource_access(b).unref();
        assert_eq!(cache.orphan_count(), 0);
    }

    #[test]
    fn budget_converges_on_lru() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let ids: Vec<_> = (0..10)
            .map(|_| {
                let id = cache.register(texture(&gpu, 4), true);
                cache.resource_access(id).unref();
                id
            })
            .collect();
        assert_eq!(cache.get_resource_count(), 10);
        cache.set_limits(4, 1 << 20);
        assert_eq!(cache.get_budgeted_resource_count(), 4);
        // the most recently purged-into resources survive
        for id in &ids[6..] {
            assert!(cache.get(*id).is_some());
        }
        cache.set_limits(100, 64 * 2);
        assert!(cache.get_budgeted_resource_bytes() <= 128);
        assert!(!cache.over_budget());
    }

    #[test]
    fn over_budget_with_nothing_purgeable_stops() {
        let (gpu, mut cache) = setup(2, 1 << 20);
        for _ in 0..4 {
            cache.register(texture(&gpu, 4), true);
        }
        assert_eq!(cache.get_resource_count(), 4);
        assert!(cache.over_budget());
    }

    #[test]
    fn scratch_reuse_prefers_idle_resources() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let busy = cache.register(texture(&gpu, 8), true);
        cache.resource_access(busy).add_pending_io(IoType::Write);
        cache.resource_access(busy).unref();
        let scratch = ScratchKey::for_texture(&desc(8));

        assert_eq!(
            cache.find_and_ref_scratch_resource(&scratch, 256, ScratchPendingIo::Require),
            None
        );
        // a new one fits, so the caller should allocate
        assert_eq!(
            cache.find_and_ref_scratch_resource(&scratch, 256, ScratchPendingIo::Prefer),
            None
        );
        assert_eq!(
            cache.find_and_ref_scratch_resource(&scratch, 256, ScratchPendingIo::Allow),
            Some(busy)
        );
        assert_eq!(cache.get(busy).unwrap().ref_count(), 1);
        assert_eq!(
            cache.find_and_ref_scratch_resource(&scratch, 256, ScratchPendingIo::Allow),
            None
        );
    }

    #[test]
    fn unique_key_is_stolen() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let first = cache.register(texture(&gpu, 4), true);
        let second = cache.register(texture(&gpu, 4), true);
        cache.resource_access(first).set_unique_key(key(1));
        cache.resource_access(second).set_unique_key(key(1));
        assert_eq!(cache.find_and_ref_unique_resource(&key(1)), Some(second));
        assert!(cache.get(first).unwrap().unique_key().is_none());
        // first is fungible again
        cache.resource_access(first).unref();
        let scratch = ScratchKey::for_texture(&desc(4));
        assert_eq!(
            cache.find_and_ref_scratch_resource(&scratch, 64, ScratchPendingIo::Allow),
            Some(first)
        );
    }

    #[test]
    fn unbudgeted_resources_never_get_unique_keys() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let id = cache.register(texture(&gpu, 4), false);
        cache.resource_access(id).set_unique_key(key(2));
        assert!(!cache.has_unique_key(&key(2)));
    }

    #[test]
    fn wrapped_cacheable_kept_until_key_removed() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let id = cache.register_wrapped(texture(&gpu, 4), true);
        cache.resource_access(id).set_unique_key(key(3));
        cache.resource_access(id).unref();
        assert!(cache.get(id).is_some());
        assert_eq!(cache.get_purgeable_bytes(), 0);
        cache.purge_unlocked_resources(None, false);
        assert!(cache.get(id).is_some());
        cache.resource_access(id).remove_unique_key();
        assert!(cache.get(id).is_none());
        assert_eq!(gpu.live_texture_count(), 0);
    }

    #[test]
    fn unbudgeted_scratch_becomes_budgeted_when_it_fits() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let id = cache.register(texture(&gpu, 4), false);
        assert_eq!(cache.get_budgeted_resource_count(), 0);
        cache.resource_access(id).unref();
        assert_eq!(
            cache.get(id).map(|r| r.budgeted_type()),
            Some(BudgetedType::Budgeted)
        );
        assert_eq!(cache.get_budgeted_resource_bytes(), 64);
    }

    #[test]
    fn idle_scratch_made_unbudgeted_stays_unbudgeted() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let id = cache.register(texture(&gpu, 4), true);
        cache.resource_access(id).unref();
        assert_eq!(cache.get_purgeable_bytes(), 64);

        cache.resource_access(id).make_unbudgeted();
        assert_eq!(
            cache.get(id).map(|r| r.budgeted_type()),
            Some(BudgetedType::UnbudgetedUncacheable)
        );
        assert_eq!(cache.get_budgeted_resource_count(), 0);
        assert_eq!(cache.get_budgeted_resource_bytes(), 0);
        assert_eq!(cache.get_purgeable_bytes(), 64);
        let scratch = ScratchKey::for_texture(&desc(4));
        assert_eq!(
            cache.find_and_ref_scratch_resource(&scratch, 64, ScratchPendingIo::Allow),
            None
        );

        cache.purge_unlocked_resources(None, false);
        assert!(cache.get(id).is_none());
        assert_eq!(gpu.live_texture_count(), 0);
    }

    #[test]
    fn memory_dump_reports_keys_and_skips_wrapped() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let keyed = cache.register(texture(&gpu, 4), true);
        cache.resource_access(keyed).set_unique_key(key(9));
        let idle = cache.register(texture(&gpu, 2), true);
        cache.resource_access(idle).unref();
        let wrapped = cache.register_wrapped(texture(&gpu, 8), true);

        let report = cache.dump_memory_statistics(false);
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].id, keyed);
        assert_eq!(report[0].kind, "texture");
        assert_eq!(report[0].size, 64);
        assert!(report[0].has_unique_key);
        assert!(!report[0].purgeable);
        assert_eq!(report[1].id, idle);
        assert_eq!(report[1].size, 16);
        assert!(report[1].purgeable && report[1].has_scratch_key);
        assert_eq!(report[1].budgeted, BudgetedType::Budgeted);

        let all = cache.dump_memory_statistics(true);
        assert_eq!(all.len(), 3);
        let entry = all.iter().find(|e| e.id == wrapped).unwrap();
        assert!(entry.wrapped);
        assert_eq!(entry.budgeted, BudgetedType::UnbudgetedCacheable);
        assert_eq!(entry.size, 256);
    }

    #[test]
    fn keyless_budgeted_resources_release_on_last_unref() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let handle = gpu
            .create_buffer(
                100,
                crate::gpu::BufferType::Vertex,
                crate::gpu::AccessPattern::Static,
            )
            .unwrap();
        let buffer = GpuResource::new(
            BackendObject::Buffer {
                handle,
                size: 100,
                buffer_type: crate::gpu::BufferType::Vertex,
                access: crate::gpu::AccessPattern::Static,
            },
            true,
        );
        let id = cache.register(buffer, true);
        cache.resource_access(id).unref();
        assert!(cache.get(id).is_none());
        assert_eq!(gpu.live_buffer_count(), 0);
    }

    #[test]
    fn purge_by_bytes_prefers_scratch() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let keyed = cache.register(texture(&gpu, 4), true);
        cache.resource_access(keyed).set_unique_key(key(4));
        cache.resource_access(keyed).unref();
        let scratch = cache.register(texture(&gpu, 4), true);
        cache.resource_access(scratch).unref();
        cache.purge_unlocked_resources_bytes(64, true);
        assert!(cache.get(keyed).is_some());
        assert!(cache.get(scratch).is_none());
        cache.purge_unlocked_resources_bytes(64, false);
        assert!(cache.get(keyed).is_none());
    }

    #[test]
    fn purge_scratch_only_keeps_keyed() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let keyed = cache.register(texture(&gpu, 4), true);
        cache.resource_access(keyed).set_unique_key(key(5));
        cache.resource_access(keyed).unref();
        let scratch = cache.register(texture(&gpu, 4), true);
        cache.resource_access(scratch).unref();
        cache.purge_unlocked_resources(None, true);
        assert_eq!(cache.get_resource_count(), 1);
        assert!(cache.get(keyed).is_some());
    }

    #[test]
    fn purge_not_used_since() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let old = cache.register(texture(&gpu, 4), true);
        cache.resource_access(old).unref();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let cutoff = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let fresh = cache.register(texture(&gpu, 4), true);
        cache.resource_access(fresh).unref();
        cache.purge_resources_not_used_since(cutoff);
        assert!(cache.get(old).is_none());
        assert!(cache.get(fresh).is_some());
    }

    #[test]
    fn release_all_orphans_referenced_resources() {
        let (gpu, mut cache) = setup(100, 1 << 20);
        let held = cache.register(texture(&gpu, 4), true);
        let idle = cache.register(texture(&gpu, 4), true);
        cache.resource_access(idle).unref();
        cache.resource_access(held).add_pending_io(IoType::Read);
        cache.release_all();
        assert_eq!(cache.get_resource_count(), 0);
        assert_eq!(gpu.live_texture_count(), 0);
        assert_eq!(cache.orphan_count(), 1);
        assert!(cache.get(held).unwrap().was_destroyed());
        cache.resource_access(held).unref();
        assert_eq!(cache.orphan_count(), 1);
        cache.resource_access(held).complete_pending_io(IoType::Read);
        assert_eq!(cache.orphan_count(), 0);
    }
}
