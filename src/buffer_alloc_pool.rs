// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Sub-allocation of vertex and index data from large device buffers.

A [`BufferAllocPool`] owns a stack of blocks.  Only the newest block is writable.  Depending
on its size and the backend, it is written either through a host mapping of the device buffer or
through a CPU staging buffer that is uploaded when the block is retired or [`unmap`]ped.

```text
blocks:  [ retired ] [ retired ] [ current: used | free ]
                                         ^
                                         write pointer (mapped view or staging)
```

Blocks are dynamic buffers from the resource cache, so they are recycled across pools once
the pool lets go of them.

[`unmap`]: BufferAllocPool::unmap
*/

use crate::caps::{Caps, MapFlags};
use crate::cpu_buffer_cache::{CpuBuffer, CpuBufferCache, DEFAULT_BUFFER_SIZE};
use crate::gpu::{AccessPattern, BufferHandle, BufferType, Gpu};
use crate::mapped_buffer_manager::{MessageSender, ResourceMessage};
use crate::resource::ResourceId;
use crate::resource_provider::ResourceProvider;
use std::cell::{RefCell, RefMut};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::sync::Arc;

/// Default and minimum block size.
pub const DEFAULT_BLOCK_SIZE: usize = DEFAULT_BUFFER_SIZE;

#[derive(Debug)]
struct BufferBlock {
    resource: ResourceId,
    buffer: BufferHandle,
    size: usize,
    bytes_free: usize,
}

impl BufferBlock {
    fn used(&self) -> usize {
        self.size - self.bytes_free
    }
}

/// Where writes to the current block go.
#[derive(Debug)]
enum BufferPtr {
    Mapped(Box<[u8]>),
    Staged,
}

enum SpaceBytes<'a> {
    Mapped(&'a mut [u8]),
    Staged(RefMut<'a, [u8]>),
}

/// Writable space handed out by a pool.  Bind `buffer` at `offset` to draw from it.
pub struct Space<'a> {
    pub buffer: BufferHandle,
    pub resource: ResourceId,
    pub offset: usize,
    bytes: SpaceBytes<'a>,
}

impl Deref for Space<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match &self.bytes {
            SpaceBytes::Mapped(b) => b,
            SpaceBytes::Staged(b) => b,
        }
    }
}

impl DerefMut for Space<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.bytes {
            SpaceBytes::Mapped(b) => b,
            SpaceBytes::Staged(b) => b,
        }
    }
}

impl std::fmt::Debug for Space<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Space")
            .field("buffer", &self.buffer)
            .field("offset", &self.offset)
            .field("len", &self.len())
            .finish()
    }
}

fn align_up_pad(x: usize, alignment: usize) -> usize {
    match x % alignment {
        0 => 0,
        rem => alignment - rem,
    }
}

fn align_down(x: usize, alignment: usize) -> usize {
    x - x % alignment
}

pub struct BufferAllocPool {
    provider: Rc<RefCell<ResourceProvider>>,
    gpu: Arc<dyn Gpu>,
    caps: Arc<Caps>,
    messages: MessageSender,
    cpu_buffer_cache: Option<Rc<CpuBufferCache>>,
    buffer_type: BufferType,
    min_block_size: usize,
    blocks: Vec<BufferBlock>,
    buffer_ptr: Option<BufferPtr>,
    cpu_staging: Option<CpuBuffer>,
    bytes_in_use: usize,
}

impl std::fmt::Debug for BufferAllocPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferAllocPool")
            .field("buffer_type", &self.buffer_type)
            .field("blocks", &self.blocks)
            .field("bytes_in_use", &self.bytes_in_use)
            .finish()
    }
}

impl BufferAllocPool {
    pub(crate) fn new(
        provider: Rc<RefCell<ResourceProvider>>,
        messages: MessageSender,
        buffer_type: BufferType,
        cpu_buffer_cache: Option<Rc<CpuBufferCache>>,
        block_size: usize,
    ) -> Self {
        let (gpu, caps) = {
            let p = provider.borrow();
            (p.gpu().clone(), p.caps().clone())
        };
        BufferAllocPool {
            provider,
            gpu,
            caps,
            messages,
            cpu_buffer_cache,
            buffer_type,
            min_block_size: block_size.max(DEFAULT_BLOCK_SIZE),
            blocks: Vec::new(),
            buffer_ptr: None,
            cpu_staging: None,
            bytes_in_use: 0,
        }
    }

    pub fn buffer_type(&self) -> BufferType {
        self.buffer_type
    }

    pub fn bytes_in_use(&self) -> usize {
        self.bytes_in_use
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Free bytes in the newest block, if there is one.
    pub fn current_block_bytes_free(&self) -> Option<usize> {
        self.blocks.last().map(|b| b.bytes_free)
    }

    fn can_map(&self, size: usize) -> bool {
        self.caps.map_buffer_flags.contains(MapFlags::CAN_MAP) && size > self.caps.buffer_map_threshold
    }

    fn write_zeros(&mut self, start: usize, len: usize) {
        if len == 0 {
            return;
        }
        match &mut self.buffer_ptr {
            Some(BufferPtr::Mapped(view)) => view[start..start + len].fill(0),
            Some(BufferPtr::Staged) => {
                if let Some(staging) = &self.cpu_staging {
                    staging.borrow_mut()[start..start + len].fill(0);
                }
            }
            None => {}
        }
    }

    fn space(&mut self, offset: usize, len: usize) -> Option<Space<'_>> {
        let block = self.blocks.last()?;
        let (buffer, resource) = (block.buffer, block.resource);
        let bytes = match self.buffer_ptr.as_mut()? {
            BufferPtr::Mapped(view) => SpaceBytes::Mapped(&mut view[offset..offset + len]),
            BufferPtr::Staged => {
                let staging = self.cpu_staging.as_ref()?;
                SpaceBytes::Staged(RefMut::map(staging.borrow_mut(), |b| {
                    &mut b[offset..offset + len]
                }))
            }
        };
        Some(Space {
            buffer,
            resource,
            offset,
            bytes,
        })
    }

    /// Claims `size` bytes aligned to `alignment`, starting a new block when the current one
    /// is full.  Alignment padding is zeroed.
    pub fn make_space(&mut self, size: usize, alignment: usize) -> Option<Space<'_>> {
        debug_assert!(alignment > 0);
        if self.buffer_ptr.is_some() {
            if let Some(back) = self.blocks.last() {
                let used = back.used();
                let pad = align_up_pad(used, alignment);
                let aligned_size = pad.checked_add(size)?;
                if aligned_size <= back.bytes_free {
                    self.write_zeros(used, pad);
                    if let Some(back) = self.blocks.last_mut() {
                        back.bytes_free -= aligned_size;
                    }
                    self.bytes_in_use += aligned_size;
                    return self.space(used + pad, size);
                }
            }
        }
        if !self.create_block(size) {
            return None;
        }
        if let Some(back) = self.blocks.last_mut() {
            back.bytes_free -= size;
        }
        self.bytes_in_use += size;
        self.space(0, size)
    }

    /// Claims at least `min_size` bytes from the current block, or up to `fallback_size` if the
    /// block has room.  When even `min_size` does not fit, a new block of `fallback_size` is
    /// started.  The granted length is the length of the returned space.
    pub fn make_space_at_least(
        &mut self,
        min_size: usize,
        fallback_size: usize,
        alignment: usize,
    ) -> Option<Space<'_>> {
        debug_assert!(alignment > 0 && fallback_size >= min_size);
        if self.buffer_ptr.is_some() {
            if let Some(back) = self.blocks.last() {
                let used = back.used();
                let pad = align_up_pad(used, alignment);
                if min_size.checked_add(pad)? <= back.bytes_free {
                    // consume padding first so the rest stays aligned
                    self.write_zeros(used, pad);
                    let offset = used + pad;
                    let mut granted = 0;
                    if let Some(back) = self.blocks.last_mut() {
                        back.bytes_free -= pad;
                        granted = if back.bytes_free >= fallback_size {
                            fallback_size
                        } else {
                            align_down(back.bytes_free, alignment)
                        };
                        back.bytes_free -= granted;
                    }
                    self.bytes_in_use += pad + granted;
                    return self.space(offset, granted);
                }
            }
        }
        if !self.create_block(fallback_size) {
            return None;
        }
        if let Some(back) = self.blocks.last_mut() {
            back.bytes_free -= fallback_size;
        }
        self.bytes_in_use += fallback_size;
        self.space(0, fallback_size)
    }

    /// Returns the last `bytes` claimed.  Blocks emptied this way are retired.
    pub fn put_back(&mut self, mut bytes: usize) {
        while bytes > 0 {
            let Some(block) = self.blocks.last_mut() else {
                debug_assert!(false, "put back more than was claimed");
                return;
            };
            let used = block.used();
            if bytes >= used {
                bytes -= used;
                self.bytes_in_use -= used;
                if let Some(BufferPtr::Mapped(_)) = self.buffer_ptr {
                    self.gpu.unmap_buffer(block.buffer, None);
                }
                self.destroy_block();
            } else {
                block.bytes_free += bytes;
                self.bytes_in_use -= bytes;
                break;
            }
        }
    }

    fn destroy_block(&mut self) {
        if let Some(block) = self.blocks.pop() {
            self.messages.send(ResourceMessage::Unref(block.resource));
        }
        self.buffer_ptr = None;
    }

    fn create_block(&mut self, request_size: usize) -> bool {
        let size = request_size.max(self.min_block_size);
        let created = self.provider.borrow_mut().create_buffer(
            size,
            self.buffer_type,
            AccessPattern::Dynamic,
            false,
        );
        let Some(resource) = created else {
            logwise::warn_sync!("pool block of {size} bytes could not be allocated", size = size);
            return false;
        };
        let (buffer, size) = {
            let provider = self.provider.borrow();
            match (
                provider.buffer_handle(resource),
                provider.cache().get(resource),
            ) {
                (Some(h), Some(r)) => (h, r.gpu_memory_size()),
                _ => return false,
            }
        };

        // retire the previous block's write pointer
        if let Some(ptr) = self.buffer_ptr.take() {
            if let Some(prev) = self.blocks.last() {
                match ptr {
                    BufferPtr::Mapped(view) => self.gpu.unmap_buffer(prev.buffer, Some(&view)),
                    BufferPtr::Staged => self.flush_cpu_data(prev.buffer, prev.used()),
                }
            }
        }

        self.blocks.push(BufferBlock {
            resource,
            buffer,
            size,
            bytes_free: size,
        });

        if self.can_map(size) {
            if let Some(view) = self.gpu.map_buffer(buffer) {
                logwise::trace_sync!(
                    "mapped pool block {resource} ({size} bytes)",
                    resource = logwise::privacy::LogIt(resource),
                    size = size
                );
                self.buffer_ptr = Some(BufferPtr::Mapped(view));
                return true;
            }
        }
        self.reset_cpu_data(size);
        logwise::trace_sync!(
            "staging pool block {resource} ({size} bytes)",
            resource = logwise::privacy::LogIt(resource),
            size = size
        );
        self.buffer_ptr = Some(BufferPtr::Staged);
        true
    }

    fn reset_cpu_data(&mut self, new_size: usize) {
        if new_size == 0 {
            self.cpu_staging = None;
            return;
        }
        if self
            .cpu_staging
            .as_ref()
            .is_some_and(|s| s.borrow().len() >= new_size)
        {
            return;
        }
        let must_initialize = self.caps.must_clear_uploaded_buffer_data;
        self.cpu_staging = Some(match &self.cpu_buffer_cache {
            Some(cache) => cache.make_buffer(new_size, must_initialize),
            None => Rc::new(RefCell::new(vec![0; new_size].into_boxed_slice())),
        });
    }

    /// Uploads the first `flush_size` staged bytes into `buffer`.
    fn flush_cpu_data(&self, buffer: BufferHandle, flush_size: usize) {
        let Some(staging) = &self.cpu_staging else {
            return;
        };
        let staging = staging.borrow();
        let data = &staging[..flush_size];
        if self.can_map(flush_size) {
            if let Some(mut view) = self.gpu.map_buffer(buffer) {
                view[..flush_size].copy_from_slice(data);
                self.gpu.unmap_buffer(buffer, Some(&view));
                return;
            }
        }
        if !self.gpu.update_buffer(buffer, 0, data) {
            logwise::warn_sync!(
                "uploading {flush_size} staged bytes to {buffer} failed",
                flush_size = flush_size,
                buffer = logwise::privacy::LogIt(buffer)
            );
        }
    }

    /// Makes everything written so far visible to the device.
    pub fn unmap(&mut self) {
        let Some(ptr) = self.buffer_ptr.take() else {
            return;
        };
        if let Some(block) = self.blocks.last() {
            match ptr {
                BufferPtr::Mapped(view) => self.gpu.unmap_buffer(block.buffer, Some(&view)),
                BufferPtr::Staged => self.flush_cpu_data(block.buffer, block.used()),
            }
        }
    }

    fn delete_blocks(&mut self) {
        if let (Some(BufferPtr::Mapped(_)), Some(back)) = (&self.buffer_ptr, self.blocks.last()) {
            self.gpu.unmap_buffer(back.buffer, None);
        }
        while !self.blocks.is_empty() {
            self.destroy_block();
        }
    }

    /// Drops every block and the staging buffer.
    pub fn reset(&mut self) {
        self.bytes_in_use = 0;
        self.delete_blocks();
        self.reset_cpu_data(0);
    }
}

impl Drop for BufferAllocPool {
    fn drop(&mut self) {
        self.delete_blocks();
    }
}

/// Vertex data, addressed by vertex index.
#[derive(Debug)]
pub struct VertexBufferAllocPool(BufferAllocPool);

impl VertexBufferAllocPool {
    pub(crate) fn new(pool: BufferAllocPool) -> Self {
        VertexBufferAllocPool(pool)
    }

    /// Space for `vertex_count` vertices, and the index of the first one in the buffer.
    pub fn make_space(&mut self, vertex_size: usize, vertex_count: usize) -> Option<(Space<'_>, usize)> {
        let size = vertex_size.checked_mul(vertex_count)?;
        let space = self.0.make_space(size, vertex_size)?;
        let first = space.offset / vertex_size;
        Some((space, first))
    }

    /// Space for at least `min_vertex_count` vertices; the vertex count granted is
    /// `space.len() / vertex_size`.
    pub fn make_space_at_least(
        &mut self,
        vertex_size: usize,
        min_vertex_count: usize,
        fallback_vertex_count: usize,
    ) -> Option<(Space<'_>, usize)> {
        let space = self.0.make_space_at_least(
            vertex_size.checked_mul(min_vertex_count)?,
            vertex_size.checked_mul(fallback_vertex_count)?,
            vertex_size,
        )?;
        let first = space.offset / vertex_size;
        Some((space, first))
    }
}

impl Deref for VertexBufferAllocPool {
    type Target = BufferAllocPool;
    fn deref(&self) -> &BufferAllocPool {
        &self.0
    }
}

impl DerefMut for VertexBufferAllocPool {
    fn deref_mut(&mut self) -> &mut BufferAllocPool {
        &mut self.0
    }
}

/// 16-bit index data, addressed by index position.
#[derive(Debug)]
pub struct IndexBufferAllocPool(BufferAllocPool);

const INDEX_SIZE: usize = std::mem::size_of::<u16>();

impl IndexBufferAllocPool {
    pub(crate) fn new(pool: BufferAllocPool) -> Self {
        IndexBufferAllocPool(pool)
    }

    pub fn make_space(&mut self, index_count: usize) -> Option<(Space<'_>, usize)> {
        let space = self
            .0
            .make_space(index_count.checked_mul(INDEX_SIZE)?, INDEX_SIZE)?;
        let first = space.offset / INDEX_SIZE;
        Some((space, first))
    }

    pub fn make_space_at_least(
        &mut self,
        min_index_count: usize,
        fallback_index_count: usize,
    ) -> Option<(Space<'_>, usize)> {
        let space = self.0.make_space_at_least(
            min_index_count.checked_mul(INDEX_SIZE)?,
            fallback_index_count.checked_mul(INDEX_SIZE)?,
            INDEX_SIZE,
        )?;
        let first = space.offset / INDEX_SIZE;
        Some((space, first))
    }
}

impl Deref for IndexBufferAllocPool {
    type Target = BufferAllocPool;
    fn deref(&self) -> &BufferAllocPool {
        &self.0
    }
}

impl DerefMut for IndexBufferAllocPool {
    fn deref_mut(&mut self) -> &mut BufferAllocPool {
        &mut self.0
    }
}
