// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Deferred resource messages.
//!
//! Objects that outlive the borrow of their context (proxies, async read results, buffer pools,
//! finished procs) cannot touch the cache directly when they are dropped.  Instead they post a
//! [`ResourceMessage`] through a [`MessageSender`].  The context drains the queue whenever it
//! next does work: on flush, on polling for async completion and on teardown.

use crate::gpu::BufferHandle;
use crate::resource::{IoType, ResourceId};
use crate::resource_provider::ResourceProvider;
use std::sync::mpsc::{Receiver, Sender, channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResourceMessage {
    Unref(ResourceId),
    CompleteIo(ResourceId, IoType),
    /// A mapped transfer buffer is no longer needed by the client.
    UnmapAndUnref {
        resource: ResourceId,
        buffer: BufferHandle,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct MessageSender(Sender<ResourceMessage>);

impl MessageSender {
    pub(crate) fn send(&self, message: ResourceMessage) {
        if self.0.send(message).is_err() {
            // the context is gone and took every resource with it
            logwise::trace_sync!(
                "dropping {message} for a destroyed context",
                message = logwise::privacy::LogIt(&message)
            );
        }
    }
}

/// A strong reference that is given back through the message queue when dropped.  Once
/// marked mapped, dropping it also unmaps the buffer.
#[derive(Debug)]
pub(crate) struct ResourceRef {
    id: ResourceId,
    messages: MessageSender,
    mapped: Option<BufferHandle>,
}

impl ResourceRef {
    /// Takes over a reference the caller already holds.
    pub(crate) fn adopt(id: ResourceId, messages: MessageSender) -> Self {
        ResourceRef {
            id,
            messages,
            mapped: None,
        }
    }

    pub(crate) fn id(&self) -> ResourceId {
        self.id
    }

    pub(crate) fn set_mapped(&mut self, buffer: BufferHandle) {
        self.mapped = Some(buffer);
    }
}

impl Drop for ResourceRef {
    fn drop(&mut self) {
        let message = match self.mapped {
            Some(buffer) => ResourceMessage::UnmapAndUnref {
                resource: self.id,
                buffer,
            },
            None => ResourceMessage::Unref(self.id),
        };
        self.messages.send(message);
    }
}

#[derive(Debug)]
pub(crate) struct MappedBufferManager {
    sender: Sender<ResourceMessage>,
    receiver: Receiver<ResourceMessage>,
}

impl MappedBufferManager {
    pub(crate) fn new() -> Self {
        let (sender, receiver) = channel();
        MappedBufferManager { sender, receiver }
    }

    pub(crate) fn sender(&self) -> MessageSender {
        MessageSender(self.sender.clone())
    }

    /// Applies every queued message.  After abandonment mapped buffers are not unmapped, but
    /// their references are still dropped.
    pub(crate) fn process(&self, provider: &mut ResourceProvider, abandoned: bool) -> usize {
        let mut count = 0;
        while let Ok(message) = self.receiver.try_recv() {
            count += 1;
            match message {
                ResourceMessage::Unref(id) => provider.unref(id),
                ResourceMessage::CompleteIo(id, io) => provider.complete_pending_io(id, io),
                ResourceMessage::UnmapAndUnref { resource, buffer } => {
                    if !abandoned {
                        provider.gpu().unmap_buffer(buffer, None);
                    }
                    provider.unref(resource);
                }
            }
        }
        if count > 0 {
            logwise::trace_sync!("processed {count} deferred resource messages", count = count);
        }
        count
    }
}

#[cfg(all(test, feature = "backend_soft"))]
mod tests {
    use super::*;
    use crate::caps::Caps;
    use crate::gpu::{AccessPattern, BufferType, Gpu};
    use crate::imp::SoftGpu;
    use std::sync::Arc;

    #[test]
    fn unmap_messages_release_buffers() {
        let gpu = Arc::new(SoftGpu::new());
        let mut provider =
            ResourceProvider::new(gpu.clone(), Arc::new(Caps::soft()), 100, 1 << 20);
        let id = provider
            .create_buffer(64, BufferType::XferGpuToCpu, AccessPattern::Stream, false)
            .unwrap();
        let handle = provider.buffer_handle(id).unwrap();
        assert!(gpu.map_buffer(handle).is_some());

        let manager = MappedBufferManager::new();
        manager.sender().send(ResourceMessage::UnmapAndUnref {
            resource: id,
            buffer: handle,
        });
        assert_eq!(manager.process(&mut provider, false), 1);
        assert!(provider.cache().get(id).is_none());
        assert_eq!(gpu.live_buffer_count(), 0);
        assert_eq!(manager.process(&mut provider, false), 0);
    }

    #[test]
    fn dropped_refs_unref_later() {
        let gpu = Arc::new(SoftGpu::new());
        let mut provider =
            ResourceProvider::new(gpu.clone(), Arc::new(Caps::soft()), 100, 1 << 20);
        let id = provider
            .create_buffer(64, BufferType::XferGpuToCpu, AccessPattern::Stream, false)
            .unwrap();
        let manager = MappedBufferManager::new();
        let held = ResourceRef::adopt(id, manager.sender());
        assert_eq!(held.id(), id);
        drop(held);
        // still alive until the queue is drained
        assert!(provider.cache().get(id).is_some());
        manager.process(&mut provider, false);
        assert!(provider.cache().get(id).is_none());
    }
}
