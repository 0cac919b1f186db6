// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Cache keys.
//!
//! A [`ScratchKey`] describes the *shape* of a resource, so any resource with an equal key can
//! stand in for another.  A [`UniqueKey`] names one particular logical resource; at most one
//! resource holds a given unique key at a time.

use crate::gpu::{AccessPattern, BufferType, TextureDesc};
use std::sync::atomic::{AtomicU16, Ordering};

/// Kind of resource a [`ScratchKey`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceType(u16);

static NEXT_RESOURCE_TYPE: AtomicU16 = AtomicU16::new(3);

impl ResourceType {
    pub const TEXTURE: ResourceType = ResourceType(1);
    pub const BUFFER: ResourceType = ResourceType(2);

    /// A new resource type distinct from every other one in the process.
    pub fn generate() -> Self {
        ResourceType(NEXT_RESOURCE_TYPE.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScratchKey {
    resource_type: ResourceType,
    data: Vec<u32>,
}

impl ScratchKey {
    pub fn new(resource_type: ResourceType, data: impl Into<Vec<u32>>) -> Self {
        ScratchKey {
            resource_type,
            data: data.into(),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    pub fn data(&self) -> &[u32] {
        &self.data
    }

    pub(crate) fn for_texture(desc: &TextureDesc) -> Self {
        let flags = desc.renderable as u32 | (desc.mipmapped as u32) << 1 | (desc.protected as u32) << 2;
        ScratchKey::new(
            ResourceType::TEXTURE,
            [
                desc.dimensions.width as u32,
                desc.dimensions.height as u32,
                desc.format as u32,
                flags,
            ],
        )
    }

    pub(crate) fn for_buffer(size: usize, buffer_type: BufferType, access: AccessPattern) -> Self {
        let size = size as u64;
        ScratchKey::new(
            ResourceType::BUFFER,
            [
                size as u32,
                (size >> 32) as u32,
                buffer_type as u32,
                access as u32,
            ],
        )
    }
}

/// Namespace for [`UniqueKey`]s, so independent clients cannot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Domain(u16);

static NEXT_DOMAIN: AtomicU16 = AtomicU16::new(1);

impl Domain {
    pub fn generate() -> Self {
        Domain(NEXT_DOMAIN.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueKey {
    domain: Domain,
    data: Vec<u32>,
}

impl UniqueKey {
    pub fn new(domain: Domain, data: impl Into<Vec<u32>>) -> Self {
        UniqueKey {
            domain,
            data: data.into(),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn data(&self) -> &[u32] {
        &self.data
    }
}
