// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Process-unique resource identifiers.

use std::fmt::Display;
use std::sync::atomic::{AtomicU32, Ordering};

/// Identifies one [`GpuResource`](super::GpuResource) for the life of the process.
///
/// Ids increase monotonically and are never reused.  [`ResourceId::INVALID`] is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u32);

static NEXT_ID: AtomicU32 = AtomicU32::new(1);

impl ResourceId {
    pub const INVALID: ResourceId = ResourceId(0);

    pub(crate) fn next() -> Self {
        loop {
            let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
            // skip the sentinel after wrapping
            if id != Self::INVALID.0 {
                return ResourceId(id);
            }
        }
    }

    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}
