// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! A small pool of reusable CPU staging buffers.
//!
//! Only buffers of [`DEFAULT_BUFFER_SIZE`] are pooled.  A pooled buffer is handed out again
//! once nobody else holds it.  Zeroing is lazy: a buffer is cleared only when the caller needs
//! initialized memory and the buffer was handed out for writing since it was last cleared.

use std::cell::RefCell;
use std::rc::Rc;

/// Size of the pooled buffers, matching the default pool block size.
pub const DEFAULT_BUFFER_SIZE: usize = 1 << 15;

pub type CpuBuffer = Rc<RefCell<Box<[u8]>>>;

#[derive(Debug)]
struct Slot {
    buffer: CpuBuffer,
    clean: bool,
}

#[derive(Debug)]
pub struct CpuBufferCache {
    slots: RefCell<Vec<Slot>>,
    max_buffers: usize,
}

impl CpuBufferCache {
    pub fn new(max_buffers: usize) -> Rc<Self> {
        Rc::new(CpuBufferCache {
            slots: RefCell::new(Vec::with_capacity(max_buffers)),
            max_buffers,
        })
    }

    pub fn make_buffer(&self, size: usize, must_be_initialized: bool) -> CpuBuffer {
        if size == DEFAULT_BUFFER_SIZE {
            let mut slots = self.slots.borrow_mut();
            let reusable = slots
                .iter()
                .position(|slot| Rc::strong_count(&slot.buffer) == 1);
            let index = match reusable {
                Some(i) => Some(i),
                None if slots.len() < self.max_buffers => {
                    slots.push(Slot {
                        buffer: Rc::new(RefCell::new(vec![0; size].into_boxed_slice())),
                        clean: true,
                    });
                    Some(slots.len() - 1)
                }
                None => None,
            };
            if let Some(i) = index {
                let slot = &mut slots[i];
                if must_be_initialized && !slot.clean {
                    slot.buffer.borrow_mut().fill(0);
                }
                // the caller may write anything from here on
                slot.clean = false;
                return slot.buffer.clone();
            }
        }
        Rc::new(RefCell::new(vec![0; size].into_boxed_slice()))
    }

    pub fn release_all(&self) {
        self.slots.borrow_mut().clear();
    }

    pub fn pooled_count(&self) -> usize {
        self.slots.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_buffers_are_reused() {
        let cache = CpuBufferCache::new(2);
        let a = cache.make_buffer(DEFAULT_BUFFER_SIZE, false);
        let a_ptr = Rc::as_ptr(&a);
        drop(a);
        let b = cache.make_buffer(DEFAULT_BUFFER_SIZE, false);
        assert_eq!(Rc::as_ptr(&b), a_ptr);
        let c = cache.make_buffer(DEFAULT_BUFFER_SIZE, false);
        assert_ne!(Rc::as_ptr(&c), a_ptr);
        // full, so this one is not pooled
        let _d = cache.make_buffer(DEFAULT_BUFFER_SIZE, false);
        assert_eq!(cache.pooled_count(), 2);
        let odd = cache.make_buffer(100, true);
        assert_eq!(odd.borrow().len(), 100);
        assert_eq!(cache.pooled_count(), 2);
    }

    #[test]
    fn dirty_buffers_are_cleared_on_demand() {
        let cache = CpuBufferCache::new(1);
        let a = cache.make_buffer(DEFAULT_BUFFER_SIZE, false);
        a.borrow_mut()[10] = 7;
        drop(a);
        let b = cache.make_buffer(DEFAULT_BUFFER_SIZE, false);
        assert_eq!(b.borrow()[10], 7);
        drop(b);
        let c = cache.make_buffer(DEFAULT_BUFFER_SIZE, true);
        assert_eq!(c.borrow()[10], 0);
    }
}
