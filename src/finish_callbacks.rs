// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Fence-gated completion callbacks.
//!
//! Each callback is queued together with a fence inserted at the time it was added.
//! [`FinishCallbacks::check`] only ever looks at the front of the queue and stops at the first
//! fence that has not signaled, so a later fence signaling early never runs its callback ahead
//! of an earlier one.
//!
//! Callbacks are removed from the queue before they run, so a callback may add new callbacks.

use crate::gpu::{Fence, Gpu};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub type FinishedProc = Box<dyn FnOnce()>;

struct Entry {
    callback: FinishedProc,
    fence: Fence,
}

pub(crate) struct FinishCallbacks {
    gpu: Arc<dyn Gpu>,
    callbacks: RefCell<VecDeque<Entry>>,
}

impl Debug for FinishCallbacks {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinishCallbacks")
            .field("pending", &self.callbacks.borrow().len())
            .finish()
    }
}

impl FinishCallbacks {
    pub(crate) fn new(gpu: Arc<dyn Gpu>) -> Self {
        FinishCallbacks {
            gpu,
            callbacks: RefCell::new(VecDeque::new()),
        }
    }

    pub(crate) fn add(&self, callback: FinishedProc) {
        let fence = self.gpu.insert_fence();
        self.callbacks
            .borrow_mut()
            .push_back(Entry { callback, fence });
    }

    /// Runs every callback whose fence has signaled, in the order they were added.
    pub(crate) fn check(&self) {
        loop {
            let entry = {
                let mut callbacks = self.callbacks.borrow_mut();
                let ready = callbacks
                    .front()
                    .is_some_and(|front| self.gpu.wait_fence(front.fence));
                if ready { callbacks.pop_front() } else { None }
            };
            let Some(entry) = entry else {
                break;
            };
            self.gpu.delete_fence(entry.fence);
            (entry.callback)();
        }
    }

    /// Runs every outstanding callback regardless of its fence.  Fences are only deleted when
    /// `delete_fences` is set; an abandoned device must not be touched.
    pub(crate) fn call_all(&self, delete_fences: bool) {
        loop {
            let Some(entry) = self.callbacks.borrow_mut().pop_front() else {
                break;
            };
            if delete_fences {
                self.gpu.delete_fence(entry.fence);
            }
            (entry.callback)();
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.callbacks.borrow().is_empty()
    }
}

#[cfg(all(test, feature = "backend_soft"))]
mod tests {
    use super::*;
    use crate::imp::SoftGpu;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<char>>>, name: char) -> FinishedProc {
        let log = log.clone();
        Box::new(move || log.borrow_mut().push(name))
    }

    #[test]
    fn callbacks_fire_in_fence_order() {
        let gpu = Arc::new(SoftGpu::new());
        gpu.set_auto_complete(false);
        let callbacks = FinishCallbacks::new(gpu.clone());
        let log = Rc::new(RefCell::new(Vec::new()));
        callbacks.add(recorder(&log, 'a'));
        let after_a = gpu.insert_fence();
        callbacks.add(recorder(&log, 'b'));
        callbacks.add(recorder(&log, 'c'));

        callbacks.check();
        assert!(log.borrow().is_empty());

        gpu.signal_fence(after_a);
        callbacks.check();
        assert_eq!(*log.borrow(), vec!['a']);
        callbacks.check();
        assert_eq!(*log.borrow(), vec!['a']);

        gpu.complete_all();
        callbacks.check();
        assert_eq!(*log.borrow(), vec!['a', 'b', 'c']);
        assert!(callbacks.is_empty());
    }

    #[test]
    fn a_later_fence_signaling_first_waits_for_the_earlier_one() {
        let gpu = Arc::new(SoftGpu::new());
        gpu.set_auto_complete(false);
        let callbacks = FinishCallbacks::new(gpu.clone());
        let log = Rc::new(RefCell::new(Vec::new()));
        // a fresh device numbers its fences from 1
        callbacks.add(recorder(&log, '1'));
        callbacks.add(recorder(&log, '2'));

        gpu.signal_only(Fence::new(2));
        assert!(!gpu.wait_fence(Fence::new(1)));
        callbacks.check();
        assert!(log.borrow().is_empty());

        gpu.signal_only(Fence::new(1));
        callbacks.check();
        assert_eq!(*log.borrow(), vec!['1', '2']);
        assert!(callbacks.is_empty());
    }

    #[test]
    fn call_all_drains_unsignaled() {
        let gpu = Arc::new(SoftGpu::new());
        gpu.set_auto_complete(false);
        let callbacks = FinishCallbacks::new(gpu.clone());
        let log = Rc::new(RefCell::new(Vec::new()));
        callbacks.add(recorder(&log, 'x'));
        callbacks.add(recorder(&log, 'y'));
        callbacks.call_all(false);
        assert_eq!(*log.borrow(), vec!['x', 'y']);
    }

    #[test]
    fn callbacks_may_add_callbacks() {
        let gpu = Arc::new(SoftGpu::new());
        let callbacks = Rc::new(FinishCallbacks::new(gpu.clone()));
        let log = Rc::new(RefCell::new(Vec::new()));
        let inner = callbacks.clone();
        let inner_log = log.clone();
        callbacks.add(Box::new(move || {
            inner_log.borrow_mut().push('o');
            inner.add(recorder(&inner_log, 'i'));
        }));
        gpu.submit(false);
        callbacks.check();
        assert_eq!(*log.borrow(), vec!['o']);
        gpu.submit(false);
        callbacks.check();
        assert_eq!(*log.borrow(), vec!['o', 'i']);
    }
}
