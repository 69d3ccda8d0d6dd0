//! Explicit observer lists for the renderer's frame notifications.
//!
//! External systems subscribe a callback and get back a handle they can use
//! to unsubscribe; callbacks are invoked synchronously in registration order.

use glam::Mat4;

use crate::camera::Frustum;
use crate::gpu::RenderDevice;
use crate::renderer::draw_queue::CollectScope;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ObserverHandle(u64);

pub struct ObserverSet<F: ?Sized> {
    entries: Vec<(u64, Box<F>)>,
    next_id: u64,
}

impl<F: ?Sized> Default for ObserverSet<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ?Sized> ObserverSet<F> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), next_id: 0 }
    }

    pub fn subscribe(&mut self, observer: Box<F>) -> ObserverHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, observer));
        ObserverHandle(id)
    }

    pub fn unsubscribe(&mut self, handle: ObserverHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(id, _)| *id != handle.0);
        self.entries.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = &F> {
        self.entries.iter().map(|(_, observer)| observer.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Camera data handed to draw-call collection observers.
#[derive(Clone, Copy, Debug)]
pub struct CollectContext {
    pub frustum: Frustum,
    pub view: Mat4,
    pub projection: Mat4,
}

/// Raised once per queued camera; listeners cull their own geometry and
/// submit draw calls through the scope.
pub type CollectFn = dyn Fn(&CollectContext, &CollectScope<'_>) + Send + Sync;

/// Raised once per engine tick after all cameras are processed.
pub type OverlayFn = dyn Fn(&mut dyn RenderDevice) + Send + Sync;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    type TestFn = dyn Fn() + Send + Sync;

    #[test]
    fn observers_run_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut set: ObserverSet<TestFn> = ObserverSet::new();
        for tag in 0..3 {
            let order = order.clone();
            set.subscribe(Box::new(move || order.lock().unwrap().push(tag)));
        }
        for observer in set.iter() {
            observer();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribe_removes_only_the_handle() {
        let hits = Arc::new(AtomicU32::new(0));
        let mut set: ObserverSet<TestFn> = ObserverSet::new();
        let hits_a = hits.clone();
        let first = set.subscribe(Box::new(move || {
            hits_a.fetch_add(1, Ordering::Relaxed);
        }));
        let hits_b = hits.clone();
        set.subscribe(Box::new(move || {
            hits_b.fetch_add(10, Ordering::Relaxed);
        }));
        assert!(set.unsubscribe(first));
        assert!(!set.unsubscribe(first));
        for observer in set.iter() {
            observer();
        }
        assert_eq!(hits.load(Ordering::Relaxed), 10);
        assert_eq!(set.len(), 1);
    }
}
