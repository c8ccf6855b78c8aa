//! Resize and pixel-ratio observation
//!
//! One pixel-ratio hub and one container-size hub exist per UI thread. Each
//! keeps a subscriber list per key and drives a single underlying
//! [`Watcher`]: the first subscriber for a key starts watching it, the last
//! unsubscribe stops. Notifications fan out synchronously to every
//! subscriber of the key, in subscription order.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::{Rc, Weak};

/// Underlying observation primitive (display configuration listener,
/// resize observer, ...)
pub trait Watcher<K> {
    fn watch(&mut self, key: K);
    fn unwatch(&mut self, key: K);
}

/// Watcher that only logs; the host emits events itself
#[derive(Debug, Default)]
pub struct LogWatcher {
    name: &'static str,
}

impl LogWatcher {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl<K: std::fmt::Debug> Watcher<K> for LogWatcher {
    fn watch(&mut self, key: K) {
        log::debug!("{}: watching {:?}", self.name, key);
    }

    fn unwatch(&mut self, key: K) {
        log::debug!("{}: stopped watching {:?}", self.name, key);
    }
}

type Callback<T> = Rc<dyn Fn(&T)>;

struct HubInner<K, T> {
    subscribers: RefCell<HashMap<K, Vec<(u64, Callback<T>)>>>,
    next_id: Cell<u64>,
    watcher: RefCell<Box<dyn Watcher<K>>>,
}

/// Reference-counted fan-out of one kind of notification
pub struct Hub<K, T> {
    inner: Rc<HubInner<K, T>>,
}

impl<K, T> Clone for Hub<K, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K, T> Hub<K, T>
where
    K: Copy + Eq + Hash + 'static,
    T: 'static,
{
    pub fn new(watcher: Box<dyn Watcher<K>>) -> Self {
        Self {
            inner: Rc::new(HubInner {
                subscribers: RefCell::new(HashMap::new()),
                next_id: Cell::new(0),
                watcher: RefCell::new(watcher),
            }),
        }
    }

    /// Replace the underlying watcher, moving every active key over to it
    pub fn set_watcher(&self, mut watcher: Box<dyn Watcher<K>>) {
        let active: Vec<K> = self.inner.subscribers.borrow().keys().copied().collect();
        for key in &active {
            watcher.watch(*key);
        }
        let mut old = self.inner.watcher.replace(watcher);
        for key in active {
            old.unwatch(key);
        }
    }

    /// Register `callback` for notifications about `key`
    pub fn subscribe(&self, key: K, callback: impl Fn(&T) + 'static) -> Subscription {
        let id = self.inner.next_id.get() + 1;
        self.inner.next_id.set(id);
        let callback: Callback<T> = Rc::new(callback);

        let first = {
            let mut subscribers = self.inner.subscribers.borrow_mut();
            let list = subscribers.entry(key).or_default();
            list.push((id, callback));
            list.len() == 1
        };
        if first {
            self.inner.watcher.borrow_mut().watch(key);
        }

        let weak: Weak<HubInner<K, T>> = Rc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    remove(&inner, key, id);
                }
            })),
        }
    }

    /// Deliver `value` to every subscriber of `key`
    pub fn emit(&self, key: K, value: &T) {
        // Snapshot so callbacks may subscribe or unsubscribe while running
        let callbacks: Vec<Callback<T>> = self
            .inner
            .subscribers
            .borrow()
            .get(&key)
            .map(|list| list.iter().map(|(_, cb)| Rc::clone(cb)).collect())
            .unwrap_or_default();

        for callback in callbacks {
            callback(value);
        }
    }

    pub fn subscriber_count(&self, key: K) -> usize {
        self.inner
            .subscribers
            .borrow()
            .get(&key)
            .map_or(0, Vec::len)
    }

    /// Whether the underlying watcher is observing `key`
    pub fn is_watching(&self, key: K) -> bool {
        self.subscriber_count(key) > 0
    }
}

fn remove<K, T>(inner: &HubInner<K, T>, key: K, id: u64)
where
    K: Copy + Eq + Hash,
{
    let last = {
        let mut subscribers = inner.subscribers.borrow_mut();
        let Some(list) = subscribers.get_mut(&key) else {
            return;
        };
        list.retain(|(sub_id, _)| *sub_id != id);
        if list.is_empty() {
            subscribers.remove(&key);
            true
        } else {
            false
        }
    };
    if last {
        inner.watcher.borrow_mut().unwatch(key);
    }
}

/// Live subscription; dropping it unsubscribes
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Identifies a container whose size is observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(pub u64);

/// Logical size reported for a container
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerSize {
    pub width: f64,
    pub height: f64,
}

pub type PixelRatioHub = Hub<(), f64>;
pub type ContainerHub = Hub<ContainerId, ContainerSize>;

thread_local! {
    static PIXEL_RATIO: PixelRatioHub = Hub::new(Box::new(LogWatcher::new("pixel ratio")));
    static CONTAINERS: ContainerHub = Hub::new(Box::new(LogWatcher::new("container size")));
}

/// The thread's shared pixel-ratio hub
pub fn pixel_ratio_hub() -> PixelRatioHub {
    PIXEL_RATIO.with(Hub::clone)
}

/// The thread's shared container-size hub
pub fn container_hub() -> ContainerHub {
    CONTAINERS.with(Hub::clone)
}
