use std::{
    mem::take,
    rc::{Rc, Weak},
};

#[cfg(test)]
mod tests;

/// Handle to a registered listener. The listener is removed when this is dropped.
#[derive(Default)]
#[must_use]
pub struct Subscription(RawSubscription);

impl Subscription {
    pub fn empty() -> Self {
        Subscription(RawSubscription::Empty)
    }
    pub fn from_fn(f: impl FnOnce() + 'static) -> Self {
        Subscription(RawSubscription::Fn(Box::new(f)))
    }
    /// Calls `unsubscribe` on drop if `this` is still alive.
    pub(crate) fn from_weak_fn<T: 'static>(
        this: Weak<T>,
        unsubscribe: impl FnOnce(Rc<T>) + 'static,
    ) -> Self {
        Self::from_fn(move || {
            if let Some(this) = this.upgrade() {
                unsubscribe(this)
            }
        })
    }

    /// Removes the listener now.
    pub fn unsubscribe(self) {
        drop(self)
    }
}
impl Drop for Subscription {
    fn drop(&mut self) {
        match take(&mut self.0) {
            RawSubscription::Empty => {}
            RawSubscription::Fn(f) => f(),
        }
    }
}

#[derive(Default)]
enum RawSubscription {
    #[default]
    Empty,
    Fn(Box<dyn FnOnce() + 'static>),
}
