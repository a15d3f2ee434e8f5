use core::cell::RefCell;
use core::future::poll_fn;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;

/// Tasks that can be parked in [`Shutdown::wait`] at once
const MAX_WAITERS: usize = 4;

/// Cooperative stop request shared by the worker loops.
///
/// Periodic loops poll [`is_requested`](Self::is_requested) once per tick.
/// Loops parked on a channel race [`wait`](Self::wait) against their receive.
pub struct Shutdown<M: RawMutex> {
    requested: AtomicBool,
    waiters: Mutex<M, RefCell<MultiWakerRegistration<MAX_WAITERS>>>,
}

impl<M: RawMutex> Shutdown<M> {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            waiters: Mutex::new(RefCell::new(MultiWakerRegistration::new())),
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        self.waiters.lock(|w| w.borrow_mut().wake());
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Resolves once a stop has been requested.
    pub async fn wait(&self) {
        poll_fn(|cx| {
            if self.is_requested() {
                return Poll::Ready(());
            }
            self.waiters.lock(|w| w.borrow_mut().register(cx.waker()));
            // a request may have landed between the check and the registration
            if self.is_requested() { Poll::Ready(()) } else { Poll::Pending }
        })
        .await
    }
}

impl<M: RawMutex> Default for Shutdown<M> {
    fn default() -> Self {
        Self::new()
    }
}
