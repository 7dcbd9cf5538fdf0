//! Scoped ownership of intermediate pixel buffers.
//!
//! Every raster a pipeline run allocates (decoded source, colour
//! conversions, warped output, convolution scratch) is wrapped in a
//! [`Tracked`] value that holds a [`Lease`] on a [`BufferLedger`]. The
//! lease is returned exactly once: when the tracked value is dropped on
//! any exit path (including `?` early returns), or when the buffer is
//! handed out with [`Tracked::into_inner`]. Because a lease borrows its
//! ledger, no tracked buffer can outlive the run that created it.
//!
//! The ledger's counters make leaks observable: after any number of
//! completed runs, [`BufferLedger::live`] is zero.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counts acquired and released buffers.
#[derive(Debug, Default)]
pub struct BufferLedger {
    live: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl BufferLedger {
    /// An empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers currently allocated and not yet released.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Total buffers ever acquired through this ledger.
    #[must_use]
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Acquire)
    }

    /// Total buffers ever released through this ledger.
    #[must_use]
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Register `value` as a live buffer named `label`.
    pub fn track<T>(&self, label: &'static str, value: T) -> Tracked<'_, T> {
        Tracked {
            value,
            lease: self.lease(label),
        }
    }

    fn lease(&self, label: &'static str) -> Lease<'_> {
        self.acquired.fetch_add(1, Ordering::AcqRel);
        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!(label, live, "buffer acquired");
        Lease {
            ledger: self,
            label,
        }
    }

    fn release(&self, label: &'static str) {
        self.released.fetch_add(1, Ordering::AcqRel);
        let live = self.live.fetch_sub(1, Ordering::AcqRel) - 1;
        tracing::trace!(label, live, "buffer released");
    }
}

/// A claim on one ledger slot, returned on drop.
#[derive(Debug)]
#[must_use = "dropping a lease releases it immediately"]
pub struct Lease<'l> {
    ledger: &'l BufferLedger,
    label: &'static str,
}

impl Lease<'_> {
    /// The buffer name this lease was taken for.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.ledger.release(self.label);
    }
}

/// A buffer registered with a ledger.
///
/// Dereferences to the wrapped value.
#[derive(Debug)]
pub struct Tracked<'l, T> {
    value: T,
    lease: Lease<'l>,
}

impl<'l, T> Tracked<'l, T> {
    /// Release the ledger slot and return the buffer to the caller, who
    /// now owns it outright.
    pub fn into_inner(self) -> T {
        let Self { value, lease } = self;
        drop(lease);
        value
    }

    /// Replace the buffer with one derived from it, keeping the lease.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tracked<'l, U> {
        let Self { value, lease } = self;
        Tracked {
            value: f(value),
            lease,
        }
    }

    /// The buffer name used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.lease.label()
    }
}

impl<T> Deref for Tracked<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
