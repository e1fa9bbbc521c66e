use core::{
    cell::UnsafeCell,
    fmt,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Set while a writer holds the lock.
const WRITER: usize = 1;

/// Set while a writer waits; new readers back off.
const WRITER_WAITING: usize = 1 << 1;

/// One reader; the reader count lives above the two flag bits.
const READER: usize = 1 << 2;

/// A writer-preferring reader/writer spin lock.
///
/// Any number of readers may hold the lock at once; a writer excludes
/// everybody. Once a writer starts waiting, newly arriving readers spin
/// until the writer had its turn.
pub struct RwSpinLock<T> {
    state: AtomicUsize,
    inner: UnsafeCell<T>,
}

// Safety: readers hand out `&T` concurrently (needs `T: Sync`), writers move
// `&mut T` across threads (needs `T: Send`).
unsafe impl<T: Send + Sync> Sync for RwSpinLock<T> {}
unsafe impl<T: Send> Send for RwSpinLock<T> {}

impl<T> RwSpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            state: AtomicUsize::new(0),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Take a shared lock if no writer holds or awaits the lock.
    #[inline]
    pub fn try_read(&self) -> Option<RwReadGuard<'_, T>> {
        let state = self.state.load(Ordering::Relaxed);
        if state & (WRITER | WRITER_WAITING) != 0 {
            return None;
        }
        self.state
            .compare_exchange(state, state + READER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RwReadGuard { lock: self })
    }

    /// Spin until a shared lock is acquired.
    #[inline]
    pub fn read(&self) -> RwReadGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            spin_loop();
        }
    }

    /// Take the exclusive lock if nobody holds the lock at all.
    #[inline]
    pub fn try_write(&self) -> Option<RwWriteGuard<'_, T>> {
        let state = self.state.load(Ordering::Relaxed);
        if state & WRITER != 0 || state >= READER {
            return None;
        }
        // Clears WRITER_WAITING as well; other waiting writers re-announce themselves.
        self.state
            .compare_exchange(state, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RwWriteGuard { lock: self })
    }

    /// Spin until the exclusive lock is acquired.
    #[inline]
    pub fn write(&self) -> RwWriteGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_write() {
                return guard;
            }
            if self.state.load(Ordering::Relaxed) & WRITER_WAITING == 0 {
                self.state.fetch_or(WRITER_WAITING, Ordering::Relaxed);
            }
            spin_loop();
        }
    }

    /// Closure convenience for a shared section.
    #[inline]
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let g = self.read();
        f(&g)
    }

    /// Closure convenience for an exclusive section.
    #[inline]
    pub fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.write();
        f(&mut g)
    }

    /// Number of readers currently inside the lock.
    #[inline]
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.state.load(Ordering::Relaxed) / READER
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: Default> Default for RwSpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for RwSpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        f.debug_struct("RwSpinLock")
            .field("writer", &(state & WRITER != 0))
            .field("writer_waiting", &(state & WRITER_WAITING != 0))
            .field("readers", &(state / READER))
            .finish_non_exhaustive()
    }
}

pub struct RwReadGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> Drop for RwReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(READER, Ordering::Release);
    }
}

pub struct RwWriteGuard<'a, T> {
    lock: &'a RwSpinLock<T>,
}

impl<T> Deref for RwWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for RwWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T> Drop for RwWriteGuard<'_, T> {
    fn drop(&mut self) {
        // Keep a WRITER_WAITING bit set by someone else.
        self.lock.state.fetch_and(!WRITER, Ordering::Release);
    }
}
