use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::{PageNumber, NO_PAGE, PAGE_SIZE};

/// Owned read latch on a page, released on drop.
pub type PageReadLatch = parking_lot::lock_api::ArcRwLockReadGuard<parking_lot::RawRwLock, ()>;

/// Owned write latch on a page, released on drop.
pub type PageWriteLatch = parking_lot::lock_api::ArcRwLockWriteGuard<parking_lot::RawRwLock, ()>;

/// Owned guard on a page's update mutex, released on drop.
pub type UpdateGuard = parking_lot::lock_api::ArcMutexGuard<parking_lot::RawMutex, ()>;

/// A page is a unit that is read from and written to disk.
///
/// Two separate primitives guard a page: a reader/writer latch used by
/// callers for logical concurrency over the page's contents, and a finer
/// update mutex that serializes byte-level edits so recovery can freeze
/// in-place writes while still allowing reads.
pub struct Page {
    /// Position of the page in the file, or [`NO_PAGE`] when free.
    pagenum: AtomicI64,
    /// The number of active references to this page.
    pin_count: AtomicI64,
    /// Whether the frame has data that must be written back.
    dirty: AtomicBool,
    /// Reader/writer latch on the page itself.
    latch: Arc<RwLock<()>>,
    /// Mutex for updating data in the page.
    update_lock: Arc<Mutex<()>>,
    /// The backing frame buffer.
    data: RwLock<Box<[u8]>>,
}

impl Page {
    pub(crate) fn new() -> Self {
        Self {
            pagenum: AtomicI64::new(NO_PAGE),
            pin_count: AtomicI64::new(0),
            dirty: AtomicBool::new(false),
            latch: Arc::new(RwLock::new(())),
            update_lock: Arc::new(Mutex::new(())),
            data: RwLock::new(vec![0u8; PAGE_SIZE].into_boxed_slice()),
        }
    }

    pub fn pagenum(&self) -> PageNumber {
        self.pagenum.load(Ordering::SeqCst)
    }

    pub(crate) fn set_pagenum(&self, pagenum: PageNumber) {
        self.pagenum.store(pagenum, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::SeqCst);
    }

    pub fn pin_count(&self) -> i64 {
        self.pin_count.load(Ordering::SeqCst)
    }

    pub(crate) fn pin(&self) -> i64 {
        self.pin_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn unpin(&self) -> i64 {
        self.pin_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn set_pin_count(&self, count: i64) {
        self.pin_count.store(count, Ordering::SeqCst);
    }

    /// Run `f` over the page's bytes under a short read lock.
    pub fn with_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.data.read())
    }

    /// Overwrite `size` bytes at `offset` with the given data.
    pub fn update(&self, data: &[u8], offset: usize, size: usize) {
        let _updating = self.update_lock.lock();
        self.dirty.store(true, Ordering::SeqCst);
        let mut frame = self.data.write();
        frame[offset..offset + size].copy_from_slice(&data[..size]);
    }

    /// Zero the whole frame. Used when a page is allocated past EOF.
    pub(crate) fn zero(&self) {
        let _updating = self.update_lock.lock();
        self.data.write().fill(0);
    }

    pub(crate) fn fill_from(&self, buf: &[u8]) {
        self.data.write().copy_from_slice(buf);
    }

    /// Grab a readers latch on the page.
    pub fn rlatch(&self) -> PageReadLatch {
        self.latch.read_arc()
    }

    /// Grab a writers latch on the page.
    pub fn wlatch(&self) -> PageWriteLatch {
        self.latch.write_arc()
    }

    /// Grab the update mutex, blocking in-place byte edits until the guard
    /// is dropped.
    pub(crate) fn lock_updates(&self) -> UpdateGuard {
        self.update_lock.lock_arc()
    }
}
