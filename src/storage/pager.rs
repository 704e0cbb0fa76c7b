use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::{File, OpenOptions};
use std::io;
use std::ops::Deref;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use thiserror::Error;

use crate::common::{PageNumber, NO_PAGE, NUM_PAGES, PAGE_SIZE};
use crate::storage::page::{Page, UpdateGuard};

/// Error type for pager operations.
#[derive(Error, Debug)]
pub enum PagerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt database file: {0}")]
    Corrupt(String),

    #[error("no available pages")]
    NoAvailablePages,

    #[error("invalid page number: {0}")]
    InvalidPageNumber(PageNumber),
}

/// Result type for pager operations.
pub type Result<T> = std::result::Result<T, PagerError>;

/// Bookkeeping for the frame lists and the page table, all guarded by one
/// mutex. Each frame index lives on exactly one of the three lists.
struct PagerInner {
    /// Number of pages used by this database.
    n_pages: i64,
    /// Frames holding no page.
    free: VecDeque<usize>,
    /// Resident frames with pin count zero, head oldest.
    unpinned: VecDeque<usize>,
    /// Resident frames with a positive pin count.
    pinned: HashSet<usize>,
    /// Maps resident page numbers to frame indices.
    page_table: HashMap<PageNumber, usize>,
}

/// Pagers manage pages of data read from a file.
///
/// Pages are owned by the pager; callers borrow them through [`PageGuard`]
/// pin handles and never hold one past the pager's lifetime.
pub struct Pager {
    file: File,
    path: PathBuf,
    frames: Vec<Arc<Page>>,
    inner: Mutex<PagerInner>,
}

impl Pager {
    /// Open or create the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if len % PAGE_SIZE as u64 != 0 {
            return Err(PagerError::Corrupt(format!(
                "file size {} is not a multiple of the page size",
                len
            )));
        }
        let frames: Vec<Arc<Page>> = (0..NUM_PAGES).map(|_| Arc::new(Page::new())).collect();
        let inner = PagerInner {
            n_pages: (len / PAGE_SIZE as u64) as i64,
            free: (0..NUM_PAGES).collect(),
            unpinned: VecDeque::new(),
            pinned: HashSet::new(),
            page_table: HashMap::new(),
        };
        Ok(Self {
            file,
            path: path.to_path_buf(),
            frames,
            inner: Mutex::new(inner),
        })
    }

    /// Base name of the backing file.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// The number of pages used by this database.
    pub fn num_pages(&self) -> i64 {
        self.inner.lock().n_pages
    }

    /// The next available page number, one past the end of the file.
    pub fn get_free_pn(&self) -> PageNumber {
        self.inner.lock().n_pages
    }

    /// Return a pinned handle to the page with the given page number,
    /// reading it in or allocating it as needed.
    pub fn get_page(&self, pagenum: PageNumber) -> Result<PageGuard<'_>> {
        if pagenum < 0 {
            return Err(PagerError::InvalidPageNumber(pagenum));
        }
        let mut inner = self.inner.lock();
        // Already resident: promote from the unpinned list if needed.
        if let Some(&frame_id) = inner.page_table.get(&pagenum) {
            let page = &self.frames[frame_id];
            if page.pin_count() == 0 {
                inner.unpinned.retain(|&f| f != frame_id);
                inner.pinned.insert(frame_id);
            }
            page.pin();
            return Ok(PageGuard {
                pager: self,
                page: Arc::clone(page),
                frame_id,
            });
        }
        // Obtain a victim frame: the free list first, then the oldest
        // unpinned frame, flushed before reuse if dirty.
        let frame_id = if let Some(frame_id) = inner.free.pop_front() {
            frame_id
        } else if let Some(frame_id) = inner.unpinned.pop_front() {
            let victim = &self.frames[frame_id];
            if let Err(e) = self.flush_page(victim) {
                inner.unpinned.push_front(frame_id);
                return Err(e);
            }
            inner.page_table.remove(&victim.pagenum());
            frame_id
        } else {
            return Err(PagerError::NoAvailablePages);
        };
        let page = &self.frames[frame_id];
        page.set_pagenum(pagenum);
        page.set_pin_count(1);
        if pagenum >= inner.n_pages {
            // Allocating a fresh page: mark it dirty so it is flushed even
            // if the caller never touches it.
            inner.n_pages += 1;
            page.set_dirty(true);
            page.zero();
        } else {
            page.set_dirty(false);
            if let Err(e) = self.read_page_from_disk(page, pagenum) {
                page.set_pagenum(NO_PAGE);
                page.set_pin_count(0);
                inner.free.push_back(frame_id);
                return Err(e);
            }
        }
        inner.pinned.insert(frame_id);
        inner.page_table.insert(pagenum, frame_id);
        Ok(PageGuard {
            pager: self,
            page: Arc::clone(page),
            frame_id,
        })
    }

    fn read_page_from_disk(&self, page: &Page, pagenum: PageNumber) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file
            .read_exact_at(&mut buf, pagenum as u64 * PAGE_SIZE as u64)?;
        page.fill_from(&buf);
        Ok(())
    }

    /// Release one reference to a page, moving its frame to the unpinned
    /// list when the last pin drops.
    fn put(&self, page: &Page, frame_id: usize) {
        let mut inner = self.inner.lock();
        let remaining = page.unpin();
        if remaining == 0 {
            inner.pinned.remove(&frame_id);
            inner.unpinned.push_back(frame_id);
        } else if remaining < 0 {
            log::error!("pin count for page {} dropped below zero", page.pagenum());
        }
    }

    /// Flush a particular page to disk if it is dirty. A failed write
    /// leaves the page dirty so the next flush retries it.
    pub fn flush_page(&self, page: &Page) -> Result<()> {
        if page.is_dirty() {
            page.with_data(|data| {
                self.file
                    .write_all_at(data, page.pagenum() as u64 * PAGE_SIZE as u64)
            })?;
            page.set_dirty(false);
        }
        Ok(())
    }

    fn flush_resident(&self, inner: &PagerInner) -> Result<()> {
        for &frame_id in inner.page_table.values() {
            self.flush_page(&self.frames[frame_id])?;
        }
        Ok(())
    }

    /// Flush every resident page.
    pub fn flush_all(&self) -> Result<()> {
        let inner = self.inner.lock();
        self.flush_resident(&inner)
    }

    /// Flush all pages to disk. Logs if any page is still pinned.
    pub fn close(&self) -> Result<()> {
        let inner = self.inner.lock();
        if !inner.pinned.is_empty() {
            log::error!("pages are still pinned on close");
        }
        self.flush_resident(&inner)
    }

    /// Quiesce the pager for recovery: hold the page-table lock and every
    /// resident page's update mutex so no in-place byte edits can occur
    /// until the returned guard is dropped. Reads remain possible.
    pub fn lock_all_updates(&self) -> PagerQuiesce<'_> {
        let inner = self.inner.lock();
        let updates = inner
            .page_table
            .values()
            .map(|&frame_id| self.frames[frame_id].lock_updates())
            .collect();
        PagerQuiesce {
            pager: self,
            inner,
            _updates: updates,
        }
    }
}

/// Guard over a fully quiesced pager. See [`Pager::lock_all_updates`].
pub struct PagerQuiesce<'p> {
    pager: &'p Pager,
    inner: MutexGuard<'p, PagerInner>,
    _updates: Vec<UpdateGuard>,
}

impl PagerQuiesce<'_> {
    /// Flush every resident page while updates are frozen.
    pub fn flush_all(&self) -> Result<()> {
        self.pager.flush_resident(&self.inner)
    }
}

/// A pinned reference to a page. Unpins on drop.
pub struct PageGuard<'p> {
    pager: &'p Pager,
    page: Arc<Page>,
    frame_id: usize,
}

impl PageGuard<'_> {
    /// The pager that owns this page.
    pub fn pager(&self) -> &Pager {
        self.pager
    }
}

impl Deref for PageGuard<'_> {
    type Target = Page;

    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pager.put(&self.page, self.frame_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_rejects_partial_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table");
        std::fs::write(&path, vec![0u8; PAGE_SIZE + 1]).unwrap();
        match Pager::open(&path) {
            Err(PagerError::Corrupt(_)) => {}
            other => panic!("expected corrupt error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_allocate_and_reread() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("table")).unwrap();
        assert_eq!(pager.get_free_pn(), 0);
        {
            let page = pager.get_page(pager.get_free_pn()).unwrap();
            assert_eq!(page.pagenum(), 0);
            assert!(page.is_dirty());
            page.update(&[7u8; 4], 0, 4);
        }
        assert_eq!(pager.num_pages(), 1);
        let page = pager.get_page(0).unwrap();
        page.with_data(|d| assert_eq!(&d[..4], &[7u8; 4]));
    }

    #[test]
    fn test_unpinned_membership_tracks_pins() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("table")).unwrap();
        let page = pager.get_page(pager.get_free_pn()).unwrap();
        {
            let inner = pager.inner.lock();
            assert!(inner.unpinned.is_empty());
            assert_eq!(inner.pinned.len(), 1);
        }
        drop(page);
        {
            let inner = pager.inner.lock();
            assert_eq!(inner.unpinned.len(), 1);
            assert!(inner.pinned.is_empty());
        }
    }

    #[test]
    fn test_eviction_prefers_oldest_unpinned() {
        let dir = tempdir().unwrap();
        let pager = Pager::open(dir.path().join("table")).unwrap();
        // Fill every frame, then release them in order.
        for pn in 0..NUM_PAGES as i64 {
            let page = pager.get_page(pn).unwrap();
            page.update(&[pn as u8], 0, 1);
        }
        // A new allocation must evict page 0, the oldest unpinned frame.
        let page = pager.get_page(NUM_PAGES as i64).unwrap();
        assert_eq!(page.pagenum(), NUM_PAGES as i64);
        drop(page);
        let inner = pager.inner.lock();
        assert!(!inner.page_table.contains_key(&0));
    }
}
