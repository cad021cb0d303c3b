use crate::common::{Error, Result};
use crate::storage::buffer::clock_replacer::ClockReplacer;
use crate::storage::buffer::lookup_index::PageLookupIndex;
use crate::storage::file::PagedFile;
use crate::storage::page::{Page, PageId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

pub type FrameId = usize;

/// Identifies a file regardless of which buffer manager call is touching
/// it: the address of the `Arc<RwLock<F>>` handle callers share. This is
/// what lets one `BufferManager` serve pages from several files — an index
/// file and its relation's data file, say — without the pool knowing
/// anything about what those files mean to its callers.
pub type FileKey = usize;

pub fn file_key<F>(file: &Arc<RwLock<F>>) -> FileKey {
    Arc::as_ptr(file) as usize
}

#[derive(Debug, Clone, Copy)]
struct FrameDescriptor {
    valid: bool,
    dirty: bool,
    pin_count: usize,
    file: FileKey,
    page_no: PageId,
}

impl FrameDescriptor {
    fn invalid() -> Self {
        FrameDescriptor {
            valid: false,
            dirty: false,
            pin_count: 0,
            file: 0,
            page_no: crate::storage::page::INVALID_PAGE_ID,
        }
    }
}

/// A fixed-size pool of page frames shared across every file registered
/// with it. Pages are looked up by `(file, page number)`, pinned while in
/// use, and evicted under CLOCK when the pool is full and a fresh page is
/// needed.
#[derive(Debug)]
pub struct BufferManager<F: PagedFile> {
    pool_size: usize,
    frames: Vec<Page>,
    descriptors: Vec<FrameDescriptor>,
    lookup: PageLookupIndex,
    replacer: ClockReplacer,
    free_list: VecDeque<FrameId>,
    files: HashMap<FileKey, Arc<RwLock<F>>>,
}

impl<F: PagedFile> BufferManager<F> {
    pub fn new(pool_size: usize) -> Self {
        BufferManager {
            pool_size,
            frames: (0..pool_size).map(|_| Page::new(crate::storage::page::INVALID_PAGE_ID)).collect(),
            descriptors: vec![FrameDescriptor::invalid(); pool_size],
            lookup: PageLookupIndex::new(pool_size),
            replacer: ClockReplacer::new(pool_size),
            free_list: (0..pool_size).collect(),
            files: HashMap::new(),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Registers a file handle with this pool so later calls can address it
    /// by the same `Arc` reference. Idempotent.
    pub fn register_file(&mut self, file: &Arc<RwLock<F>>) -> FileKey {
        let key = file_key(file);
        self.files.entry(key).or_insert_with(|| Arc::clone(file));
        key
    }

    /// Allocates a brand-new page in `file` and pins it in the pool.
    pub fn new_page(&mut self, file: &Arc<RwLock<F>>) -> Result<(PageId, FrameId)> {
        let key = self.register_file(file);
        let frame_id = self.get_free_frame()?;

        let (page_no, page) = file.write().unwrap().allocate_page()?;
        self.place_page(frame_id, key, page_no, page);
        self.pin(frame_id);

        log::debug!("allocated page {page_no} of file {key} into frame {frame_id}");
        Ok((page_no, frame_id))
    }

    /// Reads `page_no` of `file` into the pool, pinning it. If the page is
    /// already resident, its existing frame is pinned again instead of
    /// issuing a disk read.
    pub fn read_page(&mut self, file: &Arc<RwLock<F>>, page_no: PageId) -> Result<FrameId> {
        let key = self.register_file(file);

        if let Some(frame_id) = self.lookup.lookup(key, page_no) {
            self.pin(frame_id);
            return Ok(frame_id);
        }

        let frame_id = self.get_free_frame()?;
        let page = file.write().unwrap().read_page(page_no)?;
        self.place_page(frame_id, key, page_no, page);
        self.pin(frame_id);

        log::debug!("read page {page_no} of file {key} into frame {frame_id}");
        Ok(frame_id)
    }

    /// Decrements the pin count on `page_no`, marking it dirty if
    /// `is_dirty` and making it eligible for eviction once the pin count
    /// reaches zero. A page that isn't resident at all is a silent no-op —
    /// callers may legitimately ask to unpin a page they never pinned, the
    /// same way a `flush_file`/`dispose_page` sequence does; `PageNotPinned`
    /// is reserved for a page that *is* resident but already at pin count
    /// zero.
    pub fn unpin_page(&mut self, file: &Arc<RwLock<F>>, page_no: PageId, is_dirty: bool) -> Result<()> {
        let key = file_key(file);
        let frame_id = match self.lookup.lookup(key, page_no) {
            Some(frame_id) => frame_id,
            None => return Ok(()),
        };

        let descriptor = &mut self.descriptors[frame_id];
        if descriptor.pin_count == 0 {
            return Err(Error::PageNotPinned);
        }
        descriptor.pin_count -= 1;
        descriptor.dirty |= is_dirty;
        if descriptor.pin_count == 0 {
            self.replacer.set_evictable(&frame_id, true);
        }
        Ok(())
    }

    /// Writes a frame's page back to disk unconditionally, clearing its
    /// dirty bit on success.
    pub fn flush_page(&mut self, file: &Arc<RwLock<F>>, page_no: PageId) -> Result<()> {
        let key = file_key(file);
        let frame_id = self.lookup.lookup(key, page_no).ok_or(Error::BadBuffer)?;
        file.write().unwrap().write_page(&self.frames[frame_id])?;
        self.descriptors[frame_id].dirty = false;
        Ok(())
    }

    /// Flushes every page currently resident from `file`: writes back any
    /// dirty ones, then removes all of them from the pool, clearing their
    /// lookup entries and descriptors and returning their frames to the
    /// free list. Fails with `PagePinned`, touching nothing, if any
    /// resident page of `file` is still pinned.
    pub fn flush_file(&mut self, file: &Arc<RwLock<F>>) -> Result<()> {
        let key = file_key(file);
        let frame_ids: Vec<FrameId> = self
            .descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| d.valid && d.file == key)
            .map(|(frame_id, _)| frame_id)
            .collect();

        if frame_ids.iter().any(|&frame_id| self.descriptors[frame_id].pin_count > 0) {
            return Err(Error::PagePinned);
        }

        for frame_id in frame_ids {
            let descriptor = self.descriptors[frame_id];
            if descriptor.dirty {
                file.write().unwrap().write_page(&self.frames[frame_id])?;
            }
            self.replacer.remove(&frame_id);
            self.lookup.remove(descriptor.file, descriptor.page_no);
            self.descriptors[frame_id] = FrameDescriptor::invalid();
            self.free_list.push_back(frame_id);
        }
        Ok(())
    }

    /// Removes a page from the pool and frees it on disk. Fails if the page
    /// is still pinned.
    pub fn dispose_page(&mut self, file: &Arc<RwLock<F>>, page_no: PageId) -> Result<()> {
        let key = file_key(file);
        if let Some(frame_id) = self.lookup.lookup(key, page_no) {
            if self.descriptors[frame_id].pin_count > 0 {
                return Err(Error::PagePinned);
            }
            self.replacer.remove(&frame_id);
            self.lookup.remove(key, page_no);
            self.descriptors[frame_id] = FrameDescriptor::invalid();
            self.free_list.push_back(frame_id);
        }
        file.write().unwrap().delete_page(page_no)
    }

    /// Looks up the frame already holding a page this caller has pinned,
    /// without taking another pin. For callers (like an index scan) that
    /// hold a page pinned across many calls and only need to keep reading
    /// its current bytes.
    pub fn frame_of_pinned(&self, file: &Arc<RwLock<F>>, page_no: PageId) -> Option<FrameId> {
        self.lookup.lookup(file_key(file), page_no)
    }

    pub fn page_data(&self, frame_id: FrameId) -> &[u8] {
        self.frames[frame_id].data()
    }

    pub fn page_data_mut(&mut self, frame_id: FrameId) -> &mut [u8] {
        self.frames[frame_id].data_mut()
    }

    #[cfg(test)]
    pub(crate) fn pin_count(&self, file: &Arc<RwLock<F>>, page_no: PageId) -> Option<usize> {
        let key = file_key(file);
        let frame_id = self.lookup.lookup(key, page_no)?;
        Some(self.descriptors[frame_id].pin_count)
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.descriptors[frame_id].pin_count += 1;
        self.replacer.record_access(&frame_id);
        self.replacer.set_evictable(&frame_id, false);
    }

    fn place_page(&mut self, frame_id: FrameId, file: FileKey, page_no: PageId, page: Page) {
        self.frames[frame_id] = page;
        self.descriptors[frame_id] = FrameDescriptor {
            valid: true,
            dirty: false,
            pin_count: 0,
            file,
            page_no,
        };
        self.lookup.insert(file, page_no, frame_id);
    }

    fn get_free_frame(&mut self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.pop_front() {
            // The sweep runs for every load in the algorithm this was
            // grounded on, free frame or not — the hand still has to move
            // past a frame it hands out here, or a later sweep starts from
            // a stale position and picks the wrong victim.
            self.replacer.record_fill(&frame_id);
            return Ok(frame_id);
        }
        self.evict_one()
    }

    fn evict_one(&mut self) -> Result<FrameId> {
        let frame_id = self.replacer.evict().ok_or(Error::BufferExceeded)?;
        let descriptor = self.descriptors[frame_id];

        if descriptor.dirty {
            if let Some(file) = self.files.get(&descriptor.file).cloned() {
                log::warn!(
                    "evicting dirty page {} of file {} from frame {frame_id}",
                    descriptor.page_no,
                    descriptor.file
                );
                file.write().unwrap().write_page(&self.frames[frame_id])?;
            }
        }

        self.lookup.remove(descriptor.file, descriptor.page_no);
        self.descriptors[frame_id] = FrameDescriptor::invalid();
        Ok(frame_id)
    }
}

impl<F: PagedFile> Drop for BufferManager<F> {
    fn drop(&mut self) {
        for frame_id in 0..self.pool_size {
            let descriptor = self.descriptors[frame_id];
            if !descriptor.valid || !descriptor.dirty {
                continue;
            }
            if let Some(file) = self.files.get(&descriptor.file) {
                if let Err(err) = file.write().unwrap().write_page(&self.frames[frame_id]) {
                    log::error!("failed to flush frame {frame_id} on buffer manager drop: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::HeapFile;

    fn pool(size: usize) -> BufferManager<HeapFile> {
        BufferManager::new(size)
    }

    fn file() -> Arc<RwLock<HeapFile>> {
        Arc::new(RwLock::new(HeapFile::new_for_test()))
    }

    #[test]
    fn new_page_then_read_page_returns_same_frame() {
        let mut bm = pool(3);
        let f = file();
        let (page_no, frame_id) = bm.new_page(&f).unwrap();
        bm.unpin_page(&f, page_no, false).unwrap();

        let reread_frame = bm.read_page(&f, page_no).unwrap();
        assert_eq!(reread_frame, frame_id);
        bm.unpin_page(&f, page_no, false).unwrap();
    }

    #[test]
    fn buffer_exceeded_when_pool_full_of_pinned_pages() {
        let mut bm = pool(2);
        let f = file();
        bm.new_page(&f).unwrap();
        bm.new_page(&f).unwrap();
        let result = bm.new_page(&f);
        assert!(matches!(result, Err(Error::BufferExceeded)));
    }

    #[test]
    fn unpinning_twice_reports_page_not_pinned() {
        let mut bm = pool(2);
        let f = file();
        let (page_no, _) = bm.new_page(&f).unwrap();
        bm.unpin_page(&f, page_no, false).unwrap();
        let result = bm.unpin_page(&f, page_no, false);
        assert!(matches!(result, Err(Error::PageNotPinned)));
    }

    #[test]
    fn clock_evicts_unpinned_page_to_make_room() {
        let mut bm = pool(2);
        let f = file();
        let (first, _) = bm.new_page(&f).unwrap();
        bm.unpin_page(&f, first, false).unwrap();
        bm.new_page(&f).unwrap();
        // `first` is unpinned and evictable; the pool's other frame is
        // still pinned, so this third allocation must evict `first` rather
        // than fail with BufferExceeded.
        let result = bm.new_page(&f);
        assert!(result.is_ok());
    }

    #[test]
    fn dirty_page_is_written_back_on_eviction() {
        let mut bm = pool(1);
        let f = file();
        let (page_no, frame_id) = bm.new_page(&f).unwrap();
        bm.page_data_mut(frame_id)[0] = 0x42;
        bm.unpin_page(&f, page_no, true).unwrap();

        // Force eviction by allocating past capacity.
        let (_next_page_no, _next_frame) = bm.new_page(&f).unwrap();

        let mut raw = HeapFile::open(f.read().unwrap().filename()).unwrap();
        let page = raw.read_page(page_no).unwrap();
        assert_eq!(page.data()[0], 0x42);
    }

    #[test]
    fn dispose_page_fails_while_pinned() {
        let mut bm = pool(2);
        let f = file();
        let (page_no, _) = bm.new_page(&f).unwrap();
        let result = bm.dispose_page(&f, page_no);
        assert!(matches!(result, Err(Error::PagePinned)));
    }

    #[test]
    fn fourth_load_evicts_the_first_page_loaded_not_the_last() {
        let mut bm = pool(3);
        let f = file();
        let (page1, _) = bm.new_page(&f).unwrap();
        bm.unpin_page(&f, page1, false).unwrap();
        let (page2, _) = bm.new_page(&f).unwrap();
        bm.unpin_page(&f, page2, false).unwrap();
        let (page3, _) = bm.new_page(&f).unwrap();
        bm.unpin_page(&f, page3, false).unwrap();

        // Pages 1-3 filled the pool via the free list, in that order, each
        // unpinned right away. A fourth load must evict page 1 — the sweep
        // reaches it first on its second lap — not whatever frame a
        // hand left stale by the free-list fill happens to sit on.
        let (page4, _) = bm.new_page(&f).unwrap();
        bm.unpin_page(&f, page4, false).unwrap();

        assert!(bm.pin_count(&f, page1).is_none());
        assert_eq!(bm.pin_count(&f, page2), Some(0));
        assert_eq!(bm.pin_count(&f, page3), Some(0));
        assert_eq!(bm.pin_count(&f, page4), Some(0));
    }

    #[test]
    fn unpin_page_on_non_resident_page_is_a_silent_no_op() {
        let mut bm = pool(2);
        let f = file();
        assert!(bm.unpin_page(&f, 1, false).is_ok());
    }

    #[test]
    fn flush_file_fails_while_any_page_is_pinned_and_touches_nothing() {
        let mut bm = pool(2);
        let f = file();
        let (page_no, frame_id) = bm.new_page(&f).unwrap();
        bm.page_data_mut(frame_id)[0] = 0x42;

        let result = bm.flush_file(&f);
        assert!(matches!(result, Err(Error::PagePinned)));
        assert_eq!(bm.pin_count(&f, page_no), Some(1));
    }

    #[test]
    fn flush_file_writes_back_dirty_pages_and_evicts_every_frame() {
        let mut bm = pool(2);
        let f = file();
        let (page_no, frame_id) = bm.new_page(&f).unwrap();
        bm.page_data_mut(frame_id)[0] = 0x42;
        bm.unpin_page(&f, page_no, true).unwrap();

        bm.flush_file(&f).unwrap();
        assert!(bm.pin_count(&f, page_no).is_none());

        let mut raw = HeapFile::open(f.read().unwrap().filename()).unwrap();
        let page = raw.read_page(page_no).unwrap();
        assert_eq!(page.data()[0], 0x42);

        // The frame came back to the pool and is reusable.
        bm.new_page(&f).unwrap();
        bm.new_page(&f).unwrap();
    }
}
