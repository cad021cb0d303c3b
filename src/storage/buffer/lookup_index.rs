use crate::storage::buffer::{FileKey, FrameId};
use crate::storage::page::PageId;

/// Maps `(file, page)` to the frame currently holding that page. An open
/// chaining hash table sized `ceil(1.2 * pool_size)`, rounded up to the
/// nearest odd number, the way the buffer manager it backs expects: few
/// enough buckets to be cheap, enough slack over the pool size to keep
/// chains short.
///
/// "Not found" and "already present" are internal signals only — both
/// surface as plain `Option`/`bool` return values here, never as an error
/// a caller outside this module can observe.
#[derive(Debug)]
pub struct PageLookupIndex {
    buckets: Vec<Vec<(FileKey, PageId, FrameId)>>,
}

impl PageLookupIndex {
    pub fn new(pool_size: usize) -> Self {
        let num_buckets = Self::table_size(pool_size);
        PageLookupIndex {
            buckets: vec![Vec::new(); num_buckets],
        }
    }

    fn table_size(pool_size: usize) -> usize {
        let scaled = (pool_size as f64 * 1.2).ceil() as usize;
        let scaled = scaled.max(1);
        if scaled % 2 == 0 {
            scaled + 1
        } else {
            scaled
        }
    }

    fn bucket_index(&self, file: FileKey, page_no: PageId) -> usize {
        let mut hash = file as u64;
        hash = hash.wrapping_mul(1_000_003).wrapping_add(page_no as u64);
        (hash % self.buckets.len() as u64) as usize
    }

    pub fn lookup(&self, file: FileKey, page_no: PageId) -> Option<FrameId> {
        let idx = self.bucket_index(file, page_no);
        self.buckets[idx]
            .iter()
            .find(|(f, p, _)| *f == file && *p == page_no)
            .map(|(_, _, frame_id)| *frame_id)
    }

    /// Returns `false` without modifying anything if the entry is already
    /// present.
    pub fn insert(&mut self, file: FileKey, page_no: PageId, frame_id: FrameId) -> bool {
        let idx = self.bucket_index(file, page_no);
        if self.buckets[idx].iter().any(|(f, p, _)| *f == file && *p == page_no) {
            return false;
        }
        self.buckets[idx].push((file, page_no, frame_id));
        true
    }

    pub fn remove(&mut self, file: FileKey, page_no: PageId) {
        let idx = self.bucket_index(file, page_no);
        self.buckets[idx].retain(|(f, p, _)| !(*f == file && *p == page_no));
    }
}
