mod page;

use crate::common::{Error, Result};
use crate::storage::buffer::BufferManager;
use crate::storage::file::PagedFile;
use crate::storage::page::{PageId, RecordId, INVALID_PAGE_ID};
use crate::storage::tuple::{Tuple, TupleMetadata};
use std::sync::{Arc, RwLock};

/// A heap of tuples, stored as a singly linked list of fixed-size pages and
/// read or written one page at a time through a shared [`BufferManager`].
/// Tuples are opaque bytes — this module has no notion of schema or field
/// types, and never inspects a tuple's payload.
#[derive(Debug)]
pub struct Relation<F: PagedFile> {
    file: Arc<RwLock<F>>,
    buffer: Arc<RwLock<BufferManager<F>>>,
    first_page_id: PageId,
    last_page_id: PageId,
    page_count: u32,
}

impl<F: PagedFile> Relation<F> {
    /// Creates a new, empty relation backed by `file`, allocating its first
    /// page through `buffer`.
    pub fn create(file: Arc<RwLock<F>>, buffer: Arc<RwLock<BufferManager<F>>>) -> Result<Self> {
        let (first_page_id, frame_id) = buffer.write().unwrap().new_page(&file)?;
        page::init(buffer.write().unwrap().page_data_mut(frame_id));
        buffer.write().unwrap().unpin_page(&file, first_page_id, true)?;

        Ok(Relation {
            file,
            buffer,
            first_page_id,
            last_page_id: first_page_id,
            page_count: 1,
        })
    }

    pub fn num_pages(&self) -> u32 {
        self.page_count
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let (new_page_id, new_frame_id) = self.buffer.write().unwrap().new_page(&self.file)?;
        page::init(self.buffer.write().unwrap().page_data_mut(new_frame_id));
        self.buffer.write().unwrap().unpin_page(&self.file, new_page_id, true)?;

        let last_frame_id = self.buffer.write().unwrap().read_page(&self.file, self.last_page_id)?;
        page::write_next_page_id(self.buffer.write().unwrap().page_data_mut(last_frame_id), new_page_id);
        self.buffer.write().unwrap().unpin_page(&self.file, self.last_page_id, true)?;

        self.last_page_id = new_page_id;
        self.page_count += 1;
        Ok(new_page_id)
    }

    pub fn insert_tuple(&mut self, tuple: Tuple) -> Result<RecordId> {
        let frame_id = self.buffer.write().unwrap().read_page(&self.file, self.last_page_id)?;
        let fits = {
            let bytes = self.buffer.read().unwrap().page_data(frame_id).to_vec();
            page::next_tuple_offset(&bytes, tuple.data.len()).is_some()
        };
        self.buffer.write().unwrap().unpin_page(&self.file, self.last_page_id, false)?;

        if !fits {
            self.allocate_page()?;
        }

        let frame_id = self.buffer.write().unwrap().read_page(&self.file, self.last_page_id)?;
        let slot = {
            let mut bm = self.buffer.write().unwrap();
            let bytes = bm.page_data_mut(frame_id);
            page::insert_tuple(bytes, TupleMetadata::new(false), &tuple)
                .ok_or(Error::InvalidData("tuple does not fit on an empty page".to_string()))?
        };
        self.buffer.write().unwrap().unpin_page(&self.file, self.last_page_id, true)?;

        Ok(RecordId::new(self.last_page_id, slot))
    }

    pub fn get_tuple(&self, rid: RecordId) -> Result<Tuple> {
        let frame_id = self.buffer.write().unwrap().read_page(&self.file, rid.page_id())?;
        let result = page::get_tuple(self.buffer.read().unwrap().page_data(frame_id), rid);
        self.buffer.write().unwrap().unpin_page(&self.file, rid.page_id(), false)?;
        result
    }

    pub fn delete_tuple(&self, rid: RecordId) -> Result<()> {
        let frame_id = self.buffer.write().unwrap().read_page(&self.file, rid.page_id())?;
        let result = {
            let mut bm = self.buffer.write().unwrap();
            page::delete_tuple(bm.page_data_mut(frame_id), rid)
        };
        self.buffer.write().unwrap().unpin_page(&self.file, rid.page_id(), true)?;
        result
    }

    pub fn iter(&self) -> RelationScanner<F> {
        RelationScanner {
            relation: self,
            current_page_id: self.first_page_id,
            buffered: Vec::new().into_iter(),
        }
    }
}

/// Iterates every non-deleted tuple in a relation, page by page.
pub struct RelationScanner<'a, F: PagedFile> {
    relation: &'a Relation<F>,
    current_page_id: PageId,
    buffered: std::vec::IntoIter<(RecordId, Tuple)>,
}

impl<'a, F: PagedFile> Iterator for RelationScanner<'a, F> {
    type Item = (RecordId, Tuple);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffered.next() {
                return Some(item);
            }
            if self.current_page_id == INVALID_PAGE_ID {
                return None;
            }

            let frame_id = self
                .relation
                .buffer
                .write()
                .unwrap()
                .read_page(&self.relation.file, self.current_page_id)
                .ok()?;
            let (tuples, next_page_id) = {
                let bm = self.relation.buffer.read().unwrap();
                let bytes = bm.page_data(frame_id);
                (page::live_tuples(bytes, self.current_page_id), page::next_page_id(bytes))
            };
            self.relation
                .buffer
                .write()
                .unwrap()
                .unpin_page(&self.relation.file, self.current_page_id, false)
                .ok()?;

            self.current_page_id = next_page_id;
            self.buffered = tuples.into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::HeapFile;

    fn setup() -> Relation<HeapFile> {
        let file = Arc::new(RwLock::new(HeapFile::new_for_test()));
        let buffer = Arc::new(RwLock::new(BufferManager::new(8)));
        Relation::create(file, buffer).unwrap()
    }

    #[test]
    fn insert_then_get_round_trips() {
        let mut relation = setup();
        let rid = relation.insert_tuple(Tuple::from(b"first".to_vec())).unwrap();
        assert_eq!(relation.get_tuple(rid).unwrap(), Tuple::from(b"first".to_vec()));
    }

    #[test]
    fn scanner_yields_every_inserted_tuple_in_order() {
        let mut relation = setup();
        let mut expected = Vec::new();
        for i in 0..50u32 {
            let payload = format!("row-{i}").into_bytes();
            relation.insert_tuple(Tuple::from(payload.clone())).unwrap();
            expected.push(Tuple::from(payload));
        }

        let scanned: Vec<Tuple> = relation.iter().map(|(_, tuple)| tuple).collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn deleted_tuple_is_skipped_by_scanner() {
        let mut relation = setup();
        let rid = relation.insert_tuple(Tuple::from(b"keep-me".to_vec())).unwrap();
        relation.insert_tuple(Tuple::from(b"delete-me".to_vec())).unwrap();
        let to_delete = relation.iter().nth(1).unwrap().0;
        relation.delete_tuple(to_delete).unwrap();

        let scanned: Vec<Tuple> = relation.iter().map(|(_, tuple)| tuple).collect();
        assert_eq!(scanned, vec![relation.get_tuple(rid).unwrap()]);
    }

    #[test]
    fn insert_spans_multiple_pages_once_one_fills_up() {
        let mut relation = setup();
        for i in 0..2000u32 {
            relation.insert_tuple(Tuple::from(i.to_le_bytes().to_vec())).unwrap();
        }
        assert!(relation.num_pages() > 1);
        assert_eq!(relation.iter().count(), 2000);
    }
}
