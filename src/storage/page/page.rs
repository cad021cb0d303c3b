use crate::config;
use crate::storage::page::PageId;

/// A fixed-size byte blob, the unit of file I/O and the unit the buffer
/// manager pins/unpins/evicts. Unlike the teacher's `TablePage`, a `Page`
/// here carries no structure of its own: the B+-tree's leaf/internal node
/// codecs (see [`crate::index::node`]) and the relation heap's tuple layout
/// (see [`crate::storage::relation`]) interpret its bytes, the page itself
/// does not.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    page_id: PageId,
    bytes: Vec<u8>,
}

impl Page {
    /// A freshly allocated, all-zero page with the given id.
    pub fn new(page_id: PageId) -> Self {
        Page {
            page_id,
            bytes: vec![0u8; config::settings().page_size_bytes],
        }
    }

    pub fn from_bytes(page_id: PageId, bytes: Vec<u8>) -> Self {
        debug_assert_eq!(bytes.len(), config::settings().page_size_bytes);
        Page { page_id, bytes }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn set_page_id(&mut self, page_id: PageId) {
        self.page_id = page_id;
    }
}
