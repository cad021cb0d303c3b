use crate::common::constants::INVALID_RID_MSG;
use crate::common::{Error, Result};
use crate::storage::page::PageId;
use serde::{Deserialize, Serialize};
use std::mem::size_of;

/// Identifies one tuple within a relation: the page it lives on, and its
/// slot within that page. Also used, unmodified, as the payload a B+-tree
/// leaf stores alongside each key.
#[derive(Clone, Copy, Debug, Hash, Serialize, Deserialize)]
pub struct RecordId {
    page_id: PageId,
    slot_id: u16,
}

pub const INVALID_RID: RecordId = RecordId {
    page_id: crate::storage::page::INVALID_PAGE_ID,
    slot_id: 0,
};

impl RecordId {
    pub fn new(page_id: PageId, slot_id: u16) -> RecordId {
        RecordId { page_id, slot_id }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn slot_id(&self) -> u16 {
        self.slot_id
    }

    pub const ENCODED_LEN: usize = size_of::<PageId>() + size_of::<u16>();

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..size_of::<PageId>()].copy_from_slice(&self.page_id.to_le_bytes());
        out[size_of::<PageId>()..].copy_from_slice(&self.slot_id.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(Error::InvalidData(INVALID_RID_MSG.to_string()));
        }
        let page_id = PageId::from_le_bytes(bytes[..size_of::<PageId>()].try_into().unwrap());
        let slot_id = u16::from_le_bytes(bytes[size_of::<PageId>()..Self::ENCODED_LEN].try_into().unwrap());
        Ok(RecordId { page_id, slot_id })
    }
}

impl PartialEq for RecordId {
    fn eq(&self, other: &Self) -> bool {
        self.page_id == other.page_id && self.slot_id == other.slot_id
    }
}

impl Eq for RecordId {}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.page_id, self.slot_id).cmp(&(other.page_id, other.slot_id))
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let rid = RecordId::new(7, 3);
        let bytes = rid.to_bytes();
        let decoded = RecordId::from_bytes(&bytes).unwrap();
        assert_eq!(rid, decoded);
    }

    #[test]
    fn orders_by_page_then_slot() {
        let a = RecordId::new(1, 5);
        let b = RecordId::new(2, 0);
        let c = RecordId::new(1, 9);
        assert!(a < b);
        assert!(a < c);
    }

    #[test]
    fn from_bytes_rejects_short_input() {
        assert!(RecordId::from_bytes(&[0u8; 2]).is_err());
    }
}
