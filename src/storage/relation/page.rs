use crate::common::{Error, Result};
use crate::storage::page::{PageId, RecordId, INVALID_PAGE_ID};
use crate::storage::tuple::{Tuple, TupleMetadata};

/// Byte layout of a relation heap page, read and written directly against
/// the raw bytes a pinned buffer-pool frame hands back. Mirrors a classic
/// slotted page: a small fixed header, a slot directory that grows forward
/// from just after the header, and tuple payloads that grow backward from
/// the end of the page. A slot with `offset == 0 && size == 0` is a
/// tombstone — the tuple it once pointed to has been deleted.
///
/// ```text
/// | next_page_id(4) tuple_cnt(2) deleted_cnt(2) | slot0 slot1 ... | ... t1 t0 |
/// ```
const HEADER_LEN: usize = 4 + 2 + 2;
const SLOT_LEN: usize = 4;

pub fn init(bytes: &mut [u8]) {
    bytes[..HEADER_LEN].fill(0);
    write_next_page_id(bytes, INVALID_PAGE_ID);
}

pub fn next_page_id(bytes: &[u8]) -> PageId {
    PageId::from_le_bytes(bytes[0..4].try_into().unwrap())
}

pub fn write_next_page_id(bytes: &mut [u8], page_id: PageId) {
    bytes[0..4].copy_from_slice(&page_id.to_le_bytes());
}

fn tuple_count(bytes: &[u8]) -> u16 {
    u16::from_le_bytes(bytes[4..6].try_into().unwrap())
}

fn deleted_tuple_count(bytes: &[u8]) -> u16 {
    u16::from_le_bytes(bytes[6..8].try_into().unwrap())
}

fn set_tuple_count(bytes: &mut [u8], count: u16) {
    bytes[4..6].copy_from_slice(&count.to_le_bytes());
}

fn set_deleted_tuple_count(bytes: &mut [u8], count: u16) {
    bytes[6..8].copy_from_slice(&count.to_le_bytes());
}

fn total_slot_count(bytes: &[u8]) -> u16 {
    tuple_count(bytes) + deleted_tuple_count(bytes)
}

fn slot_offset_of(slot: u16) -> usize {
    HEADER_LEN + slot as usize * SLOT_LEN
}

fn read_slot(bytes: &[u8], slot: u16) -> (u16, u16) {
    let at = slot_offset_of(slot);
    let offset = u16::from_le_bytes(bytes[at..at + 2].try_into().unwrap());
    let size = u16::from_le_bytes(bytes[at + 2..at + 4].try_into().unwrap());
    (offset, size)
}

fn write_slot(bytes: &mut [u8], slot: u16, offset: u16, size: u16) {
    let at = slot_offset_of(slot);
    bytes[at..at + 2].copy_from_slice(&offset.to_le_bytes());
    bytes[at + 2..at + 4].copy_from_slice(&size.to_le_bytes());
}

/// Where a tuple of this size would land if appended now, or `None` if it
/// doesn't fit in the remaining free space between the slot directory and
/// the existing tuple payloads.
pub fn next_tuple_offset(bytes: &[u8], tuple_len: usize) -> Option<u16> {
    let total_slots = total_slot_count(bytes);
    let tuples_end = if total_slots == 0 {
        bytes.len()
    } else {
        read_slot(bytes, total_slots - 1).0 as usize
    };
    if tuple_len > tuples_end {
        return None;
    }
    let tuples_start = tuples_end - tuple_len;
    let header_size = HEADER_LEN + (total_slots as usize + 1) * SLOT_LEN;
    if header_size >= tuples_start {
        return None;
    }
    Some(tuples_start as u16)
}

/// Appends a tuple to this page, returning its slot id.
pub fn insert_tuple(bytes: &mut [u8], meta: TupleMetadata, tuple: &Tuple) -> Option<u16> {
    let offset = next_tuple_offset(bytes, tuple.data.len())?;
    let at = offset as usize;
    bytes[at..at + tuple.data.len()].copy_from_slice(&tuple.data);

    let slot = total_slot_count(bytes);
    write_slot(bytes, slot, offset, tuple.data.len() as u16);
    if meta.is_deleted() {
        set_deleted_tuple_count(bytes, deleted_tuple_count(bytes) + 1);
    } else {
        set_tuple_count(bytes, tuple_count(bytes) + 1);
    }
    Some(slot)
}

pub fn get_tuple(bytes: &[u8], rid: RecordId) -> Result<Tuple> {
    let slot = rid.slot_id();
    if slot >= total_slot_count(bytes) {
        return Err(Error::InvalidInput(rid.to_string()));
    }
    let (offset, size) = read_slot(bytes, slot);
    if offset == 0 && size == 0 {
        return Err(Error::InvalidInput(rid.to_string()));
    }
    let at = offset as usize;
    Ok(Tuple::from(&bytes[at..at + size as usize]))
}

pub fn get_tuple_metadata(bytes: &[u8], rid: RecordId) -> Result<TupleMetadata> {
    let slot = rid.slot_id();
    if slot >= total_slot_count(bytes) {
        return Err(Error::InvalidInput(rid.to_string()));
    }
    let (offset, size) = read_slot(bytes, slot);
    Ok(TupleMetadata::new(offset == 0 && size == 0))
}

pub fn delete_tuple(bytes: &mut [u8], rid: RecordId) -> Result<()> {
    let slot = rid.slot_id();
    if slot >= total_slot_count(bytes) {
        return Err(Error::InvalidInput(rid.to_string()));
    }
    let (offset, size) = read_slot(bytes, slot);
    if offset == 0 && size == 0 {
        return Ok(());
    }
    write_slot(bytes, slot, 0, 0);
    set_tuple_count(bytes, tuple_count(bytes) - 1);
    set_deleted_tuple_count(bytes, deleted_tuple_count(bytes) + 1);
    Ok(())
}

/// Yields `(slot, tuple)` for every non-deleted slot on the page, in slot
/// order, given the page's own id.
pub fn live_tuples(bytes: &[u8], page_id: PageId) -> Vec<(RecordId, Tuple)> {
    let mut out = Vec::new();
    for slot in 0..total_slot_count(bytes) {
        let rid = RecordId::new(page_id, slot);
        if let Ok(tuple) = get_tuple(bytes, rid) {
            out.push((rid, tuple));
        }
    }
    out
}
