use crate::common::{Error, Result};
use crate::index::meta::MetaPage;
use crate::index::node::{InternalNode, Key, LeafNode, INT_CAP, LEAF_CAP};
use crate::storage::buffer::BufferManager;
use crate::storage::file::PagedFile;
use crate::storage::page::{PageId, RecordId, INVALID_PAGE_ID};
use crate::storage::relation::Relation;
use crate::storage::tuple::Tuple;
use std::sync::{Arc, RwLock};

/// A comparison against a scan bound. Only `GT`/`GTE` are valid as a low
/// bound and only `LT`/`LTE` as a high bound — `start_scan` rejects any
/// other pairing with `BadOpcodes`, matching a caller that was handed the
/// wrong operator for a position.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    GT,
    GTE,
    LT,
    LTE,
}

fn ceil_div(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

fn satisfies_low(key: Key, low_val: Key, low_op: CompareOp) -> bool {
    match low_op {
        CompareOp::GT => key > low_val,
        CompareOp::GTE => key >= low_val,
        _ => unreachable!("low_op is validated to GT/GTE in start_scan"),
    }
}

fn violates_high(key: Key, high_val: Key, high_op: CompareOp) -> bool {
    match high_op {
        CompareOp::LT => key >= high_val,
        CompareOp::LTE => key > high_val,
        _ => unreachable!("high_op is validated to LT/LTE in start_scan"),
    }
}

#[derive(Clone, Copy, Debug)]
struct ScanState {
    leaf_page_no: PageId,
    next_entry: usize,
    high_val: Key,
    high_op: CompareOp,
    exhausted: bool,
}

/// Extracts a 32-bit integer key from `record + attr_byte_offset`, the way
/// the bulk-build loop populates a fresh index from its base relation.
fn extract_key(tuple: &Tuple, attr_byte_offset: i32) -> Result<Key> {
    let offset = attr_byte_offset as usize;
    if offset + 4 > tuple.data.len() {
        return Err(Error::InvalidData(format!(
            "tuple of {} bytes has no 4-byte key at offset {offset}",
            tuple.data.len()
        )));
    }
    Ok(Key::from_le_bytes(tuple.data[offset..offset + 4].try_into().unwrap()))
}

/// A disk-resident B+-tree over one attribute of one relation. The only
/// way it touches pages is through the [`BufferManager`] it was built
/// with — every descent and split is a sequence of `read_page`/
/// `unpin_page`/`new_page` calls against its own index file.
#[derive(Debug)]
pub struct BTreeIndex<F: PagedFile> {
    file: Arc<RwLock<F>>,
    buffer: Arc<RwLock<BufferManager<F>>>,
    index_name: String,
    root_page_no: PageId,
    root_is_leaf: bool,
    scan: Option<ScanState>,
}

impl<F: PagedFile> BTreeIndex<F> {
    /// Opens the index file for `relation_name`'s attribute at
    /// `attr_byte_offset`, creating and bulk-building it from `relation` if
    /// it doesn't exist yet. Fails with `BadIndexInfo` if an existing index
    /// file describes a different relation, offset, or type.
    pub fn build(
        relation_name: &str,
        attr_byte_offset: i32,
        attr_type: i32,
        buffer: Arc<RwLock<BufferManager<F>>>,
        relation: &Relation<F>,
    ) -> Result<Self> {
        let index_name = format!("{relation_name}.{attr_byte_offset}");

        if F::exists(&index_name) {
            return Self::open_existing(index_name, relation_name, attr_byte_offset, attr_type, buffer);
        }

        let file = Arc::new(RwLock::new(F::create(&index_name)?));
        buffer.write().unwrap().register_file(&file);

        let (meta_page_no, meta_frame) = buffer.write().unwrap().new_page(&file)?;
        let (root_page_no, root_frame) = buffer.write().unwrap().new_page(&file)?;
        {
            let mut bm = buffer.write().unwrap();
            LeafNode::empty().encode(bm.page_data_mut(root_frame));
        }
        buffer.write().unwrap().unpin_page(&file, root_page_no, true)?;

        let meta = MetaPage {
            relation_name: relation_name.to_string(),
            attr_byte_offset,
            attr_type,
            root_page_no,
            root_is_leaf: true,
        };
        {
            let mut bm = buffer.write().unwrap();
            meta.encode(bm.page_data_mut(meta_frame))?;
        }
        buffer.write().unwrap().unpin_page(&file, meta_page_no, true)?;

        let mut index = BTreeIndex {
            file,
            buffer,
            index_name,
            root_page_no,
            root_is_leaf: true,
            scan: None,
        };

        for (rid, tuple) in relation.iter() {
            let key = extract_key(&tuple, attr_byte_offset)?;
            index.insert_entry(key, rid)?;
        }

        log::info!("built index {} over {} rows", index.index_name, relation.num_pages());
        Ok(index)
    }

    fn open_existing(
        index_name: String,
        relation_name: &str,
        attr_byte_offset: i32,
        attr_type: i32,
        buffer: Arc<RwLock<BufferManager<F>>>,
    ) -> Result<Self> {
        let file = Arc::new(RwLock::new(F::open(&index_name)?));
        buffer.write().unwrap().register_file(&file);

        let meta_frame = buffer.write().unwrap().read_page(&file, 1)?;
        let meta = { let bm = buffer.read().unwrap(); MetaPage::decode(bm.page_data(meta_frame)) };
        buffer.write().unwrap().unpin_page(&file, 1, false)?;

        if meta.relation_name != relation_name
            || meta.attr_byte_offset != attr_byte_offset
            || meta.attr_type != attr_type
        {
            return Err(Error::BadIndexInfo(format!(
                "{index_name} describes relation '{}' offset {} type {}, expected '{}' offset {} type {}",
                meta.relation_name, meta.attr_byte_offset, meta.attr_type, relation_name, attr_byte_offset, attr_type
            )));
        }

        Ok(BTreeIndex {
            file,
            buffer,
            index_name,
            root_page_no: meta.root_page_no,
            root_is_leaf: meta.root_is_leaf,
            scan: None,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn root_page_no(&self) -> PageId {
        self.root_page_no
    }

    pub fn root_is_leaf(&self) -> bool {
        self.root_is_leaf
    }

    /// Inserts `(key, rid)` into the tree, splitting leaves and internal
    /// pages as needed.
    pub fn insert_entry(&mut self, key: Key, rid: RecordId) -> Result<()> {
        if self.root_is_leaf {
            return self.insert_into_leaf(self.root_page_no, key, rid, &mut Vec::new());
        }
        let mut path = Vec::new();
        let leaf_page_no = self.find_leaf_for(key, &mut path)?;
        self.insert_into_leaf(leaf_page_no, key, rid, &mut path)
    }

    /// Descends from the root to the leaf that could hold `key`, pushing
    /// each visited internal page number onto `path` (the leaf itself is
    /// not pushed).
    fn find_leaf_for(&self, key: Key, path: &mut Vec<PageId>) -> Result<PageId> {
        let mut current = self.root_page_no;
        loop {
            let frame_id = self.buffer.write().unwrap().read_page(&self.file, current)?;
            let node = { let bm = self.buffer.read().unwrap(); InternalNode::decode(bm.page_data(frame_id)) };
            self.buffer.write().unwrap().unpin_page(&self.file, current, false)?;

            let child_idx = node.child_index_for(key);
            let child = node.children[child_idx];
            path.push(current);

            if node.level == 1 {
                return Ok(child);
            }
            current = child;
        }
    }

    fn insert_into_leaf(&mut self, page_no: PageId, key: Key, rid: RecordId, path: &mut Vec<PageId>) -> Result<()> {
        let frame_id = self.buffer.write().unwrap().read_page(&self.file, page_no)?;
        let mut node = { let bm = self.buffer.read().unwrap(); LeafNode::decode(bm.page_data(frame_id)) };

        if node.slots_used() < LEAF_CAP {
            node.insert_sorted(key, rid);
            {
                let mut bm = self.buffer.write().unwrap();
                node.encode(bm.page_data_mut(frame_id));
            }
            self.buffer.write().unwrap().unpin_page(&self.file, page_no, true)?;
            return Ok(());
        }

        node.insert_sorted(key, rid);
        // The leaf now holds LEAF_CAP + 1 entries; the separator pushed up
        // to the parent is copied, not moved, so it stays in the right
        // leaf's first slot. That makes the natural split point the
        // ceiling over the *post-insert* count, not over LEAF_CAP itself —
        // splitting LEAF_CAP+1 entries at ceil(LEAF_CAP/2) would shortchange
        // the left leaf by one slot relative to the right.
        let threshold = ceil_div(LEAF_CAP + 1, 2);
        let right_keys = node.keys.split_off(threshold);
        let right_rids = node.rids.split_off(threshold);

        let (new_page_no, new_frame_id) = self.buffer.write().unwrap().new_page(&self.file)?;
        let right_node = LeafNode {
            keys: right_keys,
            rids: right_rids,
            right_sibling: node.right_sibling,
        };
        node.right_sibling = new_page_no;
        let push_key = right_node.keys[0];

        {
            let mut bm = self.buffer.write().unwrap();
            node.encode(bm.page_data_mut(frame_id));
        }
        self.buffer.write().unwrap().unpin_page(&self.file, page_no, true)?;
        {
            let mut bm = self.buffer.write().unwrap();
            right_node.encode(bm.page_data_mut(new_frame_id));
        }
        self.buffer.write().unwrap().unpin_page(&self.file, new_page_no, true)?;

        match path.pop() {
            None => self.create_new_root(push_key, page_no, new_page_no, 1),
            Some(parent) => self.insert_into_internal(parent, push_key, new_page_no, path),
        }
    }

    fn insert_into_internal(&mut self, page_no: PageId, key: Key, right_child: PageId, path: &mut Vec<PageId>) -> Result<()> {
        let frame_id = self.buffer.write().unwrap().read_page(&self.file, page_no)?;
        let mut node = { let bm = self.buffer.read().unwrap(); InternalNode::decode(bm.page_data(frame_id)) };

        if node.slots_used() < INT_CAP {
            node.insert_sorted(key, right_child);
            {
                let mut bm = self.buffer.write().unwrap();
                node.encode(bm.page_data_mut(frame_id));
            }
            self.buffer.write().unwrap().unpin_page(&self.file, page_no, true)?;
            return Ok(());
        }

        node.insert_sorted(key, right_child);
        let threshold = ceil_div(INT_CAP, 2);
        let mut right_keys = node.keys.split_off(threshold);
        let push_key = right_keys.remove(0);
        let right_children = node.children.split_off(threshold + 1);

        let (new_page_no, new_frame_id) = self.buffer.write().unwrap().new_page(&self.file)?;
        let right_node = InternalNode {
            level: node.level,
            keys: right_keys,
            children: right_children,
        };

        {
            let mut bm = self.buffer.write().unwrap();
            node.encode(bm.page_data_mut(frame_id));
        }
        self.buffer.write().unwrap().unpin_page(&self.file, page_no, true)?;
        {
            let mut bm = self.buffer.write().unwrap();
            right_node.encode(bm.page_data_mut(new_frame_id));
        }
        self.buffer.write().unwrap().unpin_page(&self.file, new_page_no, true)?;

        match path.pop() {
            None => self.create_new_root(push_key, page_no, new_page_no, 0),
            Some(parent) => self.insert_into_internal(parent, push_key, new_page_no, path),
        }
    }

    fn create_new_root(&mut self, key: Key, left_child: PageId, right_child: PageId, level: u32) -> Result<()> {
        let (new_root_no, new_root_frame) = self.buffer.write().unwrap().new_page(&self.file)?;
        let node = InternalNode {
            level,
            keys: vec![key],
            children: vec![left_child, right_child],
        };
        {
            let mut bm = self.buffer.write().unwrap();
            node.encode(bm.page_data_mut(new_root_frame));
        }
        self.buffer.write().unwrap().unpin_page(&self.file, new_root_no, true)?;

        self.root_page_no = new_root_no;
        self.root_is_leaf = false;

        let meta_frame = self.buffer.write().unwrap().read_page(&self.file, 1)?;
        let mut meta = { let bm = self.buffer.read().unwrap(); MetaPage::decode(bm.page_data(meta_frame)) };
        meta.root_page_no = new_root_no;
        meta.root_is_leaf = false;
        {
            let mut bm = self.buffer.write().unwrap();
            meta.encode(bm.page_data_mut(meta_frame))?;
        }
        self.buffer.write().unwrap().unpin_page(&self.file, 1, true)?;
        Ok(())
    }

    /// Begins a bounded range scan. Only one scan may be active at a time;
    /// a scan already in progress is ended first.
    pub fn start_scan(&mut self, low_val: Key, low_op: CompareOp, high_val: Key, high_op: CompareOp) -> Result<()> {
        if !matches!(low_op, CompareOp::GT | CompareOp::GTE) || !matches!(high_op, CompareOp::LT | CompareOp::LTE) {
            return Err(Error::BadOpcodes);
        }
        if low_val > high_val {
            return Err(Error::BadScanrange);
        }
        if self.scan.is_some() {
            self.end_scan()?;
        }

        let mut current_leaf = if self.root_is_leaf {
            self.root_page_no
        } else {
            let mut path = Vec::new();
            self.find_leaf_for(low_val, &mut path)?
        };

        loop {
            let frame_id = self.buffer.write().unwrap().read_page(&self.file, current_leaf)?;
            let node = { let bm = self.buffer.read().unwrap(); LeafNode::decode(bm.page_data(frame_id)) };

            if let Some(i) = node.keys.iter().position(|&k| satisfies_low(k, low_val, low_op)) {
                if violates_high(node.keys[i], high_val, high_op) {
                    self.buffer.write().unwrap().unpin_page(&self.file, current_leaf, false)?;
                    return Err(Error::NoSuchKeyFound);
                }
                self.scan = Some(ScanState {
                    leaf_page_no: current_leaf,
                    next_entry: i,
                    high_val,
                    high_op,
                    exhausted: false,
                });
                return Ok(());
            }

            let next_leaf = node.right_sibling;
            self.buffer.write().unwrap().unpin_page(&self.file, current_leaf, false)?;
            if next_leaf == INVALID_PAGE_ID {
                return Err(Error::NoSuchKeyFound);
            }
            current_leaf = next_leaf;
        }
    }

    /// Returns the next matching `rid`, or `IndexScanCompleted` once the
    /// bound is exhausted.
    pub fn scan_next(&mut self) -> Result<RecordId> {
        let mut state = self.scan.ok_or(Error::ScanNotInitialized)?;
        if state.exhausted {
            return Err(Error::IndexScanCompleted);
        }

        let frame_id = self
            .buffer
            .read()
            .unwrap()
            .frame_of_pinned(&self.file, state.leaf_page_no)
            .ok_or(Error::BadBuffer)?;
        let node = { let bm = self.buffer.read().unwrap(); LeafNode::decode(bm.page_data(frame_id)) };
        let rid = node.rids[state.next_entry];

        let advance_to = state.next_entry + 1;
        if advance_to < node.slots_used() {
            if violates_high(node.keys[advance_to], state.high_val, state.high_op) {
                state.exhausted = true;
            } else {
                state.next_entry = advance_to;
            }
        } else if node.right_sibling == INVALID_PAGE_ID {
            state.exhausted = true;
        } else {
            let next_leaf = node.right_sibling;
            self.buffer.write().unwrap().unpin_page(&self.file, state.leaf_page_no, false)?;
            let new_frame = self.buffer.write().unwrap().read_page(&self.file, next_leaf)?;
            let new_node = { let bm = self.buffer.read().unwrap(); LeafNode::decode(bm.page_data(new_frame)) };

            state.leaf_page_no = next_leaf;
            if new_node.slots_used() == 0 || violates_high(new_node.keys[0], state.high_val, state.high_op) {
                state.exhausted = true;
            } else {
                state.next_entry = 0;
            }
        }

        self.scan = Some(state);
        Ok(rid)
    }

    /// Ends the current scan, unpinning its leaf. A no-op error from an
    /// already-unpinned leaf is swallowed, matching the tolerance
    /// `unpin_page` documents for this exact sequence.
    pub fn end_scan(&mut self) -> Result<()> {
        let state = self.scan.take().ok_or(Error::ScanNotInitialized)?;
        match self.buffer.write().unwrap().unpin_page(&self.file, state.leaf_page_no, false) {
            Ok(()) | Err(Error::PageNotPinned) | Err(Error::BadBuffer) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl<F: PagedFile> Drop for BTreeIndex<F> {
    fn drop(&mut self) {
        if self.scan.is_some() {
            let _ = self.end_scan();
        }
        if let Err(err) = self.buffer.write().unwrap().flush_file(&self.file) {
            log::error!("failed to flush index file {} on drop: {err}", self.index_name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::HeapFile;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn new_relation_and_buffer() -> (Relation<HeapFile>, Arc<RwLock<BufferManager<HeapFile>>>) {
        let buffer = Arc::new(RwLock::new(BufferManager::new(32)));
        let file = Arc::new(RwLock::new(HeapFile::new_for_test()));
        let relation = Relation::create(file, buffer.clone()).unwrap();
        (relation, buffer)
    }

    fn insert_rows(relation: &mut Relation<HeapFile>, keys: &[i32]) -> Vec<RecordId> {
        keys.iter()
            .map(|&k| relation.insert_tuple(Tuple::from(k.to_le_bytes().to_vec())).unwrap())
            .collect()
    }

    #[test]
    fn build_then_point_range_scan_matches_expected_rids() {
        let (mut relation, buffer) = new_relation_and_buffer();
        let mut keys: Vec<i32> = (0..500).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        keys.shuffle(&mut rng);
        let rids = insert_rows(&mut relation, &keys);
        let rid_by_key: std::collections::HashMap<i32, RecordId> =
            keys.iter().copied().zip(rids.iter().copied()).collect();

        let mut index = BTreeIndex::build("rel", 0, 0, buffer, &relation).unwrap();

        index.start_scan(25, CompareOp::GT, 40, CompareOp::LTE).unwrap();
        let mut results = Vec::new();
        loop {
            match index.scan_next() {
                Ok(rid) => results.push(rid),
                Err(Error::IndexScanCompleted) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        index.end_scan().unwrap();

        let expected: Vec<RecordId> = (26..=40).map(|k| rid_by_key[&k]).collect();
        assert_eq!(results, expected);
    }

    #[test]
    fn empty_range_raises_no_such_key_found_and_unpins() {
        let (mut relation, buffer) = new_relation_and_buffer();
        let keys: Vec<i32> = (0..100).collect();
        insert_rows(&mut relation, &keys);
        let mut index = BTreeIndex::build("rel", 0, 0, buffer, &relation).unwrap();

        let result = index.start_scan(200, CompareOp::GTE, 300, CompareOp::LTE);
        assert!(matches!(result, Err(Error::NoSuchKeyFound)));
        assert!(index.scan.is_none());
    }

    #[test]
    fn bad_scanrange_when_low_exceeds_high() {
        let (mut relation, buffer) = new_relation_and_buffer();
        insert_rows(&mut relation, &[1, 2, 3]);
        let mut index = BTreeIndex::build("rel", 0, 0, buffer, &relation).unwrap();
        let result = index.start_scan(10, CompareOp::GT, 1, CompareOp::LT);
        assert!(matches!(result, Err(Error::BadScanrange)));
    }

    #[test]
    fn bad_opcodes_when_operators_are_swapped() {
        let (mut relation, buffer) = new_relation_and_buffer();
        insert_rows(&mut relation, &[1, 2, 3]);
        let mut index = BTreeIndex::build("rel", 0, 0, buffer, &relation).unwrap();
        let result = index.start_scan(1, CompareOp::LT, 10, CompareOp::GT);
        assert!(matches!(result, Err(Error::BadOpcodes)));
    }

    #[test]
    fn leaf_and_internal_splits_keep_sibling_chain_sorted() {
        let (mut relation, buffer) = new_relation_and_buffer();
        let count = (LEAF_CAP as i32) * 4 + 7;
        let mut keys: Vec<i32> = (0..count).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        keys.shuffle(&mut rng);
        insert_rows(&mut relation, &keys);

        let mut index = BTreeIndex::build("rel", 0, 0, buffer, &relation).unwrap();
        assert!(!index.root_is_leaf());

        index.start_scan(-1, CompareOp::GT, count, CompareOp::LT).unwrap();
        let mut seen = Vec::new();
        loop {
            match index.scan_next() {
                Ok(rid) => seen.push(rid),
                Err(Error::IndexScanCompleted) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        index.end_scan().unwrap();
        assert_eq!(seen.len(), count as usize);
    }

    #[test]
    fn leaf_split_boundary_matches_post_insert_ceiling() {
        let (mut relation, buffer) = new_relation_and_buffer();
        // Ascending keys fill the root leaf to exactly LEAF_CAP, then the
        // (LEAF_CAP + 1)-th insert forces the one and only split. Since
        // every key is strictly increasing, the split partitions a run of
        // 0..=LEAF_CAP in place: the left leaf keeps indices [0, threshold)
        // and the right leaf keeps [threshold, LEAF_CAP + 1), so the
        // pushed-up key lands on the value equal to the threshold itself.
        let keys: Vec<i32> = (0..=(LEAF_CAP as i32)).collect();
        insert_rows(&mut relation, &keys);

        let index = BTreeIndex::build("rel", 0, 0, buffer.clone(), &relation).unwrap();
        assert!(!index.root_is_leaf());

        let threshold = ceil_div(LEAF_CAP + 1, 2);

        let root_frame = buffer.write().unwrap().read_page(&index.file, index.root_page_no).unwrap();
        let root = { let bm = buffer.read().unwrap(); InternalNode::decode(bm.page_data(root_frame)) };
        buffer.write().unwrap().unpin_page(&index.file, index.root_page_no, false).unwrap();

        assert_eq!(root.keys.len(), 1);
        assert_eq!(root.keys[0], threshold as i32, "pushed-up key must equal the split threshold");

        let left_frame = buffer.write().unwrap().read_page(&index.file, root.children[0]).unwrap();
        let left = { let bm = buffer.read().unwrap(); LeafNode::decode(bm.page_data(left_frame)) };
        buffer.write().unwrap().unpin_page(&index.file, root.children[0], false).unwrap();

        let right_frame = buffer.write().unwrap().read_page(&index.file, root.children[1]).unwrap();
        let right = { let bm = buffer.read().unwrap(); LeafNode::decode(bm.page_data(right_frame)) };
        buffer.write().unwrap().unpin_page(&index.file, root.children[1], false).unwrap();

        assert_eq!(left.keys.len(), threshold);
        assert_eq!(right.keys.len(), LEAF_CAP + 1 - threshold);
        assert_eq!(left.keys, (0..threshold as i32).collect::<Vec<_>>());
        assert_eq!(right.keys, (threshold as i32..=LEAF_CAP as i32).collect::<Vec<_>>());
        assert_eq!(right.keys[0], threshold as i32);
    }

    #[test]
    fn reopening_an_existing_index_rejects_mismatched_relation() {
        let (mut relation, buffer) = new_relation_and_buffer();
        insert_rows(&mut relation, &[1, 2, 3]);
        let index = BTreeIndex::build("orders", 4, 0, buffer.clone(), &relation).unwrap();
        let index_name = index.index_name().to_string();
        drop(index);

        assert!(HeapFile::exists(&index_name));
        let result = BTreeIndex::<HeapFile>::open_existing(index_name, "customers", 4, 0, buffer);
        assert!(matches!(result, Err(Error::BadIndexInfo(_))));
    }
}
