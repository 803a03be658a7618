//! Content-addressed block store.
//!
//! The store exclusively owns blocks; everything else holds [`BlockRef`]
//! handles (arena indices) or 32-byte hashes. Slots are retired rather
//! than recycled so a handle can never silently alias a different block —
//! a released slot stays empty for the lifetime of the store, which is
//! bounded by pruning.

use std::collections::{HashMap, HashSet};

use tandem_types::Hash32;

use crate::block::Block;

/// A weak handle to a block owned by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(usize);

/// Arena of blocks indexed by content hash.
#[derive(Debug, Default)]
pub struct BlockStore {
    slots: Vec<Option<Block>>,
    index: HashMap<Hash32, BlockRef>,
    pinned: HashSet<BlockRef>,
}

impl BlockStore {
    pub fn new() -> Self {
        BlockStore::default()
    }

    /// Add a block, idempotent by hash: adding an already-known block
    /// returns the existing handle and drops the duplicate.
    pub fn add_blk(&mut self, blk: Block) -> BlockRef {
        if let Some(&existing) = self.index.get(&blk.hash()) {
            return existing;
        }
        let r = BlockRef(self.slots.len());
        self.index.insert(blk.hash(), r);
        self.slots.push(Some(blk));
        r
    }

    /// Look up a block by content hash.
    pub fn find(&self, hash: &Hash32) -> Option<BlockRef> {
        self.index.get(hash).copied()
    }

    /// Borrow a block; `None` if the handle was released.
    pub fn get(&self, r: BlockRef) -> Option<&Block> {
        self.slots.get(r.0).and_then(|slot| slot.as_ref())
    }

    /// Mutably borrow a block; `None` if the handle was released.
    pub fn get_mut(&mut self, r: BlockRef) -> Option<&mut Block> {
        self.slots.get_mut(r.0).and_then(|slot| slot.as_mut())
    }

    /// Protect a block from release (used for genesis).
    pub fn pin(&mut self, r: BlockRef) {
        self.pinned.insert(r);
    }

    /// Release a block unless it is pinned or already gone. Returns
    /// whether the slot was actually freed.
    pub fn try_release(&mut self, r: BlockRef) -> bool {
        if self.pinned.contains(&r) {
            return false;
        }
        let Some(slot) = self.slots.get_mut(r.0) else {
            return false;
        };
        let Some(blk) = slot.take() else {
            return false;
        };
        self.index.remove(&blk.hash());
        true
    }

    /// Number of live blocks.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
