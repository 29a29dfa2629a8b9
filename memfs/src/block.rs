//! Fixed-size block allocator over a bounded address space.
//!
//! Every block owns one 16-bit slot in the block index table. A free block's
//! slot names the next free block; a used block's slot names the next block of
//! the same file. Zero terminates both kinds of chain, which works because
//! block 0 sits in the reserved prefix and is never handed out. Slot 0 itself
//! holds the head of the free list.
//!
//! Backing memory is allocated on first use and released on free, so a block
//! is in use exactly when it is backed.

use crate::config::Geometry;
use crate::error::{MemFsError, Pool, Result};

/// Index of a block in the address space.
pub type BlockId = u16;

/// Terminates a chain and marks an empty free list.
pub const NIL: BlockId = 0;

pub struct BlockStore {
    block_size: usize,
    /// First block available for file data.
    first_data: usize,
    /// The block index table.
    table: Vec<BlockId>,
    mem: Vec<Option<Box<[u8]>>>,
    free_count: usize,
}

impl BlockStore {
    /// Lays out an address space whose data blocks are all free, linked in
    /// ascending order.
    pub fn new(geometry: &Geometry) -> Result<Self> {
        geometry.validate()?;
        let count = geometry.block_count();
        let first_data = geometry.reserved_blocks();

        let mut table = vec![NIL; count];
        for i in first_data..count - 1 {
            table[i] = (i + 1) as BlockId;
        }
        table[0] = first_data as BlockId;

        let mut mem = Vec::with_capacity(count);
        mem.resize_with(count, || None);

        Ok(Self {
            block_size: geometry.block_size,
            first_data,
            table,
            mem,
            free_count: count - first_data,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of blocks in the whole address space, reserved ones included.
    pub fn block_count(&self) -> usize {
        self.table.len()
    }

    pub fn first_data_block(&self) -> BlockId {
        self.first_data as BlockId
    }

    pub fn data_blocks(&self) -> usize {
        self.table.len() - self.first_data
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Pops the head of the free list and backs it with zeroed memory. The
    /// popped block's slot is cleared so it starts as a one-block chain.
    pub fn allocate(&mut self) -> Result<BlockId> {
        let block = self.table[0];
        if block == NIL {
            warn!("block pool exhausted");
            return Err(MemFsError::Exhausted(Pool::Blocks));
        }
        self.check_data_range(block)?;
        if self.mem[block as usize].is_some() {
            return Err(MemFsError::fault(format!(
                "free list head {} is already backed",
                block
            )));
        }

        self.mem[block as usize] = Some(vec![0; self.block_size].into_boxed_slice());
        self.table[0] = self.table[block as usize];
        self.table[block as usize] = NIL;
        self.free_count -= 1;
        trace!("allocated block {}", block);
        Ok(block)
    }

    /// Releases every block reachable from `head` and splices the whole chain
    /// onto the front of the free list. Returns the number of blocks freed.
    ///
    /// The chain is validated before anything is touched: a block that is
    /// already free or a chain that loops fails without side effects.
    pub fn free_chain(&mut self, head: BlockId) -> Result<usize> {
        let mut tail = head;
        let mut len = 1;
        self.check_used(head)?;
        loop {
            let next = self.table[tail as usize];
            if next == NIL {
                break;
            }
            self.check_used(next)?;
            len += 1;
            if len > self.data_blocks() {
                return Err(MemFsError::fault(format!(
                    "chain starting at block {} does not terminate",
                    head
                )));
            }
            tail = next;
        }

        let mut block = head;
        loop {
            self.mem[block as usize] = None;
            trace!("freed block {}", block);
            if block == tail {
                break;
            }
            block = self.table[block as usize];
        }
        self.table[tail as usize] = self.table[0];
        self.table[0] = head;
        self.free_count += len;
        Ok(len)
    }

    /// Frees every block that follows `block` in its chain and makes `block`
    /// the terminal one.
    pub fn free_after(&mut self, block: BlockId) -> Result<usize> {
        let next = self.next(block)?;
        match next {
            Some(next) => {
                let freed = self.free_chain(next)?;
                self.table[block as usize] = NIL;
                Ok(freed)
            }
            None => Ok(0),
        }
    }

    /// Appends `to` after the terminal block `from`.
    pub fn link(&mut self, from: BlockId, to: BlockId) -> Result<()> {
        self.check_used(from)?;
        self.check_used(to)?;
        if self.table[from as usize] != NIL {
            return Err(MemFsError::fault(format!(
                "block {} is not the end of its chain",
                from
            )));
        }
        self.table[from as usize] = to;
        Ok(())
    }

    /// Returns the block after `block` in its file chain.
    pub fn next(&self, block: BlockId) -> Result<Option<BlockId>> {
        self.check_used(block)?;
        match self.table[block as usize] {
            NIL => Ok(None),
            next => Ok(Some(next)),
        }
    }

    pub fn data(&self, block: BlockId) -> Result<&[u8]> {
        self.check_used(block)?;
        match &self.mem[block as usize] {
            Some(buf) => Ok(&buf[..]),
            None => Err(MemFsError::fault(format!("block {} is not backed", block))),
        }
    }

    pub fn data_mut(&mut self, block: BlockId) -> Result<&mut [u8]> {
        self.check_used(block)?;
        match &mut self.mem[block as usize] {
            Some(buf) => Ok(&mut buf[..]),
            None => Err(MemFsError::fault(format!("block {} is not backed", block))),
        }
    }

    pub fn is_used(&self, block: BlockId) -> bool {
        (block as usize) >= self.first_data
            && (block as usize) < self.mem.len()
            && self.mem[block as usize].is_some()
    }

    /// Walks the free list from slot 0.
    pub fn free_list(&self) -> Result<Vec<BlockId>> {
        let mut blocks = Vec::new();
        let mut block = self.table[0];
        while block != NIL {
            self.check_data_range(block)?;
            if self.is_used(block) {
                return Err(MemFsError::fault(format!(
                    "free list reaches used block {}",
                    block
                )));
            }
            blocks.push(block);
            if blocks.len() > self.data_blocks() {
                return Err(MemFsError::fault("free list does not terminate".to_string()));
            }
            block = self.table[block as usize];
        }
        Ok(blocks)
    }

    /// Walks a file chain from `head`.
    pub fn chain(&self, head: BlockId) -> Result<Vec<BlockId>> {
        let mut blocks = Vec::new();
        let mut block = Some(head);
        while let Some(current) = block {
            blocks.push(current);
            if blocks.len() > self.data_blocks() {
                return Err(MemFsError::fault(format!(
                    "chain starting at block {} does not terminate",
                    head
                )));
            }
            block = self.next(current)?;
        }
        Ok(blocks)
    }

    fn check_data_range(&self, block: BlockId) -> Result<()> {
        if (block as usize) < self.first_data || (block as usize) >= self.table.len() {
            return Err(MemFsError::fault(format!(
                "block {} is outside the data region",
                block
            )));
        }
        Ok(())
    }

    fn check_used(&self, block: BlockId) -> Result<()> {
        self.check_data_range(block)?;
        if self.mem[block as usize].is_none() {
            return Err(MemFsError::fault(format!("block {} is free", block)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_store() -> BlockStore {
        // 2 reserved blocks, 6 data blocks.
        BlockStore::new(&Geometry::new(8 * 4096, 4096).with_node_blocks(1)).unwrap()
    }

    #[test]
    fn allocates_in_ascending_order_from_the_data_region() {
        let mut store = small_store();
        assert_eq!(store.first_data_block(), 2);
        assert_eq!(store.allocate().unwrap(), 2);
        assert_eq!(store.allocate().unwrap(), 3);
        assert_eq!(store.free_count(), 4);
    }

    #[test]
    fn allocated_blocks_are_zeroed_and_terminal() {
        let mut store = small_store();
        let block = store.allocate().unwrap();
        assert!(store.data(block).unwrap().iter().all(|&b| b == 0));
        assert_eq!(store.next(block).unwrap(), None);
    }

    #[test]
    fn exhaustion_leaves_the_free_list_intact() {
        let mut store = small_store();
        let blocks: Vec<BlockId> = (0..6).map(|_| store.allocate().unwrap()).collect();
        assert_eq!(
            store.allocate(),
            Err(MemFsError::Exhausted(Pool::Blocks))
        );
        assert_eq!(
            store.allocate(),
            Err(MemFsError::Exhausted(Pool::Blocks))
        );
        assert!(store.free_list().unwrap().is_empty());

        store.free_chain(blocks[3]).unwrap();
        assert_eq!(store.allocate().unwrap(), blocks[3]);
    }

    #[test]
    fn freed_chain_is_spliced_onto_the_front_of_the_free_list() {
        let mut store = small_store();
        let a = store.allocate().unwrap();
        let b = store.allocate().unwrap();
        let c = store.allocate().unwrap();
        store.link(a, b).unwrap();
        store.link(b, c).unwrap();
        assert_eq!(store.chain(a).unwrap(), vec![a, b, c]);

        assert_eq!(store.free_chain(a).unwrap(), 3);
        assert_eq!(store.free_count(), 6);
        assert_eq!(store.free_list().unwrap(), vec![a, b, c, 5, 6, 7]);
        assert!(!store.is_used(b));
    }

    #[test]
    fn free_after_truncates_the_chain() {
        let mut store = small_store();
        let a = store.allocate().unwrap();
        let b = store.allocate().unwrap();
        let c = store.allocate().unwrap();
        store.link(a, b).unwrap();
        store.link(b, c).unwrap();

        assert_eq!(store.free_after(a).unwrap(), 2);
        assert_eq!(store.chain(a).unwrap(), vec![a]);
        assert_eq!(store.free_after(a).unwrap(), 0);
    }

    #[test]
    fn double_free_is_a_structural_fault() {
        let mut store = small_store();
        let block = store.allocate().unwrap();
        store.free_chain(block).unwrap();
        let free_before = store.free_list().unwrap();

        let err = store.free_chain(block).unwrap_err();
        assert!(err.is_fault());
        assert_eq!(store.free_list().unwrap(), free_before);
    }

    #[test]
    fn reserved_blocks_are_never_addressable() {
        let store = small_store();
        assert!(store.next(0).unwrap_err().is_fault());
        assert!(store.data(1).unwrap_err().is_fault());
    }

    #[test]
    fn linking_a_non_terminal_block_is_rejected() {
        let mut store = small_store();
        let a = store.allocate().unwrap();
        let b = store.allocate().unwrap();
        let c = store.allocate().unwrap();
        store.link(a, b).unwrap();
        assert!(store.link(a, c).unwrap_err().is_fault());
        assert_eq!(store.chain(a).unwrap(), vec![a, b]);
    }

    #[test]
    fn full_16_bit_range_keeps_the_last_index_usable() {
        // 65536 blocks of 256 bytes: indices run up to u16::MAX.
        let geometry = Geometry::new(65536 * 256, 256).with_node_blocks(1);
        let mut store = BlockStore::new(&geometry).unwrap();
        let reserved = geometry.reserved_blocks();
        assert_eq!(store.free_count(), 65536 - reserved);

        let mut last = NIL;
        for _ in 0..store.data_blocks() {
            last = store.allocate().unwrap();
        }
        assert_eq!(last, u16::MAX);
        assert_eq!(store.allocate(), Err(MemFsError::Exhausted(Pool::Blocks)));
    }
}
