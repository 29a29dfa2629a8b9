use crate::error::{MemFsError, Result};

/// Size of one storage block. Every file's content is carved into blocks of
/// this span.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// Total volatile address space managed by the block store.
pub const ADDRESS_SPACE: u64 = 4 * 1024 * 1024 * 1024;

/// Accounting unit of one namespace node. The node pool capacity is the
/// number of records of this size that fit in its reserved blocks.
pub const NODE_RECORD_SIZE: usize = 256;

/// Blocks at the front of the address space set aside for the node pool.
pub const NODE_POOL_BLOCKS: usize = 30;

/// Longest file name accepted, in bytes.
pub const MAX_NAME_LEN: usize = 127;

/// Width of one block index table slot in bytes.
const INDEX_SLOT_SIZE: usize = 2;

/// Largest number of blocks addressable by a 16-bit block index.
const MAX_BLOCKS: u64 = 1 << 16;

/// Describes how the address space is carved up.
///
/// # Layout
/// ===========================================================
/// | Node pool | Block index table | File data blocks ...   |
/// ===========================================================
///
/// Block 0 always falls inside the reserved prefix, which leaves index 0 free
/// to act as the free list head and as the end-of-chain sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub address_space: u64,
    pub block_size: usize,
    pub node_blocks: usize,
    /// Enables the single entry path lookup cache.
    pub lookup_cache: bool,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            address_space: ADDRESS_SPACE,
            block_size: BLOCK_SIZE,
            node_blocks: NODE_POOL_BLOCKS,
            lookup_cache: true,
        }
    }
}

impl Geometry {
    pub fn new(address_space: u64, block_size: usize) -> Self {
        Self {
            address_space,
            block_size,
            ..Self::default()
        }
    }

    /// Sets the number of reserved blocks backing the node pool.
    pub fn with_node_blocks(mut self, blocks: usize) -> Self {
        self.node_blocks = blocks;
        self
    }

    pub fn with_lookup_cache(mut self, enabled: bool) -> Self {
        self.lookup_cache = enabled;
        self
    }

    /// The total number of blocks (N), reserved ones included.
    pub fn block_count(&self) -> usize {
        (self.address_space / self.block_size as u64) as usize
    }

    /// Blocks occupied by the block index table, one 16-bit slot per block.
    pub fn index_blocks(&self) -> usize {
        let bytes = self.block_count() * INDEX_SLOT_SIZE;
        (bytes + self.block_size - 1) / self.block_size
    }

    /// Length of the reserved prefix. Data blocks start at this index.
    pub fn reserved_blocks(&self) -> usize {
        self.node_blocks + self.index_blocks()
    }

    pub fn data_blocks(&self) -> usize {
        self.block_count().saturating_sub(self.reserved_blocks())
    }

    pub fn node_capacity(&self) -> usize {
        self.node_blocks * self.block_size / NODE_RECORD_SIZE
    }

    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() || self.block_size < NODE_RECORD_SIZE {
            return Err(MemFsError::InvalidArgument(format!(
                "block size {} must be a power of two of at least {} bytes",
                self.block_size, NODE_RECORD_SIZE
            )));
        }
        if self.address_space % self.block_size as u64 != 0 {
            return Err(MemFsError::InvalidArgument(format!(
                "address space {} is not a multiple of the block size {}",
                self.address_space, self.block_size
            )));
        }
        let blocks = self.address_space / self.block_size as u64;
        if blocks > MAX_BLOCKS {
            return Err(MemFsError::InvalidArgument(format!(
                "{} blocks exceed the 16-bit block index range",
                blocks
            )));
        }
        if self.node_capacity() == 0 {
            return Err(MemFsError::InvalidArgument(
                "node pool cannot hold the root directory".to_string(),
            ));
        }
        if self.reserved_blocks() >= self.block_count() {
            return Err(MemFsError::InvalidArgument(format!(
                "reserved prefix of {} blocks leaves no room for data in {} blocks",
                self.reserved_blocks(),
                self.block_count()
            )));
        }
        Ok(())
    }
}
