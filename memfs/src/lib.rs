//! A volatile filesystem that lives entirely in memory.
//!
//! A bounded address space is cut into fixed-size blocks. The first blocks hold
//! the block index table and the node pool; the rest carry file data. Files
//! are chains of blocks threaded through the index table, directories are
//! sibling lists of nodes, and every operation is addressed by an absolute
//! path. Contents vanish when the [`MemFs`] is dropped.

#[macro_use]
extern crate log;

pub mod block;
pub mod config;
pub mod error;
pub mod file;
pub mod fs;
pub mod meta;
pub mod node;
pub mod path;
mod shared;
pub mod tree;

pub use crate::config::{Geometry, ADDRESS_SPACE, BLOCK_SIZE, MAX_NAME_LEN, NODE_RECORD_SIZE};
pub use crate::error::{MemFsError, Pool, Result};
pub use crate::fs::{FsStats, MemFs};
pub use crate::meta::{FileKind, GroupId, Metadata, ModeBits, UserId};
pub use crate::node::NodeId;
pub use crate::shared::SharedMemFs;
pub use crate::tree::{DirEntry, ReadDir};
