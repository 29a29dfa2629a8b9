use std::fmt;

use crate::block::BlockId;
use crate::error::{MemFsError, Pool, Result};
use crate::meta::{FileKind, Metadata};

/// Index of a record in the node pool. The root directory is always node 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> u64 {
        id.0 as u64
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The first and last block of a non-empty file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    pub head: BlockId,
    pub tail: BlockId,
}

/// What a node links to. Directories own a sibling list of children and point
/// back at their parent (the root is its own parent). Files own a block chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Directory {
        first_child: Option<NodeId>,
        parent: NodeId,
    },
    File {
        blocks: Option<Chain>,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub meta: Metadata,
    /// Next sibling in the parent directory.
    pub next: Option<NodeId>,
}

impl Node {
    /// Builds an unlinked node whose links match the type bits of `meta`.
    pub fn new(name: &str, meta: Metadata, parent: NodeId) -> Self {
        let kind = match meta.kind() {
            FileKind::Directory => NodeKind::Directory {
                first_child: None,
                parent,
            },
            FileKind::File => NodeKind::File { blocks: None },
        };
        Self {
            name: name.to_string(),
            kind,
            meta,
            next: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        match self.kind {
            NodeKind::Directory { .. } => true,
            NodeKind::File { .. } => false,
        }
    }
}

enum Slot {
    Free { next: Option<NodeId> },
    Used(Node),
}

/// A fixed capacity arena of nodes. Unused records are linked into a free list
/// through the same slot that holds a live node.
pub struct NodePool {
    slots: Vec<Slot>,
    free_head: Option<NodeId>,
    free_count: usize,
    /// Bumped every time a slot is freed.
    generations: Vec<u64>,
}

impl NodePool {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|i| Slot::Free {
                next: if i + 1 < capacity {
                    Some(NodeId((i + 1) as u32))
                } else {
                    None
                },
            })
            .collect();

        Self {
            slots,
            free_head: if capacity > 0 { Some(NodeId(0)) } else { None },
            free_count: capacity,
            generations: vec![0; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    /// Pops a record off the free list and stores `node` in it.
    pub fn allocate(&mut self, node: Node) -> Result<NodeId> {
        let id = match self.free_head {
            Some(id) => id,
            None => {
                warn!("node pool exhausted");
                return Err(MemFsError::Exhausted(Pool::Nodes));
            }
        };
        let next = match &self.slots[id.index()] {
            Slot::Free { next } => *next,
            Slot::Used(_) => {
                return Err(MemFsError::fault(format!(
                    "free list head {} is in use",
                    id
                )))
            }
        };

        self.slots[id.index()] = Slot::Used(node);
        self.free_head = next;
        self.free_count -= 1;
        Ok(id)
    }

    /// Clears the record and pushes it onto the free list, handing back the
    /// node that occupied it.
    pub fn free(&mut self, id: NodeId) -> Result<Node> {
        self.get(id)?;
        let slot = std::mem::replace(
            &mut self.slots[id.index()],
            Slot::Free {
                next: self.free_head,
            },
        );
        self.free_head = Some(id);
        self.free_count += 1;
        self.generations[id.index()] += 1;
        match slot {
            Slot::Used(node) => Ok(node),
            Slot::Free { .. } => Err(MemFsError::fault(format!("node {} is free", id))),
        }
    }

    pub fn get(&self, id: NodeId) -> Result<&Node> {
        match self.slots.get(id.index()) {
            Some(Slot::Used(node)) => Ok(node),
            Some(Slot::Free { .. }) => Err(MemFsError::fault(format!("node {} is free", id))),
            None => Err(MemFsError::fault(format!("node {} is out of range", id))),
        }
    }

    pub fn get_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        match self.slots.get_mut(id.index()) {
            Some(Slot::Used(node)) => Ok(node),
            Some(Slot::Free { .. }) => Err(MemFsError::fault(format!("node {} is free", id))),
            None => Err(MemFsError::fault(format!("node {} is out of range", id))),
        }
    }

    /// Tells apart successive nodes that occupy the same slot.
    pub fn generation(&self, id: NodeId) -> u64 {
        self.generations.get(id.index()).copied().unwrap_or(0)
    }

    pub fn is_used(&self, id: NodeId) -> bool {
        match self.slots.get(id.index()) {
            Some(Slot::Used(_)) => true,
            _ => false,
        }
    }

    /// Iterates over every live node.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| match slot {
            Slot::Used(node) => Some((NodeId(i as u32), node)),
            Slot::Free { .. } => None,
        })
    }
}
