use std::time::SystemTime;

use crate::block::BlockStore;
use crate::config::{Geometry, MAX_NAME_LEN};
use crate::error::{MemFsError, Result};
use crate::file;
use crate::meta::{GroupId, Metadata, ModeBits, UserId, DIRECTORY_TYPE, FILE_TYPE, TYPE_MASK};
use crate::node::{NodeId, NodeKind};
use crate::tree::{Namespace, ReadDir};

/// Capacity figures reported to `statfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStats {
    pub block_size: usize,
    /// Blocks available for file data.
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub total_nodes: u64,
    pub free_nodes: u64,
    pub max_name_len: usize,
}

/// A volatile filesystem addressed by absolute paths.
///
/// Nothing here locks: every method takes `&mut self` and runs to completion.
/// Hosts that dispatch requests from several threads share the filesystem
/// through [`crate::SharedMemFs`].
pub struct MemFs {
    geometry: Geometry,
    blocks: BlockStore,
    tree: Namespace,
}

impl MemFs {
    /// Prepares an empty namespace holding a `0755` root directory owned by
    /// `uid`/`gid`.
    pub fn new(geometry: Geometry, uid: UserId, gid: GroupId) -> Result<Self> {
        let blocks = BlockStore::new(&geometry)?;
        let root = Metadata::new(DIRECTORY_TYPE | 0o755, uid, gid);
        let tree = Namespace::new(geometry.node_capacity(), geometry.lookup_cache, root)?;
        info!(
            "initialized {} data blocks of {} bytes and {} nodes",
            blocks.data_blocks(),
            geometry.block_size,
            geometry.node_capacity()
        );

        Ok(Self {
            geometry,
            blocks,
            tree,
        })
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn namespace(&self) -> &Namespace {
        &self.tree
    }

    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    pub fn getattr(&mut self, path: &str) -> Result<Metadata> {
        let id = self.tree.resolve(path)?;
        Ok(self.tree.node(id)?.meta.clone())
    }

    /// Resolves a path to its node along with the node's attributes.
    pub fn lookup(&mut self, path: &str) -> Result<(NodeId, Metadata)> {
        let id = self.tree.resolve(path)?;
        Ok((id, self.tree.node(id)?.meta.clone()))
    }

    pub fn readdir(&mut self, path: &str) -> Result<ReadDir<'_>> {
        let id = self.tree.resolve(path)?;
        self.tree.list(id)
    }

    /// Creates an empty regular file.
    pub fn mknod(&mut self, path: &str, mode: ModeBits, uid: UserId, gid: GroupId) -> Result<NodeId> {
        let meta = Metadata::new(FILE_TYPE | (mode & !TYPE_MASK), uid, gid);
        self.tree.create(path, meta)
    }

    pub fn mkdir(&mut self, path: &str, mode: ModeBits, uid: UserId, gid: GroupId) -> Result<NodeId> {
        let meta = Metadata::new(DIRECTORY_TYPE | (mode & !TYPE_MASK), uid, gid);
        self.tree.create(path, meta)
    }

    /// Checks that `path` exists. No per-open state is kept.
    pub fn open(&mut self, path: &str) -> Result<()> {
        self.tree.resolve(path).map(|_| ())
    }

    pub fn read(&mut self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>> {
        let id = self.tree.resolve(path)?;
        let node = self.tree.node_mut(id)?;
        let data = file::read(&self.blocks, node, offset, len)?;
        node.meta.accessed_at = SystemTime::now();
        debug!("read {} bytes of {} at offset {}", data.len(), path, offset);
        Ok(data)
    }

    /// Writes `buf` at `offset` and returns the number of bytes committed,
    /// which falls short of `buf.len()` when the block pool runs out.
    pub fn write(&mut self, path: &str, offset: u64, buf: &[u8]) -> Result<usize> {
        let id = self.tree.resolve(path)?;
        let node = self.tree.node_mut(id)?;
        let written = file::write(&mut self.blocks, node, offset, buf)?;
        debug!("wrote {} bytes to {} at offset {}", written, path, offset);
        Ok(written)
    }

    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        let id = self.tree.resolve(path)?;
        let node = self.tree.node_mut(id)?;
        file::truncate(&mut self.blocks, node, size)?;
        debug!("truncated {} to {} bytes", path, size);
        Ok(())
    }

    pub fn unlink(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.tree.resolve_parent(path)?;
        self.tree.remove_file(parent, name, &mut self.blocks)
    }

    /// Removes an empty directory. Non-empty directories fail with
    /// [`MemFsError::NotEmpty`].
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        let (parent, name) = self.tree.resolve_parent(path)?;
        self.tree.remove_dir(parent, name)
    }

    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        self.tree.rename(old_path, new_path)
    }

    pub fn chmod(&mut self, path: &str, mode: ModeBits) -> Result<()> {
        let id = self.tree.resolve(path)?;
        self.tree.node_mut(id)?.meta.set_permissions(mode);
        Ok(())
    }

    pub fn chown(&mut self, path: &str, uid: Option<UserId>, gid: Option<GroupId>) -> Result<()> {
        let id = self.tree.resolve(path)?;
        self.tree.node_mut(id)?.meta.set_owner(uid, gid);
        Ok(())
    }

    /// Sets the access and modification times. `None` leaves a time as is.
    pub fn utimens(
        &mut self,
        path: &str,
        accessed_at: Option<SystemTime>,
        modified_at: Option<SystemTime>,
    ) -> Result<()> {
        let id = self.tree.resolve(path)?;
        let meta = &mut self.tree.node_mut(id)?.meta;
        if let Some(time) = accessed_at {
            meta.accessed_at = time;
        }
        if let Some(time) = modified_at {
            meta.modified_at = time;
        }
        meta.changed_at = SystemTime::now();
        Ok(())
    }

    pub fn statfs(&self) -> FsStats {
        let nodes = self.tree.nodes();
        FsStats {
            block_size: self.blocks.block_size(),
            total_blocks: self.blocks.data_blocks() as u64,
            free_blocks: self.blocks.free_count() as u64,
            total_nodes: nodes.capacity() as u64,
            free_nodes: nodes.free_count() as u64,
            max_name_len: MAX_NAME_LEN,
        }
    }

    /// Verifies the ownership invariants of the whole filesystem:
    ///
    /// - every data block is on the free list or in exactly one file chain,
    /// - every chain terminates, ends at the recorded tail and is exactly as
    ///   long as the file size requires,
    /// - every live node is reachable from the root exactly once.
    pub fn check(&self) -> Result<()> {
        let first = self.blocks.first_data_block() as usize;
        let mut owned = vec![false; self.blocks.block_count()];

        let free = self.blocks.free_list()?;
        if free.len() != self.blocks.free_count() {
            return Err(MemFsError::fault(format!(
                "free list holds {} blocks but {} are counted free",
                free.len(),
                self.blocks.free_count()
            )));
        }
        for block in free {
            claim(&mut owned, block as usize)?;
        }

        for (id, node) in self.tree.nodes().iter() {
            let chain = match node.kind {
                NodeKind::File { blocks } => blocks,
                NodeKind::Directory { .. } => continue,
            };
            let expected = file::blocks_for(node.meta.size, self.blocks.block_size());
            let blocks = match chain {
                Some(chain) => {
                    let blocks = self.blocks.chain(chain.head)?;
                    if blocks.last() != Some(&chain.tail) {
                        return Err(MemFsError::fault(format!(
                            "node {} records tail {} but its chain ends elsewhere",
                            id, chain.tail
                        )));
                    }
                    blocks
                }
                None => Vec::new(),
            };
            if blocks.len() as u64 != expected {
                return Err(MemFsError::fault(format!(
                    "node {} of {} bytes owns {} blocks",
                    id,
                    node.meta.size,
                    blocks.len()
                )));
            }
            for block in blocks {
                claim(&mut owned, block as usize)?;
            }
        }

        if let Some(block) = (first..owned.len()).find(|&block| !owned[block]) {
            return Err(MemFsError::fault(format!("block {} is leaked", block)));
        }

        self.check_reachability()
    }

    fn check_reachability(&self) -> Result<()> {
        let nodes = self.tree.nodes();
        let mut seen = vec![false; nodes.capacity()];
        seen[NodeId::ROOT.index()] = true;
        let mut reached = 1;
        let mut pending = vec![NodeId::ROOT];

        while let Some(dir) = pending.pop() {
            for entry in self.tree.list(dir)?.skip(2) {
                let entry = entry?;
                if seen[entry.node.index()] {
                    return Err(MemFsError::fault(format!(
                        "node {} is linked more than once",
                        entry.node
                    )));
                }
                seen[entry.node.index()] = true;
                reached += 1;
                if let NodeKind::Directory { parent, .. } = self.tree.node(entry.node)?.kind {
                    if parent != dir {
                        return Err(MemFsError::fault(format!(
                            "directory {} points at parent {} but lives in {}",
                            entry.node, parent, dir
                        )));
                    }
                    pending.push(entry.node);
                }
            }
        }

        let live = nodes.capacity() - nodes.free_count();
        if reached != live {
            return Err(MemFsError::fault(format!(
                "{} live nodes but only {} reachable from the root",
                live, reached
            )));
        }
        Ok(())
    }
}

fn claim(owned: &mut [bool], block: usize) -> Result<()> {
    if owned[block] {
        return Err(MemFsError::fault(format!(
            "block {} has more than one owner",
            block
        )));
    }
    owned[block] = true;
    Ok(())
}
