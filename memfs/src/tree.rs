//! The directory hierarchy.
//!
//! Each directory keeps its children in a singly linked sibling list threaded
//! through the nodes' `next` links. New entries are prepended, so listings run
//! from the most recently created entry to the oldest one.

use crate::block::BlockStore;
use crate::error::{MemFsError, Result};
use crate::meta::{FileKind, Metadata};
use crate::node::{Node, NodeId, NodeKind, NodePool};
use crate::path;

/// Remembers the most recently resolved path.
struct LookupCache {
    enabled: bool,
    entry: Option<(String, NodeId)>,
    hits: u64,
}

impl LookupCache {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entry: None,
            hits: 0,
        }
    }

    fn get(&mut self, path: &str, nodes: &NodePool) -> Option<NodeId> {
        match &self.entry {
            Some((cached, id)) if cached == path && nodes.is_used(*id) => {
                self.hits += 1;
                trace!("lookup cache hit for {}", path);
                Some(*id)
            }
            _ => None,
        }
    }

    fn put(&mut self, path: &str, id: NodeId) {
        if self.enabled {
            self.entry = Some((path.to_string(), id));
        }
    }

    fn clear(&mut self) {
        self.entry = None;
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub node: NodeId,
    pub kind: FileKind,
    pub meta: Metadata,
}

enum Cursor {
    Dot,
    DotDot,
    Child(Option<NodeId>),
}

/// A lazy listing of one directory, starting with the synthesized `.` and
/// `..` entries. Listing again from [`Namespace::list`] starts over.
pub struct ReadDir<'a> {
    nodes: &'a NodePool,
    dir: NodeId,
    parent: NodeId,
    cursor: Cursor,
    visited: usize,
}

impl<'a> ReadDir<'a> {
    fn entry(&self, name: &str, id: NodeId) -> Result<DirEntry> {
        let node = self.nodes.get(id)?;
        Ok(DirEntry {
            name: name.to_string(),
            node: id,
            kind: node.meta.kind(),
            meta: node.meta.clone(),
        })
    }
}

impl<'a> Iterator for ReadDir<'a> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor {
            Cursor::Dot => {
                self.cursor = Cursor::DotDot;
                Some(self.entry(".", self.dir))
            }
            Cursor::DotDot => {
                let first = match self.nodes.get(self.dir).map(|node| &node.kind) {
                    Ok(NodeKind::Directory { first_child, .. }) => *first_child,
                    _ => None,
                };
                self.cursor = Cursor::Child(first);
                Some(self.entry("..", self.parent))
            }
            Cursor::Child(None) => None,
            Cursor::Child(Some(id)) => {
                self.visited += 1;
                if self.visited > self.nodes.capacity() {
                    self.cursor = Cursor::Child(None);
                    return Some(Err(MemFsError::fault(format!(
                        "sibling list of directory {} does not terminate",
                        self.dir
                    ))));
                }
                match self.nodes.get(id) {
                    Ok(node) => {
                        self.cursor = Cursor::Child(node.next);
                        Some(Ok(DirEntry {
                            name: node.name.clone(),
                            node: id,
                            kind: node.meta.kind(),
                            meta: node.meta.clone(),
                        }))
                    }
                    Err(err) => {
                        self.cursor = Cursor::Child(None);
                        Some(Err(err))
                    }
                }
            }
        }
    }
}

/// The namespace of directories and files, backed by a node pool.
pub struct Namespace {
    nodes: NodePool,
    cache: LookupCache,
}

impl Namespace {
    /// Creates a namespace holding only the root directory, which is its own
    /// parent and is never freed.
    pub fn new(capacity: usize, lookup_cache: bool, root_meta: Metadata) -> Result<Self> {
        if root_meta.kind() != FileKind::Directory {
            return Err(MemFsError::InvalidArgument(
                "the root must be a directory".to_string(),
            ));
        }
        let mut nodes = NodePool::new(capacity);
        let root = nodes.allocate(Node::new("/", root_meta, NodeId::ROOT))?;
        debug_assert_eq!(root, NodeId::ROOT);

        Ok(Self {
            nodes,
            cache: LookupCache::new(lookup_cache),
        })
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn nodes(&self) -> &NodePool {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache.hits
    }

    /// Finds a child of `dir` by name with a linear scan of its sibling list.
    pub fn lookup_child(&self, dir: NodeId, name: &str) -> Result<Option<NodeId>> {
        let mut child = self.first_child(dir)?;
        let mut visited = 0;
        while let Some(id) = child {
            let node = self.nodes.get(id)?;
            if node.name == name {
                return Ok(Some(id));
            }
            visited += 1;
            if visited > self.nodes.capacity() {
                return Err(MemFsError::fault(format!(
                    "sibling list of directory {} does not terminate",
                    dir
                )));
            }
            child = node.next;
        }
        Ok(None)
    }

    /// Resolves an absolute path to a node.
    pub fn resolve(&mut self, path: &str) -> Result<NodeId> {
        if let Some(id) = self.cache.get(path, &self.nodes) {
            return Ok(id);
        }

        let mut current = NodeId::ROOT;
        for part in path::components(path)? {
            current = self
                .lookup_child(current, part)?
                .ok_or(MemFsError::NotFound)?;
        }
        self.cache.put(path, current);
        Ok(current)
    }

    /// Resolves the directory that holds the final component of `path`,
    /// returning it along with that component.
    pub fn resolve_parent<'p>(&mut self, path: &'p str) -> Result<(NodeId, &'p str)> {
        let (parents, name) = path::split_last(path)?;
        let mut current = NodeId::ROOT;
        for part in parents {
            current = self
                .lookup_child(current, part)?
                .ok_or(MemFsError::NotFound)?;
        }
        if !self.nodes.get(current)?.is_dir() {
            return Err(MemFsError::NotADirectory);
        }
        Ok((current, name))
    }

    /// Creates a file or a directory, depending on the type bits of `meta`.
    pub fn create(&mut self, path: &str, meta: Metadata) -> Result<NodeId> {
        let (parent, name) = self.resolve_parent(path)?;
        path::validate_name(name)?;
        if self.lookup_child(parent, name)?.is_some() {
            return Err(MemFsError::AlreadyExists);
        }

        let id = self.nodes.allocate(Node::new(name, meta, parent))?;
        self.attach(parent, id)?;
        debug!("created {} as node {}", path, id);
        Ok(id)
    }

    /// Removes a file from `parent` and releases its blocks.
    pub fn remove_file(&mut self, parent: NodeId, name: &str, blocks: &mut BlockStore) -> Result<()> {
        let id = self
            .lookup_child(parent, name)?
            .ok_or(MemFsError::NotFound)?;
        let chain = match self.nodes.get(id)?.kind {
            NodeKind::File { blocks: chain } => chain,
            NodeKind::Directory { .. } => return Err(MemFsError::IsADirectory),
        };
        if let Some(chain) = chain {
            blocks.free_chain(chain.head)?;
        }

        self.detach(parent, id)?;
        self.nodes.free(id)?;
        self.cache.clear();
        debug!("removed file {} ({})", name, id);
        Ok(())
    }

    /// Removes an empty directory from `parent`. A directory that still has
    /// children is refused rather than orphaning them.
    pub fn remove_dir(&mut self, parent: NodeId, name: &str) -> Result<()> {
        let id = self
            .lookup_child(parent, name)?
            .ok_or(MemFsError::NotFound)?;
        match self.nodes.get(id)?.kind {
            NodeKind::Directory {
                first_child: Some(_),
                ..
            } => return Err(MemFsError::NotEmpty),
            NodeKind::Directory {
                first_child: None, ..
            } => (),
            NodeKind::File { .. } => return Err(MemFsError::NotADirectory),
        }

        self.detach(parent, id)?;
        self.nodes.free(id)?;
        self.cache.clear();
        debug!("removed directory {} ({})", name, id);
        Ok(())
    }

    /// Moves the node at `old_path` to `new_path`. Every check happens before
    /// the node is detached, so a failed rename leaves the tree untouched.
    pub fn rename(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let (old_parent, old_name) = self.resolve_parent(old_path)?;
        let id = self
            .lookup_child(old_parent, old_name)?
            .ok_or(MemFsError::NotFound)?;
        let (new_parent, new_name) = self.resolve_parent(new_path)?;
        path::validate_name(new_name)?;
        if self.lookup_child(new_parent, new_name)?.is_some() {
            return Err(MemFsError::AlreadyExists);
        }
        if self.nodes.get(id)?.is_dir() && self.is_ancestor(id, new_parent)? {
            return Err(MemFsError::InvalidArgument(format!(
                "cannot move {} into itself",
                old_path
            )));
        }

        self.detach(old_parent, id)?;
        let node = self.nodes.get_mut(id)?;
        node.name = new_name.to_string();
        if let NodeKind::Directory { parent, .. } = &mut node.kind {
            *parent = new_parent;
        }
        self.attach(new_parent, id)?;
        self.cache.clear();
        debug!("renamed {} to {}", old_path, new_path);
        Ok(())
    }

    /// Lists a directory.
    pub fn list(&self, dir: NodeId) -> Result<ReadDir<'_>> {
        let parent = match self.nodes.get(dir)?.kind {
            NodeKind::Directory { parent, .. } => parent,
            NodeKind::File { .. } => return Err(MemFsError::NotADirectory),
        };
        Ok(ReadDir {
            nodes: &self.nodes,
            dir,
            parent,
            cursor: Cursor::Dot,
            visited: 0,
        })
    }

    fn first_child(&self, dir: NodeId) -> Result<Option<NodeId>> {
        match self.nodes.get(dir)?.kind {
            NodeKind::Directory { first_child, .. } => Ok(first_child),
            NodeKind::File { .. } => Err(MemFsError::NotADirectory),
        }
    }

    fn set_first_child(&mut self, dir: NodeId, child: Option<NodeId>) -> Result<()> {
        let node = self.nodes.get_mut(dir)?;
        match &mut node.kind {
            NodeKind::Directory { first_child, .. } => *first_child = child,
            NodeKind::File { .. } => return Err(MemFsError::NotADirectory),
        }
        node.meta.touch_modified();
        Ok(())
    }

    /// Prepends `id` to the sibling list of `dir`.
    fn attach(&mut self, dir: NodeId, id: NodeId) -> Result<()> {
        let head = self.first_child(dir)?;
        self.nodes.get_mut(id)?.next = head;
        self.set_first_child(dir, Some(id))
    }

    /// Unlinks `id` from the sibling list of `dir`.
    fn detach(&mut self, dir: NodeId, id: NodeId) -> Result<()> {
        let next = self.nodes.get(id)?.next;
        let head = self.first_child(dir)?;
        if head == Some(id) {
            self.set_first_child(dir, next)?;
        } else {
            let mut current = head;
            let mut visited = 0;
            loop {
                let prev = current.ok_or_else(|| {
                    MemFsError::fault(format!("node {} is not a child of {}", id, dir))
                })?;
                let prev_node = self.nodes.get_mut(prev)?;
                if prev_node.next == Some(id) {
                    prev_node.next = next;
                    break;
                }
                current = prev_node.next;
                visited += 1;
                if visited > self.nodes.capacity() {
                    return Err(MemFsError::fault(format!(
                        "sibling list of directory {} does not terminate",
                        dir
                    )));
                }
            }
            self.nodes.get_mut(dir)?.meta.touch_modified();
        }
        self.nodes.get_mut(id)?.next = None;
        Ok(())
    }

    /// Whether `ancestor` is `node` or lies on its path up to the root. The
    /// root is its own parent, which ends the walk.
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> Result<bool> {
        let mut current = node;
        let mut visited = 0;
        loop {
            if current == ancestor {
                return Ok(true);
            }
            if current == NodeId::ROOT {
                return Ok(false);
            }
            current = match self.nodes.get(current)?.kind {
                NodeKind::Directory { parent, .. } => parent,
                NodeKind::File { .. } => return Err(MemFsError::NotADirectory),
            };
            visited += 1;
            if visited > self.nodes.capacity() {
                return Err(MemFsError::fault(format!(
                    "parent links above {} do not reach the root",
                    node
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geometry;
    use crate::meta::DIRECTORY_TYPE;

    fn namespace(capacity: usize) -> Namespace {
        Namespace::new(capacity, true, Metadata::new(DIRECTORY_TYPE | 0o755, 0, 0)).unwrap()
    }

    fn dir() -> Metadata {
        Metadata::new(DIRECTORY_TYPE | 0o755, 0, 0)
    }

    fn file() -> Metadata {
        Metadata::new(0o644, 0, 0)
    }

    fn names(ns: &Namespace, dir: NodeId) -> Vec<String> {
        ns.list(dir)
            .unwrap()
            .map(|entry| entry.unwrap().name)
            .collect()
    }

    #[test]
    fn root_resolves_to_itself_and_is_its_own_parent() {
        let mut ns = namespace(8);
        assert_eq!(ns.resolve("/").unwrap(), NodeId::ROOT);
        let entries: Vec<DirEntry> = ns.list(NodeId::ROOT).unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries[0].node, NodeId::ROOT);
        assert_eq!(entries[1].name, "..");
        assert_eq!(entries[1].node, NodeId::ROOT);
    }

    #[test]
    fn create_prepends_to_the_sibling_list() {
        let mut ns = namespace(8);
        ns.create("/a", file()).unwrap();
        ns.create("/b", file()).unwrap();
        ns.create("/c", dir()).unwrap();
        assert_eq!(names(&ns, NodeId::ROOT), vec![".", "..", "c", "b", "a"]);
    }

    #[test]
    fn resolve_walks_nested_directories() {
        let mut ns = namespace(8);
        let a = ns.create("/a", dir()).unwrap();
        let b = ns.create("/a/b", dir()).unwrap();
        let f = ns.create("/a/b/f", file()).unwrap();

        assert_eq!(ns.resolve("/a").unwrap(), a);
        assert_eq!(ns.resolve("/a/b/f").unwrap(), f);
        assert_eq!(ns.resolve_parent("/a/b/f").unwrap(), (b, "f"));
        assert_eq!(ns.resolve("/a/missing"), Err(MemFsError::NotFound));
    }

    #[test]
    fn traversal_through_a_file_is_not_a_directory() {
        let mut ns = namespace(8);
        ns.create("/f", file()).unwrap();
        assert_eq!(ns.resolve("/f/x"), Err(MemFsError::NotADirectory));
        assert_eq!(ns.create("/f/x", file()), Err(MemFsError::NotADirectory));
        let f = ns.resolve("/f").unwrap();
        assert!(ns.list(f).is_err());
    }

    #[test]
    fn create_under_missing_parent_is_not_found() {
        let mut ns = namespace(8);
        assert_eq!(ns.create("/nope/f", file()), Err(MemFsError::NotFound));
        assert_eq!(ns.nodes().free_count(), 7);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut ns = namespace(8);
        let first = ns.create("/a", file()).unwrap();
        assert_eq!(ns.create("/a", dir()), Err(MemFsError::AlreadyExists));
        assert_eq!(ns.resolve("/a").unwrap(), first);
        assert_eq!(names(&ns, NodeId::ROOT), vec![".", "..", "a"]);
    }

    #[test]
    fn node_pool_exhaustion_is_reported() {
        let mut ns = namespace(3);
        ns.create("/a", file()).unwrap();
        ns.create("/b", file()).unwrap();
        assert!(matches!(ns.create("/c", file()), Err(MemFsError::Exhausted(_))));
        assert_eq!(ns.resolve("/c"), Err(MemFsError::NotFound));
    }

    #[test]
    fn remove_file_detaches_from_the_middle_of_the_list() {
        let mut blocks = BlockStore::new(&Geometry::new(8 * 4096, 4096).with_node_blocks(1)).unwrap();
        let mut ns = namespace(8);
        ns.create("/a", file()).unwrap();
        ns.create("/b", file()).unwrap();
        ns.create("/c", file()).unwrap();

        ns.remove_file(NodeId::ROOT, "b", &mut blocks).unwrap();
        assert_eq!(names(&ns, NodeId::ROOT), vec![".", "..", "c", "a"]);
        assert_eq!(
            ns.remove_file(NodeId::ROOT, "b", &mut blocks),
            Err(MemFsError::NotFound)
        );
        assert_eq!(ns.nodes().free_count(), 5);
    }

    #[test]
    fn remove_dir_refuses_non_empty_directories() {
        let mut ns = namespace(8);
        ns.create("/d", dir()).unwrap();
        ns.create("/d/f", file()).unwrap();

        assert_eq!(ns.remove_dir(NodeId::ROOT, "d"), Err(MemFsError::NotEmpty));
        assert!(ns.resolve("/d/f").is_ok());
    }

    #[test]
    fn remove_checks_the_node_type() {
        let mut blocks = BlockStore::new(&Geometry::new(8 * 4096, 4096).with_node_blocks(1)).unwrap();
        let mut ns = namespace(8);
        ns.create("/d", dir()).unwrap();
        ns.create("/f", file()).unwrap();

        assert_eq!(
            ns.remove_file(NodeId::ROOT, "d", &mut blocks),
            Err(MemFsError::IsADirectory)
        );
        assert_eq!(ns.remove_dir(NodeId::ROOT, "f"), Err(MemFsError::NotADirectory));
    }

    #[test]
    fn rename_moves_between_directories() {
        let mut ns = namespace(8);
        let a = ns.create("/a", dir()).unwrap();
        let b = ns.create("/b", dir()).unwrap();
        let x = ns.create("/a/x", file()).unwrap();

        ns.rename("/a/x", "/b/y").unwrap();
        assert_eq!(ns.resolve("/a/x"), Err(MemFsError::NotFound));
        assert_eq!(ns.resolve("/b/y").unwrap(), x);
        assert_eq!(names(&ns, a), vec![".", ".."]);
        assert_eq!(names(&ns, b), vec![".", "..", "y"]);
    }

    #[test]
    fn rename_onto_an_existing_entry_changes_nothing() {
        let mut ns = namespace(8);
        let a = ns.create("/a", file()).unwrap();
        let b = ns.create("/b", file()).unwrap();

        assert_eq!(ns.rename("/a", "/b"), Err(MemFsError::AlreadyExists));
        assert_eq!(ns.resolve("/a").unwrap(), a);
        assert_eq!(ns.resolve("/b").unwrap(), b);
    }

    #[test]
    fn renamed_directory_points_at_its_new_parent() {
        let mut ns = namespace(8);
        let a = ns.create("/a", dir()).unwrap();
        let d = ns.create("/d", dir()).unwrap();

        ns.rename("/d", "/a/d").unwrap();
        let entries: Vec<DirEntry> = ns.list(d).unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries[1].node, a);
    }

    #[test]
    fn directory_cannot_move_into_its_own_subtree() {
        let mut ns = namespace(8);
        ns.create("/a", dir()).unwrap();
        ns.create("/a/b", dir()).unwrap();

        assert!(matches!(
            ns.rename("/a", "/a/b/c"),
            Err(MemFsError::InvalidArgument(_))
        ));
        assert!(ns.resolve("/a/b").is_ok());
    }

    #[test]
    fn cache_never_returns_a_removed_node() {
        let mut blocks = BlockStore::new(&Geometry::new(8 * 4096, 4096).with_node_blocks(1)).unwrap();
        let mut ns = namespace(8);
        let a = ns.create("/a", file()).unwrap();
        assert_eq!(ns.resolve("/a").unwrap(), a);
        assert_eq!(ns.resolve("/a").unwrap(), a);
        assert_eq!(ns.cache_hits(), 1);

        ns.remove_file(NodeId::ROOT, "a", &mut blocks).unwrap();
        // The freed record is recycled under another name.
        ns.create("/b", file()).unwrap();
        assert_eq!(ns.resolve("/a"), Err(MemFsError::NotFound));
    }

    #[test]
    fn listing_is_restartable() {
        let mut ns = namespace(8);
        ns.create("/a", file()).unwrap();
        ns.create("/b", file()).unwrap();
        let mut partial = ns.list(NodeId::ROOT).unwrap();
        partial.next();
        partial.next();
        assert_eq!(partial.next().unwrap().unwrap().name, "b");
        assert_eq!(names(&ns, NodeId::ROOT), vec![".", "..", "b", "a"]);
    }
}
