use std::collections::HashMap;

use memfs::NodeId;

/// Inode number the kernel uses for the mount root.
pub const ROOT_INO: u64 = fuser::FUSE_ROOT_ID;

/// Node 0 is the root and the kernel numbers the root 1.
pub fn ino_of(id: NodeId) -> u64 {
    u64::from(id) + 1
}

struct Entry {
    path: String,
    lookups: u64,
}

/// Paths of the inodes the kernel currently knows about.
///
/// The filesystem is addressed by path while the kernel speaks inode numbers.
/// An entry is added whenever a reply hands an inode to the kernel and is
/// dropped once the kernel forgets it or the name is removed.
pub struct InodeTable {
    entries: HashMap<u64, Entry>,
}

impl InodeTable {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            ROOT_INO,
            Entry {
                path: "/".to_string(),
                lookups: 0,
            },
        );
        Self { entries }
    }

    pub fn path(&self, ino: u64) -> Option<&str> {
        self.entries.get(&ino).map(|entry| entry.path.as_str())
    }

    /// Records that `ino` was handed out under `path`.
    pub fn remember(&mut self, ino: u64, path: &str) {
        let entry = self.entries.entry(ino).or_insert_with(|| Entry {
            path: String::new(),
            lookups: 0,
        });
        entry.path = path.to_string();
        entry.lookups += 1;
    }

    pub fn forget(&mut self, ino: u64, count: u64) {
        if ino == ROOT_INO {
            return;
        }
        let gone = match self.entries.get_mut(&ino) {
            Some(entry) => {
                entry.lookups = entry.lookups.saturating_sub(count);
                entry.lookups == 0
            }
            None => false,
        };
        if gone {
            self.entries.remove(&ino);
        }
    }

    /// Drops whatever inode was known under `path`.
    pub fn remove_path(&mut self, path: &str) {
        self.entries
            .retain(|&ino, entry| ino == ROOT_INO || entry.path != path);
    }

    /// Rewrites the paths of a renamed node and everything below it.
    pub fn rename(&mut self, old: &str, new: &str) {
        for entry in self.entries.values_mut() {
            if entry.path == old {
                entry.path = new.to_string();
            } else if entry.path.starts_with(old) && entry.path[old.len()..].starts_with('/') {
                entry.path = format!("{}{}", new, &entry.path[old.len()..]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_always_known() {
        let mut table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO), Some("/"));
        table.forget(ROOT_INO, 10);
        table.remove_path("/");
        assert_eq!(table.path(ROOT_INO), Some("/"));
    }

    #[test]
    fn entries_live_until_every_lookup_is_forgotten() {
        let mut table = InodeTable::new();
        table.remember(5, "/a");
        table.remember(5, "/a");
        table.forget(5, 1);
        assert_eq!(table.path(5), Some("/a"));
        table.forget(5, 1);
        assert_eq!(table.path(5), None);
    }

    #[test]
    fn reused_inode_takes_the_new_path() {
        let mut table = InodeTable::new();
        table.remember(3, "/old");
        table.remove_path("/old");
        table.remember(3, "/new");
        assert_eq!(table.path(3), Some("/new"));
    }

    #[test]
    fn rename_rewrites_the_subtree_only() {
        let mut table = InodeTable::new();
        table.remember(2, "/a");
        table.remember(3, "/a/b");
        table.remember(4, "/ab");
        table.rename("/a", "/z");
        assert_eq!(table.path(2), Some("/z"));
        assert_eq!(table.path(3), Some("/z/b"));
        assert_eq!(table.path(4), Some("/ab"));
    }
}
