use std::time::SystemTime;

use crate::config::NODE_RECORD_SIZE;

pub type ModeBits = u32;
pub type UserId = u32;
pub type GroupId = u32;

pub const TYPE_MASK: ModeBits = 0o170000;
pub const DIRECTORY_TYPE: ModeBits = 0o040000;
pub const FILE_TYPE: ModeBits = 0o100000;
const PERMISSIONS_MASK: ModeBits = 0o7777;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Directory,
}

impl FileKind {
    /// Reads the type bits of a mode. Anything that is not a directory is
    /// stored as a regular file.
    pub fn from_mode(mode: ModeBits) -> Self {
        if mode & TYPE_MASK == DIRECTORY_TYPE {
            FileKind::Directory
        } else {
            FileKind::File
        }
    }

    pub fn type_bits(self) -> ModeBits {
        match self {
            FileKind::File => FILE_TYPE,
            FileKind::Directory => DIRECTORY_TYPE,
        }
    }
}

/// POSIX-like attributes stored with every node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// Type bits and permissions (e.g. 0o040755 for drwxr-xr-x).
    pub mode: ModeBits,
    pub uid: UserId,
    pub gid: GroupId,
    pub nlink: u32,
    /// Content length in bytes for files.
    pub size: u64,
    pub accessed_at: SystemTime,
    pub modified_at: SystemTime,
    pub changed_at: SystemTime,
}

impl Metadata {
    /// Builds attributes for a new node. The type bits of `mode` decide
    /// whether a file or a directory gets created; a mode without type bits
    /// makes a regular file.
    pub fn new(mode: ModeBits, uid: UserId, gid: GroupId) -> Self {
        let kind = FileKind::from_mode(mode);
        let now = SystemTime::now();
        let size = match kind {
            FileKind::File => 0,
            FileKind::Directory => NODE_RECORD_SIZE as u64,
        };

        Self {
            mode: kind.type_bits() | (mode & PERMISSIONS_MASK),
            uid,
            gid,
            nlink: 1,
            size,
            accessed_at: now,
            modified_at: now,
            changed_at: now,
        }
    }

    pub fn kind(&self) -> FileKind {
        FileKind::from_mode(self.mode)
    }

    pub fn permissions(&self) -> u16 {
        (self.mode & PERMISSIONS_MASK) as u16
    }

    /// Replaces the permission bits, keeping the node type.
    pub fn set_permissions(&mut self, mode: ModeBits) {
        self.mode = (self.mode & TYPE_MASK) | (mode & PERMISSIONS_MASK);
        self.changed_at = SystemTime::now();
    }

    pub fn set_owner(&mut self, uid: Option<UserId>, gid: Option<GroupId>) {
        if let Some(uid) = uid {
            self.uid = uid;
        }
        if let Some(gid) = gid {
            self.gid = gid;
        }
        self.changed_at = SystemTime::now();
    }

    pub(crate) fn touch_modified(&mut self) {
        let now = SystemTime::now();
        self.modified_at = now;
        self.changed_at = now;
    }
}
