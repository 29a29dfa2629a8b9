//! Exposes a [`memfs::MemFs`] to the kernel through FUSE.

#[macro_use]
extern crate log;

mod inodes;

use std::ffi::OsStr;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use memfs::{path, FileKind, MemFsError, Metadata, SharedMemFs};

pub use crate::inodes::{ino_of, InodeTable, ROOT_INO};

const TTL: Duration = Duration::from_secs(1);

/// Maps a filesystem error onto the errno reported to the kernel.
pub fn errno(err: &MemFsError) -> c_int {
    match err {
        MemFsError::NotFound => libc::ENOENT,
        MemFsError::NotADirectory => libc::ENOTDIR,
        MemFsError::IsADirectory => libc::EISDIR,
        MemFsError::AlreadyExists => libc::EEXIST,
        MemFsError::NotEmpty => libc::ENOTEMPTY,
        MemFsError::Exhausted(_) => libc::ENOSPC,
        MemFsError::NameTooLong => libc::ENAMETOOLONG,
        MemFsError::InvalidArgument(_) => libc::EINVAL,
        MemFsError::StructuralFault(_) => libc::EIO,
    }
}

pub fn file_attr(ino: u64, meta: &Metadata, block_size: usize) -> FileAttr {
    FileAttr {
        ino,
        size: meta.size,
        blocks: (meta.size + 511) / 512,
        atime: meta.accessed_at,
        mtime: meta.modified_at,
        ctime: meta.changed_at,
        crtime: meta.changed_at,
        kind: match meta.kind() {
            FileKind::File => FileType::RegularFile,
            FileKind::Directory => FileType::Directory,
        },
        perm: meta.permissions(),
        nlink: meta.nlink,
        uid: meta.uid,
        gid: meta.gid,
        rdev: 0,
        blksize: block_size as u32,
        flags: 0,
    }
}

fn time_of(time: TimeOrNow) -> SystemTime {
    match time {
        TimeOrNow::SpecificTime(time) => time,
        TimeOrNow::Now => SystemTime::now(),
    }
}

pub struct FuseDriver {
    fs: SharedMemFs,
    inodes: InodeTable,
    block_size: usize,
}

impl FuseDriver {
    pub fn new(fs: SharedMemFs) -> Self {
        let block_size = fs.with(|fs| fs.geometry().block_size);
        Self {
            fs,
            inodes: InodeTable::new(),
            block_size,
        }
    }

    fn path(&self, ino: u64) -> Result<String, c_int> {
        match self.inodes.path(ino) {
            Some(path) => Ok(path.to_string()),
            None => {
                debug!("unknown inode {}", ino);
                Err(libc::ENOENT)
            }
        }
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String, c_int> {
        let name = name.to_str().ok_or(libc::EINVAL)?;
        Ok(path::join(&self.path(parent)?, name))
    }

    /// Resolves `path` and registers its inode with the kernel. Returns the
    /// attributes along with the generation of the node's slot.
    fn entry(&mut self, path: &str) -> Result<(FileAttr, u64), c_int> {
        let (id, meta, generation) = self
            .fs
            .with(|fs| {
                let (id, meta) = fs.lookup(path)?;
                Ok((id, meta, fs.namespace().nodes().generation(id)))
            })
            .map_err(|e: MemFsError| errno(&e))?;
        let ino = ino_of(id);
        self.inodes.remember(ino, path);
        Ok((file_attr(ino, &meta, self.block_size), generation))
    }

    fn attr(&self, ino: u64) -> Result<FileAttr, c_int> {
        let path = self.path(ino)?;
        let meta = self.fs.with(|fs| fs.getattr(&path)).map_err(|e| errno(&e))?;
        Ok(file_attr(ino, &meta, self.block_size))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_attrs(
        &mut self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> Result<FileAttr, c_int> {
        let path = self.path(ino)?;
        self.fs
            .with(|fs| {
                if let Some(mode) = mode {
                    fs.chmod(&path, mode)?;
                }
                if uid.is_some() || gid.is_some() {
                    fs.chown(&path, uid, gid)?;
                }
                if let Some(size) = size {
                    fs.truncate(&path, size)?;
                }
                if atime.is_some() || mtime.is_some() {
                    fs.utimens(&path, atime.map(time_of), mtime.map(time_of))?;
                }
                Ok(())
            })
            .map_err(|e: MemFsError| errno(&e))?;
        self.attr(ino)
    }

    fn create(
        &mut self,
        parent: u64,
        name: &OsStr,
        mode: u32,
        req: &Request<'_>,
        directory: bool,
    ) -> Result<(FileAttr, u64), c_int> {
        let path = self.child_path(parent, name)?;
        let (uid, gid) = (req.uid(), req.gid());
        self.fs
            .with(|fs| {
                if directory {
                    fs.mkdir(&path, mode, uid, gid)
                } else {
                    fs.mknod(&path, mode, uid, gid)
                }
            })
            .map_err(|e| errno(&e))?;
        self.entry(&path)
    }
}

impl Filesystem for FuseDriver {
    fn init(&mut self, req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        let (uid, gid) = (req.uid(), req.gid());
        self.fs
            .with(|fs| fs.chown("/", Some(uid), Some(gid)))
            .map_err(|e| errno(&e))?;
        info!("mounted for uid {} gid {}", uid, gid);
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.child_path(parent, name).and_then(|path| self.entry(&path)) {
            Ok((attr, generation)) => reply.entry(&TTL, &attr, generation),
            Err(e) => reply.error(e),
        }
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyAttr) {
        match self.attr(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        match self.apply_attrs(ino, mode, uid, gid, size, atime, mtime) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _rdev: u32,
        reply: ReplyEntry,
    ) {
        match self.create(parent, name, mode & !umask, req, false) {
            Ok((attr, generation)) => reply.entry(&TTL, &attr, generation),
            Err(e) => reply.error(e),
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        match self.create(parent, name, mode & !umask, req, true) {
            Ok((attr, generation)) => reply.entry(&TTL, &attr, generation),
            Err(e) => reply.error(e),
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_path(parent, name).and_then(|path| {
            self.fs.with(|fs| fs.unlink(&path)).map_err(|e| errno(&e))?;
            self.inodes.remove_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child_path(parent, name).and_then(|path| {
            self.fs.with(|fs| fs.rmdir(&path)).map_err(|e| errno(&e))?;
            self.inodes.remove_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let result = self.child_path(parent, name).and_then(|old| {
            let new = self.child_path(newparent, newname)?;
            self.fs
                .with(|fs| fs.rename(&old, &new))
                .map_err(|e| errno(&e))?;
            self.inodes.rename(&old, &new);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let result = self
            .path(ino)
            .and_then(|path| self.fs.with(|fs| fs.open(&path)).map_err(|e| errno(&e)));
        match result {
            Ok(()) => reply.opened(0, 0),
            Err(e) => reply.error(e),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let result = self.path(ino).and_then(|path| {
            self.fs
                .with(|fs| fs.read(&path, offset as u64, size as usize))
                .map_err(|e| errno(&e))
        });
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => reply.error(e),
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let result = self.path(ino).and_then(|path| {
            self.fs
                .with(|fs| fs.write(&path, offset as u64, data))
                .map_err(|e| errno(&e))
        });
        match result {
            Ok(written) => reply.written(written as u32),
            Err(e) => reply.error(e),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let listing = self.path(ino).and_then(|path| {
            self.fs
                .with(|fs| fs.readdir(&path)?.collect::<memfs::Result<Vec<_>>>())
                .map_err(|e| errno(&e))
        });
        let entries = match listing {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(e);
                return;
            }
        };

        for (i, entry) in entries.iter().enumerate().skip(offset.max(0) as usize) {
            let kind = match entry.kind {
                FileKind::File => FileType::RegularFile,
                FileKind::Directory => FileType::Directory,
            };
            if reply.add(ino_of(entry.node), (i + 1) as i64, kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let stats = self.fs.with(|fs| fs.statfs());
        reply.statfs(
            stats.total_blocks,
            stats.free_blocks,
            stats.free_blocks,
            stats.total_nodes,
            stats.free_nodes,
            stats.block_size as u32,
            stats.max_name_len as u32,
            stats.block_size as u32,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memfs::{Geometry, MemFs, NodeId, Pool};

    #[test]
    fn errors_map_to_errno() {
        assert_eq!(errno(&MemFsError::NotFound), libc::ENOENT);
        assert_eq!(errno(&MemFsError::NotADirectory), libc::ENOTDIR);
        assert_eq!(errno(&MemFsError::AlreadyExists), libc::EEXIST);
        assert_eq!(errno(&MemFsError::Exhausted(Pool::Blocks)), libc::ENOSPC);
        assert_eq!(errno(&MemFsError::Exhausted(Pool::Nodes)), libc::ENOSPC);
        assert_eq!(errno(&MemFsError::NotEmpty), libc::ENOTEMPTY);
        assert_eq!(errno(&MemFsError::NameTooLong), libc::ENAMETOOLONG);
        assert_eq!(
            errno(&MemFsError::StructuralFault("broken".to_string())),
            libc::EIO
        );
    }

    #[test]
    fn root_node_is_the_fuse_root() {
        assert_eq!(ino_of(NodeId::ROOT), ROOT_INO);
    }

    #[test]
    fn attributes_follow_the_metadata() {
        let geometry = Geometry::new(16 * 4096, 4096).with_node_blocks(1);
        let mut fs = MemFs::new(geometry, 7, 8).unwrap();
        fs.mknod("/f", 0o640, 7, 8).unwrap();
        fs.write("/f", 0, &[1; 1000]).unwrap();
        let meta = fs.getattr("/f").unwrap();

        let attr = file_attr(9, &meta, 4096);
        assert_eq!(attr.ino, 9);
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.perm, 0o640);
        assert_eq!(attr.size, 1000);
        assert_eq!(attr.blocks, 2);
        assert_eq!((attr.uid, attr.gid), (7, 8));
        assert_eq!(attr.blksize, 4096);

        let root = file_attr(ROOT_INO, &fs.getattr("/").unwrap(), 4096);
        assert_eq!(root.kind, FileType::Directory);
        assert_eq!(root.perm, 0o755);
    }

    #[test]
    fn lookups_register_inodes_by_path() {
        let geometry = Geometry::new(16 * 4096, 4096).with_node_blocks(1);
        let shared = SharedMemFs::new(MemFs::new(geometry, 0, 0).unwrap());
        shared.with(|fs| fs.mkdir("/d", 0o755, 0, 0)).unwrap();
        let mut driver = FuseDriver::new(shared);

        let (attr, generation) = driver.entry("/d").unwrap();
        assert_eq!(generation, 0);
        assert_eq!(driver.path(attr.ino).unwrap(), "/d");
        assert_eq!(
            driver.child_path(attr.ino, OsStr::new("x")).unwrap(),
            "/d/x"
        );
        assert_eq!(driver.entry("/missing").unwrap_err(), libc::ENOENT);
        assert_eq!(driver.path(999).unwrap_err(), libc::ENOENT);
    }

    #[test]
    fn recycled_nodes_come_back_with_a_new_generation() {
        let geometry = Geometry::new(16 * 4096, 4096).with_node_blocks(1);
        let shared = SharedMemFs::new(MemFs::new(geometry, 0, 0).unwrap());
        shared.with(|fs| fs.mknod("/a", 0o644, 0, 0)).unwrap();
        let mut driver = FuseDriver::new(shared.clone());
        let (first, first_generation) = driver.entry("/a").unwrap();

        shared.with(|fs| fs.unlink("/a")).unwrap();
        shared.with(|fs| fs.mknod("/b", 0o644, 0, 0)).unwrap();
        let (second, second_generation) = driver.entry("/b").unwrap();

        assert_eq!(first.ino, second.ino);
        assert_ne!(first_generation, second_generation);
    }
}
