use std::env;
use std::process;

use fuser::MountOption;
use memfs::{Geometry, MemFs, SharedMemFs};
use memfs_fuse::FuseDriver;

fn main() {
    let mountpoint = match env::args_os().nth(1) {
        Some(mountpoint) => mountpoint,
        None => {
            eprintln!("usage: memfs <mountpoint>");
            process::exit(2);
        }
    };

    let fs = match MemFs::new(Geometry::default(), 0, 0) {
        Ok(fs) => fs,
        Err(err) => {
            eprintln!("memfs: {}", err);
            process::exit(1);
        }
    };
    let options = [
        MountOption::FSName("memfs".to_string()),
        MountOption::DefaultPermissions,
    ];
    if let Err(err) = fuser::mount2(FuseDriver::new(SharedMemFs::new(fs)), &mountpoint, &options) {
        eprintln!("memfs: {}", err);
        process::exit(1);
    }
}
