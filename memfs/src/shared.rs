use std::sync::Arc;

use parking_lot::Mutex;

use crate::fs::MemFs;

/// A [`MemFs`] that can be handed to several request threads. Each call to
/// [`SharedMemFs::with`] holds the lock for one whole operation, so operations
/// never interleave.
#[derive(Clone)]
pub struct SharedMemFs {
    inner: Arc<Mutex<MemFs>>,
}

impl SharedMemFs {
    pub fn new(fs: MemFs) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fs)),
        }
    }

    pub fn with<T, F>(&self, op: F) -> T
    where
        F: FnOnce(&mut MemFs) -> T,
    {
        let mut fs = self.inner.lock();
        op(&mut fs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Geometry;
    use std::thread;

    #[test]
    fn concurrent_writers_leave_a_consistent_filesystem() {
        let geometry = Geometry::new(64 * 4096, 4096).with_node_blocks(1);
        let shared = SharedMemFs::new(MemFs::new(geometry, 0, 0).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let shared = shared.clone();
                thread::spawn(move || {
                    let path = format!("/t{}", i);
                    shared.with(|fs| fs.mknod(&path, 0o644, 0, 0)).unwrap();
                    for round in 0..8u64 {
                        let data = vec![i as u8; 1000];
                        let written = shared
                            .with(|fs| fs.write(&path, round * 1000, &data))
                            .unwrap();
                        assert_eq!(written, 1000);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        shared.with(|fs| {
            fs.check().unwrap();
            for i in 0..4u8 {
                let data = fs.read(&format!("/t{}", i), 0, 8000).unwrap();
                assert_eq!(data, vec![i; 8000]);
            }
        });
    }
}
