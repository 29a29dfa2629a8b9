use memfs::{Geometry, MemFs};

pub fn main() {
    let mut fs = MemFs::new(Geometry::default(), 0, 0).expect("should initialize");

    fs.mkdir("/greetings", 0o755, 0, 0).unwrap();
    fs.mknod("/greetings/hello.txt", 0o644, 0, 0).unwrap();
    fs.write("/greetings/hello.txt", 0, b"hello, world\n").unwrap();

    for entry in fs.readdir("/greetings").unwrap() {
        let entry = entry.unwrap();
        println!("{:>6} {:o} {}", entry.meta.size, entry.meta.mode, entry.name);
    }
    let data = fs.read("/greetings/hello.txt", 0, 64).unwrap();
    print!("{}", String::from_utf8_lossy(&data));

    let stats = fs.statfs();
    println!("{} of {} blocks free", stats.free_blocks, stats.total_blocks);
}
