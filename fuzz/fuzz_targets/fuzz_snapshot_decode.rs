#![no_main]

use libfuzzer_sys::fuzz_target;
use pcitop_snapshot::read_snapshot;

fuzz_target!(|data: &[u8]| {
    let _ = read_snapshot(&mut std::io::Cursor::new(data));
});
