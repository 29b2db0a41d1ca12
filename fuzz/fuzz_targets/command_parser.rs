#![no_main]

use libfuzzer_sys::fuzz_target;
use tracebuf::control::Command;
use tracebuf::record::{TraceEntry, RECORD_SIZE};

fuzz_target!(|data: &[u8]| {
    // trace_on accepts arbitrary bytes from user space; parsing must not panic
    let _ = Command::parse(data);

    // Any bytes in the mapped region must decode and render
    if let Some(raw) = data.get(..RECORD_SIZE) {
        let mut record = [0u8; RECORD_SIZE];
        record.copy_from_slice(raw);
        let _ = TraceEntry::decode(&record).to_line();
    }
});
