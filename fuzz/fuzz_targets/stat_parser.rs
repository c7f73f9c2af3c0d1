#![no_main]

use leakcheck::procfs::ProcessStat;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Must never panic, whatever a stat file contains
        if let Some(stat) = ProcessStat::parse(input) {
            assert!(input.contains(&stat.name));
        }
    }
});
