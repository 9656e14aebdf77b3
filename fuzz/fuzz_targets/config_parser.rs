#![no_main]

use circ::config::Configuration;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Any input either parses or yields a syntax error; never a panic
        let _ = input.parse::<Configuration>();
    }
});
