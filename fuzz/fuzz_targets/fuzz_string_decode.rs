#![no_main]

use ferry_bridge::{Boundary, BoundaryConfig, BridgeError};
use libfuzzer_sys::fuzz_target;

// Arbitrary bytes placed in linear memory either decode to the same string `std` would produce,
// or fail with a decode error. Valid strings survive a pass back into memory.
fuzz_target!(|data: &[u8]| {
    let Ok(mut b) = Boundary::new(BoundaryConfig::default()) else {
        return;
    };
    let Ok((ptr, len)) = b.pass_bytes(data) else {
        return;
    };

    match (b.read_string(ptr, len), std::str::from_utf8(data)) {
        (Ok(decoded), Ok(expected)) => {
            assert_eq!(decoded, expected);
            let (back, back_len) = b.pass_string(&decoded).expect("pass decoded string");
            assert_eq!(b.bytes_view(back, back_len).expect("view"), data);
        }
        (Err(BridgeError::Decode { .. }), Err(_)) => {}
        (got, expected) => panic!("decode mismatch: {got:?} vs {expected:?}"),
    }
});
