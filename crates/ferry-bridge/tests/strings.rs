#![cfg(not(target_arch = "wasm32"))]

use ferry_abi::layout::PAGE_BYTES;
use ferry_bridge::{Boundary, BoundaryConfig, BridgeError};
use ferry_mem::{ElementKind, LinearMemoryOptions};
use proptest::prelude::*;

fn boundary() -> Boundary {
    Boundary::new(BoundaryConfig {
        memory: LinearMemoryOptions {
            initial_pages: 1,
            max_pages: 64,
        },
        ..BoundaryConfig::default()
    })
    .unwrap()
}

proptest! {
    #[test]
    fn any_string_round_trips(s in any::<String>()) {
        let mut b = boundary();
        let (ptr, len) = b.pass_string(&s).unwrap();
        prop_assert_ne!(ptr, 0);
        prop_assert_eq!(len as usize, s.len());
        prop_assert_eq!(b.read_string(ptr, len).unwrap(), s);
        b.free_guest(ptr, len, 1).unwrap();
    }

    #[test]
    fn many_strings_coexist(strings in prop::collection::vec("\\PC{0,40}", 1..40)) {
        let mut b = boundary();
        let passed: Vec<_> = strings.iter().map(|s| b.pass_string(s).unwrap()).collect();
        for (s, (ptr, len)) in strings.iter().zip(&passed) {
            prop_assert_eq!(&b.read_string(*ptr, *len).unwrap(), s);
        }
    }

    #[test]
    fn corrupted_multibyte_sequences_never_decode_lossily(s in "[a-z]{0,8}[é漢🦀][a-z]{0,8}", cut in 1usize..4) {
        let mut b = boundary();
        let (ptr, len) = b.pass_string(&s).unwrap();
        let at = s.char_indices().find(|(_, c)| !c.is_ascii()).map(|(i, _)| i).unwrap();
        let trunc = (at + cut).min(at + s[at..].chars().next().unwrap().len_utf8() - 1);
        match b.read_string(ptr, trunc as u32) {
            Err(BridgeError::Decode { .. }) => {}
            other => prop_assert!(false, "expected decode error, got {:?}", other),
        }
        prop_assert!(len as usize > trunc);
    }
}

#[test]
fn long_non_ascii_string_grows_memory() {
    let mut b = boundary();
    let s = "ü".repeat(PAGE_BYTES);
    let before = b.memory().buffer_id();
    let (ptr, len) = b.pass_string(&s).unwrap();
    assert_ne!(b.memory().buffer_id(), before);
    assert_eq!(len as usize, s.len());
    assert_eq!(b.read_string(ptr, len).unwrap(), s);
}

#[test]
fn views_are_rebuilt_after_growth() {
    let mut b = boundary();
    let (ptr, len) = b.pass_string("before").unwrap();
    assert!(b.views().is_fresh(ElementKind::U8, b.memory()));

    b.grow_memory(2).unwrap();
    assert!(!b.views().is_fresh(ElementKind::U8, b.memory()));

    let rebuilds = b.views().rebuilds();
    assert_eq!(b.read_string(ptr, len).unwrap(), "before");
    assert_eq!(b.views().rebuilds(), rebuilds + 1);
    assert_eq!(b.view::<u8>().len(), 3 * PAGE_BYTES);

    let tail = (3 * PAGE_BYTES - 4) as u32;
    b.memory_mut().write_bytes(tail, b"tail").unwrap();
    assert_eq!(b.read_string(tail, 4).unwrap(), "tail");
}

#[test]
fn end_to_end_hello() {
    let mut b = boundary();
    let ptr = b.allocate(5, 1).unwrap();
    b.memory_mut().write_bytes(ptr, b"hello").unwrap();
    assert_eq!(b.read_string(ptr, 5).unwrap(), "hello");
}
