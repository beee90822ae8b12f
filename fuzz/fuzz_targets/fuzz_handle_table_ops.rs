#![no_main]

use arbitrary::Arbitrary;
use ferry_bridge::{Handle, HandleTable, HostValue};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Alloc(u32),
    Release(u8),
    Clone(u8),
    Take(u8),
    ReleaseRaw(u32),
}

// Model: every live handle maps to the number it was allocated with. Stale or reserved handles
// must always be rejected and never disturb live entries.
fuzz_target!(|ops: Vec<Op>| {
    let mut table = HandleTable::new();
    let mut live: Vec<(Handle, u32)> = Vec::new();

    for op in ops {
        match op {
            Op::Alloc(n) => {
                let h = table.alloc(HostValue::from(n));
                assert!(live.iter().all(|(l, _)| *l != h));
                live.push((h, n));
            }
            Op::Release(i) | Op::Take(i) if live.is_empty() => {
                let _ = i;
            }
            Op::Release(i) => {
                let (h, _) = live.swap_remove(i as usize % live.len());
                table.release(h).expect("release live handle");
                assert!(table.release(h).is_err());
            }
            Op::Take(i) => {
                let (h, n) = live.swap_remove(i as usize % live.len());
                assert_eq!(table.take(h).expect("take live handle"), HostValue::from(n));
            }
            Op::Clone(i) => {
                if let Some(&(h, n)) = live.get(i as usize % live.len().max(1)) {
                    let c = table.clone_ref(h).expect("clone live handle");
                    live.push((c, n));
                }
            }
            Op::ReleaseRaw(raw) => {
                let h = Handle::from_raw(raw);
                if !live.iter().any(|(l, _)| *l == h) {
                    assert!(table.release(h).is_err());
                }
            }
        }
        assert_eq!(table.live_count(), live.len());
    }

    for (h, n) in live {
        assert_eq!(table.get(h).expect("live handle"), &HostValue::from(n));
    }
});
