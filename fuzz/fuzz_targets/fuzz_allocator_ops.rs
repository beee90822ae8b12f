#![no_main]

use arbitrary::Arbitrary;
use ferry_mem::{FreeListAllocator, GuestAlloc, LinearMemory};
use libfuzzer_sys::fuzz_target;

const MAX_LEN: u32 = 64 * 1024;

#[derive(Debug, Arbitrary)]
enum Op {
    Allocate { len: u16, align_log2: u8 },
    Reallocate { index: u8, len: u16 },
    Free { index: u8 },
}

// Live allocations never overlap, never touch address 0, and keep their contents across
// reallocation and memory growth.
fuzz_target!(|ops: Vec<Op>| {
    let Ok(mut mem) = LinearMemory::new(1) else {
        return;
    };
    let mut alloc = FreeListAllocator::new();
    // (ptr, len, align, fill byte)
    let mut live: Vec<(u32, u32, u32, u8)> = Vec::new();

    for (step, op) in ops.into_iter().enumerate() {
        let fill = step as u8;
        match op {
            Op::Allocate { len, align_log2 } => {
                let len = u32::from(len) % MAX_LEN;
                let align = 1u32 << (align_log2 % 4);
                let Ok(ptr) = alloc.allocate(&mut mem, len, align) else {
                    continue;
                };
                assert_ne!(ptr, 0);
                assert_eq!(ptr % align, 0);
                mem.read_bytes_mut(ptr, len as usize)
                    .expect("allocation in bounds")
                    .fill(fill);
                live.push((ptr, len, align, fill));
            }
            Op::Reallocate { index, len } if !live.is_empty() => {
                let slot = index as usize % live.len();
                let (ptr, old_len, align, byte) = live[slot];
                let new_len = u32::from(len) % MAX_LEN;
                let Ok(moved) = alloc.reallocate(&mut mem, ptr, old_len, new_len, align) else {
                    continue;
                };
                let kept = old_len.min(new_len) as usize;
                let bytes = mem.read_bytes_mut(moved, new_len as usize).expect("in bounds");
                assert!(bytes[..kept].iter().all(|&b| b == byte));
                bytes.fill(byte);
                live[slot] = (moved, new_len, align, byte);
            }
            Op::Free { index } if !live.is_empty() => {
                let (ptr, len, align, _) = live.swap_remove(index as usize % live.len());
                alloc.free(&mut mem, ptr, len, align).expect("free live allocation");
            }
            _ => {}
        }

        for (i, &(ptr, len, _, byte)) in live.iter().enumerate() {
            let bytes = mem.read_bytes(ptr, len as usize).expect("in bounds");
            assert!(bytes.iter().all(|&b| b == byte));
            for &(other, other_len, _, _) in &live[i + 1..] {
                let disjoint = ptr + len <= other || other + other_len <= ptr;
                assert!(disjoint || len == 0 || other_len == 0);
            }
        }
    }
});
