// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A configuration graph written with offset pointers must survive the file
//! being mapped again, independent of the base address the second mapping
//! lands on.

use std::ptr::NonNull;
use yanet_arena::{Arena, OffsetPtr};

#[repr(C)]
struct Record {
    value: u64,
    next: OffsetPtr<Record>,
}

fn record_at(ptr: NonNull<u8>) -> NonNull<Record> {
    ptr.cast::<Record>()
}

#[test]
fn graph_survives_remap() {
    let dir = std::env::temp_dir().join("yanet-arena-test");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("graph-{}", std::process::id()));

    let values = [11u64, 22, 33, 44];

    {
        let arena = Arena::create_file(&path, 1 << 16, 1 << 16).unwrap();
        let cp = arena.cp();

        // Build the chain back to front so each node can point at the next.
        let mut next: Option<NonNull<Record>> = None;
        let mut first = None;
        for &value in values.iter().rev() {
            let block = record_at(cp.alloc(size_of::<Record>()).unwrap());
            unsafe {
                block.write(Record {
                    value,
                    next: OffsetPtr::null(),
                });
                block.as_ref().next.store(next);
            }
            next = Some(block);
            first = next;
        }
        cp.root().store(first.map(NonNull::cast));
        cp.generation()
            .store(7, std::sync::atomic::Ordering::Release);
    }

    {
        let arena = Arena::open_file(&path).unwrap();
        let cp = arena.cp();
        assert_eq!(
            cp.generation().load(std::sync::atomic::Ordering::Acquire),
            7
        );

        let mut walked = Vec::new();
        let mut cursor = cp.root().load().map(record_at);
        while let Some(node) = cursor {
            let record = unsafe { node.as_ref() };
            walked.push(record.value);
            cursor = record.next.load();
        }
        assert_eq!(walked, values);
    }

    std::fs::remove_file(&path).unwrap();
}
