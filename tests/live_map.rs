//! Integration tests against live kernel maps.
//!
//! These exercise the shape gate and the per-CPU aggregation against real
//! BPF maps created through the bpf() syscall. They require root/BPF
//! privileges and are marked as `#[ignore]` by default.
//!
//! To run these tests:
//! ```
//! sudo cargo test --test live_map -- --ignored
//! ```

use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::ptr;

use libbpf_rs::libbpf_sys;

use xdptrace::errors::AgentError;
use xdptrace::shape::{query_shape, TableShape};
use xdptrace::stats::{snapshot, StatsMap};

fn create_map(map_type: u32, key_size: u32, value_size: u32, max_entries: u32) -> OwnedFd {
    let fd = unsafe {
        libbpf_sys::bpf_map_create(
            map_type,
            ptr::null(),
            key_size,
            value_size,
            max_entries,
            ptr::null(),
        )
    };
    assert!(fd >= 0, "bpf_map_create failed with {fd} (are you root?)");
    unsafe { OwnedFd::from_raw_fd(fd) }
}

#[test]
#[ignore] // Requires root/BPF privileges
fn test_array_map_shape_verifies() {
    let fd = create_map(libbpf_sys::BPF_MAP_TYPE_ARRAY, 4, 8, 16);
    let (actual, _id, _name) = query_shape(fd.as_fd()).unwrap();

    let expected = TableShape {
        key_size: 4,
        value_size: 8,
        ..Default::default()
    };
    assert!(expected.check(&actual).is_ok());

    let exact = TableShape {
        key_size: 4,
        value_size: 8,
        max_entries: 16,
        map_type: libbpf_sys::BPF_MAP_TYPE_ARRAY,
    };
    assert!(exact.check(&actual).is_ok());
}

#[test]
#[ignore] // Requires root/BPF privileges
fn test_array_map_key_size_mismatch() {
    let fd = create_map(libbpf_sys::BPF_MAP_TYPE_ARRAY, 4, 8, 16);
    let (actual, _id, _name) = query_shape(fd.as_fd()).unwrap();

    let expected = TableShape {
        key_size: 8,
        ..Default::default()
    };
    match expected.check(&actual) {
        Err(AgentError::ShapeMismatch {
            field,
            actual,
            expected,
        }) => {
            assert_eq!(field, "key size");
            assert_eq!(actual, 4);
            assert_eq!(expected, 8);
        }
        other => panic!("expected key size mismatch, got {other:?}"),
    }
}

#[test]
#[ignore] // Requires root/BPF privileges
fn test_percpu_hash_snapshot_sums_slots() {
    let nr_cpus = libbpf_rs::num_possible_cpus().unwrap();
    let fd = create_map(libbpf_sys::BPF_MAP_TYPE_PERCPU_HASH, 4, 8, 16);

    for key in [2i32, 5, 9] {
        let values: Vec<u64> = (0..nr_cpus as u64)
            .map(|cpu| key as u64 * 10 + cpu)
            .collect();
        let rc = unsafe {
            libbpf_sys::bpf_map_update_elem(
                fd.as_raw_fd(),
                &key as *const i32 as *const libc::c_void,
                values.as_ptr() as *const libc::c_void,
                libbpf_sys::BPF_ANY as u64,
            )
        };
        assert_eq!(rc, 0, "bpf_map_update_elem failed");
    }

    let map = StatsMap::new(fd.as_fd()).unwrap();
    let mut counts = snapshot(&map).unwrap();
    counts.sort_unstable();

    let expected: Vec<(i32, u64)> = [2i32, 5, 9]
        .iter()
        .map(|&key| {
            let total = (0..nr_cpus as u64).map(|cpu| key as u64 * 10 + cpu).sum();
            (key, total)
        })
        .collect();
    assert_eq!(counts, expected);
}

#[test]
#[ignore] // Requires root/BPF privileges
fn test_empty_map_snapshot_is_empty() {
    let fd = create_map(libbpf_sys::BPF_MAP_TYPE_PERCPU_HASH, 4, 8, 16);
    let map = StatsMap::new(fd.as_fd()).unwrap();
    assert_eq!(snapshot(&map).unwrap(), Vec::new());
}
