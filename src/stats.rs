use std::ffi::CStr;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::ptr;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use libbpf_rs::libbpf_sys;
use log::warn;

use crate::errors::AgentError;

/// Cursor-style access to a kernel counter table keyed by interface index.
///
/// `next_key` follows the kernel's "key after this one" protocol: `Ok(None)`
/// means the table is exhausted, which is ordinary termination and distinct
/// from an iteration error. `per_cpu_values` returns one counter slot per
/// possible CPU; the kernel program bumps each CPU's own slot so writers
/// never contend, and it is on us to sum the slots at read time.
pub trait CounterTable {
    fn next_key(&self, prev: Option<i32>) -> Result<Option<i32>, AgentError>;
    fn per_cpu_values(&self, key: i32) -> Result<Vec<u64>, AgentError>;
}

/// The live stats map. The per-CPU slot count is queried once at
/// construction; CPU hot-plug after that point is a known limitation.
pub struct StatsMap<'m> {
    fd: BorrowedFd<'m>,
    nr_cpus: usize,
}

impl<'m> StatsMap<'m> {
    pub fn new(fd: BorrowedFd<'m>) -> Result<Self> {
        let nr_cpus = libbpf_rs::num_possible_cpus()?;
        Ok(StatsMap { fd, nr_cpus })
    }
}

impl CounterTable for StatsMap<'_> {
    fn next_key(&self, prev: Option<i32>) -> Result<Option<i32>, AgentError> {
        let mut next: i32 = 0;
        let prev_ptr = match prev.as_ref() {
            Some(key) => key as *const i32 as *const libc::c_void,
            None => ptr::null(),
        };
        let rc = unsafe {
            libbpf_sys::bpf_map_get_next_key(
                self.fd.as_raw_fd(),
                prev_ptr,
                &mut next as *mut i32 as *mut libc::c_void,
            )
        };
        match rc {
            0 => Ok(Some(next)),
            rc if -rc == libc::ENOENT => Ok(None),
            rc => Err(AgentError::KeyIteration(io::Error::from_raw_os_error(-rc))),
        }
    }

    fn per_cpu_values(&self, key: i32) -> Result<Vec<u64>, AgentError> {
        // The shape gate already pinned the value size to 8 bytes, so one
        // u64 per possible CPU is exactly what the kernel hands back for a
        // per-CPU map.
        let mut values = vec![0u64; self.nr_cpus];
        let rc = unsafe {
            libbpf_sys::bpf_map_lookup_elem(
                self.fd.as_raw_fd(),
                &key as *const i32 as *const libc::c_void,
                values.as_mut_ptr() as *mut libc::c_void,
            )
        };
        if rc != 0 {
            return Err(AgentError::ValueLookup {
                key,
                source: io::Error::from_raw_os_error(-rc),
            });
        }
        Ok(values)
    }
}

/// Walk every key currently in the table and sum its per-CPU slots into one
/// total. A key whose lookup fails is logged and skipped; the rest of the
/// snapshot still goes through. An iteration error aborts the snapshot.
/// Entries come back in table-iteration order, which is not meaningful.
pub fn snapshot<T: CounterTable>(table: &T) -> Result<Vec<(i32, u64)>, AgentError> {
    let mut counts = Vec::new();
    let mut prev = None;
    while let Some(key) = table.next_key(prev)? {
        match table.per_cpu_values(key) {
            Ok(values) => counts.push((key, values.iter().sum())),
            Err(err) => warn!("{err}"),
        }
        prev = Some(key);
    }
    Ok(counts)
}

/// Poll the table forever at a fixed cadence, printing one line of
/// "name (count)" pairs per tick. A failed snapshot only costs that tick;
/// the next one starts from a fresh cursor. There is no backoff and no tick
/// skipping: a slow poll just delays the following one.
pub fn poll<T: CounterTable>(table: &T, interval: Duration) -> ! {
    loop {
        match snapshot(table) {
            Ok(counts) => println!("{}", format_counts(&counts)),
            Err(err) => warn!("snapshot aborted, retrying next tick: {err}"),
        }
        thread::sleep(interval);
    }
}

fn format_counts(counts: &[(i32, u64)]) -> String {
    counts
        .iter()
        .map(|&(ifindex, total)| format!("{} ({})", ifname(ifindex), group_thousands(total)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve an interface index to its name, falling back to a placeholder
/// for indexes the host no longer knows about.
fn ifname(ifindex: i32) -> String {
    let mut buf = [0 as libc::c_char; libc::IF_NAMESIZE];
    let ret = unsafe { libc::if_indextoname(ifindex as libc::c_uint, buf.as_mut_ptr()) };
    if ret.is_null() {
        return format!("ifindex:{ifindex}");
    }
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

// Presentation only; keep locale-ish concerns out of the aggregation path.
fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
