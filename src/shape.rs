use std::ffi::CStr;
use std::os::fd::{AsFd, BorrowedFd};

use anyhow::Result;
use libbpf_rs::{Map, MapInfo};
use log::debug;

use crate::errors::AgentError;

/// Expected binary layout of a map, as queried from the kernel via
/// `bpf_obj_get_info_by_fd`. A zero field means "don't check": the consumer
/// only pins down the parts of the layout it is going to interpret.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TableShape {
    pub key_size: u32,
    pub value_size: u32,
    pub max_entries: u32,
    pub map_type: u32,
}

impl TableShape {
    /// Compare this expectation against a live map's actual shape. The first
    /// non-wildcard field that diverges fails the whole check.
    pub fn check(&self, actual: &TableShape) -> Result<(), AgentError> {
        let fields = [
            ("key size", self.key_size, actual.key_size),
            ("value size", self.value_size, actual.value_size),
            ("max entries", self.max_entries, actual.max_entries),
            ("type", self.map_type, actual.map_type),
        ];
        for (field, expected, actual) in fields {
            if expected != 0 && expected != actual {
                return Err(AgentError::ShapeMismatch {
                    field,
                    actual,
                    expected,
                });
            }
        }
        Ok(())
    }
}

/// Query the live shape of the map behind `fd`, plus its id and name for
/// diagnostics. An unusable descriptor is reported before anything is
/// trusted about the map.
pub fn query_shape(fd: BorrowedFd<'_>) -> Result<(TableShape, u32, String)> {
    let info = MapInfo::new(fd).map_err(AgentError::InvalidHandle)?;
    let shape = TableShape {
        key_size: info.info.key_size,
        value_size: info.info.value_size,
        max_entries: info.info.max_entries,
        map_type: info.info.type_,
    };
    let name = unsafe { CStr::from_ptr(info.info.name.as_ptr()) }
        .to_string_lossy()
        .into_owned();
    Ok((shape, info.info.id, name))
}

/// Gate keeping the poll loop honest: the stats map was found by name at
/// runtime, so nothing ties its layout to what this agent assumes. Reject it
/// up front rather than misread its bytes later.
pub fn verify_map_shape(map: &Map<'_>, expected: &TableShape) -> Result<()> {
    let (actual, id, name) = query_shape(map.as_fd())?;
    debug!(
        "map '{}' (type:{} id:{}) key_size:{} value_size:{} max_entries:{}",
        name, actual.map_type, id, actual.key_size, actual.value_size, actual.max_entries
    );
    expected.check(&actual)?;
    Ok(())
}
