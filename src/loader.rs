use std::path::Path;

use anyhow::Result;
use libbpf_rs::{Link, Map, MapCore as _, Object, ObjectBuilder, TracepointCategory, TracepointOpts};
use log::debug;

use crate::errors::AgentError;

/// A loaded BPF object together with its live tracepoint attachment.
///
/// Both the object and the link are held for the rest of the process's life;
/// dropping this struct (at process teardown) detaches the program and
/// releases every map and program the object loaded.
pub struct LoadedProbe {
    object: Object,
    _link: Link,
}

impl LoadedProbe {
    pub fn object(&self) -> &Object {
        &self.object
    }
}

/// Open the BPF object at `path`, load all of its programs and maps into the
/// kernel, and attach the first program to the `category:name` tracepoint.
///
/// Any failure after the object has been loaded drops the partially-loaded
/// object before returning, so nothing lingers in the kernel on the error
/// path.
pub fn load_and_attach(path: &Path, category: &str, name: &str) -> Result<LoadedProbe> {
    let open_obj = ObjectBuilder::default()
        .open_file(path)
        .map_err(|source| AgentError::Load {
            path: path.to_path_buf(),
            source,
        })?;

    let mut object = open_obj.load().map_err(|source| AgentError::Load {
        path: path.to_path_buf(),
        source,
    })?;

    let link = {
        let prog = object
            .progs_mut()
            .next()
            .ok_or_else(|| AgentError::NoProgram {
                path: path.to_path_buf(),
            })?;
        debug!(
            "attaching program '{}' to tracepoint {}:{}",
            prog.name().to_string_lossy(),
            category,
            name
        );
        prog.attach_tracepoint_with_opts(
            TracepointCategory::Custom(category.to_string()),
            name,
            TracepointOpts::default(),
        )
        .map_err(|source| AgentError::Attach {
            category: category.to_string(),
            name: name.to_string(),
            source,
        })?
    };

    Ok(LoadedProbe {
        object,
        _link: link,
    })
}

/// Look up a map by exact name. The stats map is discovered at runtime with
/// no static link to the program that fills it, which is why the caller must
/// verify its shape before reading values out of it.
pub fn find_map<'obj>(object: &'obj Object, name: &str) -> Result<Map<'obj>> {
    object
        .maps()
        .find(|m| m.name() == name)
        .ok_or_else(|| AgentError::TableNotFound(name.to_string()).into())
}
