use std::path::PathBuf;

use thiserror::Error;

/// Everything went fine.
pub const EXIT_OK: i32 = 0;
/// Generic failure.
pub const EXIT_FAIL: i32 = 1;
/// A BPF syscall or libbpf operation failed.
pub const EXIT_FAIL_BPF: i32 = 40;

/// Failures the agent can hit between loading the BPF object and walking the
/// stats map. The fatal variants surface to `main` and pick the process exit
/// code; `KeyIteration` and `ValueLookup` are handled inside a poll tick.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("failed to load BPF object '{}': {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libbpf_rs::Error,
    },

    #[error("BPF object '{}' defines no programs", .path.display())]
    NoProgram { path: PathBuf },

    #[error("failed to attach to tracepoint {category}:{name}: {source}")]
    Attach {
        category: String,
        name: String,
        #[source]
        source: libbpf_rs::Error,
    },

    #[error("no map named '{0}' in BPF object")]
    TableNotFound(String),

    #[error("map handle is not usable: {0}")]
    InvalidHandle(libbpf_rs::Error),

    #[error("map {field} is {actual}, expected {expected}")]
    ShapeMismatch {
        field: &'static str,
        actual: u32,
        expected: u32,
    },

    #[error("map key iteration failed: {0}")]
    KeyIteration(std::io::Error),

    #[error("value lookup failed for key 0x{key:X}: {source}")]
    ValueLookup {
        key: i32,
        #[source]
        source: std::io::Error,
    },
}

impl AgentError {
    /// Exit code bucket for this failure. Kernel-level refusals get the
    /// distinguished BPF code so callers can tell them from plain breakage.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Load { .. }
            | AgentError::NoProgram { .. }
            | AgentError::Attach { .. }
            | AgentError::TableNotFound(_)
            | AgentError::InvalidHandle(_)
            | AgentError::KeyIteration(_)
            | AgentError::ValueLookup { .. } => EXIT_FAIL_BPF,
            AgentError::ShapeMismatch { .. } => EXIT_FAIL,
        }
    }
}

/// Map an error chain onto a process exit code. Anything that is not an
/// `AgentError` somewhere in the chain is a generic failure.
pub fn classify_exit(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<AgentError>())
        .map(AgentError::exit_code)
        .unwrap_or(EXIT_FAIL)
}
