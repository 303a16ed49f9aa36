//! Build-error taxonomy.
//!
//! Only fatal conditions surface as [`BuildError`]: an unparseable
//! descriptor, an unreadable or failing include, or a root that never
//! establishes a data-memory size. Recoverable conditions (out-of-range
//! blocks, unsupported peripherals, unresolved names) are logged and
//! skipped by the builder so the rest of the device still builds.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("descriptor parse error at line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("cannot read descriptor {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("include \"{file}\" failed: {source}")]
    Include {
        file: String,
        #[source]
        source: Box<BuildError>,
    },

    #[error("descriptor defines no data memory")]
    NoDataMem,
}

impl BuildError {
    /// Stable nonzero code for callers that consume a single integer
    /// result instead of the typed error.
    pub fn code(&self) -> i32 {
        match self {
            BuildError::Parse { .. } => 1,
            BuildError::Io { .. } => 2,
            BuildError::Include { source, .. } => source.code(),
            BuildError::NoDataMem => 3,
        }
    }
}
