use std::fmt;
use std::path::PathBuf;

use tessera_router::DiscoverError;
use tessera_transform::{CompileError, TransformError};
use thiserror::Error;

/// Fatal error for one build cycle
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no tessera.toml found in {0}")]
    MissingConfig(PathBuf),

    #[error("invalid {path}: {message}")]
    InvalidConfig { path: PathBuf, message: String },

    #[error("{file} has no default export; files ending in .jsx or .tsx must export a page component")]
    MissingDefaultExport { file: PathBuf },

    #[error("failed to discover routes: {0}")]
    Discover(#[from] DiscoverError),

    #[error("{hook} hook `{command}` failed: {message}")]
    Hook {
        hook: String,
        command: String,
        message: String,
    },

    #[error("failed to launch server: {0}")]
    Launch(String),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transform(TransformError),
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a build cycle stopped
#[derive(Debug)]
pub enum BuildFailure {
    /// Configuration, inspection or I/O problem
    Build(BuildError),
    /// Source errors reported by the toolchain
    Compile(Vec<CompileError>),
}

impl BuildFailure {
    /// Short classification for logs
    pub fn kind(&self) -> &'static str {
        match self {
            BuildFailure::Build(_) => "build",
            BuildFailure::Compile(_) => "compile",
        }
    }
}

impl fmt::Display for BuildFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildFailure::Build(err) => write!(f, "{}", err),
            BuildFailure::Compile(errors) => {
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                        writeln!(f)?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for BuildFailure {}

impl From<BuildError> for BuildFailure {
    fn from(err: BuildError) -> Self {
        BuildFailure::Build(err)
    }
}

impl From<CompileError> for BuildFailure {
    fn from(err: CompileError) -> Self {
        BuildFailure::Compile(vec![err])
    }
}

impl From<TransformError> for BuildFailure {
    fn from(err: TransformError) -> Self {
        match err {
            TransformError::Compile(e) => BuildFailure::Compile(vec![e]),
            other => BuildFailure::Build(BuildError::Transform(other)),
        }
    }
}
