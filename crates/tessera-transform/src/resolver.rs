/// Module specifier resolution shared by the transform and the toolchain
use std::path::{Component, Path, PathBuf};

/// Extensions tried, in order, for extensionless specifiers
pub const DEFAULT_EXTENSIONS: [&str; 6] = ["js", "jsx", "ts", "tsx", "mjs", "mts"];

/// Resolves relative and root-absolute specifiers to files on disk
///
/// - `./x`, `../x` resolve against the importing file's directory
/// - `/x` resolves against the project root
/// - bare specifiers (`react`, `tessera/client`) are external: `None`
///
/// Each candidate is tried as-is, then with every extension appended, then
/// as a directory containing `index.<ext>`.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    extensions: Vec<String>,
}

impl Resolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }

    /// Replaces the candidate extension list
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a specifier is left to the runtime (not a path)
    pub fn is_bare(specifier: &str) -> bool {
        !(specifier.starts_with("./")
            || specifier.starts_with("../")
            || specifier.starts_with('/')
            || specifier == "."
            || specifier == "..")
    }

    /// Resolves `specifier` as imported from `importer`
    pub fn resolve(&self, specifier: &str, importer: &Path) -> Option<PathBuf> {
        if Self::is_bare(specifier) {
            return None;
        }

        let base = if let Some(rooted) = specifier.strip_prefix('/') {
            self.root.join(rooted)
        } else {
            importer.parent().unwrap_or(&self.root).join(specifier)
        };
        let candidate = clean(&base);

        self.try_file(&candidate)
            .or_else(|| self.try_index(&candidate))
    }

    fn try_file(&self, candidate: &Path) -> Option<PathBuf> {
        if candidate.is_file() {
            return Some(candidate.to_path_buf());
        }
        self.extensions.iter().find_map(|ext| {
            let mut with_ext = candidate.as_os_str().to_owned();
            with_ext.push(".");
            with_ext.push(ext);
            let path = PathBuf::from(with_ext);
            path.is_file().then_some(path)
        })
    }

    fn try_index(&self, candidate: &Path) -> Option<PathBuf> {
        if !candidate.is_dir() {
            return None;
        }
        self.extensions.iter().find_map(|ext| {
            let path = candidate.join(format!("index.{}", ext));
            path.is_file().then_some(path)
        })
    }
}

/// Lexically removes `.` and `..` components
pub fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
