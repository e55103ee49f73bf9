//! Compiler toolchain seam
//!
//! The orchestrator talks to a [`Toolchain`] only through persistent
//! [`BuildContext`]s: one per stage, fed new inputs and rebuilt on every
//! cycle. [`ModuleToolchain`] is the in-crate implementation.

mod module_graph;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tessera_transform::CompileError;

use crate::BuildError;

pub use module_graph::ModuleToolchain;

/// Prefix of ids that name generated modules
pub const VIRTUAL_PREFIX: &str = "tessera:";

/// A module in the compilation graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleId {
    File(PathBuf),
    /// Generated module, e.g. `tessera:page/3f2a9c01bd`
    Virtual(String),
}

impl ModuleId {
    pub fn is_virtual(&self) -> bool {
        matches!(self, ModuleId::Virtual(_))
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleId::File(path) => write!(f, "{}", path.display()),
            ModuleId::Virtual(id) => f.write_str(id),
        }
    }
}

/// How entry files are named
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryNames {
    /// `<name>-<hash>.js`, hash over the entry's whole graph
    Hashed,
    /// `<name>.js`
    Plain,
}

/// Options a context is created with; changing any of them means a new context
#[derive(Clone)]
pub struct ContextOptions {
    /// Stage name, used in logs
    pub stage: String,
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub entry_names: EntryNames,
    /// Specifiers left unbundled
    pub external: Vec<String>,
    /// Identifier or dotted expression → replacement source text
    pub define: BTreeMap<String, String>,
    pub minify: bool,
    pub plugins: Vec<Arc<dyn Plugin>>,
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("stage", &self.stage)
            .field("out_dir", &self.out_dir)
            .field("entry_names", &self.entry_names)
            .field("external", &self.external)
            .field("define", &self.define)
            .field("minify", &self.minify)
            .field("plugins", &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

/// Named entry point of a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub module: ModuleId,
}

/// Inputs replaced on every cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inputs {
    pub entries: Vec<Entry>,
    /// Source text of generated modules, keyed by virtual id
    pub virtual_modules: BTreeMap<String, String>,
}

/// Result of one successful rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutput {
    /// Entry name → emitted file name, relative to the output directory
    pub entries: BTreeMap<String, String>,
    /// Every file of the output graph, relative to the output directory
    pub files: Vec<String>,
}

/// Creates build contexts
#[async_trait]
pub trait Toolchain: Send + Sync {
    async fn context(&self, options: ContextOptions) -> Result<Box<dyn BuildContext>, BuildError>;
}

/// Persistent, incremental compilation context for one stage
#[async_trait]
pub trait BuildContext: Send {
    fn update_inputs(&mut self, inputs: Inputs);

    /// Compiles the current inputs, reusing whatever is still valid
    async fn rebuild(&mut self) -> Result<BuildOutput, Vec<CompileError>>;

    async fn dispose(&mut self);
}

/// Hook into every compilation of a context
///
/// `transform` returns `Ok(None)` to leave a module untouched.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn build_start(&self) {}

    fn transform(&self, id: &ModuleId, code: &str) -> Result<Option<String>, CompileError>;

    /// Called after a successful compilation with every module of the graph
    fn build_end(&self, _modules: &[ModuleId]) -> Result<(), CompileError> {
        Ok(())
    }
}
