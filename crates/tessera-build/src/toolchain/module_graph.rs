/// Incremental module-graph compiler
///
/// Walks the graph from the entries, runs plugin transforms, parse-checks
/// every module and writes one output file per module under `_m/`, with
/// import specifiers rewritten to output-relative paths. Entry files are
/// thin facades over their module.
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tessera_transform::{analyze_module, relative_to, CompileError, ModuleInfo, Resolver};
use tracing::{debug, info};

use super::{
    BuildContext, BuildOutput, ContextOptions, EntryNames, Inputs, ModuleId, Toolchain,
    VIRTUAL_PREFIX,
};
use crate::BuildError;

/// Directory, inside the output directory, holding per-module files
pub const MODULES_DIR: &str = "_m";

/// Hex characters of the graph hash in hashed entry names
const ENTRY_HASH_LEN: usize = 8;

/// The built-in [`Toolchain`]
#[derive(Debug, Clone, Default)]
pub struct ModuleToolchain;

impl ModuleToolchain {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Toolchain for ModuleToolchain {
    async fn context(&self, options: ContextOptions) -> Result<Box<dyn BuildContext>, BuildError> {
        tokio::fs::create_dir_all(&options.out_dir)
            .await
            .map_err(|e| BuildError::io(&options.out_dir, e))?;
        debug!(stage = %options.stage, out_dir = %options.out_dir.display(), "created build context");
        Ok(Box::new(ModuleGraphContext::new(options)))
    }
}

/// Where an import specifier points
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Module(ModuleId),
    /// Bare or configured-external specifier, left as written
    External,
}

/// Compiled form of one module, reused while its source and imports hold
#[derive(Debug, Clone)]
struct CompiledModule {
    source_hash: String,
    specifiers: Vec<String>,
    targets: Vec<Target>,
    output_file: String,
    code: String,
    has_default: bool,
}

struct ModuleGraphContext {
    options: ContextOptions,
    resolver: Resolver,
    inputs: Inputs,
    cache: HashMap<ModuleId, CompiledModule>,
    /// Output file → hash of what was last written there
    written: HashMap<String, String>,
}

impl ModuleGraphContext {
    fn new(options: ContextOptions) -> Self {
        let resolver = Resolver::new(&options.root);
        Self {
            options,
            resolver,
            inputs: Inputs::default(),
            cache: HashMap::new(),
            written: HashMap::new(),
        }
    }

    /// Path used for error locations and as the importer of relative specifiers
    fn display_path(&self, id: &ModuleId) -> PathBuf {
        match id {
            ModuleId::File(path) => path.clone(),
            ModuleId::Virtual(name) => self.options.root.join(name),
        }
    }

    fn output_file(&self, id: &ModuleId) -> String {
        match id {
            ModuleId::File(path) => {
                let rel = relative_to(&self.options.root, path).replace("..", "__");
                if rel.ends_with(".js") || rel.ends_with(".mjs") {
                    format!("{}/{}", MODULES_DIR, rel)
                } else {
                    format!("{}/{}.js", MODULES_DIR, rel)
                }
            }
            ModuleId::Virtual(name) => format!(
                "{}/_virtual/{}.js",
                MODULES_DIR,
                sanitize(name.trim_start_matches(VIRTUAL_PREFIX))
            ),
        }
    }

    fn is_external(&self, specifier: &str) -> bool {
        self.options.external.iter().any(|ext| {
            specifier == ext
                || specifier
                    .strip_prefix(ext.as_str())
                    .map_or(false, |rest| rest.starts_with('/'))
        })
    }

    fn resolve(&self, specifier: &str, importer: &Path) -> Option<Target> {
        if self.is_external(specifier) {
            return Some(Target::External);
        }
        if specifier.starts_with(VIRTUAL_PREFIX) {
            return Some(Target::Module(ModuleId::Virtual(specifier.to_string())));
        }
        if Resolver::is_bare(specifier) {
            return Some(Target::External);
        }
        self.resolver
            .resolve(specifier, importer)
            .map(|path| Target::Module(ModuleId::File(path)))
    }

    async fn load(&self, id: &ModuleId) -> Result<String, CompileError> {
        match id {
            ModuleId::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| CompileError::whole_file(path, format!("failed to read module: {}", e))),
            ModuleId::Virtual(name) => self.inputs.virtual_modules.get(name).cloned().ok_or_else(|| {
                CompileError::whole_file(Path::new(name), format!("unknown virtual module `{}`", name))
            }),
        }
    }

    /// Returns the cached module if its source and resolved imports are unchanged
    fn reusable(&self, id: &ModuleId, source_hash: &str) -> Option<CompiledModule> {
        let cached = self.cache.get(id)?;
        if cached.source_hash != source_hash {
            return None;
        }
        let importer = self.display_path(id);
        let still_resolved = cached
            .specifiers
            .iter()
            .zip(&cached.targets)
            .all(|(spec, target)| self.resolve(spec, &importer).as_ref() == Some(target));
        still_resolved.then(|| cached.clone())
    }

    fn compile(&self, id: &ModuleId, source: String, source_hash: String) -> Result<CompiledModule, CompileError> {
        let path = self.display_path(id);

        let mut code = source;
        for plugin in &self.options.plugins {
            if let Some(rewritten) = plugin.transform(id, &code)? {
                code = rewritten;
            }
        }

        let info = analyze_module(&code, &path, &[])?;
        let output_file = self.output_file(id);

        let mut specifiers = Vec::new();
        let mut targets = Vec::new();
        let mut edits = Vec::new();
        for module_ref in &info.module_refs {
            let target = self.resolve(&module_ref.specifier, &path).ok_or_else(|| {
                CompileError::at_offset(
                    &path,
                    &code,
                    module_ref.span.start,
                    module_ref.span.end - module_ref.span.start,
                    format!("could not resolve `{}`", module_ref.specifier),
                    Some("check the path, or list the package under build.external".to_string()),
                )
            })?;
            if let Target::Module(dep) = &target {
                let spec = relative_specifier(&output_file, &self.output_file(dep));
                edits.push((module_ref.span.start, module_ref.span.end, quote(&spec)));
            }
            specifiers.push(module_ref.specifier.clone());
            targets.push(target);
        }
        edits.extend(define_edits(&code, &info, &self.options.define));

        Ok(CompiledModule {
            source_hash,
            specifiers,
            targets,
            output_file,
            code: apply_edits(&code, edits),
            has_default: info.has_default_export(),
        })
    }

    /// Compiles every module reachable from the entries, in discovery order
    async fn walk(&mut self) -> Result<Vec<ModuleId>, Vec<CompileError>> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<ModuleId> = self.inputs.entries.iter().map(|e| e.module.clone()).collect();
        let mut errors = Vec::new();
        let mut reused = 0usize;

        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }

            let source = match self.load(&id).await {
                Ok(source) => source,
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            };
            let source_hash = hash_hex(source.as_bytes());

            let compiled = match self.reusable(&id, &source_hash) {
                Some(cached) => {
                    reused += 1;
                    cached
                }
                None => match self.compile(&id, source, source_hash) {
                    Ok(compiled) => compiled,
                    Err(err) => {
                        self.cache.remove(&id);
                        errors.push(err);
                        continue;
                    }
                },
            };

            for target in &compiled.targets {
                if let Target::Module(dep) = target {
                    queue.push_back(dep.clone());
                }
            }
            self.cache.insert(id.clone(), compiled);
            order.push(id);
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        self.cache.retain(|id, _| seen.contains(id));
        debug!(stage = %self.options.stage, modules = order.len(), reused, "walked module graph");
        Ok(order)
    }

    /// Hash over every module reachable from `root`
    fn graph_hash(&self, root: &ModuleId) -> String {
        let mut hasher = Sha256::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![root.clone()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(module) = self.cache.get(&id) {
                for target in &module.targets {
                    if let Target::Module(dep) = target {
                        stack.push(dep.clone());
                    }
                }
            }
        }
        for id in &seen {
            if let Some(module) = self.cache.get(id) {
                hasher.update(module.output_file.as_bytes());
                hasher.update(module.code.as_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }

    async fn write(&mut self, file: &str, contents: &str) -> Result<(), CompileError> {
        let hash = hash_hex(contents.as_bytes());
        let path = self.options.out_dir.join(file);
        if self.written.get(file) == Some(&hash) && path.is_file() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CompileError::whole_file(&path, format!("failed to create directory: {}", e)))?;
        }
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| CompileError::whole_file(&path, format!("failed to write output: {}", e)))?;
        self.written.insert(file.to_string(), hash);
        Ok(())
    }
}

#[async_trait]
impl BuildContext for ModuleGraphContext {
    fn update_inputs(&mut self, inputs: Inputs) {
        self.inputs = inputs;
    }

    async fn rebuild(&mut self) -> Result<BuildOutput, Vec<CompileError>> {
        for plugin in &self.options.plugins {
            plugin.build_start();
        }

        let order = self.walk().await?;

        let mut output = BuildOutput::default();
        let mut writes = Vec::new();
        for id in &order {
            if let Some(module) = self.cache.get(id) {
                writes.push((module.output_file.clone(), module.code.clone()));
            }
        }

        for entry in &self.inputs.entries {
            let Some(module) = self.cache.get(&entry.module) else {
                continue;
            };
            let file = match self.options.entry_names {
                EntryNames::Hashed => {
                    let hash = self.graph_hash(&entry.module);
                    format!("{}-{}.js", entry.name, &hash[..ENTRY_HASH_LEN])
                }
                EntryNames::Plain => format!("{}.js", entry.name),
            };
            let target = quote(&relative_specifier(&file, &module.output_file));
            let mut facade = format!("import {};\nexport * from {};\n", target, target);
            if module.has_default {
                facade.push_str(&format!("export {{ default }} from {};\n", target));
            }
            writes.push((file.clone(), facade));
            output.entries.insert(entry.name.clone(), file);
        }

        let mut errors = Vec::new();
        for (file, contents) in writes {
            if let Err(err) = self.write(&file, &contents).await {
                errors.push(err);
            }
            output.files.push(file);
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        for plugin in &self.options.plugins {
            plugin.build_end(&order).map_err(|e| vec![e])?;
        }

        info!(
            stage = %self.options.stage,
            entries = output.entries.len(),
            files = output.files.len(),
            "rebuilt"
        );
        Ok(output)
    }

    async fn dispose(&mut self) {
        debug!(stage = %self.options.stage, "disposed build context");
        self.cache.clear();
        self.written.clear();
    }
}

fn hash_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Relative import specifier from one output file to another
fn relative_specifier(from: &str, to: &str) -> String {
    let from_dir: Vec<&str> = from.split('/').collect::<Vec<_>>();
    let from_dir = &from_dir[..from_dir.len().saturating_sub(1)];
    let to_parts: Vec<&str> = to.split('/').collect();

    let common = from_dir
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = vec![".."; from_dir.len() - common];
    parts.extend(&to_parts[common..]);
    let joined = parts.join("/");
    if joined.starts_with("..") {
        joined
    } else {
        format!("./{}", joined)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Replacements for `define` keys at identifier references
///
/// A dotted key matches when the reference starts the exact member chain.
fn define_edits(
    code: &str,
    info: &ModuleInfo,
    define: &std::collections::BTreeMap<String, String>,
) -> Vec<(usize, usize, String)> {
    if define.is_empty() {
        return Vec::new();
    }

    let mut edits = Vec::new();
    for reference in &info.references {
        let rest = &code[reference.span.start..];
        let found = define.iter().find(|(key, _)| {
            key.split('.').next() == Some(reference.name.as_str())
                && rest.starts_with(key.as_str())
                && !rest[key.len()..].starts_with(is_ident_char)
        });
        if let Some((key, value)) = found {
            edits.push((reference.span.start, reference.span.start + key.len(), value.clone()));
        }
    }
    edits
}

fn apply_edits(code: &str, mut edits: Vec<(usize, usize, String)>) -> String {
    edits.sort_by_key(|(start, _, _)| *start);
    let mut out = String::with_capacity(code.len());
    let mut cursor = 0;
    for (start, end, text) in edits {
        if start < cursor {
            continue;
        }
        out.push_str(&code[cursor..start]);
        out.push_str(&text);
        cursor = end;
    }
    out.push_str(&code[cursor..]);
    out
}
