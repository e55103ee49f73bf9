//! Privileged hook rewriting
//!
//! `useLoader(getUser)` becomes `useLoader("fn_3f2a...")`: only the first
//! argument's bytes change. In prune mode the imports and top-level
//! declarations that were only reachable through rewritten arguments are
//! removed as well, so server code never reaches a client bundle.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::analyze::{
    analyze_module, DeclKind, HookCall, HookTarget, ImportDecl, ImportedName, ModuleInfo,
    SourceSpan,
};
use crate::error::{Diagnostic, Severity};
use crate::id::{function_id, relative_to, DEFAULT_ID_PREFIX};
use crate::{FunctionRegistry, RegistryEntry, Resolver, TransformError};

/// Default privileged hook names
pub const DEFAULT_HOOKS: [&str; 2] = ["useLoader", "useAction"];

/// Per-pass transform settings
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Project root ids are relative to
    pub root: PathBuf,
    pub hooks: Vec<String>,
    pub id_prefix: String,
    /// Remove bindings only reachable through rewritten arguments
    pub prune: bool,
    /// Export referenced local declarations so a registry module can import them
    pub expose_locals: bool,
    pub resolver: Resolver,
}

impl TransformOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            resolver: Resolver::new(root.clone()),
            root,
            hooks: DEFAULT_HOOKS.iter().map(|h| h.to_string()).collect(),
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            prune: false,
            expose_locals: false,
        }
    }

    pub fn with_hooks<I, S>(mut self, hooks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hooks = hooks.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    pub fn with_expose_locals(mut self, expose: bool) -> Self {
        self.expose_locals = expose;
        self
    }

    pub fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }
}

/// Result of transforming one module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub code: String,
    /// Whether `code` differs from the input
    pub changed: bool,
    /// Every function referenced by a rewritten call, in source order
    pub entries: Vec<(String, RegistryEntry)>,
    pub diagnostics: Vec<Diagnostic>,
}

impl TransformOutput {
    fn unchanged(source: &str) -> Self {
        TransformOutput {
            code: source.to_string(),
            changed: false,
            entries: Vec::new(),
            diagnostics: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Edit {
    span: SourceSpan,
    text: String,
}

/// A resolved hook argument
struct Resolved {
    argument: SourceSpan,
    /// Binding the argument referenced (pruning seed)
    binding: String,
    file: PathBuf,
    name: String,
    /// Declared in this module
    local: bool,
}

/// Rewrites privileged hook calls in one module
///
/// When `registry` is supplied every resolved function is recorded in it;
/// the entries are also returned in [`TransformOutput::entries`].
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use tessera_transform::{function_id, transform_module, TransformOptions};
///
/// let options = TransformOptions::new("/app");
/// let source = "async function load() {}\nexport default () => useLoader(load, 1);\n";
/// let out = transform_module(source, Path::new("/app/routes/index.js"), &options, None).unwrap();
///
/// let id = function_id("fn_", "routes/index.js", "load");
/// assert_eq!(
///     out.code,
///     format!("async function load() {{}}\nexport default () => useLoader(\"{}\", 1);\n", id)
/// );
/// ```
pub fn transform_module(
    source: &str,
    file: &Path,
    options: &TransformOptions,
    registry: Option<&mut FunctionRegistry>,
) -> Result<TransformOutput, TransformError> {
    if !options.hooks.iter().any(|hook| source.contains(hook.as_str())) {
        return Ok(TransformOutput::unchanged(source));
    }

    let info = analyze_module(source, file, &options.hooks)?;
    if info.hook_calls.is_empty() {
        return Ok(TransformOutput::unchanged(source));
    }

    let mut diagnostics = Vec::new();
    let mut resolved = Vec::new();
    for call in &info.hook_calls {
        match resolve_call(&info, call, file, &options.resolver) {
            Some(r) => resolved.push(r),
            None => {
                let (line, column) = line_column(source, call.argument.start);
                let message = format!(
                    "could not resolve `{}` passed to {}; call left unchanged",
                    call.argument.slice(source),
                    call.hook
                );
                warn!(file = %file.display(), line, column, "{}", message);
                diagnostics.push(Diagnostic {
                    severity: Severity::Warning,
                    file: file.to_path_buf(),
                    line,
                    column,
                    message,
                });
            }
        }
    }

    let mut edits = Vec::new();
    let mut entries = Vec::new();
    for r in &resolved {
        let id = function_id(&options.id_prefix, &relative_to(&options.root, &r.file), &r.name);
        debug!(file = %file.display(), id = %id, name = %r.name, "rewrote hook argument");
        edits.push(Edit {
            span: r.argument,
            text: serde_json::Value::String(id.clone()).to_string(),
        });
        entries.push((
            id,
            RegistryEntry {
                file: r.file.clone(),
                name: r.name.clone(),
            },
        ));
    }

    if let Some(registry) = registry {
        registry.extend(entries.iter().cloned())?;
    }

    let mut removals = if options.prune {
        prune(source, &info, &resolved, &edits)
    } else {
        Vec::new()
    };

    if options.expose_locals {
        let mut exposed: Vec<&str> = Vec::new();
        for r in resolved.iter().filter(|r| r.local) {
            let already = info
                .local(&r.name)
                .map_or(true, |decl| decl.exported_as.iter().any(|e| *e == r.name));
            let pruned = info
                .local(&r.name)
                .map_or(false, |decl| removals.iter().any(|e| e.span.contains(decl.span)));
            if !already && !pruned && !exposed.contains(&r.name.as_str()) {
                exposed.push(&r.name);
            }
        }
        if !exposed.is_empty() {
            let separator = if source.ends_with('\n') { "" } else { "\n" };
            removals.push(Edit {
                span: SourceSpan {
                    start: source.len(),
                    end: source.len(),
                },
                text: format!("{}export {{ {} }};\n", separator, exposed.join(", ")),
            });
        }
    }

    edits.retain(|edit| {
        !removals
            .iter()
            .any(|r| r.span.start < r.span.end && r.span.contains(edit.span))
    });
    edits.extend(removals);

    let code = apply_edits(source, edits);
    Ok(TransformOutput {
        changed: code != source,
        code,
        entries,
        diagnostics,
    })
}

fn resolve_call(
    info: &ModuleInfo,
    call: &HookCall,
    file: &Path,
    resolver: &Resolver,
) -> Option<Resolved> {
    match &call.target {
        HookTarget::Identifier(name) => {
            if let Some((decl, binding)) = info.import_binding(name) {
                let export = binding.imported.export_name()?;
                let target = resolver.resolve(&decl.specifier, file)?;
                return Some(Resolved {
                    argument: call.argument,
                    binding: name.clone(),
                    file: target,
                    name: export.to_string(),
                    local: false,
                });
            }
            info.local(name).map(|decl| Resolved {
                argument: call.argument,
                binding: name.clone(),
                file: file.to_path_buf(),
                name: decl.name.clone(),
                local: true,
            })
        }
        HookTarget::Member { object, property } => {
            let (decl, binding) = info.import_binding(object)?;
            if binding.imported != ImportedName::Namespace {
                return None;
            }
            let target = resolver.resolve(&decl.specifier, file)?;
            Some(Resolved {
                argument: call.argument,
                binding: object.clone(),
                file: target,
                name: property.clone(),
                local: false,
            })
        }
    }
}

/// 1-based line and column of a byte offset
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    (line, column)
}

// ============================================================================
// Pruning
// ============================================================================

/// A binding that may be removed
struct Unit {
    name: String,
    span: SourceSpan,
}

/// Computes removal edits for bindings only reachable through rewritten
/// hook arguments
///
/// Removing a declaration drops its own references too, so the pass runs to
/// a fixpoint: an import used only inside a pruned loader goes with it.
fn prune(
    source: &str,
    info: &ModuleInfo,
    resolved: &[Resolved],
    replacements: &[Edit],
) -> Vec<Edit> {
    let rewritten: Vec<SourceSpan> = resolved.iter().map(|r| r.argument).collect();

    let mut units: Vec<Unit> = Vec::new();
    let mut import_units: Vec<(usize, usize, usize)> = Vec::new();
    for (d, decl) in info.imports.iter().enumerate() {
        if decl.type_only {
            continue;
        }
        for (b, binding) in decl.bindings.iter().enumerate() {
            import_units.push((units.len(), d, b));
            units.push(Unit {
                name: binding.local.clone(),
                span: binding.span,
            });
        }
    }
    // Exported hook targets are server functions too; default exports are
    // the page itself and always stay.
    let targets: HashSet<&str> = resolved
        .iter()
        .filter(|r| r.local)
        .map(|r| r.binding.as_str())
        .collect();
    let mut local_units: Vec<(usize, usize)> = Vec::new();
    for (l, local) in info.locals.iter().enumerate() {
        let removable = local.exported_as.is_empty()
            || (targets.contains(local.name.as_str())
                && !local.exported_as.iter().any(|e| e == "default"));
        if removable {
            local_units.push((units.len(), l));
            units.push(Unit {
                name: local.name.clone(),
                span: local.span,
            });
        }
    }

    // owner: index of the removable unit containing the reference, if any
    let references: Vec<(&str, Option<usize>)> = info
        .references
        .iter()
        .filter(|r| !rewritten.iter().any(|span| span.contains(r.span)))
        .filter(|r| !info.export_lists.iter().any(|list| list.span.contains(r.span)))
        .map(|r| {
            let owner = local_units
                .iter()
                .map(|&(u, _)| u)
                .find(|&u| units[u].span.contains(r.span));
            (r.name.as_str(), owner)
        })
        .collect();

    let mut candidates: HashSet<&str> = resolved.iter().map(|r| r.binding.as_str()).collect();
    let mut removed = vec![false; units.len()];
    loop {
        let mut changed = false;
        for (i, unit) in units.iter().enumerate() {
            if removed[i] || !candidates.contains(unit.name.as_str()) {
                continue;
            }
            let live = references.iter().any(|&(name, owner)| {
                name == unit.name
                    && match owner {
                        None => true,
                        Some(j) => j != i && !removed[j],
                    }
            });
            if live {
                continue;
            }
            removed[i] = true;
            changed = true;
            for &(name, owner) in &references {
                if owner == Some(i) {
                    candidates.insert(name);
                }
            }
        }
        if !changed {
            break;
        }
    }

    let mut edits = Vec::new();

    for (d, decl) in info.imports.iter().enumerate() {
        let gone: Vec<usize> = import_units
            .iter()
            .filter(|&&(u, dd, _)| dd == d && removed[u])
            .map(|&(_, _, b)| b)
            .collect();
        if gone.is_empty() {
            continue;
        }
        if gone.len() == decl.bindings.len() {
            edits.push(Edit {
                span: with_trailing_newline(source, decl.span),
                text: String::new(),
            });
        } else {
            edits.push(Edit {
                span: decl.span,
                text: rebuild_import(source, decl, &gone),
            });
        }
    }

    let removed_locals: HashSet<usize> = local_units
        .iter()
        .filter(|&&(u, _)| removed[u])
        .map(|&(_, l)| l)
        .collect();
    for (statement_index, statement) in info.var_statements.iter().enumerate() {
        let gone: Vec<SourceSpan> = info
            .locals
            .iter()
            .enumerate()
            .filter(|(l, local)| {
                local.kind == DeclKind::Variable(statement_index) && removed_locals.contains(l)
            })
            .map(|(_, local)| local.span)
            .collect();
        if gone.is_empty() {
            continue;
        }
        if gone.len() == statement.declarators.len() {
            edits.push(Edit {
                span: with_trailing_newline(source, statement.span),
                text: String::new(),
            });
        } else if let Some(first) = statement.declarators.first() {
            let prefix = &source[statement.span.start..first.start];
            let kept: Vec<String> = statement
                .declarators
                .iter()
                .filter(|d| !gone.contains(d))
                .map(|d| rewrite_slice(source, *d, replacements))
                .collect();
            edits.push(Edit {
                span: statement.span,
                text: format!("{}{};", prefix, kept.join(", ")),
            });
        }
    }
    for &l in &removed_locals {
        let local = &info.locals[l];
        if matches!(local.kind, DeclKind::Function | DeclKind::Class) {
            edits.push(Edit {
                span: with_trailing_newline(source, local.span),
                text: String::new(),
            });
        }
    }

    let removed_names: HashSet<&str> = removed_locals
        .iter()
        .map(|&l| info.locals[l].name.as_str())
        .collect();
    for list in &info.export_lists {
        let kept: Vec<&str> = list
            .specifiers
            .iter()
            .filter(|spec| !removed_names.contains(spec.local.as_str()))
            .map(|spec| spec.span.slice(source))
            .collect();
        if kept.len() == list.specifiers.len() {
            continue;
        }
        if kept.is_empty() {
            edits.push(Edit {
                span: with_trailing_newline(source, list.span),
                text: String::new(),
            });
        } else {
            edits.push(Edit {
                span: list.span,
                text: format!("export {{ {} }};", kept.join(", ")),
            });
        }
    }

    edits
}

fn rebuild_import(source: &str, decl: &ImportDecl, gone: &[usize]) -> String {
    let mut default = None;
    let mut namespace = None;
    let mut named = Vec::new();
    for (b, binding) in decl.bindings.iter().enumerate() {
        if gone.contains(&b) {
            continue;
        }
        match binding.imported {
            ImportedName::Default => default = Some(binding.local.as_str()),
            ImportedName::Namespace => namespace = Some(binding.span.slice(source)),
            ImportedName::Named(_) => named.push(binding.span.slice(source)),
        }
    }

    let named_clause = (!named.is_empty()).then(|| format!("{{ {} }}", named.join(", ")));
    let clause: Vec<String> = default
        .map(str::to_string)
        .into_iter()
        .chain(namespace.map(str::to_string))
        .chain(named_clause)
        .collect();
    format!(
        "import {} from {};",
        clause.join(", "),
        serde_json::Value::String(decl.specifier.clone())
    )
}

fn with_trailing_newline(source: &str, span: SourceSpan) -> SourceSpan {
    let rest = &source[span.end..];
    let extra = if rest.starts_with("\r\n") {
        2
    } else if rest.starts_with('\n') {
        1
    } else {
        0
    };
    SourceSpan {
        start: span.start,
        end: span.end + extra,
    }
}

/// Text of `span` with the edits falling inside it applied
fn rewrite_slice(source: &str, span: SourceSpan, edits: &[Edit]) -> String {
    let inner = edits
        .iter()
        .filter(|e| span.contains(e.span))
        .map(|e| Edit {
            span: SourceSpan {
                start: e.span.start - span.start,
                end: e.span.end - span.start,
            },
            text: e.text.clone(),
        })
        .collect();
    apply_edits(span.slice(source), inner)
}

/// Applies non-overlapping edits; the rest of the source is kept byte for byte
fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| (e.span.start, e.span.end));
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for edit in edits {
        if edit.span.start < cursor {
            continue;
        }
        out.push_str(&source[cursor..edit.span.start]);
        out.push_str(&edit.text);
        cursor = edit.span.end;
    }
    out.push_str(&source[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_edits_preserves_other_bytes() {
        let source = "a(b, c) // b";
        let edits = vec![Edit {
            span: SourceSpan { start: 2, end: 3 },
            text: "\"x\"".to_string(),
        }];
        assert_eq!(apply_edits(source, edits), "a(\"x\", c) // b");
    }

    #[test]
    fn test_line_column() {
        assert_eq!(line_column("ab\ncd", 4), (2, 2));
        assert_eq!(line_column("ab", 0), (1, 1));
    }

    #[test]
    fn test_with_trailing_newline() {
        let span = with_trailing_newline("abc\ndef", SourceSpan { start: 0, end: 3 });
        assert_eq!(span.end, 4);
    }

    #[test]
    fn test_source_without_hooks_is_untouched() {
        let options = TransformOptions::new("/app");
        let out = transform_module("const x = 1;", Path::new("/app/a.js"), &options, None).unwrap();
        assert!(!out.changed);
        assert_eq!(out.code, "const x = 1;");
    }
}
