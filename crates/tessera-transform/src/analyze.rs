//! Module analysis over the oxc syntax tree
//!
//! One parse and one walk produce an owned [`ModuleInfo`]: the import
//! table, top-level declarations, exports, module references, identifier
//! references and privileged hook call sites. Everything downstream works
//! on byte spans into the original source.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, BindingPatternKind, CallExpression, Declaration, ExportDefaultDeclarationKind,
    Expression, IdentifierReference, ImportDeclarationSpecifier, ImportExpression,
    ModuleExportName, Program, Statement, VariableDeclaration,
};
use oxc_ast::visit::walk;
use oxc_ast::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType, Span};

use crate::CompileError;

/// Byte range into the module source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceSpan {
    pub start: usize,
    pub end: usize,
}

impl SourceSpan {
    pub fn contains(&self, other: SourceSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn slice<'s>(&self, source: &'s str) -> &'s str {
        &source[self.start..self.end]
    }
}

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        SourceSpan {
            start: span.start as usize,
            end: span.end as usize,
        }
    }
}

/// What an import binding refers to in the imported module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportedName {
    Named(String),
    Default,
    Namespace,
}

impl ImportedName {
    /// Export name in the imported module (`None` for namespaces)
    pub fn export_name(&self) -> Option<&str> {
        match self {
            ImportedName::Named(name) => Some(name),
            ImportedName::Default => Some("default"),
            ImportedName::Namespace => None,
        }
    }
}

/// One local binding introduced by an import declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub local: String,
    pub imported: ImportedName,
    /// Span of the specifier (`a as b`, `* as ns`, `def`)
    pub span: SourceSpan,
}

/// A static `import ... from "x"` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportDecl {
    pub span: SourceSpan,
    pub specifier: String,
    pub bindings: Vec<ImportBinding>,
    pub type_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Function,
    Class,
    /// Declarator of the variable statement at this index
    Variable(usize),
}

/// A top-level binding declared by the module itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDecl {
    pub name: String,
    pub kind: DeclKind,
    /// Removable unit: the statement, or the declarator for variables
    pub span: SourceSpan,
    /// Names this binding is exported under
    pub exported_as: Vec<String>,
}

/// A top-level `const/let/var` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarStatement {
    pub span: SourceSpan,
    pub declarators: Vec<SourceSpan>,
    /// Whether the statement is wrapped in `export`
    pub exported: bool,
}

/// One specifier of a local `export { a, b as c }` list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSpecifier {
    pub local: String,
    /// Span of the specifier (`b as c`)
    pub span: SourceSpan,
}

/// A local `export { ... }` statement without a `from` clause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportList {
    pub span: SourceSpan,
    pub specifiers: Vec<ExportSpecifier>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleRefKind {
    Import,
    ReExport,
    Dynamic,
}

/// A module specifier string appearing in the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    pub specifier: String,
    /// Span of the string literal, quotes included
    pub span: SourceSpan,
    pub kind: ModuleRefKind,
}

/// Reference to a binding by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub span: SourceSpan,
}

/// First argument of a privileged hook call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookTarget {
    Identifier(String),
    Member { object: String, property: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookCall {
    pub hook: String,
    pub target: HookTarget,
    /// Span of the first argument
    pub argument: SourceSpan,
}

/// Everything the build needs to know about one module
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    pub imports: Vec<ImportDecl>,
    pub locals: Vec<LocalDecl>,
    pub var_statements: Vec<VarStatement>,
    pub export_lists: Vec<ExportList>,
    /// Exported names, `default` included
    pub exports: Vec<String>,
    /// Whether the module has `export * from`
    pub star_exports: bool,
    pub module_refs: Vec<ModuleRef>,
    pub references: Vec<Reference>,
    pub hook_calls: Vec<HookCall>,
}

impl ModuleInfo {
    pub fn has_default_export(&self) -> bool {
        self.exports.iter().any(|e| e == "default")
    }

    pub fn exports(&self, name: &str) -> bool {
        self.exports.iter().any(|e| e == name)
    }

    /// Finds the import binding for a local name
    pub fn import_binding(&self, local: &str) -> Option<(&ImportDecl, &ImportBinding)> {
        self.imports.iter().find_map(|decl| {
            decl.bindings
                .iter()
                .find(|b| b.local == local)
                .map(|b| (decl, b))
        })
    }

    pub fn local(&self, name: &str) -> Option<&LocalDecl> {
        self.locals.iter().find(|l| l.name == name)
    }
}

fn source_type_for(file: &Path) -> SourceType {
    SourceType::from_path(file)
        .unwrap_or_else(|_| SourceType::mjs())
        .with_module(true)
}

/// Parses a module and collects its [`ModuleInfo`]
///
/// `hooks` names the privileged call forms to record; pass an empty slice
/// when only the module shape is needed. The first syntax error is returned
/// as a located [`CompileError`].
pub fn analyze_module(source: &str, file: &Path, hooks: &[String]) -> Result<ModuleInfo, CompileError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type_for(file)).parse();

    if let Some(err) = ret.errors.first() {
        let (offset, len) = err
            .labels
            .as_ref()
            .and_then(|labels| labels.first())
            .map_or((0, 0), |label| (label.offset(), label.len()));
        return Err(CompileError::at_offset(
            file,
            source,
            offset,
            len,
            err.message.to_string(),
            err.help.as_ref().map(|h| h.to_string()),
        ));
    }
    if ret.panicked {
        return Err(CompileError::whole_file(file, "failed to parse module"));
    }

    Ok(collect(&ret.program, hooks))
}

fn module_export_name(name: &ModuleExportName<'_>) -> String {
    match name {
        ModuleExportName::IdentifierName(id) => id.name.to_string(),
        ModuleExportName::IdentifierReference(id) => id.name.to_string(),
        ModuleExportName::StringLiteral(lit) => lit.value.to_string(),
    }
}

fn string_ref(specifier: &str, span: Span, kind: ModuleRefKind) -> ModuleRef {
    ModuleRef {
        specifier: specifier.to_string(),
        span: span.into(),
        kind,
    }
}

fn collect(program: &Program<'_>, hooks: &[String]) -> ModuleInfo {
    let mut info = ModuleInfo::default();
    let mut local_exports: Vec<(String, String)> = Vec::new();

    for statement in program.body.iter() {
        match statement {
            Statement::ImportDeclaration(decl) => {
                let bindings = decl
                    .specifiers
                    .iter()
                    .flatten()
                    .map(|spec| match spec {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => ImportBinding {
                            local: s.local.name.to_string(),
                            imported: ImportedName::Named(module_export_name(&s.imported)),
                            span: s.span.into(),
                        },
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => ImportBinding {
                            local: s.local.name.to_string(),
                            imported: ImportedName::Default,
                            span: s.span.into(),
                        },
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => ImportBinding {
                            local: s.local.name.to_string(),
                            imported: ImportedName::Namespace,
                            span: s.span.into(),
                        },
                    })
                    .collect();

                info.module_refs.push(string_ref(
                    decl.source.value.as_str(),
                    decl.source.span,
                    ModuleRefKind::Import,
                ));
                info.imports.push(ImportDecl {
                    span: decl.span.into(),
                    specifier: decl.source.value.to_string(),
                    bindings,
                    type_only: decl.import_kind.is_type(),
                });
            }
            Statement::ExportNamedDeclaration(export) => {
                if let Some(declaration) = &export.declaration {
                    collect_declaration(&mut info, declaration, export.span, true);
                }
                let mut list = Vec::new();
                for spec in export.specifiers.iter() {
                    let exported = module_export_name(&spec.exported);
                    if export.source.is_none() {
                        let local = module_export_name(&spec.local);
                        local_exports.push((local.clone(), exported.clone()));
                        list.push(ExportSpecifier {
                            local,
                            span: spec.span.into(),
                        });
                    }
                    info.exports.push(exported);
                }
                if export.declaration.is_none() && !list.is_empty() && !export.export_kind.is_type() {
                    info.export_lists.push(ExportList {
                        span: export.span.into(),
                        specifiers: list,
                    });
                }
                if let Some(src) = &export.source {
                    info.module_refs.push(string_ref(
                        src.value.as_str(),
                        src.span,
                        ModuleRefKind::ReExport,
                    ));
                }
            }
            Statement::ExportAllDeclaration(export) => {
                match &export.exported {
                    Some(name) => info.exports.push(module_export_name(name)),
                    None => info.star_exports = true,
                }
                info.module_refs.push(string_ref(
                    export.source.value.as_str(),
                    export.source.span,
                    ModuleRefKind::ReExport,
                ));
            }
            Statement::ExportDefaultDeclaration(export) => {
                info.exports.push("default".to_string());
                let named = match &export.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(f) => {
                        f.id.as_ref().map(|id| (id.name.to_string(), DeclKind::Function))
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(c) => {
                        c.id.as_ref().map(|id| (id.name.to_string(), DeclKind::Class))
                    }
                    _ => None,
                };
                if let Some((name, kind)) = named {
                    info.locals.push(LocalDecl {
                        name,
                        kind,
                        span: export.span.into(),
                        exported_as: vec!["default".to_string()],
                    });
                }
            }
            Statement::FunctionDeclaration(f) => {
                if let Some(id) = &f.id {
                    info.locals.push(LocalDecl {
                        name: id.name.to_string(),
                        kind: DeclKind::Function,
                        span: f.span.into(),
                        exported_as: Vec::new(),
                    });
                }
            }
            Statement::ClassDeclaration(c) => {
                if let Some(id) = &c.id {
                    info.locals.push(LocalDecl {
                        name: id.name.to_string(),
                        kind: DeclKind::Class,
                        span: c.span.into(),
                        exported_as: Vec::new(),
                    });
                }
            }
            Statement::VariableDeclaration(v) => {
                collect_variables(&mut info, v, v.span, false);
            }
            _ => {}
        }
    }

    for (local, exported) in local_exports {
        if let Some(decl) = info.locals.iter_mut().find(|l| l.name == local) {
            decl.exported_as.push(exported);
        }
    }

    let mut collector = Collector {
        hooks,
        info: &mut info,
    };
    collector.visit_program(program);
    info
}

fn collect_declaration(
    info: &mut ModuleInfo,
    declaration: &Declaration<'_>,
    statement_span: Span,
    exported: bool,
) {
    let export_names = |name: &str| if exported { vec![name.to_string()] } else { Vec::new() };
    match declaration {
        Declaration::FunctionDeclaration(f) => {
            if let Some(id) = &f.id {
                info.exports.push(id.name.to_string());
                info.locals.push(LocalDecl {
                    name: id.name.to_string(),
                    kind: DeclKind::Function,
                    span: statement_span.into(),
                    exported_as: export_names(id.name.as_str()),
                });
            }
        }
        Declaration::ClassDeclaration(c) => {
            if let Some(id) = &c.id {
                info.exports.push(id.name.to_string());
                info.locals.push(LocalDecl {
                    name: id.name.to_string(),
                    kind: DeclKind::Class,
                    span: statement_span.into(),
                    exported_as: export_names(id.name.as_str()),
                });
            }
        }
        Declaration::VariableDeclaration(v) => {
            let before = info.locals.len();
            collect_variables(info, v, statement_span, exported);
            let names: Vec<String> = info.locals[before..].iter().map(|l| l.name.clone()).collect();
            info.exports.extend(names);
        }
        _ => {}
    }
}

fn collect_variables(
    info: &mut ModuleInfo,
    declaration: &VariableDeclaration<'_>,
    statement_span: Span,
    exported: bool,
) {
    let index = info.var_statements.len();
    info.var_statements.push(VarStatement {
        span: statement_span.into(),
        declarators: declaration.declarations.iter().map(|d| d.span.into()).collect(),
        exported,
    });

    for declarator in declaration.declarations.iter() {
        if let BindingPatternKind::BindingIdentifier(id) = &declarator.id.kind {
            info.locals.push(LocalDecl {
                name: id.name.to_string(),
                kind: DeclKind::Variable(index),
                span: declarator.span.into(),
                exported_as: if exported {
                    vec![id.name.to_string()]
                } else {
                    Vec::new()
                },
            });
        }
    }
}

/// Walks the whole tree for references, dynamic imports and hook calls
struct Collector<'i, 'h> {
    hooks: &'h [String],
    info: &'i mut ModuleInfo,
}

impl<'i, 'h> Collector<'i, 'h> {
    fn hook_target(argument: &Argument<'_>) -> Option<HookTarget> {
        match argument {
            Argument::Identifier(id) => Some(HookTarget::Identifier(id.name.to_string())),
            Argument::StaticMemberExpression(member) => match &member.object {
                Expression::Identifier(object) => Some(HookTarget::Member {
                    object: object.name.to_string(),
                    property: member.property.name.to_string(),
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

impl<'a, 'i, 'h> Visit<'a> for Collector<'i, 'h> {
    fn visit_call_expression(&mut self, it: &CallExpression<'a>) {
        if let Expression::Identifier(callee) = &it.callee {
            let name = callee.name.as_str();
            if self.hooks.iter().any(|h| h == name) {
                if let Some(first) = it.arguments.first() {
                    if let Some(target) = Self::hook_target(first) {
                        self.info.hook_calls.push(HookCall {
                            hook: name.to_string(),
                            target,
                            argument: first.span().into(),
                        });
                    }
                }
            }
        }
        walk::walk_call_expression(self, it);
    }

    fn visit_identifier_reference(&mut self, it: &IdentifierReference<'a>) {
        self.info.references.push(Reference {
            name: it.name.to_string(),
            span: it.span.into(),
        });
    }

    fn visit_import_expression(&mut self, it: &ImportExpression<'a>) {
        if let Expression::StringLiteral(lit) = &it.source {
            self.info
                .module_refs
                .push(string_ref(lit.value.as_str(), lit.span, ModuleRefKind::Dynamic));
        }
        walk::walk_import_expression(self, it);
    }
}
