//! Integration tests for tessera-transform
//!
//! Each test lays out a small project on disk so imports resolve for real.

use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use tessera_transform::*;

const PAGE: &str = r#"import { useLoader } from "tessera/client";
import { getUser, formatName } from "../lib/users";
import { db } from "../lib/db";

async function loadStats() {
  return db.query("stats");
}

export default function Page() {
  const user = useLoader(getUser, 1);
  const stats = useLoader(loadStats);
  return formatName(user) + stats;
}
"#;

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    fn new() -> Self {
        let project = Project {
            dir: tempfile::tempdir().unwrap(),
        };
        project.write("lib/users.ts", "export async function getUser(id) {}\nexport function formatName(u) {}\nexport default async function save() {}\n");
        project.write("lib/db.ts", "export const db = {};\n");
        project.write("routes/index.tsx", PAGE);
        project
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn client(&self) -> TransformOptions {
        TransformOptions::new(self.root()).with_prune(true)
    }

    fn server(&self) -> TransformOptions {
        TransformOptions::new(self.root()).with_expose_locals(true)
    }
}

#[test]
fn test_imported_function_gets_path_derived_id() {
    let project = Project::new();
    let file = project.path("routes/index.tsx");
    let out = transform_module(PAGE, &file, &project.server(), None).unwrap();

    let get_user = function_id("fn_", "lib/users.ts", "getUser");
    let load_stats = function_id("fn_", "routes/index.tsx", "loadStats");
    assert!(out.code.contains(&format!("useLoader(\"{}\", 1)", get_user)));
    assert!(out.code.contains(&format!("useLoader(\"{}\")", load_stats)));

    let ids: Vec<&str> = out.entries.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec![get_user.as_str(), load_stats.as_str()]);
    assert_eq!(out.entries[0].1.file, project.path("lib/users.ts"));
    assert_eq!(out.entries[0].1.name, "getUser");
}

#[test]
fn test_client_and_server_passes_agree() {
    let project = Project::new();
    let file = project.path("routes/index.tsx");

    let mut registry = FunctionRegistry::new();
    let client = transform_module(PAGE, &file, &project.client(), Some(&mut registry)).unwrap();
    let server = transform_module(PAGE, &file, &project.server(), None).unwrap();

    assert_eq!(client.entries, server.entries);
    assert_eq!(registry.len(), 2);
    for (id, _) in &server.entries {
        assert!(registry.get(id).is_some());
        assert!(client.code.contains(id.as_str()));
    }
}

#[test]
fn test_client_pass_prunes_server_only_code() {
    let project = Project::new();
    let file = project.path("routes/index.tsx");
    let out = transform_module(PAGE, &file, &project.client(), None).unwrap();

    assert!(out.code.contains("import { useLoader } from \"tessera/client\";"));
    assert!(out.code.contains("import { formatName } from \"../lib/users\";\n"));
    assert!(!out.code.contains("getUser"));
    assert!(!out.code.contains("async function loadStats"));
    assert!(!out.code.contains("db.query"));
    assert!(!out.code.contains("../lib/db"));
    assert!(out.code.contains("return formatName(user) + stats;"));
}

#[test]
fn test_server_pass_exposes_local_targets() {
    let project = Project::new();
    let file = project.path("routes/index.tsx");
    let out = transform_module(PAGE, &file, &project.server(), None).unwrap();

    assert!(out.code.contains("async function loadStats() {\n  return db.query(\"stats\");\n}"));
    assert!(out.code.ends_with("}\nexport { loadStats };\n"));
}

#[test]
fn test_default_and_namespace_imports() {
    let project = Project::new();
    let source = "import save from '../lib/users';\nimport * as users from '../lib/users';\nuseAction(save);\nuseLoader(users.getUser);\n";
    let file = project.path("routes/form.js");
    let out = transform_module(source, &file, &project.server(), None).unwrap();

    let save = function_id("fn_", "lib/users.ts", "default");
    let get_user = function_id("fn_", "lib/users.ts", "getUser");
    assert_eq!(
        out.code,
        format!(
            "import save from '../lib/users';\nimport * as users from '../lib/users';\nuseAction(\"{}\");\nuseLoader(\"{}\");\n",
            save, get_user
        )
    );
}

#[test]
fn test_same_name_in_different_files_differs() {
    let project = Project::new();
    project.write("lib/a.ts", "export function load() {}\n");
    project.write("lib/b.ts", "export function load() {}\n");
    let source = "import { load } from '../lib/a';\nimport { load as loadB } from '../lib/b';\nuseLoader(load);\nuseLoader(loadB);\n";
    let out = transform_module(source, &project.path("routes/x.js"), &project.server(), None).unwrap();

    assert_eq!(out.entries.len(), 2);
    assert_ne!(out.entries[0].0, out.entries[1].0);
    assert_eq!(out.entries[1].1.name, "load");
}

#[test]
fn test_hook_text_outside_calls_is_ignored() {
    let project = Project::new();
    let source = "// useLoader(getUser)\nconst s = \"useLoader(getUser)\";\nconst t = `useAction(${s})`;\n";
    let out = transform_module(source, &project.path("routes/x.js"), &project.client(), None).unwrap();
    assert!(!out.changed);
    assert_eq!(out.code, source);
}

#[test]
fn test_unresolved_argument_is_left_with_warning() {
    let project = Project::new();
    let source = "import { fetchThing } from 'some-package';\nuseLoader(fetchThing);\nuseLoader(missing);\n";
    let out = transform_module(source, &project.path("routes/x.js"), &project.client(), None).unwrap();

    assert_eq!(out.code, source);
    assert_eq!(out.diagnostics.len(), 2);
    assert_eq!(out.diagnostics[0].line, 2);
    assert_eq!(out.diagnostics[1].line, 3);
    assert!(out.entries.is_empty());
}

#[test]
fn test_custom_hooks_and_prefix() {
    let project = Project::new();
    let source = "function q() {}\nuseQuery(q);\nuseLoader(q);\n";
    let options = TransformOptions::new(project.root())
        .with_hooks(["useQuery"])
        .with_id_prefix("srv_");
    let out = transform_module(source, &project.path("routes/x.js"), &options, None).unwrap();

    let id = function_id("srv_", "routes/x.js", "q");
    assert_eq!(out.code, format!("function q() {{}}\nuseQuery(\"{}\");\nuseLoader(q);\n", id));
}

#[test]
fn test_partial_variable_statement_is_rebuilt() {
    let project = Project::new();
    let source = "const load = async () => 1, view = () => useLoader(load);\nexport { view };\n";
    let out = transform_module(source, &project.path("routes/x.js"), &project.client(), None).unwrap();

    let id = function_id("fn_", "routes/x.js", "load");
    assert_eq!(
        out.code,
        format!("const view = () => useLoader(\"{}\");\nexport {{ view }};\n", id)
    );
}

#[test]
fn test_client_pass_prunes_exported_server_functions() {
    let project = Project::new();
    let source = r#"import { db } from "../lib/db";

export async function getPost(id) {
  return db.get(id);
}

export default function Post({ params }) {
  return useLoader(getPost, params.id);
}
"#;
    let file = project.path("routes/post.jsx");
    let client = transform_module(source, &file, &project.client(), None).unwrap();

    let id = function_id("fn_", "routes/post.jsx", "getPost");
    assert_eq!(
        client.code,
        format!(
            "\n\nexport default function Post({{ params }}) {{\n  return useLoader(\"{}\", params.id);\n}}\n",
            id
        )
    );

    let server = transform_module(source, &file, &project.server(), None).unwrap();
    assert!(server.code.contains("export async function getPost(id)"));
    assert!(!server.code.contains("export { getPost }"));
}

#[test]
fn test_client_pass_prunes_server_functions_from_export_lists() {
    let project = Project::new();
    let source = r#"import { db } from "../lib/db";
import { slugify } from "../lib/text";

async function load(id) {
  return db.get(slugify(id));
}
async function save(post) {
  return db.put(post);
}
function title(post) {
  return slugify(post.title);
}

export { load, save as savePost, title };
export default function Post() {
  return useLoader(load, 1) + useAction(save) + title({});
}
"#;
    let file = project.path("routes/post.jsx");
    let out = transform_module(source, &file, &project.client(), None).unwrap();

    assert!(!out.code.contains("db"));
    assert!(!out.code.contains("async function load"));
    assert!(!out.code.contains("async function save"));
    assert!(out.code.contains("import { slugify } from \"../lib/text\";"));
    assert!(out.code.contains("function title(post)"));
    assert!(out.code.contains("export { title };\n"));
    assert!(out.code.contains(&function_id("fn_", "routes/post.jsx", "load")));
    assert!(out.code.contains(&function_id("fn_", "routes/post.jsx", "save")));
}

#[test]
fn test_syntax_error_surfaces_as_compile_error() {
    let project = Project::new();
    let err = transform_module(
        "useLoader(load;\n",
        &project.path("routes/x.js"),
        &project.client(),
        None,
    )
    .unwrap_err();

    match err {
        TransformError::Compile(e) => {
            assert_eq!(e.line, 1);
            assert_eq!(e.file, project.path("routes/x.js"));
        }
        other => panic!("unexpected error: {}", other),
    }
}
