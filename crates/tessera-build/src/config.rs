// File: src/config.rs
// Purpose: Configuration parsing from tessera.toml

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::BuildError;

/// Name of the project configuration file
pub const CONFIG_FILE: &str = "tessera.toml";

/// Project configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub cookies: CookieConfig,

    #[serde(default)]
    pub hooks: HooksConfig,
}

/// Project metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_name")]
    pub name: String,
}

/// Routing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Directory containing route files (default: "routes")
    #[serde(default = "default_routes_dir")]
    pub routes_dir: String,

    /// Route subdirectory served verbatim (default: "static")
    #[serde(default = "default_static_prefix")]
    pub static_prefix: String,
}

/// Build configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Disposable build directory (default: ".tessera")
    #[serde(default = "default_out_dir")]
    pub out_dir: String,

    /// URL prefix of client assets (default: "/_tessera/")
    #[serde(default = "default_public_path")]
    pub public_path: String,

    /// Specifiers never bundled
    #[serde(default)]
    pub external: Vec<String>,

    /// Compile-time replacements, expression → source text
    #[serde(default)]
    pub define: BTreeMap<String, String>,

    /// Server middleware modules, root-relative
    #[serde(default)]
    pub middleware: Vec<String>,

    #[serde(default = "default_false")]
    pub minify: bool,

    #[serde(default = "default_client_runtime")]
    pub client_runtime: String,

    #[serde(default = "default_server_runtime")]
    pub server_runtime: String,

    /// Privileged hook names
    #[serde(default = "default_hooks")]
    pub hooks: Vec<String>,

    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
}

/// Server process configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Command spawned to serve requests
    #[serde(default = "default_command")]
    pub command: Vec<String>,

    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    #[serde(default = "default_false")]
    pub production: bool,

    /// Port of the development asset server
    #[serde(default = "default_assets_port")]
    pub assets_port: u16,
}

/// Defaults applied to cookies set by server functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_path")]
    pub path: String,

    #[serde(default = "default_true")]
    pub http_only: bool,

    #[serde(default = "default_false")]
    pub secure: bool,

    #[serde(default = "default_same_site")]
    pub same_site: String,
}

/// One-shot lifecycle commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HooksConfig {
    /// Runs once before the first build
    #[serde(default)]
    pub build: Vec<String>,

    /// Runs once before the server is first spawned
    #[serde(default)]
    pub start: Vec<String>,
}

/// Command-line overrides
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub production: Option<bool>,
}

// Default values
fn default_name() -> String {
    "tessera-app".to_string()
}

fn default_routes_dir() -> String {
    "routes".to_string()
}

fn default_static_prefix() -> String {
    "static".to_string()
}

fn default_out_dir() -> String {
    ".tessera".to_string()
}

fn default_public_path() -> String {
    "/_tessera/".to_string()
}

fn default_client_runtime() -> String {
    "tessera/client".to_string()
}

fn default_server_runtime() -> String {
    "tessera/server".to_string()
}

fn default_hooks() -> Vec<String> {
    vec!["useLoader".to_string(), "useAction".to_string()]
}

fn default_id_prefix() -> String {
    "fn_".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_assets_port() -> u16 {
    3001
}

fn default_command() -> Vec<String> {
    vec!["node".to_string(), ".tessera/server/controller.js".to_string()]
}

fn default_grace_period_ms() -> u64 {
    2000
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn default_same_site() -> String {
    "lax".to_string()
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

// Default implementations
impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            routes_dir: default_routes_dir(),
            static_prefix: default_static_prefix(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            out_dir: default_out_dir(),
            public_path: default_public_path(),
            external: Vec::new(),
            define: BTreeMap::new(),
            middleware: Vec::new(),
            minify: false,
            client_runtime: default_client_runtime(),
            server_runtime: default_server_runtime(),
            hooks: default_hooks(),
            id_prefix: default_id_prefix(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            command: default_command(),
            grace_period_ms: default_grace_period_ms(),
            production: false,
            assets_port: default_assets_port(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            path: default_cookie_path(),
            http_only: true,
            secure: false,
            same_site: default_same_site(),
        }
    }
}

impl Config {
    /// Loads `<root>/tessera.toml`
    ///
    /// A missing file is an error; an empty file yields the defaults.
    pub fn load(root: &Path) -> Result<Self, BuildError> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            return Err(BuildError::MissingConfig(root.to_path_buf()));
        }

        let content = std::fs::read_to_string(&path).map_err(|e| BuildError::io(&path, e))?;
        Self::parse(&content, &path)
    }

    /// Parses and validates configuration text
    pub fn parse(content: &str, path: &Path) -> Result<Self, BuildError> {
        let invalid = |message: String| BuildError::InvalidConfig {
            path: path.to_path_buf(),
            message,
        };

        let config: Config = if content.trim().is_empty() {
            Config::default()
        } else {
            toml::from_str(content).map_err(|e| invalid(e.message().to_string()))?
        };

        config.validate().map_err(invalid)?;
        Ok(config)
    }

    /// Checks values serde cannot
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be non-zero".to_string());
        }
        if self.server.command.is_empty() {
            return Err("server.command must not be empty".to_string());
        }
        if !self.build.public_path.starts_with('/') || !self.build.public_path.ends_with('/') {
            return Err(format!(
                "build.public_path must start and end with '/', got {:?}",
                self.build.public_path
            ));
        }
        if self.build.out_dir.trim().is_empty() || Path::new(&self.build.out_dir).is_absolute() {
            return Err("build.out_dir must be a relative directory".to_string());
        }
        if self.build.hooks.is_empty() {
            return Err("build.hooks must name at least one hook".to_string());
        }
        let same_site = self.cookies.same_site.to_ascii_lowercase();
        if !matches!(same_site.as_str(), "lax" | "strict" | "none") {
            return Err(format!(
                "cookies.same_site must be lax, strict or none, got {:?}",
                self.cookies.same_site
            ));
        }
        Ok(())
    }

    /// Applies command-line overrides
    pub fn with_overrides(mut self, overrides: &Overrides) -> Self {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(production) = overrides.production {
            self.server.production = production;
        }
        self
    }

    pub fn routes_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.routing.routes_dir)
    }

    pub fn out_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.build.out_dir)
    }

    /// Fingerprint of the options a stage's toolchain context is built from
    ///
    /// Entries and virtual module contents are excluded: those are inputs
    /// updated in place, not reasons to recreate the context.
    pub fn fingerprint(&self, stage: &str) -> String {
        #[derive(Serialize)]
        struct StageOptions<'a> {
            stage: &'a str,
            out_dir: &'a str,
            public_path: &'a str,
            external: &'a [String],
            define: &'a BTreeMap<String, String>,
            middleware: &'a [String],
            minify: bool,
            hooks: &'a [String],
            id_prefix: &'a str,
            production: bool,
        }

        let options = StageOptions {
            stage,
            out_dir: &self.build.out_dir,
            public_path: &self.build.public_path,
            external: &self.build.external,
            define: &self.build.define,
            middleware: &self.build.middleware,
            minify: self.build.minify,
            hooks: &self.build.hooks,
            id_prefix: &self.build.id_prefix,
            production: self.server.production,
        };
        let json = serde_json::to_vec(&options).unwrap_or_default();
        hex::encode(Sha256::digest(&json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.routing.routes_dir, "routes");
        assert_eq!(config.build.out_dir, ".tessera");
        assert_eq!(config.build.public_path, "/_tessera/");
        assert_eq!(config.build.hooks, vec!["useLoader", "useAction"]);
        assert!(config.cookies.http_only);
    }

    #[test]
    fn test_empty_config() {
        let config = Config::parse("", Path::new("tessera.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let toml = r#"
            [routing]
            routes_dir = "app"

            [build]
            external = ["pg"]
            define = { "process.env.NODE_ENV" = '"production"' }

            [hooks]
            build = ["npm", "run", "css"]
        "#;
        let config = Config::parse(toml, Path::new("tessera.toml")).unwrap();
        assert_eq!(config.routing.routes_dir, "app");
        assert_eq!(config.routing.static_prefix, "static");
        assert_eq!(config.build.external, vec!["pg"]);
        assert_eq!(config.build.define["process.env.NODE_ENV"], "\"production\"");
        assert_eq!(config.hooks.build, vec!["npm", "run", "css"]);
        assert!(config.hooks.start.is_empty());
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::parse("[server]\nport = \"x\"", Path::new("tessera.toml")).unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig { .. }));
    }

    #[test]
    fn test_validation() {
        let err = Config::parse("[build]\npublic_path = \"assets\"", Path::new("t.toml")).unwrap_err();
        assert!(err.to_string().contains("public_path"));

        let err = Config::parse("[cookies]\nsame_site = \"sometimes\"", Path::new("t.toml")).unwrap_err();
        assert!(err.to_string().contains("same_site"));
    }

    #[test]
    fn test_missing_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(BuildError::MissingConfig(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let config = Config::default().with_overrides(&Overrides {
            port: Some(4000),
            production: Some(true),
        });
        assert_eq!(config.server.port, 4000);
        assert!(config.server.production);
    }

    #[test]
    fn test_fingerprint_tracks_stage_options() {
        let base = Config::default();
        assert_ne!(base.fingerprint("client"), base.fingerprint("server"));

        let mut changed = base.clone();
        changed.build.external.push("pg".to_string());
        assert_ne!(base.fingerprint("client"), changed.fingerprint("client"));

        let mut unrelated = base.clone();
        unrelated.server.port = 9000;
        assert_eq!(base.fingerprint("client"), unrelated.fingerprint("client"));
    }
}
