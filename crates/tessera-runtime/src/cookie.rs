// File: src/cookie.rs
// Purpose: Cookie defaults, Set-Cookie rendering and Cookie header splitting

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attributes applied to every cookie a server function sets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieDefaults {
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_true")]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_same_site")]
    pub same_site: String,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_same_site() -> String {
    "lax".to_string()
}

impl Default for CookieDefaults {
    fn default() -> Self {
        Self {
            path: default_path(),
            http_only: default_true(),
            secure: false,
            same_site: default_same_site(),
        }
    }
}

/// A cookie change produced by a call
///
/// `value: None` deletes the cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCookie {
    pub name: String,
    pub value: Option<String>,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<i64>,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, defaults: &CookieDefaults) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
            path: defaults.path.clone(),
            http_only: defaults.http_only,
            secure: defaults.secure,
            same_site: defaults.same_site.clone(),
            max_age: None,
        }
    }

    pub fn removal(name: impl Into<String>, defaults: &CookieDefaults) -> Self {
        Self {
            value: None,
            max_age: Some(0),
            ..Self::new(name, "", defaults)
        }
    }

    pub fn with_max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Renders the `Set-Cookie` header value
    pub fn to_header(&self) -> String {
        let mut header = format!(
            "{}={}; Path={}",
            self.name,
            urlencoding::encode(self.value.as_deref().unwrap_or("")),
            self.path
        );
        if let Some(max_age) = self.max_age {
            header.push_str(&format!("; Max-Age={}", max_age));
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if self.secure {
            header.push_str("; Secure");
        }
        header.push_str("; SameSite=");
        header.push_str(&capitalize(&self.same_site));
        header
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Splits a `Cookie` request header into name/value pairs
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = urlencoding::decode(value).map_or_else(|_| value.to_string(), |v| v.into_owned());
            Some((name.to_string(), value))
        })
        .collect()
}
