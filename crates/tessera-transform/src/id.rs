/// Content-addressed function ids
use std::path::{Component, Path};

use sha2::{Digest, Sha256};

/// Default id prefix
pub const DEFAULT_ID_PREFIX: &str = "fn_";

/// Hex characters kept from the digest
pub const ID_HASH_LEN: usize = 16;

/// Derives the id of an exported server function
///
/// `prefix + hex(sha256(relative_path + "#" + name))[..16]`. Depends on the
/// defining file and export name only, never on file content, so the
/// client and server passes agree without coordinating.
///
/// ```
/// use tessera_transform::function_id;
///
/// let id = function_id("fn_", "api/users.ts", "getUser");
/// assert!(id.starts_with("fn_"));
/// assert_eq!(id.len(), 3 + 16);
/// assert_eq!(id, function_id("fn_", "api\\users.ts", "getUser"));
/// assert_ne!(id, function_id("fn_", "api/posts.ts", "getUser"));
/// ```
pub fn function_id(prefix: &str, relative_path: &str, name: &str) -> String {
    let key = format!("{}#{}", relative_path.replace('\\', "/"), name);
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}{}", prefix, &digest[..ID_HASH_LEN])
}

/// Path of `file` relative to `root`, with forward slashes
///
/// Files outside the root keep their full path so ids stay unique.
pub fn relative_to(root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(root).unwrap_or(file);
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            Component::ParentDir => Some(".."),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
