//! # Tessera Transform
//!
//! Turns references to server-only functions into stable ids that are safe
//! to ship to the browser:
//!
//! ```text
//! import { getUser } from "./api/users";   →   (import pruned)
//! useLoader(getUser, id)                    →   useLoader("fn_9c0d7e1a2b3c4d5e", id)
//! ```
//!
//! The rewrite works on an oxc syntax tree, so hook names inside strings,
//! comments or template literals are never touched, and only the first
//! argument's bytes change. Ids are derived from the defining file and
//! export name ([`function_id`]), so the client and server passes agree
//! without sharing state. The client pass records every id in a
//! [`FunctionRegistry`] from which the server controller is generated.

// ============================================================================
// Module Declarations
// ============================================================================

pub mod analyze;
mod error;
mod id;
mod registry;
mod resolver;
mod transform;

pub use analyze::{analyze_module, ModuleInfo, ModuleRef, ModuleRefKind, SourceSpan};
pub use error::{CompileError, Diagnostic, Severity, TransformError};
pub use id::{function_id, relative_to, DEFAULT_ID_PREFIX, ID_HASH_LEN};
pub use registry::{FunctionRegistry, RegistryEntry};
pub use resolver::{clean, Resolver, DEFAULT_EXTENSIONS};
pub use transform::{transform_module, TransformOptions, TransformOutput, DEFAULT_HOOKS};
