//! ACL policies: source compilation, storage and request matching.

pub mod capability;
pub mod compiler;
pub mod matcher;
pub mod parser;
mod registry;

pub use capability::{Capabilities, Capability};
pub use compiler::{compile, compile_rule};
pub use matcher::{AccessRequest, Decision, MatchedRule, PathMatcher, Resolution, Verb};
pub use registry::PolicyStore;

/// Reserved name granting unconditional access.
pub const ROOT_POLICY: &str = "root";
/// Policy attached to child tokens unless the creator opts out.
pub const DEFAULT_POLICY: &str = "default";

pub(crate) const ROOT_POLICY_SOURCE: &str = r#"path "*" {
  capabilities = ["read", "create", "list", "update", "delete", "sudo"]
}
"#;

pub(crate) const DEFAULT_POLICY_SOURCE: &str = r#"# Allow tokens to look up their own properties
path "auth/token/lookup-self" {
  capabilities = ["read"]
}

# Allow tokens to renew themselves
path "auth/token/renew-self" {
  capabilities = ["update"]
}

# Allow tokens to revoke themselves
path "auth/token/revoke-self" {
  capabilities = ["update"]
}
"#;

/// A compiled path rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub pattern: String,
    pub is_prefix: bool,
    pub has_segment_wildcard: bool,
    pub capabilities: Capabilities,
}

/// A named policy together with the source it was compiled from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    pub raw: String,
    pub rules: Vec<PathRule>,
}
