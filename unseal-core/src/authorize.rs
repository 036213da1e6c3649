use tracing::debug;

use crate::errors::{Error, Result};
use crate::policy::{
    AccessRequest, Capabilities, Capability, PathMatcher, Policy, PolicyStore, ROOT_POLICY,
    Resolution,
};
use crate::token::{Token, TokenManager};

/// A request that passed authorization.
#[derive(Debug, Clone)]
pub struct Authorization {
    pub token: Token,
    /// Grants of the rule that allowed the request.
    pub capabilities: Capabilities,
}

impl Authorization {
    pub fn is_root(&self) -> bool {
        self.token.is_root()
    }

    /// Fails unless the deciding rule also grants `capability`.
    pub fn require(&self, capability: Capability, path: &str) -> Result<()> {
        if self.is_root() || self.capabilities.contains(capability) {
            Ok(())
        } else {
            Err(Error::denied(format!(
                "{capability} capability required on {path:?}"
            )))
        }
    }
}

/// Token → attached policies → path matcher → decision.
#[derive(Clone)]
pub struct Authorizer {
    tokens: TokenManager,
    policies: PolicyStore,
}

impl Authorizer {
    pub fn new(tokens: TokenManager, policies: PolicyStore) -> Self {
        Self { tokens, policies }
    }

    pub fn authorize(&self, token_id: &str, request: &AccessRequest<'_>) -> Result<Authorization> {
        if token_id.trim().is_empty() {
            return Err(Error::validation("missing client token"));
        }
        let token = self.tokens.resolve_active(token_id)?;
        let resolution = self.resolve(&token, request)?;

        if !resolution.is_allowed() {
            debug!(
                accessor = %token.accessor,
                path = %request.path,
                matched = ?resolution.matched,
                "request denied"
            );
            return Err(Error::denied(format!("{:?}", request.path)));
        }

        Ok(Authorization {
            token,
            capabilities: resolution.capabilities,
        })
    }

    /// Resolves `request` for an already authenticated token, loading its
    /// policies by name so edits apply immediately.
    pub fn resolve(&self, token: &Token, request: &AccessRequest<'_>) -> Result<Resolution> {
        let policies = self.attached(token)?;
        Ok(PathMatcher::new(&policies).resolve(request))
    }

    fn attached(&self, token: &Token) -> Result<Vec<Policy>> {
        let mut policies = Vec::with_capacity(token.policies.len());
        for name in &token.policies {
            if name == ROOT_POLICY {
                policies.push(Policy {
                    name: ROOT_POLICY.to_string(),
                    raw: String::new(),
                    rules: Vec::new(),
                });
                continue;
            }
            if let Some(policy) = self.policies.find(name)? {
                policies.push(policy);
            }
        }
        Ok(policies)
    }
}
