use std::sync::Arc;

use tracing::debug;

use crate::authorize::Authorizer;
use crate::clock::{Clock, SystemClock};
use crate::errors::{Error, Result};
use crate::keyring::KeyRing;
use crate::policy::{DEFAULT_POLICY, PolicyStore, ROOT_POLICY};
use crate::store::{LockTable, MemoryStore, Store};
use crate::token::{Token, TokenManager, TokenSpec};

/// Child-token options layered on top of [`TokenSpec`].
#[derive(Debug, Clone, Default)]
pub struct ChildTokenOptions {
    pub no_default_policy: bool,
}

/// Wires every engine over one store and one clock.
pub struct Broker {
    keys: KeyRing,
    policies: PolicyStore,
    tokens: TokenManager,
    authorizer: Authorizer,
}

impl Broker {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        let locks = Arc::new(LockTable::new());
        let keys = KeyRing::new(store.clone(), clock.clone(), locks.clone());
        let policies = PolicyStore::new(store.clone(), locks.clone());
        let tokens = TokenManager::new(store, clock, locks);
        let authorizer = Authorizer::new(tokens.clone(), policies.clone());
        Self {
            keys,
            policies,
            tokens,
            authorizer,
        }
    }

    /// In-memory store and system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    pub fn keys(&self) -> &KeyRing {
        &self.keys
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// Seeds the built-in policies and mints the initial root token.
    pub fn bootstrap(&self, root_token_id: Option<&str>) -> Result<Token> {
        self.policies.seed_builtin()?;
        self.tokens.create_root(root_token_id)
    }

    /// Creates a token on behalf of `parent`.
    ///
    /// A non-root parent can only hand out policies it holds itself, except
    /// `default`. An empty policy list inherits the parent's policies.
    pub fn create_token(
        &self,
        parent: &Token,
        mut spec: TokenSpec,
        options: &ChildTokenOptions,
    ) -> Result<Token> {
        let mut policies = if spec.policies.is_empty() {
            parent.policies.clone()
        } else {
            spec.policies.clone()
        };
        policies.retain(|name| !name.trim().is_empty());
        dedup_in_place(&mut policies);

        if !parent.is_root()
            && let Some(extra) = policies
                .iter()
                .find(|name| *name != DEFAULT_POLICY && !parent.policies.contains(name))
        {
            return Err(Error::denied(format!(
                "child policies must be a subset of the parent's; {extra:?} is not held"
            )));
        }
        for name in &policies {
            if name != ROOT_POLICY && self.policies.find(name)?.is_none() {
                return Err(Error::not_found(format!("policy {name:?}")));
            }
        }

        let is_root = policies.iter().any(|name| name == ROOT_POLICY);
        if !options.no_default_policy && !is_root && !policies.iter().any(|p| p == DEFAULT_POLICY)
        {
            policies.push(DEFAULT_POLICY.to_string());
        }

        spec.policies = policies;
        let token = self.tokens.create(spec)?;
        debug!(
            parent = %parent.accessor,
            accessor = %token.accessor,
            policies = ?token.policies,
            "child token created"
        );
        Ok(token)
    }
}

fn dedup_in_place(names: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    names.retain(|name| seen.insert(name.clone()));
}
