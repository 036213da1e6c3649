use std::sync::Arc;

use tracing::debug;

use crate::errors::{Error, Result};
use crate::policy::{
    DEFAULT_POLICY, DEFAULT_POLICY_SOURCE, Policy, ROOT_POLICY, ROOT_POLICY_SOURCE, compile,
};
use crate::store::{Entity, EntityKind, LockTable, Lookup, Store};

/// Compile-and-store front end for ACL policies.
#[derive(Clone)]
pub struct PolicyStore {
    store: Arc<dyn Store>,
    locks: Arc<LockTable>,
}

impl PolicyStore {
    pub fn new(store: Arc<dyn Store>, locks: Arc<LockTable>) -> Self {
        Self { store, locks }
    }

    /// Compiles `source` and stores it under `name`.
    ///
    /// A source that fails to compile leaves any stored policy of that name
    /// untouched.
    pub fn put(&self, name: &str, source: &str) -> Result<Policy> {
        let name = validate_name(name)?;
        if name == ROOT_POLICY {
            return Err(Error::validation("cannot update the root policy"));
        }
        let policy = compile(name, source)?;

        let lock = self.locks.entry(EntityKind::Policy, name);
        let _guard = lock.write();
        self.store.put(Entity::Policy(policy.clone()))?;
        debug!(policy = %name, rules = policy.rules.len(), "policy stored");
        Ok(policy)
    }

    pub fn get(&self, name: &str) -> Result<Policy> {
        self.find(name)?
            .ok_or_else(|| Error::not_found(format!("policy {name:?}")))
    }

    pub fn find(&self, name: &str) -> Result<Option<Policy>> {
        match self.store.get(EntityKind::Policy, Lookup::ByName(name))? {
            Some(entity) => entity
                .into_policy()
                .map(Some)
                .ok_or_else(|| Error::Unavailable("store returned a non-policy entity".into())),
            None => Ok(None),
        }
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .list(EntityKind::Policy)?
            .into_iter()
            .filter_map(Entity::into_policy)
            .map(|policy| policy.name)
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let name = validate_name(name)?;
        if name == ROOT_POLICY || name == DEFAULT_POLICY {
            return Err(Error::validation(format!(
                "cannot delete the {name} policy"
            )));
        }
        let lock = self.locks.entry(EntityKind::Policy, name);
        {
            let _guard = lock.write();
            self.store.delete(EntityKind::Policy, Lookup::ByName(name))?;
        }
        debug!(policy = %name, "policy deleted");
        Ok(())
    }

    /// Stores the built-in `root` and `default` policies when absent.
    pub fn seed_builtin(&self) -> Result<()> {
        for (name, source) in [
            (ROOT_POLICY, ROOT_POLICY_SOURCE),
            (DEFAULT_POLICY, DEFAULT_POLICY_SOURCE),
        ] {
            if self.find(name)?.is_some() {
                continue;
            }
            match self.store.insert(Entity::Policy(compile(name, source)?)) {
                Ok(()) | Err(Error::Conflict { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::validation("policy name must not be empty"));
    }
    Ok(name)
}
