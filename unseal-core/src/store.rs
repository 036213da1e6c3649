use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::errors::{Error, Result};
use crate::keyring::Key;
use crate::policy::Policy;
use crate::token::Token;

/// Top-level entity families held by a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Key,
    Policy,
    Token,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Key => "key",
            EntityKind::Policy => "policy",
            EntityKind::Token => "token",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of lookups a store must answer.
///
/// Keys and policies are addressed by name; tokens by their secret id or by
/// their public accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    ByName(&'a str),
    ById(&'a str),
    ByAccessor(&'a str),
}

#[derive(Debug, Clone)]
pub enum Entity {
    Key(Key),
    Policy(Policy),
    Token(Token),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Key(_) => EntityKind::Key,
            Entity::Policy(_) => EntityKind::Policy,
            Entity::Token(_) => EntityKind::Token,
        }
    }

    pub fn into_key(self) -> Option<Key> {
        match self {
            Entity::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn into_policy(self) -> Option<Policy> {
        match self {
            Entity::Policy(policy) => Some(policy),
            _ => None,
        }
    }

    pub fn into_token(self) -> Option<Token> {
        match self {
            Entity::Token(token) => Some(token),
            _ => None,
        }
    }
}

/// Persistence collaborator shared by every engine.
///
/// Each call is atomic for the entity it touches and later reads observe
/// earlier writes. Failures of the underlying medium surface as
/// [`Error::Unavailable`].
pub trait Store: Send + Sync {
    fn get(&self, kind: EntityKind, lookup: Lookup<'_>) -> Result<Option<Entity>>;

    /// Stores a new entity, failing with [`Error::Conflict`] when any of its
    /// unique fields is already taken.
    fn insert(&self, entity: Entity) -> Result<()>;

    /// Replaces an entity, creating it if absent.
    fn put(&self, entity: Entity) -> Result<()>;

    /// Removes an entity. Removing an absent entity succeeds.
    fn delete(&self, kind: EntityKind, lookup: Lookup<'_>) -> Result<()>;

    fn list(&self, kind: EntityKind) -> Result<Vec<Entity>>;
}

impl<T> Store for Arc<T>
where
    T: Store + ?Sized,
{
    fn get(&self, kind: EntityKind, lookup: Lookup<'_>) -> Result<Option<Entity>> {
        (**self).get(kind, lookup)
    }

    fn insert(&self, entity: Entity) -> Result<()> {
        (**self).insert(entity)
    }

    fn put(&self, entity: Entity) -> Result<()> {
        (**self).put(entity)
    }

    fn delete(&self, kind: EntityKind, lookup: Lookup<'_>) -> Result<()> {
        (**self).delete(kind, lookup)
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        (**self).list(kind)
    }
}

impl<T> Store for Box<T>
where
    T: Store + ?Sized,
{
    fn get(&self, kind: EntityKind, lookup: Lookup<'_>) -> Result<Option<Entity>> {
        (**self).get(kind, lookup)
    }

    fn insert(&self, entity: Entity) -> Result<()> {
        (**self).insert(entity)
    }

    fn put(&self, entity: Entity) -> Result<()> {
        (**self).put(entity)
    }

    fn delete(&self, kind: EntityKind, lookup: Lookup<'_>) -> Result<()> {
        (**self).delete(kind, lookup)
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        (**self).list(kind)
    }
}

/// Process-local store backed by ordered maps.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

#[derive(Default)]
struct Tables {
    keys: BTreeMap<String, Key>,
    policies: BTreeMap<String, Policy>,
    tokens: HashMap<String, Token>,
    accessors: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Tables {
    fn token_id<'a>(&'a self, lookup: Lookup<'a>) -> Result<Option<&'a str>> {
        match lookup {
            Lookup::ById(id) => Ok(Some(id)),
            Lookup::ByAccessor(accessor) => {
                Ok(self.accessors.get(accessor).map(String::as_str))
            }
            Lookup::ByName(_) => Err(unsupported(EntityKind::Token, lookup)),
        }
    }
}

impl Store for MemoryStore {
    fn get(&self, kind: EntityKind, lookup: Lookup<'_>) -> Result<Option<Entity>> {
        let tables = self.tables.read();
        match (kind, lookup) {
            (EntityKind::Key, Lookup::ByName(name)) => {
                Ok(tables.keys.get(name).cloned().map(Entity::Key))
            }
            (EntityKind::Policy, Lookup::ByName(name)) => {
                Ok(tables.policies.get(name).cloned().map(Entity::Policy))
            }
            (EntityKind::Token, lookup) => {
                let Some(id) = tables.token_id(lookup)? else {
                    return Ok(None);
                };
                Ok(tables.tokens.get(id).cloned().map(Entity::Token))
            }
            (kind, lookup) => Err(unsupported(kind, lookup)),
        }
    }

    fn insert(&self, entity: Entity) -> Result<()> {
        let mut tables = self.tables.write();
        match entity {
            Entity::Key(key) => {
                if tables.keys.contains_key(&key.name) {
                    return Err(Error::conflict(format!("key {:?}", key.name)));
                }
                tables.keys.insert(key.name.clone(), key);
            }
            Entity::Policy(policy) => {
                if tables.policies.contains_key(&policy.name) {
                    return Err(Error::conflict(format!("policy {:?}", policy.name)));
                }
                tables.policies.insert(policy.name.clone(), policy);
            }
            Entity::Token(token) => {
                if tables.tokens.contains_key(&token.token_id) {
                    return Err(Error::conflict("token id"));
                }
                if tables.accessors.contains_key(&token.accessor) {
                    return Err(Error::conflict("token accessor"));
                }
                tables
                    .accessors
                    .insert(token.accessor.clone(), token.token_id.clone());
                tables.tokens.insert(token.token_id.clone(), token);
            }
        }
        Ok(())
    }

    fn put(&self, entity: Entity) -> Result<()> {
        let mut tables = self.tables.write();
        match entity {
            Entity::Key(key) => {
                tables.keys.insert(key.name.clone(), key);
            }
            Entity::Policy(policy) => {
                tables.policies.insert(policy.name.clone(), policy);
            }
            Entity::Token(token) => {
                if let Some(owner) = tables.accessors.get(&token.accessor)
                    && owner != &token.token_id
                {
                    return Err(Error::conflict("token accessor"));
                }
                tables
                    .accessors
                    .insert(token.accessor.clone(), token.token_id.clone());
                tables.tokens.insert(token.token_id.clone(), token);
            }
        }
        Ok(())
    }

    fn delete(&self, kind: EntityKind, lookup: Lookup<'_>) -> Result<()> {
        let mut tables = self.tables.write();
        match (kind, lookup) {
            (EntityKind::Key, Lookup::ByName(name)) => {
                tables.keys.remove(name);
            }
            (EntityKind::Policy, Lookup::ByName(name)) => {
                tables.policies.remove(name);
            }
            (EntityKind::Token, lookup) => {
                let Some(id) = tables.token_id(lookup)?.map(str::to_owned) else {
                    return Ok(());
                };
                if let Some(token) = tables.tokens.remove(&id) {
                    tables.accessors.remove(&token.accessor);
                }
            }
            (kind, lookup) => return Err(unsupported(kind, lookup)),
        }
        Ok(())
    }

    fn list(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let tables = self.tables.read();
        let entities = match kind {
            EntityKind::Key => tables.keys.values().cloned().map(Entity::Key).collect(),
            EntityKind::Policy => tables
                .policies
                .values()
                .cloned()
                .map(Entity::Policy)
                .collect(),
            EntityKind::Token => {
                let mut tokens: Vec<&Token> = tables.tokens.values().collect();
                tokens.sort_by(|a, b| a.accessor.cmp(&b.accessor));
                tokens.into_iter().cloned().map(Entity::Token).collect()
            }
        };
        Ok(entities)
    }
}

fn unsupported(kind: EntityKind, lookup: Lookup<'_>) -> Error {
    Error::validation(format!("unsupported {kind} lookup: {lookup:?}"))
}

/// Per-entity reader/writer locks.
///
/// Writers mutating one entity hold its exclusive lock for the whole
/// read-modify-write cycle; readers share it. Locks for distinct entities
/// never contend. A slot lives only while some [`EntityLock`] refers to it,
/// so requests naming entities that never existed leave nothing behind.
#[derive(Default)]
pub struct LockTable {
    entries: Mutex<HashMap<(EntityKind, String), Slot>>,
}

struct Slot {
    lock: Arc<RwLock<()>>,
    holders: usize,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock guarding `(kind, id)`, creating it on first use.
    pub fn entry(&self, kind: EntityKind, id: &str) -> EntityLock<'_> {
        let key = (kind, id.to_string());
        let mut entries = self.entries.lock();
        let slot = entries.entry(key.clone()).or_insert_with(|| Slot {
            lock: Arc::new(RwLock::new(())),
            holders: 0,
        });
        slot.holders += 1;
        EntityLock {
            table: self,
            key,
            lock: slot.lock.clone(),
        }
    }

    fn release(&self, key: &(EntityKind, String)) {
        let mut entries = self.entries.lock();
        if let Some(slot) = entries.get_mut(key) {
            slot.holders -= 1;
            if slot.holders == 0 {
                entries.remove(key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle on one slot of a [`LockTable`]; the slot is removed when the last
/// handle drops.
pub struct EntityLock<'a> {
    table: &'a LockTable,
    key: (EntityKind, String),
    lock: Arc<RwLock<()>>,
}

impl std::ops::Deref for EntityLock<'_> {
    type Target = RwLock<()>;

    fn deref(&self) -> &Self::Target {
        &self.lock
    }
}

impl Drop for EntityLock<'_> {
    fn drop(&mut self) {
        self.table.release(&self.key);
    }
}
