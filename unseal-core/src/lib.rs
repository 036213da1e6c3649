//! Core engines of the unseal broker: a versioned transit key ring, an ACL
//! policy compiler and matcher, and the token lifecycle that feeds
//! authorization decisions.
//!
//! Everything here is synchronous and transport agnostic. State lives behind
//! the [`store::Store`] trait and time comes from an injected [`clock::Clock`].

pub mod authorize;
pub mod broker;
pub mod clock;
pub mod crypto;
pub mod errors;
pub mod keyring;
pub mod policy;
pub mod store;
pub mod token;

pub use authorize::{Authorization, Authorizer};
pub use broker::{Broker, ChildTokenOptions};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{Error, Result};
pub use keyring::{EncryptOptions, Encrypted, Key, KeyConfig, KeyOptions, KeyRing, KeyType};
pub use policy::{AccessRequest, Capability, Decision, Policy, PolicyStore, Verb};
pub use store::{Entity, EntityKind, EntityLock, LockTable, Lookup, MemoryStore, Store};
pub use token::{Token, TokenManager, TokenRef, TokenSpec, TokenType};
