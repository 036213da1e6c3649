use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::crypto::cipher::random_bytes;
use crate::errors::{Error, Result};
use crate::policy::ROOT_POLICY;
use crate::store::{Entity, EntityKind, LockTable, Lookup, Store};

const SERVICE_SECRET_LEN: usize = 70;
const BATCH_SECRET_LEN: usize = 92;
const ACCESSOR_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    #[default]
    Service,
    Batch,
}

impl TokenType {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::Service => "service",
            TokenType::Batch => "batch",
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            TokenType::Service => "hvs",
            TokenType::Batch => "hvb",
        }
    }

    fn secret_len(self) -> usize {
        match self {
            TokenType::Service => SERVICE_SECRET_LEN,
            TokenType::Batch => BATCH_SECRET_LEN,
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "service" | "default" => Ok(TokenType::Service),
            "batch" => Ok(TokenType::Batch),
            other => Err(Error::validation(format!("unknown token type {other:?}"))),
        }
    }
}

/// A bearer token and its TTL state. All times are unix seconds and all
/// durations whole seconds.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub token_id: String,
    pub accessor: String,
    pub policies: Vec<String>,
    pub creation_time: i64,
    pub creation_ttl: i64,
    pub explicit_max_ttl: i64,
    pub period: i64,
    pub expire_time: i64,
    pub last_renewal_time: Option<i64>,
    pub num_uses: u32,
    pub renewable: bool,
    pub orphan: bool,
    pub token_type: TokenType,
    pub display_name: String,
    pub path: String,
    pub meta: BTreeMap<String, String>,
}

impl Token {
    /// Seconds until expiry. Zero means the token never expires; negative
    /// values mean it already has.
    pub fn remaining_ttl(&self, now: i64) -> i64 {
        if self.creation_ttl == 0 {
            0
        } else {
            self.expire_time.saturating_sub(now)
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.creation_ttl > 0 && self.expire_time < now
    }

    pub fn is_root(&self) -> bool {
        self.policies.iter().any(|policy| policy == ROOT_POLICY)
    }

    /// Whether `renew` can ever move `expire_time`.
    pub fn is_renewable(&self) -> bool {
        self.creation_ttl != 0 && (self.explicit_max_ttl != 0 || self.period != 0)
    }

    fn redacted(mut self) -> Self {
        self.token_id.clear();
        self
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("token_id", &if self.token_id.is_empty() { "" } else { "<redacted>" })
            .field("accessor", &self.accessor)
            .field("policies", &self.policies)
            .field("creation_time", &self.creation_time)
            .field("creation_ttl", &self.creation_ttl)
            .field("explicit_max_ttl", &self.explicit_max_ttl)
            .field("period", &self.period)
            .field("expire_time", &self.expire_time)
            .field("last_renewal_time", &self.last_renewal_time)
            .field("token_type", &self.token_type)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// Parameters for minting a token. Durations are whole seconds.
#[derive(Debug, Clone)]
pub struct TokenSpec {
    pub policies: Vec<String>,
    pub ttl: i64,
    pub explicit_max_ttl: i64,
    pub period: i64,
    pub token_type: TokenType,
    pub display_name: String,
    pub num_uses: u32,
    pub renewable: bool,
    pub orphan: bool,
    pub path: String,
    pub meta: BTreeMap<String, String>,
}

impl Default for TokenSpec {
    fn default() -> Self {
        Self {
            policies: Vec::new(),
            ttl: 0,
            explicit_max_ttl: 0,
            period: 0,
            token_type: TokenType::Service,
            display_name: String::new(),
            num_uses: 0,
            renewable: true,
            orphan: false,
            path: "auth/token/create".into(),
            meta: BTreeMap::new(),
        }
    }
}

/// How a caller names a token: by the bearer secret or by its accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRef<'a> {
    Id(&'a str),
    Accessor(&'a str),
}

impl<'a> TokenRef<'a> {
    fn lookup(self) -> Lookup<'a> {
        match self {
            TokenRef::Id(id) => Lookup::ById(id),
            TokenRef::Accessor(accessor) => Lookup::ByAccessor(accessor),
        }
    }

    fn validated(self) -> Result<Self> {
        let value = match self {
            TokenRef::Id(value) | TokenRef::Accessor(value) => value,
        };
        if value.trim().is_empty() {
            return Err(Error::validation("token reference must not be empty"));
        }
        Ok(self)
    }
}

/// Creates, renews, inspects and revokes tokens.
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    locks: Arc<LockTable>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, locks: Arc<LockTable>) -> Self {
        Self {
            store,
            clock,
            locks,
        }
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn create(&self, spec: TokenSpec) -> Result<Token> {
        if spec.ttl < 0 || spec.explicit_max_ttl < 0 || spec.period < 0 {
            return Err(Error::validation("token durations must not be negative"));
        }
        if spec.ttl == 0 && spec.period == 0 {
            return Err(Error::validation("either ttl or period must be set"));
        }
        if spec.explicit_max_ttl > 0 && spec.period > 0 {
            return Err(Error::validation(
                "explicit_max_ttl and period are mutually exclusive",
            ));
        }

        let mut ttl = if spec.ttl == 0 { spec.period } else { spec.ttl };
        if spec.explicit_max_ttl > 0 {
            ttl = ttl.min(spec.explicit_max_ttl);
        }

        let now = self.clock.now();
        let too_large = || Error::validation("ttl too large");
        let expire_time = now.checked_add(ttl).ok_or_else(too_large)?;
        now.checked_add(spec.explicit_max_ttl).ok_or_else(too_large)?;
        let token = Token {
            token_id: generate_token_id(spec.token_type),
            accessor: generate_accessor(),
            policies: spec.policies,
            creation_time: now,
            creation_ttl: ttl,
            explicit_max_ttl: spec.explicit_max_ttl,
            period: spec.period,
            expire_time,
            last_renewal_time: None,
            num_uses: spec.num_uses,
            renewable: spec.renewable,
            orphan: spec.orphan,
            token_type: spec.token_type,
            display_name: spec.display_name,
            path: spec.path,
            meta: spec.meta,
        };
        self.insert(token)
    }

    /// Mints a never-expiring token carrying the `root` policy.
    pub fn create_root(&self, requested_id: Option<&str>) -> Result<Token> {
        let token_id = match requested_id.map(str::trim) {
            Some("") => return Err(Error::validation("root token id must not be empty")),
            Some(id) => id.to_string(),
            None => generate_token_id(TokenType::Service),
        };
        let now = self.clock.now();
        let token = Token {
            token_id,
            accessor: generate_accessor(),
            policies: vec![ROOT_POLICY.to_string()],
            creation_time: now,
            creation_ttl: 0,
            explicit_max_ttl: 0,
            period: 0,
            expire_time: now,
            last_renewal_time: None,
            num_uses: 0,
            renewable: false,
            orphan: true,
            token_type: TokenType::Service,
            display_name: "root".into(),
            path: "auth/token/root".into(),
            meta: BTreeMap::new(),
        };
        self.insert(token)
    }

    /// Returns the token; accessor lookups never reveal the token id.
    pub fn lookup(&self, reference: TokenRef<'_>) -> Result<Token> {
        let token = self.load(reference.validated()?)?;
        Ok(match reference {
            TokenRef::Id(_) => token,
            TokenRef::Accessor(_) => token.redacted(),
        })
    }

    /// Resolves a bearer token for authorization, reaping it if expired.
    pub fn resolve_active(&self, token_id: &str) -> Result<Token> {
        let token = self.load(TokenRef::Id(token_id).validated()?)?;
        if !token.is_expired(self.clock.now()) {
            return Ok(token);
        }
        self.reap(&token.token_id)?;
        Err(Error::Expired)
    }

    pub fn renew(&self, reference: TokenRef<'_>) -> Result<Token> {
        let token_id = self.load(reference.validated()?)?.token_id;
        let lock = self.locks.entry(EntityKind::Token, &token_id);
        let _guard = lock.write();

        // Re-read under the lock so a concurrent revoke wins cleanly.
        let mut token = self.load(TokenRef::Id(&token_id))?;
        let now = self.clock.now();

        if !token.is_renewable() {
            return Ok(finish(token, reference));
        }
        if token.expire_time < now {
            self.store
                .delete(EntityKind::Token, Lookup::ById(&token_id))?;
            debug!(accessor = %token.accessor, "expired token reaped on renew");
            return Err(Error::Expired);
        }

        let window = now.saturating_add(token.creation_ttl);
        let extended = if token.period > 0 {
            Some(window)
        } else {
            let cap = token.creation_time.saturating_add(token.explicit_max_ttl);
            if window < cap {
                Some(window)
            } else if now < cap {
                Some(cap)
            } else {
                None
            }
        };

        if let Some(expire_time) = extended {
            token.expire_time = expire_time;
            token.last_renewal_time = Some(now);
            self.store.put(Entity::Token(token.clone()))?;
            debug!(accessor = %token.accessor, expire_time, "token renewed");
        }
        Ok(finish(token, reference))
    }

    /// Deletes the token. Revoking an unknown token succeeds.
    pub fn revoke(&self, reference: TokenRef<'_>) -> Result<()> {
        let Some(token) = self.find(reference.validated()?)? else {
            return Ok(());
        };
        self.reap(&token.token_id)?;
        debug!(accessor = %token.accessor, "token revoked");
        Ok(())
    }

    pub fn remaining_ttl(&self, token: &Token) -> i64 {
        token.remaining_ttl(self.clock.now())
    }

    fn insert(&self, token: Token) -> Result<Token> {
        let lock = self.locks.entry(EntityKind::Token, &token.token_id);
        let _guard = lock.write();
        self.store.insert(Entity::Token(token.clone()))?;
        debug!(accessor = %token.accessor, token_type = %token.token_type, "token created");
        Ok(token)
    }

    fn reap(&self, token_id: &str) -> Result<()> {
        let lock = self.locks.entry(EntityKind::Token, token_id);
        let _guard = lock.write();
        self.store
            .delete(EntityKind::Token, Lookup::ById(token_id))
    }

    fn find(&self, reference: TokenRef<'_>) -> Result<Option<Token>> {
        match self.store.get(EntityKind::Token, reference.lookup())? {
            Some(entity) => entity
                .into_token()
                .map(Some)
                .ok_or_else(|| Error::Unavailable("store returned a non-token entity".into())),
            None => Ok(None),
        }
    }

    fn load(&self, reference: TokenRef<'_>) -> Result<Token> {
        self.find(reference)?
            .ok_or_else(|| Error::not_found("token"))
    }
}

fn finish(token: Token, reference: TokenRef<'_>) -> Token {
    match reference {
        TokenRef::Id(_) => token,
        TokenRef::Accessor(_) => token.redacted(),
    }
}

fn generate_token_id(token_type: TokenType) -> String {
    format!(
        "{}.{}",
        token_type.prefix(),
        STANDARD.encode(random_bytes(token_type.secret_len()))
    )
}

fn generate_accessor() -> String {
    STANDARD.encode(random_bytes(ACCESSOR_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    const START: i64 = 1_700_000_000;

    fn manager() -> (TokenManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let manager = TokenManager::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            Arc::new(LockTable::new()),
        );
        (manager, clock)
    }

    fn spec(ttl: i64, explicit_max_ttl: i64, period: i64) -> TokenSpec {
        TokenSpec {
            policies: vec!["default".into()],
            ttl,
            explicit_max_ttl,
            period,
            ..Default::default()
        }
    }

    #[test]
    fn create_validates_regimes() {
        let (tokens, _) = manager();
        assert!(matches!(tokens.create(spec(0, 0, 0)).unwrap_err(), Error::Validation(_)));
        assert!(matches!(
            tokens.create(spec(60, 120, 30)).unwrap_err(),
            Error::Validation(_)
        ));
        assert!(matches!(tokens.create(spec(-1, 0, 0)).unwrap_err(), Error::Validation(_)));
    }

    #[test]
    fn create_rejects_durations_past_the_clock_range() {
        let (tokens, _) = manager();
        for spec in [spec(i64::MAX, 0, 0), spec(0, 0, i64::MAX), spec(60, i64::MAX, 0)] {
            let err = tokens.create(spec).unwrap_err();
            assert!(matches!(err, Error::Validation(ref m) if m == "ttl too large"), "{err:?}");
        }

        let far = tokens.create(spec(i64::MAX - START, 0, 0)).expect("fits");
        assert_eq!(far.expire_time, i64::MAX);
    }

    #[test]
    fn lock_slots_do_not_outlive_requests() {
        let locks = Arc::new(LockTable::new());
        let tokens = TokenManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(START)),
            locks.clone(),
        );
        let token = tokens.create(spec(60, 0, 0)).expect("create");
        tokens.renew(TokenRef::Id(&token.token_id)).expect("renew");
        assert!(tokens.renew(TokenRef::Id("hvs.missing")).is_err());
        tokens.revoke(TokenRef::Id(&token.token_id)).expect("revoke");
        assert!(locks.is_empty(), "{} slots left", locks.len());
    }

    #[test]
    fn renewing_far_future_tokens_saturates() {
        let (tokens, clock) = manager();
        let token = tokens.create(spec(0, 0, i64::MAX - START)).expect("periodic");
        clock.advance(10);
        let renewed = tokens.renew(TokenRef::Id(&token.token_id)).expect("renew");
        assert_eq!(renewed.expire_time, i64::MAX);
    }

    #[test]
    fn create_sets_ttl_from_period_when_missing() {
        let (tokens, _) = manager();
        let token = tokens.create(spec(0, 0, 3600)).expect("create");
        assert_eq!(token.creation_ttl, 3600);
        assert_eq!(token.creation_time, START);
        assert_eq!(token.expire_time, START + 3600);
        assert_eq!(tokens.remaining_ttl(&token), 3600);
    }

    #[test]
    fn ids_and_accessors_are_shaped_by_type() {
        let (tokens, _) = manager();
        let service = tokens.create(spec(60, 0, 0)).expect("service");
        let batch = tokens
            .create(TokenSpec {
                token_type: TokenType::Batch,
                ..spec(60, 0, 0)
            })
            .expect("batch");

        assert!(service.token_id.starts_with("hvs."));
        assert!(batch.token_id.starts_with("hvb."));
        let secret = |token: &Token| STANDARD.decode(&token.token_id[4..]).expect("base64");
        assert_eq!(secret(&service).len(), 70);
        assert_eq!(secret(&batch).len(), 92);
        assert_eq!(STANDARD.decode(&service.accessor).expect("base64").len(), 20);
        assert_ne!(service.accessor, batch.accessor);
        assert!(!service.token_id.contains(&service.accessor));
    }

    #[test]
    fn periodic_renewal_example() {
        let (tokens, clock) = manager();
        let token = tokens.create(spec(0, 0, 3600)).expect("create");

        clock.advance(1000);
        let renewed = tokens.renew(TokenRef::Id(&token.token_id)).expect("renew");
        assert_eq!(renewed.expire_time, START + 1000 + 3600);
        assert_eq!(renewed.last_renewal_time, Some(START + 1000));

        clock.advance(3000);
        let renewed = tokens.renew(TokenRef::Id(&token.token_id)).expect("renew");
        assert_eq!(renewed.expire_time, START + 4000 + 3600);
        assert_eq!(renewed.last_renewal_time, Some(START + 4000));
    }

    #[test]
    fn bounded_renewal_stops_at_the_cap() {
        let (tokens, clock) = manager();
        let token = tokens.create(spec(100, 250, 0)).expect("create");
        let id = TokenRef::Id(&token.token_id);

        clock.advance(50);
        let renewed = tokens.renew(id).expect("full extension");
        assert_eq!(renewed.expire_time, START + 150);

        clock.advance(100);
        let renewed = tokens.renew(id).expect("partial extension");
        assert_eq!(renewed.expire_time, START + 250);
        assert_eq!(renewed.last_renewal_time, Some(START + 150));

        clock.set(START + 250);
        let renewed = tokens.renew(id).expect("at cap is not a failure");
        assert_eq!(renewed.expire_time, START + 250);
        assert_eq!(renewed.last_renewal_time, Some(START + 150));
    }

    #[test]
    fn ttl_is_clamped_to_explicit_max() {
        let (tokens, _) = manager();
        let token = tokens.create(spec(500, 200, 0)).expect("create");
        assert_eq!(token.creation_ttl, 200);
        assert_eq!(token.expire_time, START + 200);
    }

    #[test]
    fn non_renewable_tokens_renew_as_noop() {
        let (tokens, clock) = manager();
        let plain = tokens.create(spec(60, 0, 0)).expect("create");
        clock.advance(30);
        let same = tokens.renew(TokenRef::Id(&plain.token_id)).expect("renew");
        assert_eq!(same.expire_time, plain.expire_time);
        assert_eq!(same.last_renewal_time, None);

        let root = tokens.create_root(None).expect("root");
        assert_eq!(tokens.remaining_ttl(&root), 0);
        let same = tokens.renew(TokenRef::Id(&root.token_id)).expect("renew root");
        assert_eq!(same.expire_time, root.expire_time);
    }

    #[test]
    fn renewing_an_expired_token_reaps_it() {
        let (tokens, clock) = manager();
        let token = tokens.create(spec(0, 0, 60)).expect("create");
        clock.advance(61);
        assert_eq!(tokens.remaining_ttl(&token), -1);

        let err = tokens.renew(TokenRef::Id(&token.token_id)).unwrap_err();
        assert_eq!(err, Error::Expired);
        assert!(matches!(
            tokens.lookup(TokenRef::Id(&token.token_id)).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn resolve_active_reaps_expired_tokens() {
        let (tokens, clock) = manager();
        let token = tokens.create(spec(60, 0, 0)).expect("create");
        clock.advance(60);
        tokens.resolve_active(&token.token_id).expect("still valid at expiry");
        clock.advance(1);
        assert_eq!(tokens.resolve_active(&token.token_id).unwrap_err(), Error::Expired);
        assert!(matches!(
            tokens.resolve_active(&token.token_id).unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(matches!(tokens.resolve_active("").unwrap_err(), Error::Validation(_)));
    }

    #[test]
    fn accessor_lookup_redacts_token_id() {
        let (tokens, _) = manager();
        let token = tokens.create(spec(60, 0, 0)).expect("create");

        let by_accessor = tokens.lookup(TokenRef::Accessor(&token.accessor)).expect("lookup");
        assert!(by_accessor.token_id.is_empty());
        assert_eq!(by_accessor.accessor, token.accessor);
        assert_eq!(by_accessor.policies, token.policies);

        let by_id = tokens.lookup(TokenRef::Id(&token.token_id)).expect("lookup");
        assert_eq!(by_id.token_id, token.token_id);

        let renewed = tokens.renew(TokenRef::Accessor(&token.accessor)).expect("renew");
        assert!(renewed.token_id.is_empty());
    }

    #[test]
    fn revoke_is_idempotent() {
        let (tokens, _) = manager();
        let token = tokens.create(spec(60, 0, 0)).expect("create");
        tokens.revoke(TokenRef::Accessor(&token.accessor)).expect("revoke");
        tokens.revoke(TokenRef::Id(&token.token_id)).expect("revoke again");
        tokens.revoke(TokenRef::Id("hvs.never-existed")).expect("unknown");
        assert!(matches!(
            tokens.lookup(TokenRef::Id(&token.token_id)).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn root_token_with_requested_id() {
        let (tokens, _) = manager();
        let root = tokens.create_root(Some("dev-root")).expect("root");
        assert_eq!(root.token_id, "dev-root");
        assert!(root.is_root());
        assert!(matches!(
            tokens.create_root(Some("dev-root")).unwrap_err(),
            Error::Conflict { .. }
        ));
    }

    #[test]
    fn renew_racing_revoke_never_resurrects() {
        let (tokens, _) = manager();
        for _ in 0..20 {
            let token = tokens.create(spec(0, 0, 60)).expect("create");
            std::thread::scope(|scope| {
                let renewer = tokens.clone();
                let revoker = tokens.clone();
                let id = token.token_id.clone();
                scope.spawn(move || {
                    let _ = renewer.renew(TokenRef::Id(&id));
                });
                let id = token.token_id.clone();
                scope.spawn(move || revoker.revoke(TokenRef::Id(&id)).expect("revoke"));
            });
            assert!(tokens.lookup(TokenRef::Id(&token.token_id)).is_err());
        }
    }

    #[test]
    fn debug_output_hides_secret() {
        let (tokens, _) = manager();
        let token = tokens.create(spec(60, 0, 0)).expect("create");
        let rendered = format!("{token:?}");
        assert!(!rendered.contains(&token.token_id));
    }
}
