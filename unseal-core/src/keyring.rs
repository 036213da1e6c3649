use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::clock::Clock;
use crate::crypto::{self, CIPHERTEXT_PREFIX, WireCiphertext};
use crate::errors::{Error, Result};
use crate::store::{Entity, EntityKind, LockTable, Lookup, Store};

/// AEAD flavours a named key can be created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "aes128-gcm96")]
    Aes128Gcm96,
    #[serde(rename = "aes192-gcm96")]
    Aes192Gcm96,
    #[default]
    #[serde(rename = "aes256-gcm96")]
    Aes256Gcm96,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::Aes128Gcm96 => "aes128-gcm96",
            KeyType::Aes192Gcm96 => "aes192-gcm96",
            KeyType::Aes256Gcm96 => "aes256-gcm96",
        }
    }

    pub fn key_size(self) -> usize {
        match self {
            KeyType::Aes128Gcm96 => 16,
            KeyType::Aes192Gcm96 => 24,
            KeyType::Aes256Gcm96 => 32,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "aes128-gcm96" => Ok(KeyType::Aes128Gcm96),
            "aes192-gcm96" => Ok(KeyType::Aes192Gcm96),
            "" | "aes256-gcm96" => Ok(KeyType::Aes256Gcm96),
            other => Err(Error::validation(format!("unknown key type {other:?}"))),
        }
    }
}

/// One immutable generation of key material.
#[derive(Clone)]
pub struct KeyVersion {
    version: u32,
    material: Zeroizing<Vec<u8>>,
    created_at: i64,
}

impl KeyVersion {
    fn generate(version: u32, key_type: KeyType, created_at: i64) -> Result<Self> {
        Ok(Self {
            version,
            material: crypto::generate_key(key_type.key_size())?,
            created_at,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }
}

impl fmt::Debug for KeyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyVersion")
            .field("version", &self.version)
            .field("material", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A named, versioned transit key.
///
/// Versions are append-only and numbered from 1, so `latest_version` is always
/// the length of the version list.
#[derive(Debug, Clone)]
pub struct Key {
    pub name: String,
    pub key_type: KeyType,
    versions: Vec<KeyVersion>,
    pub min_encryption_version: u32,
    pub min_decryption_version: u32,
    pub exportable: bool,
    pub deletion_allowed: bool,
    pub derived: bool,
    pub allow_plaintext_backup: bool,
}

impl Key {
    pub fn latest_version(&self) -> u32 {
        self.versions.len() as u32
    }

    pub fn versions(&self) -> &[KeyVersion] {
        &self.versions
    }

    pub fn version(&self, version: u32) -> Option<&KeyVersion> {
        let index = usize::try_from(version).ok()?.checked_sub(1)?;
        self.versions.get(index)
    }

    fn rotate(&mut self, now: i64) -> Result<u32> {
        let next = self.latest_version() + 1;
        self.versions
            .push(KeyVersion::generate(next, self.key_type, now)?);
        Ok(next)
    }

    fn material(&self, version: u32, context: Option<&[u8]>) -> Result<Zeroizing<Vec<u8>>> {
        let entry = self
            .version(version)
            .ok_or_else(|| Error::validation(format!("invalid key version {version}")))?;
        match (self.derived, context) {
            (true, Some(context)) if !context.is_empty() => {
                crypto::derive_key(&entry.material, context)
            }
            (true, _) => Err(Error::validation(
                "missing 'context' for key derivation; the key was created as a derived key",
            )),
            (false, _) => Ok(entry.material.clone()),
        }
    }
}

/// Options accepted when a key is first created.
#[derive(Debug, Clone, Default)]
pub struct KeyOptions {
    pub key_type: KeyType,
    pub derived: bool,
    pub exportable: bool,
    pub allow_plaintext_backup: bool,
}

/// Mutable settings of an existing key. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct KeyConfig {
    pub min_decryption_version: Option<u32>,
    pub min_encryption_version: Option<u32>,
    pub deletion_allowed: Option<bool>,
    pub exportable: Option<bool>,
    pub allow_plaintext_backup: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct EncryptOptions {
    /// Version to encrypt with; `None` or `0` selects the latest.
    pub key_version: Option<u32>,
    /// Derivation context, required for derived keys.
    pub context: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encrypted {
    pub ciphertext: String,
    pub key_version: u32,
}

/// Owns every named key and performs envelope operations against them.
#[derive(Clone)]
pub struct KeyRing {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    locks: Arc<LockTable>,
}

impl KeyRing {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, locks: Arc<LockTable>) -> Self {
        Self {
            store,
            clock,
            locks,
        }
    }

    pub fn create(&self, name: &str, options: KeyOptions) -> Result<Key> {
        validate_name(name)?;
        let lock = self.locks.entry(EntityKind::Key, name);
        let _guard = lock.write();

        let key = Key {
            name: name.to_string(),
            key_type: options.key_type,
            versions: vec![KeyVersion::generate(1, options.key_type, self.clock.now())?],
            min_encryption_version: 1,
            min_decryption_version: 1,
            exportable: options.exportable,
            deletion_allowed: false,
            derived: options.derived,
            allow_plaintext_backup: options.allow_plaintext_backup,
        };
        self.store.insert(Entity::Key(key.clone()))?;
        debug!(key = %name, key_type = %key.key_type, "transit key created");
        Ok(key)
    }

    pub fn get(&self, name: &str) -> Result<Key> {
        self.load(name)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .store
            .list(EntityKind::Key)?
            .into_iter()
            .filter_map(Entity::into_key)
            .map(|key| key.name)
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn configure(&self, name: &str, config: KeyConfig) -> Result<Key> {
        let lock = self.locks.entry(EntityKind::Key, name);
        let _guard = lock.write();

        let mut key = self.load(name)?;
        let latest = key.latest_version();

        let min_decryption = config
            .min_decryption_version
            .unwrap_or(key.min_decryption_version);
        let min_encryption = config
            .min_encryption_version
            .unwrap_or(key.min_encryption_version);
        for (field, value) in [
            ("min_decryption_version", min_decryption),
            ("min_encryption_version", min_encryption),
        ] {
            if value == 0 {
                return Err(Error::validation(format!("{field} must be at least 1")));
            }
            if value > latest {
                return Err(Error::validation(format!(
                    "{field} {value} exceeds latest version {latest}"
                )));
            }
        }
        if min_encryption < min_decryption {
            return Err(Error::validation(
                "min_encryption_version must not be lower than min_decryption_version",
            ));
        }

        if key.exportable && config.exportable == Some(false) {
            return Err(Error::validation("exportable cannot be disabled once enabled"));
        }
        if key.allow_plaintext_backup && config.allow_plaintext_backup == Some(false) {
            return Err(Error::validation(
                "allow_plaintext_backup cannot be disabled once enabled",
            ));
        }

        key.min_decryption_version = min_decryption;
        key.min_encryption_version = min_encryption;
        if let Some(value) = config.deletion_allowed {
            key.deletion_allowed = value;
        }
        if let Some(value) = config.exportable {
            key.exportable = value;
        }
        if let Some(value) = config.allow_plaintext_backup {
            key.allow_plaintext_backup = value;
        }

        self.store.put(Entity::Key(key.clone()))?;
        debug!(key = %name, min_decryption, min_encryption, "transit key configured");
        Ok(key)
    }

    /// Appends a fresh version and makes it the latest. Floors are untouched.
    pub fn rotate(&self, name: &str) -> Result<Key> {
        let lock = self.locks.entry(EntityKind::Key, name);
        let _guard = lock.write();

        let mut key = self.load(name)?;
        let version = key.rotate(self.clock.now())?;
        self.store.put(Entity::Key(key.clone()))?;
        debug!(key = %name, version, "transit key rotated");
        Ok(key)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let lock = self.locks.entry(EntityKind::Key, name);
        {
            let _guard = lock.write();
            let Some(key) = self.find(name)? else {
                return Ok(());
            };
            if !key.deletion_allowed {
                return Err(Error::denied(format!(
                    "deletion is not allowed for key {name:?}"
                )));
            }
            self.store.delete(EntityKind::Key, Lookup::ByName(name))?;
        }
        debug!(key = %name, "transit key deleted");
        Ok(())
    }

    pub fn encrypt(
        &self,
        name: &str,
        plaintext: &[u8],
        options: &EncryptOptions,
    ) -> Result<Encrypted> {
        let lock = self.locks.entry(EntityKind::Key, name);
        let _guard = lock.read();

        let key = self.load(name)?;
        let version = match options.key_version {
            None | Some(0) => key.latest_version(),
            Some(version) if version < key.min_encryption_version => {
                return Err(Error::denied(format!(
                    "key version {version} is below the minimum encryption version {}",
                    key.min_encryption_version
                )));
            }
            Some(version) if version > key.latest_version() => {
                return Err(Error::denied(format!(
                    "key version {version} is newer than the latest version {}",
                    key.latest_version()
                )));
            }
            Some(version) => version,
        };
        seal_with(&key, version, plaintext, options.context.as_deref())
    }

    pub fn decrypt(&self, name: &str, ciphertext: &str, context: Option<&[u8]>) -> Result<Vec<u8>> {
        let wire = parse_ciphertext(ciphertext)?;
        let lock = self.locks.entry(EntityKind::Key, name);
        let _guard = lock.read();

        let key = self.load(name)?;
        open_with(&key, &wire, context)
    }

    /// Decrypts under the ciphertext's own version and re-encrypts under the
    /// latest one. Nothing is produced when the decrypt step fails.
    pub fn rewrap(&self, name: &str, ciphertext: &str, context: Option<&[u8]>) -> Result<Encrypted> {
        let wire = parse_ciphertext(ciphertext)?;
        let lock = self.locks.entry(EntityKind::Key, name);
        let _guard = lock.read();

        let key = self.load(name)?;
        let plaintext = Zeroizing::new(open_with(&key, &wire, context)?);
        seal_with(&key, key.latest_version(), &plaintext, context)
    }

    /// Raw material for every version of an exportable key.
    pub fn export(&self, name: &str) -> Result<Vec<(u32, Zeroizing<Vec<u8>>)>> {
        let key = self.load(name)?;
        if !key.exportable {
            return Err(Error::denied(format!("key {name:?} is not exportable")));
        }
        Ok(key
            .versions
            .iter()
            .map(|entry| (entry.version, entry.material.clone()))
            .collect())
    }

    fn find(&self, name: &str) -> Result<Option<Key>> {
        match self.store.get(EntityKind::Key, Lookup::ByName(name))? {
            Some(entity) => entity
                .into_key()
                .map(Some)
                .ok_or_else(|| Error::Unavailable("store returned a non-key entity".into())),
            None => Ok(None),
        }
    }

    fn load(&self, name: &str) -> Result<Key> {
        self.find(name)?
            .ok_or_else(|| Error::not_found(format!("key {name:?}")))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation("key name must not be empty"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::validation(format!(
            "key name {name:?} contains invalid characters"
        )));
    }
    Ok(())
}

fn parse_ciphertext(ciphertext: &str) -> Result<WireCiphertext> {
    let wire = WireCiphertext::parse(ciphertext)?;
    if wire.prefix != CIPHERTEXT_PREFIX {
        return Err(Error::validation(format!(
            "invalid ciphertext: unknown prefix {:?}",
            wire.prefix
        )));
    }
    Ok(wire)
}

fn seal_with(key: &Key, version: u32, plaintext: &[u8], context: Option<&[u8]>) -> Result<Encrypted> {
    let material = key.material(version, context)?;
    let payload = crypto::seal(&material, plaintext)?;
    Ok(Encrypted {
        ciphertext: WireCiphertext::new(version, payload).to_string(),
        key_version: version,
    })
}

fn open_with(key: &Key, wire: &WireCiphertext, context: Option<&[u8]>) -> Result<Vec<u8>> {
    if wire.version < key.min_decryption_version {
        return Err(Error::denied(format!(
            "ciphertext version {} is below the minimum decryption version {}",
            wire.version, key.min_decryption_version
        )));
    }
    let material = key.material(wire.version, context)?;
    crypto::open(&material, &wire.payload)
}
