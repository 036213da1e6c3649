use std::collections::BTreeMap;

use axum::extract::Query;
use axum::http::Uri;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use unseal_core::{Key, Token};

use crate::error::AppError;

/// Vault-compatible response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct VaultResponse<T> {
    pub request_id: String,
    pub lease_id: String,
    pub lease_duration: i64,
    pub renewable: bool,
    pub data: Option<T>,
    pub warnings: Option<Vec<String>>,
    pub wrap_info: Option<serde_json::Value>,
    pub auth: Option<AuthBlock>,
}

impl<T> VaultResponse<T> {
    fn empty(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            lease_id: String::new(),
            lease_duration: 0,
            renewable: false,
            data: None,
            warnings: None,
            wrap_info: None,
            auth: None,
        }
    }

    pub fn data(request_id: &str, data: T) -> Self {
        Self {
            data: Some(data),
            ..Self::empty(request_id)
        }
    }
}

pub type AuthResponse = VaultResponse<serde_json::Value>;

impl AuthResponse {
    pub fn auth(request_id: &str, auth: AuthBlock) -> Self {
        Self {
            auth: Some(auth),
            ..Self::empty(request_id)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub list: Option<String>,
}

impl ListQuery {
    pub fn from_uri(uri: &Uri) -> Self {
        Query::<ListQuery>::try_from_uri(uri)
            .map(|Query(query)| query)
            .unwrap_or_default()
    }

    pub fn is_list(&self) -> bool {
        matches!(self.list.as_deref(), Some("true" | "1"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResponse {
    pub keys: Vec<String>,
}

/// Integer seconds or a Go-style duration string such as `"1h30m"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(i64),
    Text(String),
}

impl DurationValue {
    pub fn seconds(&self) -> Result<i64, AppError> {
        match self {
            DurationValue::Seconds(seconds) => Ok(*seconds),
            DurationValue::Text(text) => parse_duration(text),
        }
    }
}

pub fn parse_duration(text: &str) -> Result<i64, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0);
    }
    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text
            .parse()
            .map_err(|_| AppError::bad_request(format!("invalid duration {text:?}")));
    }
    let duration = humantime::parse_duration(text)
        .map_err(|err| AppError::bad_request(format!("invalid duration {text:?}: {err}")))?;
    i64::try_from(duration.as_secs())
        .map_err(|_| AppError::bad_request(format!("duration {text:?} is too large")))
}

fn seconds(value: Option<&DurationValue>) -> Result<i64, AppError> {
    value.map(DurationValue::seconds).transpose().map(Option::unwrap_or_default)
}

pub fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>, AppError> {
    STANDARD
        .decode(value.trim())
        .map_err(|err| AppError::bad_request(format!("failed to base64-decode {field}: {err}")))
}

fn decode_context(context: Option<&str>) -> Result<Option<Vec<u8>>, AppError> {
    context
        .filter(|value| !value.is_empty())
        .map(|value| decode_base64("context", value))
        .transpose()
}

fn rfc3339(unix: i64) -> Option<String> {
    OffsetDateTime::from_unix_timestamp(unix)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateKeyRequest {
    #[serde(rename = "type")]
    pub key_type: String,
    pub derived: bool,
    pub exportable: bool,
    pub allow_plaintext_backup: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeyConfigRequest {
    pub min_decryption_version: Option<u32>,
    pub min_encryption_version: Option<u32>,
    pub deletion_allowed: Option<bool>,
    pub exportable: Option<bool>,
    pub allow_plaintext_backup: Option<bool>,
}

impl From<KeyConfigRequest> for unseal_core::KeyConfig {
    fn from(value: KeyConfigRequest) -> Self {
        Self {
            min_decryption_version: value.min_decryption_version,
            min_encryption_version: value.min_encryption_version,
            deletion_allowed: value.deletion_allowed,
            exportable: value.exportable,
            allow_plaintext_backup: value.allow_plaintext_backup,
        }
    }
}

/// Key metadata; never carries key material.
#[derive(Debug, Clone, Serialize)]
pub struct KeyResponse {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub latest_version: u32,
    pub min_encryption_version: u32,
    pub min_decryption_version: u32,
    pub deletion_allowed: bool,
    pub derived: bool,
    pub exportable: bool,
    pub allow_plaintext_backup: bool,
    /// Version number to creation time in unix seconds.
    pub keys: BTreeMap<String, i64>,
    pub supports_encryption: bool,
    pub supports_decryption: bool,
    pub supports_derivation: bool,
}

impl From<&Key> for KeyResponse {
    fn from(key: &Key) -> Self {
        Self {
            name: key.name.clone(),
            key_type: key.key_type.as_str().to_string(),
            latest_version: key.latest_version(),
            min_encryption_version: key.min_encryption_version,
            min_decryption_version: key.min_decryption_version,
            deletion_allowed: key.deletion_allowed,
            derived: key.derived,
            exportable: key.exportable,
            allow_plaintext_backup: key.allow_plaintext_backup,
            keys: key
                .versions()
                .iter()
                .map(|version| (version.version().to_string(), version.created_at()))
                .collect(),
            supports_encryption: true,
            supports_decryption: true,
            supports_derivation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResponse {
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub keys: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EncryptRequest {
    /// Base64 plaintext.
    pub plaintext: String,
    pub context: Option<String>,
    pub key_version: Option<u32>,
}

impl EncryptRequest {
    pub fn into_parts(self) -> Result<(Vec<u8>, unseal_core::EncryptOptions), AppError> {
        if self.plaintext.is_empty() {
            return Err(AppError::bad_request("missing plaintext to encrypt"));
        }
        let plaintext = decode_base64("plaintext", &self.plaintext)?;
        let options = unseal_core::EncryptOptions {
            key_version: self.key_version,
            context: decode_context(self.context.as_deref())?,
        };
        Ok((plaintext, options))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EncryptResponse {
    pub ciphertext: String,
    pub key_version: u32,
}

impl From<unseal_core::Encrypted> for EncryptResponse {
    fn from(value: unseal_core::Encrypted) -> Self {
        Self {
            ciphertext: value.ciphertext,
            key_version: value.key_version,
        }
    }
}

/// Body of decrypt and rewrap.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CiphertextRequest {
    pub ciphertext: String,
    pub context: Option<String>,
}

impl CiphertextRequest {
    pub fn into_parts(self, operation: &str) -> Result<(String, Option<Vec<u8>>), AppError> {
        if self.ciphertext.trim().is_empty() {
            return Err(AppError::bad_request(format!(
                "missing ciphertext to {operation}"
            )));
        }
        let context = decode_context(self.context.as_deref())?;
        Ok((self.ciphertext, context))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecryptResponse {
    pub plaintext: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyRequest {
    #[serde(alias = "rules")]
    pub policy: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyResponse {
    pub name: String,
    pub policy: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CreateTokenRequest {
    pub policies: Vec<String>,
    pub ttl: Option<DurationValue>,
    pub explicit_max_ttl: Option<DurationValue>,
    pub period: Option<DurationValue>,
    #[serde(rename = "type")]
    pub token_type: Option<String>,
    pub display_name: String,
    pub num_uses: u32,
    pub renewable: bool,
    pub no_default_policy: bool,
    pub meta: BTreeMap<String, String>,
}

impl Default for CreateTokenRequest {
    fn default() -> Self {
        Self {
            policies: Vec::new(),
            ttl: None,
            explicit_max_ttl: None,
            period: None,
            token_type: None,
            display_name: String::new(),
            num_uses: 0,
            renewable: true,
            no_default_policy: false,
            meta: BTreeMap::new(),
        }
    }
}

impl CreateTokenRequest {
    pub fn into_spec(
        self,
    ) -> Result<(unseal_core::TokenSpec, unseal_core::ChildTokenOptions), AppError> {
        let token_type = self
            .token_type
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(str::parse::<unseal_core::TokenType>)
            .transpose()?
            .unwrap_or_default();
        let display_name = match self.display_name.trim() {
            "" => "token".to_string(),
            name => format!("token-{name}"),
        };
        let spec = unseal_core::TokenSpec {
            policies: self.policies,
            ttl: seconds(self.ttl.as_ref())?,
            explicit_max_ttl: seconds(self.explicit_max_ttl.as_ref())?,
            period: seconds(self.period.as_ref())?,
            token_type,
            display_name,
            num_uses: self.num_uses,
            renewable: self.renewable,
            meta: self.meta,
            ..Default::default()
        };
        let options = unseal_core::ChildTokenOptions {
            no_default_policy: self.no_default_policy,
        };
        Ok((spec, options))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccessorRequest {
    pub accessor: String,
}

/// `auth` block returned by create and renew.
#[derive(Debug, Clone, Serialize)]
pub struct AuthBlock {
    pub client_token: String,
    pub accessor: String,
    pub policies: Vec<String>,
    pub token_policies: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub lease_duration: i64,
    pub renewable: bool,
    pub token_type: String,
    pub orphan: bool,
    pub num_uses: u32,
}

impl AuthBlock {
    pub fn new(token: &Token, now: i64) -> Self {
        Self {
            client_token: token.token_id.clone(),
            accessor: token.accessor.clone(),
            policies: token.policies.clone(),
            token_policies: token.policies.clone(),
            metadata: token.meta.clone(),
            lease_duration: token.remaining_ttl(now).max(0),
            renewable: token.renewable && token.is_renewable(),
            token_type: token.token_type.as_str().to_string(),
            orphan: token.orphan,
            num_uses: token.num_uses,
        }
    }
}

/// `data` block of the lookup endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct TokenLookupResponse {
    pub id: String,
    pub accessor: String,
    pub policies: Vec<String>,
    pub creation_time: i64,
    pub creation_ttl: i64,
    pub explicit_max_ttl: i64,
    pub period: i64,
    pub expire_time: Option<String>,
    pub issue_time: Option<String>,
    pub last_renewal_time: Option<i64>,
    pub ttl: i64,
    pub num_uses: u32,
    pub renewable: bool,
    pub orphan: bool,
    pub display_name: String,
    pub path: String,
    pub meta: BTreeMap<String, String>,
    #[serde(rename = "type")]
    pub token_type: String,
}

impl TokenLookupResponse {
    pub fn new(token: &Token, now: i64) -> Self {
        Self {
            id: token.token_id.clone(),
            accessor: token.accessor.clone(),
            policies: token.policies.clone(),
            creation_time: token.creation_time,
            creation_ttl: token.creation_ttl,
            explicit_max_ttl: token.explicit_max_ttl,
            period: token.period,
            expire_time: (token.creation_ttl != 0)
                .then(|| rfc3339(token.expire_time))
                .flatten(),
            issue_time: rfc3339(token.creation_time),
            last_renewal_time: token.last_renewal_time,
            ttl: token.remaining_ttl(now).max(0),
            num_uses: token.num_uses,
            renewable: token.renewable && token.is_renewable(),
            orphan: token.orphan,
            display_name: token.display_name.clone(),
            path: token.path.clone(),
            meta: token.meta.clone(),
            token_type: token.token_type.as_str().to_string(),
        }
    }
}
