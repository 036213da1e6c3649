use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use tracing::info;
use unseal_core::{Authorization, Capability, KeyOptions, KeyType, TokenRef};

use crate::auth;
use crate::error::{AppError, attach_correlation};
use crate::models::{
    AccessorRequest, AuthBlock, AuthResponse, CiphertextRequest, CreateKeyRequest,
    CreateTokenRequest, DecryptResponse, EncryptRequest, EncryptResponse, ExportResponse,
    KeyConfigRequest, KeyResponse, ListQuery, ListResponse, PolicyRequest, PolicyResponse,
    TokenLookupResponse, TokenRequest, VaultResponse,
};
use crate::state::AppState;
use crate::telemetry::{CorrelationId, correlation_layer, request_span};

pub fn router(state: AppState) -> Router {
    let api = api_routes().layer(middleware::from_fn_with_state(
        state.clone(),
        auth::http_layer,
    ));

    Router::new()
        .route("/v1/sys/health", get(health_check))
        .route("/v1/sys/seal-status", get(seal_status))
        .route("/v1/sys/leader", get(leader_status))
        .route("/v1/liveness", get(liveness))
        .route("/v1/readiness", get(readiness))
        .merge(api)
        .layer(middleware::from_fn(correlation_layer))
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/transit/keys", get(list_keys))
        .route(
            "/v1/transit/keys/{name}",
            post(create_key)
                .put(create_key)
                .get(read_key)
                .delete(delete_key),
        )
        .route(
            "/v1/transit/keys/{name}/config",
            post(configure_key).put(configure_key),
        )
        .route(
            "/v1/transit/keys/{name}/rotate",
            post(rotate_key).put(rotate_key),
        )
        .route(
            "/v1/transit/export/encryption-key/{name}",
            get(export_key),
        )
        .route("/v1/transit/encrypt/{name}", post(encrypt).put(encrypt))
        .route("/v1/transit/decrypt/{name}", post(decrypt).put(decrypt))
        .route("/v1/transit/rewrap/{name}", post(rewrap).put(rewrap))
        .route("/v1/sys/policies/acl", get(list_policies))
        .route(
            "/v1/sys/policies/acl/{name}",
            get(read_policy)
                .post(write_policy)
                .put(write_policy)
                .delete(delete_policy),
        )
        .route("/v1/auth/token/create", post(create_token))
        .route("/v1/auth/token/lookup", post(lookup_token))
        .route("/v1/auth/token/lookup-accessor", post(lookup_accessor))
        .route("/v1/auth/token/lookup-self", get(lookup_self))
        .route("/v1/auth/token/renew", post(renew_token))
        .route("/v1/auth/token/renew-accessor", post(renew_accessor))
        .route("/v1/auth/token/renew-self", post(renew_self))
        .route("/v1/auth/token/revoke", post(revoke_token))
        .route("/v1/auth/token/revoke-accessor", post(revoke_accessor))
        .route("/v1/auth/token/revoke-self", post(revoke_self))
}

/// Runs a synchronous core call inside the operation span.
fn traced<T>(
    operation: &str,
    correlation: &CorrelationId,
    call: impl FnOnce() -> Result<T, AppError>,
) -> Result<T, AppError> {
    request_span(operation, &correlation.0)
        .in_scope(call)
        .map_err(|err| attach_correlation(err, correlation))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "initialized": true,
            "sealed": false,
            "standby": false,
            "version": env!("CARGO_PKG_VERSION"),
            "server_time_utc": state.broker.tokens().now(),
        })),
    )
}

/// The broker never seals; this answers clients that poll before use.
async fn seal_status() -> Json<serde_json::Value> {
    Json(json!({
        "type": "shamir",
        "initialized": true,
        "sealed": false,
        "t": 1,
        "n": 1,
        "progress": 0,
        "nonce": "",
        "version": env!("CARGO_PKG_VERSION"),
        "migration": false,
        "recovery_seal": false,
        "storage_type": "inmem",
    }))
}

async fn leader_status() -> Json<serde_json::Value> {
    Json(json!({
        "ha_enabled": false,
        "is_self": true,
        "active_time": "0001-01-01T00:00:00Z",
        "leader_address": "",
        "leader_cluster_address": "",
        "performance_standby": false,
        "performance_standby_last_remote_wal": 0,
    }))
}

async fn liveness() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn readiness(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.broker.policies().list()?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_keys(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    traced("transit.keys.list", &correlation, || {
        if !query.is_list() {
            return Err(AppError::method_not_allowed());
        }
        let keys = state.broker.keys().list()?;
        Ok(Json(VaultResponse::data(
            &correlation.0,
            ListResponse { keys },
        )))
    })
}

async fn create_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
    Path(name): Path<String>,
    request: Option<Json<CreateKeyRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = request.map(|Json(value)| value).unwrap_or_default();
    traced("transit.keys.create", &correlation, || {
        authorization.require(Capability::Create, &format!("transit/keys/{name}"))?;
        let options = KeyOptions {
            key_type: request.key_type.parse::<KeyType>()?,
            derived: request.derived,
            exportable: request.exportable,
            allow_plaintext_backup: request.allow_plaintext_backup,
        };
        let key = state.broker.keys().create(&name, options)?;
        info!(key = %key.name, key_type = %key.key_type.as_str(), "transit key created");
        Ok(Json(VaultResponse::data(
            &correlation.0,
            KeyResponse::from(&key),
        )))
    })
}

async fn read_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    traced("transit.keys.read", &correlation, || {
        let key = state.broker.keys().get(&name)?;
        Ok(Json(VaultResponse::data(
            &correlation.0,
            KeyResponse::from(&key),
        )))
    })
}

async fn delete_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    traced("transit.keys.delete", &correlation, || {
        state.broker.keys().delete(&name)?;
        info!(target: "audit", key = %name, "transit key deleted");
        Ok(StatusCode::NO_CONTENT)
    })
}

async fn configure_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(name): Path<String>,
    Json(request): Json<KeyConfigRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("transit.keys.config", &correlation, || {
        let key = state.broker.keys().configure(&name, request.into())?;
        Ok(Json(VaultResponse::data(
            &correlation.0,
            KeyResponse::from(&key),
        )))
    })
}

async fn rotate_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    traced("transit.keys.rotate", &correlation, || {
        let key = state.broker.keys().rotate(&name)?;
        info!(
            target: "audit",
            key = %key.name,
            latest_version = key.latest_version(),
            accessor = %authorization.token.accessor,
            "transit key rotated"
        );
        Ok(Json(VaultResponse::data(
            &correlation.0,
            KeyResponse::from(&key),
        )))
    })
}

async fn export_key(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    traced("transit.export", &correlation, || {
        let key_type = state.broker.keys().get(&name)?.key_type;
        let keys = state
            .broker
            .keys()
            .export(&name)?
            .into_iter()
            .map(|(version, material)| (version.to_string(), STANDARD.encode(material.as_slice())))
            .collect();
        info!(
            target: "audit",
            key = %name,
            accessor = %authorization.token.accessor,
            "transit key exported"
        );
        Ok(Json(VaultResponse::data(
            &correlation.0,
            ExportResponse {
                name: name.clone(),
                key_type: key_type.as_str().to_string(),
                keys,
            },
        )))
    })
}

async fn encrypt(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(name): Path<String>,
    Json(request): Json<EncryptRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("transit.encrypt", &correlation, || {
        let (plaintext, options) = request.into_parts()?;
        let encrypted = state.broker.keys().encrypt(&name, &plaintext, &options)?;
        Ok(Json(VaultResponse::data(
            &correlation.0,
            EncryptResponse::from(encrypted),
        )))
    })
}

async fn decrypt(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(name): Path<String>,
    Json(request): Json<CiphertextRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("transit.decrypt", &correlation, || {
        let (ciphertext, context) = request.into_parts("decrypt")?;
        let plaintext = state
            .broker
            .keys()
            .decrypt(&name, &ciphertext, context.as_deref())?;
        Ok(Json(VaultResponse::data(
            &correlation.0,
            DecryptResponse {
                plaintext: STANDARD.encode(plaintext),
            },
        )))
    })
}

async fn rewrap(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(name): Path<String>,
    Json(request): Json<CiphertextRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("transit.rewrap", &correlation, || {
        let (ciphertext, context) = request.into_parts("rewrap")?;
        let encrypted = state
            .broker
            .keys()
            .rewrap(&name, &ciphertext, context.as_deref())?;
        Ok(Json(VaultResponse::data(
            &correlation.0,
            EncryptResponse::from(encrypted),
        )))
    })
}

async fn list_policies(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    traced("policy.list", &correlation, || {
        if !query.is_list() {
            return Err(AppError::method_not_allowed());
        }
        let keys = state.broker.policies().list()?;
        Ok(Json(VaultResponse::data(
            &correlation.0,
            ListResponse { keys },
        )))
    })
}

async fn read_policy(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    traced("policy.read", &correlation, || {
        let policy = state.broker.policies().get(&name)?;
        Ok(Json(VaultResponse::data(
            &correlation.0,
            PolicyResponse {
                name: policy.name,
                policy: policy.raw,
            },
        )))
    })
}

async fn write_policy(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
    Path(name): Path<String>,
    Json(request): Json<PolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("policy.write", &correlation, || {
        let policy = state.broker.policies().put(&name, &request.policy)?;
        info!(
            target: "audit",
            policy = %policy.name,
            rules = policy.rules.len(),
            accessor = %authorization.token.accessor,
            "policy written"
        );
        Ok(StatusCode::NO_CONTENT)
    })
}

async fn delete_policy(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    traced("policy.delete", &correlation, || {
        state.broker.policies().delete(&name)?;
        info!(
            target: "audit",
            policy = %name,
            accessor = %authorization.token.accessor,
            "policy deleted"
        );
        Ok(StatusCode::NO_CONTENT)
    })
}

async fn create_token(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
    request: Option<Json<CreateTokenRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = request.map(|Json(value)| value).unwrap_or_default();
    traced("token.create", &correlation, || {
        let (spec, options) = request.into_spec()?;
        let token = state
            .broker
            .create_token(&authorization.token, spec, &options)?;
        info!(
            accessor = %token.accessor,
            parent = %authorization.token.accessor,
            policies = ?token.policies,
            "token created"
        );
        let now = state.broker.tokens().now();
        Ok(Json(AuthResponse::auth(
            &correlation.0,
            AuthBlock::new(&token, now),
        )))
    })
}

fn lookup_response(
    state: &AppState,
    correlation: &CorrelationId,
    reference: TokenRef<'_>,
) -> Result<Json<VaultResponse<TokenLookupResponse>>, AppError> {
    let token = state.broker.tokens().lookup(reference)?;
    let now = state.broker.tokens().now();
    Ok(Json(VaultResponse::data(
        &correlation.0,
        TokenLookupResponse::new(&token, now),
    )))
}

async fn lookup_token(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("token.lookup", &correlation, || {
        lookup_response(&state, &correlation, TokenRef::Id(&request.token))
    })
}

async fn lookup_accessor(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<AccessorRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("token.lookup_accessor", &correlation, || {
        lookup_response(&state, &correlation, TokenRef::Accessor(&request.accessor))
    })
}

async fn lookup_self(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
) -> Result<impl IntoResponse, AppError> {
    traced("token.lookup_self", &correlation, || {
        lookup_response(
            &state,
            &correlation,
            TokenRef::Id(&authorization.token.token_id),
        )
    })
}

fn renew_response(
    state: &AppState,
    correlation: &CorrelationId,
    reference: TokenRef<'_>,
) -> Result<Json<AuthResponse>, AppError> {
    let token = state.broker.tokens().renew(reference)?;
    info!(accessor = %token.accessor, expire_time = token.expire_time, "token renewed");
    let now = state.broker.tokens().now();
    Ok(Json(AuthResponse::auth(
        &correlation.0,
        AuthBlock::new(&token, now),
    )))
}

async fn renew_token(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("token.renew", &correlation, || {
        renew_response(&state, &correlation, TokenRef::Id(&request.token))
    })
}

async fn renew_accessor(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Json(request): Json<AccessorRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("token.renew_accessor", &correlation, || {
        renew_response(&state, &correlation, TokenRef::Accessor(&request.accessor))
    })
}

async fn renew_self(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
) -> Result<impl IntoResponse, AppError> {
    traced("token.renew_self", &correlation, || {
        renew_response(
            &state,
            &correlation,
            TokenRef::Id(&authorization.token.token_id),
        )
    })
}

fn revoke(
    state: &AppState,
    authorization: &Authorization,
    reference: TokenRef<'_>,
) -> Result<StatusCode, AppError> {
    state.broker.tokens().revoke(reference)?;
    info!(
        target: "audit",
        by = %authorization.token.accessor,
        "token revoked"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn revoke_token(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
    Json(request): Json<TokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("token.revoke", &correlation, || {
        revoke(&state, &authorization, TokenRef::Id(&request.token))
    })
}

async fn revoke_accessor(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
    Json(request): Json<AccessorRequest>,
) -> Result<impl IntoResponse, AppError> {
    traced("token.revoke_accessor", &correlation, || {
        revoke(&state, &authorization, TokenRef::Accessor(&request.accessor))
    })
}

async fn revoke_self(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(authorization): Extension<Authorization>,
) -> Result<impl IntoResponse, AppError> {
    traced("token.revoke_self", &correlation, || {
        revoke(
            &state,
            &authorization,
            TokenRef::Id(&authorization.token.token_id),
        )
    })
}
