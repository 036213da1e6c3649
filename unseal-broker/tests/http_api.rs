use axum::http::StatusCode;
#[path = "support/mod.rs"]
mod support;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use support::{ROOT_TOKEN, TestApp};

#[tokio::test]
async fn probes_need_no_token() {
    let app = TestApp::new();

    let (status, body) = app.call("GET", "/v1/sys/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sealed"], false);

    let (status, _) = app.call("GET", "/v1/liveness", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.call("GET", "/v1/readiness", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = app.call("GET", "/v1/sys/seal-status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sealed"], false);
    assert_eq!(body["initialized"], true);
    assert_eq!(body["type"], "shamir");

    let (status, body) = app.call("GET", "/v1/sys/leader", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ha_enabled"], false);
    assert_eq!(body["is_self"], true);
}

#[tokio::test]
async fn missing_or_unknown_tokens_are_denied() {
    let app = TestApp::new();

    for token in [None, Some("hvs.unknown")] {
        let (status, body) = app.call("GET", "/v1/transit/keys?list=true", token, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["errors"][0], "permission denied");
        assert!(body["correlation_id"].is_string());
    }
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let app = TestApp::new();
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/v1/auth/token/lookup-self")
        .header("authorization", format!("Bearer {ROOT_TOKEN}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn correlation_id_is_echoed() {
    let app = TestApp::new();
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/v1/transit/keys/missing")
        .header("x-vault-token", ROOT_TOKEN)
        .header("x-correlation-id", "trace-42")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app.router.clone(), request)
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["x-correlation-id"], "trace-42");
}

#[tokio::test]
async fn transit_round_trip_rotation_and_rewrap() {
    let app = TestApp::new();

    let (status, body) = app.root("POST", "/v1/transit/keys/orders", None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["type"], "aes256-gcm96");
    assert_eq!(body["data"]["latest_version"], 1);

    let plaintext = STANDARD.encode("hello");
    let (status, body) = app
        .root(
            "POST",
            "/v1/transit/encrypt/orders",
            Some(json!({ "plaintext": plaintext })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let ciphertext = body["data"]["ciphertext"].as_str().unwrap().to_string();
    assert!(ciphertext.starts_with("vault:v1:"));
    assert_eq!(body["data"]["key_version"], 1);

    let (status, body) = app
        .root(
            "POST",
            "/v1/transit/decrypt/orders",
            Some(json!({ "ciphertext": ciphertext })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["plaintext"], plaintext);

    let (status, body) = app.root("POST", "/v1/transit/keys/orders/rotate", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["latest_version"], 2);

    let (status, body) = app
        .root(
            "POST",
            "/v1/transit/rewrap/orders",
            Some(json!({ "ciphertext": ciphertext })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["ciphertext"].as_str().unwrap().starts_with("vault:v2:"));

    let (status, _) = app
        .root(
            "POST",
            "/v1/transit/keys/orders/config",
            Some(json!({ "min_decryption_version": 2, "min_encryption_version": 2 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .root(
            "POST",
            "/v1/transit/decrypt/orders",
            Some(json!({ "ciphertext": ciphertext })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let (status, body) = app.root("GET", "/v1/transit/keys?list=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["keys"], json!(["orders"]));
}

#[tokio::test]
async fn transit_rejects_bad_input() {
    let app = TestApp::new();
    app.root("POST", "/v1/transit/keys/orders", None).await;

    let (status, body) = app
        .root("POST", "/v1/transit/encrypt/orders", Some(json!({ "plaintext": "" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0], "missing plaintext to encrypt");

    let (status, _) = app
        .root("POST", "/v1/transit/decrypt/orders", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .root(
            "POST",
            "/v1/transit/decrypt/orders",
            Some(json!({ "ciphertext": "vault:v1:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "tag mismatch");

    let (status, _) = app
        .root("POST", "/v1/transit/keys/orders", None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .root("POST", "/v1/transit/keys/bad", Some(json!({ "type": "rsa-4096" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .root("POST", "/v1/transit/encrypt/missing", Some(json!({ "plaintext": "eA==" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.root("GET", "/v1/transit/keys", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn key_deletion_and_export_are_gated_by_flags() {
    let app = TestApp::new();
    app.root("POST", "/v1/transit/keys/orders", None).await;

    let (status, _) = app.root("DELETE", "/v1/transit/keys/orders", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .root("GET", "/v1/transit/export/encryption-key/orders", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .root(
            "POST",
            "/v1/transit/keys/orders/config",
            Some(json!({ "deletion_allowed": true, "exportable": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .root("GET", "/v1/transit/export/encryption-key/orders", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let material = STANDARD
        .decode(body["data"]["keys"]["1"].as_str().unwrap())
        .unwrap();
    assert_eq!(material.len(), 32);

    let (status, _) = app.root("DELETE", "/v1/transit/keys/orders", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.root("GET", "/v1/transit/keys/orders", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn policies_scope_what_a_token_can_do() {
    let app = TestApp::new();
    app.root("POST", "/v1/transit/keys/orders", None).await;
    let token = app
        .token_with_policy(
            "orders-app",
            r#"
            path "transit/encrypt/orders" { capabilities = ["update"] }
            path "transit/keys/*" { capabilities = ["read"] }
            "#,
        )
        .await;

    let (status, body) = app
        .call(
            "POST",
            "/v1/transit/encrypt/orders",
            Some(&token),
            Some(json!({ "plaintext": "aGk=" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = app
        .call("GET", "/v1/transit/keys/orders", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    for (method, uri) in [
        ("POST", "/v1/transit/decrypt/orders"),
        ("POST", "/v1/transit/keys/orders/rotate"),
        ("DELETE", "/v1/transit/keys/orders"),
        ("GET", "/v1/sys/policies/acl?list=true"),
    ] {
        let (status, body) = app
            .call(method, uri, Some(&token), Some(json!({ "ciphertext": "x" })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
        assert_eq!(body["errors"][0], "permission denied");
    }

    let (status, body) = app
        .call("GET", "/v1/auth/token/lookup-self", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["policies"], json!(["orders-app", "default"]));
}

#[tokio::test]
async fn escaped_paths_are_authorized_as_decoded() {
    let app = TestApp::new();
    app.root("POST", "/v1/transit/keys/orders", None).await;
    let (_, body) = app
        .root(
            "POST",
            "/v1/transit/encrypt/orders",
            Some(json!({ "plaintext": "aGVsbG8=" })),
        )
        .await;
    let ciphertext = body["data"]["ciphertext"].as_str().unwrap().to_string();
    let token = app
        .token_with_policy(
            "no-orders",
            r#"
            path "transit/decrypt/orders" { capabilities = ["deny"] }
            path "transit/decrypt/*" { capabilities = ["update"] }
            "#,
        )
        .await;

    for uri in [
        "/v1/transit/decrypt/orders",
        "/v1/transit/decrypt/%6Frders",
        "/v1/transit/decrypt/%6f%72%64%65%72%73",
    ] {
        let (status, body) = app
            .call("POST", uri, Some(&token), Some(json!({ "ciphertext": ciphertext })))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}: {body}");
    }

    let (status, body) = app
        .root(
            "POST",
            "/v1/transit/decrypt/%6Frders",
            Some(json!({ "ciphertext": ciphertext })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["plaintext"], "aGVsbG8=");

    let (status, _) = app
        .call("GET", "/v1/transit/keys/%FF", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn key_creation_needs_the_create_capability() {
    let app = TestApp::new();
    let token = app
        .token_with_policy(
            "key-updater",
            r#"path "transit/keys/*" { capabilities = ["update"] }"#,
        )
        .await;

    let (status, body) = app
        .call("POST", "/v1/transit/keys/fresh", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
}

#[tokio::test]
async fn policy_crud_and_live_edits() {
    let app = TestApp::new();
    let token = app
        .token_with_policy("reader", r#"path "secret/*" { capabilities = ["read"] }"#)
        .await;

    let (status, body) = app.root("GET", "/v1/sys/policies/acl/reader", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["policy"].as_str().unwrap().contains("secret/*"));

    let (status, body) = app
        .root(
            "PUT",
            "/v1/sys/policies/acl/broken",
            Some(json!({ "policy": r#"path "secret/*" { capabilities = ["reed"] }"# })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"][0].as_str().unwrap().contains("invalid capability"));

    let (status, body) = app.root("GET", "/v1/sys/policies/acl?list=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["keys"], json!(["default", "reader", "root"]));

    let (status, _) = app.root("DELETE", "/v1/sys/policies/acl/root", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call("GET", "/v1/auth/token/lookup-self", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.root("DELETE", "/v1/sys/policies/acl/reader", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app.root("GET", "/v1/sys/policies/acl/reader", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn token_lifecycle_over_http() {
    let app = TestApp::new();

    let (status, body) = app
        .root(
            "POST",
            "/v1/auth/token/create",
            Some(json!({ "policies": ["default"], "period": "1h", "display_name": "ci" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let auth = &body["auth"];
    let client_token = auth["client_token"].as_str().unwrap().to_string();
    let accessor = auth["accessor"].as_str().unwrap().to_string();
    assert!(client_token.starts_with("hvs."));
    let lease = auth["lease_duration"].as_i64().unwrap();
    assert!((3599..=3600).contains(&lease), "{lease}");
    assert_eq!(auth["renewable"], true);

    let (status, body) = app
        .root(
            "POST",
            "/v1/auth/token/lookup-accessor",
            Some(json!({ "accessor": accessor })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], "");
    assert_eq!(body["data"]["display_name"], "token-ci");
    assert_eq!(body["data"]["period"], 3600);
    assert!(body["data"]["expire_time"].is_string());

    let (status, body) = app
        .root(
            "POST",
            "/v1/auth/token/lookup",
            Some(json!({ "token": client_token })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], client_token.as_str());

    let (status, body) = app
        .call("POST", "/v1/auth/token/renew-self", Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["auth"]["accessor"], accessor.as_str());

    let (status, _) = app
        .call("POST", "/v1/auth/token/revoke-self", Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .call("GET", "/v1/auth/token/lookup-self", Some(&client_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .root(
            "POST",
            "/v1/auth/token/revoke-accessor",
            Some(json!({ "accessor": accessor })),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT, "revoking twice succeeds");
}

#[tokio::test]
async fn token_create_validates_and_prevents_escalation() {
    let app = TestApp::new();

    let (status, _) = app
        .root("POST", "/v1/auth/token/create", Some(json!({ "policies": ["default"] })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "ttl or period required");

    for ttl in [json!(i64::MAX), json!(format!("{}s", i64::MAX))] {
        let (status, body) = app
            .root(
                "POST",
                "/v1/auth/token/create",
                Some(json!({ "policies": ["default"], "ttl": ttl })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{ttl}: {body}");
    }

    let (status, _) = app
        .root(
            "POST",
            "/v1/auth/token/create",
            Some(json!({ "policies": ["missing"], "ttl": 60 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let token = app
        .token_with_policy(
            "minter",
            r#"path "auth/token/create" { capabilities = ["update"] }"#,
        )
        .await;
    let (status, _) = app
        .call(
            "POST",
            "/v1/auth/token/create",
            Some(&token),
            Some(json!({ "policies": ["root"], "ttl": 60 })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(
            "POST",
            "/v1/auth/token/create",
            Some(&token),
            Some(json!({ "ttl": "10m", "type": "batch" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["auth"]["client_token"].as_str().unwrap().starts_with("hvb."));
    assert_eq!(body["auth"]["policies"], json!(["minter", "default"]));
}

#[tokio::test]
async fn derived_keys_need_a_context() {
    let app = TestApp::new();
    app.state
        .broker
        .keys()
        .create(
            "tenant-data",
            unseal_core::KeyOptions {
                derived: true,
                ..Default::default()
            },
        )
        .expect("key");

    let (status, body) = app
        .root(
            "POST",
            "/v1/transit/encrypt/tenant-data",
            Some(json!({ "plaintext": "aGk=" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["errors"][0].as_str().unwrap().contains("context"));

    let context = STANDARD.encode("tenant-1");
    let (status, body) = app
        .root(
            "POST",
            "/v1/transit/encrypt/tenant-data",
            Some(json!({ "plaintext": "aGk=", "context": context })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let ciphertext = body["data"]["ciphertext"].clone();

    let (status, _) = app
        .root(
            "POST",
            "/v1/transit/decrypt/tenant-data",
            Some(json!({ "ciphertext": ciphertext, "context": STANDARD.encode("tenant-2") })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "wrong context fails authentication");

    let (status, body) = app
        .root(
            "POST",
            "/v1/transit/decrypt/tenant-data",
            Some(json!({ "ciphertext": ciphertext, "context": context })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["plaintext"], "aGk=");
}
