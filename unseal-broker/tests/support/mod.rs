use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use serde_json::Value;
use tower::ServiceExt;
use unseal_broker::{AppState, BrokerConfig};

pub const ROOT_TOKEN: &str = "root-for-tests";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        let config = BrokerConfig {
            root_token: Some(ROOT_TOKEN.into()),
            ..Default::default()
        };
        let state = unseal_broker::build_state(&config).expect("state");
        let router = unseal_broker::http::router(state.clone());
        Self { router, state }
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("x-vault-token", token);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    /// Sends the request and returns the status with the parsed body
    /// (`Value::Null` when empty).
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.send(method, uri, token, body).await;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                panic!("non-json body ({err}): {}", String::from_utf8_lossy(&bytes))
            })
        };
        (status, json)
    }

    pub async fn root(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.call(method, uri, Some(ROOT_TOKEN), body).await
    }

    /// Stores `source` as policy `name` and mints a token holding it.
    pub async fn token_with_policy(&self, name: &str, source: &str) -> String {
        let (status, body) = self
            .root(
                "PUT",
                &format!("/v1/sys/policies/acl/{name}"),
                Some(serde_json::json!({ "policy": source })),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT, "{body}");

        let (status, body) = self
            .root(
                "POST",
                "/v1/auth/token/create",
                Some(serde_json::json!({ "policies": [name], "ttl": "1h" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["auth"]["client_token"]
            .as_str()
            .expect("client token")
            .to_string()
    }
}
