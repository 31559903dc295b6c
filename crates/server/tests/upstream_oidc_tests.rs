//! Upstream OpenID Connect code exchange against a mock provider.

use federated_oidc::connector::{
    Connector, ConnectorError, UpstreamOidcConfig, UpstreamOidcConnector,
};
use jsonwebtoken::{EncodingKey, Header};
use std::collections::HashMap;
use url::Url;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> UpstreamOidcConfig {
    UpstreamOidcConfig {
        id: "upstream".into(),
        authorization_endpoint: Url::parse(&format!("{}/authorize", server.uri())).unwrap(),
        token_endpoint: Url::parse(&format!("{}/token", server.uri())).unwrap(),
        client_id: "federated".into(),
        client_secret: "upstream-secret".into(),
        redirect_uri: Url::parse("http://server.example.com/callback/upstream").unwrap(),
        issuer: Some("https://idp.example.com".into()),
        scopes: vec!["openid".into(), "email".into()],
        trusted_email_provider: false,
    }
}

fn id_token(claims: serde_json::Value) -> String {
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"upstream-signing-secret"),
    )
    .unwrap()
}

fn valid_claims() -> serde_json::Value {
    let exp = time::OffsetDateTime::now_utc().unix_timestamp() + 600;
    serde_json::json!({
        "iss": "https://idp.example.com",
        "sub": "248289761001",
        "aud": "federated",
        "exp": exp,
        "email": "jane@example.com",
        "name": "Jane Doe",
    })
}

fn callback(code: &str) -> HashMap<String, String> {
    HashMap::from([
        ("state".to_string(), "sess-1".to_string()),
        ("code".to_string(), code.to_string()),
    ])
}

async fn mount_token(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=upstream-code"))
        .and(body_string_contains("client_secret=upstream-secret"))
        .and(body_string_contains(
            "redirect_uri=http%3A%2F%2Fserver.example.com%2Fcallback%2Fupstream",
        ))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_code_exchange_yields_identity() {
    let server = MockServer::start().await;
    mount_token(
        &server,
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at",
            "token_type": "Bearer",
            "id_token": id_token(valid_claims()),
        })),
    )
    .await;

    let connector = UpstreamOidcConnector::new(config(&server)).unwrap();
    let login = connector
        .handle_callback(&callback("upstream-code"))
        .await
        .expect("exchange succeeds");

    assert_eq!(login.session_id, "sess-1");
    assert_eq!(login.identity.id, "248289761001");
    assert_eq!(login.identity.email.as_deref(), Some("jane@example.com"));
    assert_eq!(login.identity.name.as_deref(), Some("Jane Doe"));
}

#[tokio::test]
async fn test_token_endpoint_failure_is_reported() {
    let server = MockServer::start().await;
    mount_token(
        &server,
        ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "invalid_grant"})),
    )
    .await;

    let connector = UpstreamOidcConnector::new(config(&server)).unwrap();
    let result = connector.handle_callback(&callback("upstream-code")).await;
    assert!(
        matches!(&result, Err(ConnectorError::Upstream(msg)) if msg.contains("400")),
        "{result:?}"
    );
}

#[tokio::test]
async fn test_id_token_claims_are_checked() {
    let mut wrong_audience = valid_claims();
    wrong_audience["aud"] = "someone-else".into();
    let mut wrong_issuer = valid_claims();
    wrong_issuer["iss"] = "https://evil.example.com".into();
    let mut expired = valid_claims();
    expired["exp"] = (time::OffsetDateTime::now_utc().unix_timestamp() - 3600).into();

    for claims in [wrong_audience, wrong_issuer, expired] {
        let server = MockServer::start().await;
        mount_token(
            &server,
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at",
                "token_type": "Bearer",
                "id_token": id_token(claims.clone()),
            })),
        )
        .await;

        let connector = UpstreamOidcConnector::new(config(&server)).unwrap();
        let result = connector.handle_callback(&callback("upstream-code")).await;
        assert!(
            matches!(result, Err(ConnectorError::Upstream(_))),
            "{claims}"
        );
    }
}

#[tokio::test]
async fn test_response_without_id_token_is_rejected() {
    let server = MockServer::start().await;
    mount_token(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({"access_token": "at", "token_type": "Bearer"})),
    )
    .await;

    let connector = UpstreamOidcConnector::new(config(&server)).unwrap();
    assert!(matches!(
        connector.handle_callback(&callback("upstream-code")).await,
        Err(ConnectorError::Upstream(_))
    ));
}
