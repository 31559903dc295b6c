//! Login completion tests: `/auth`, the connector callback and `/token` together.

mod common;

use axum::http::{Method, StatusCode, header};
use axum_test::{TestResponse, TestServer};
use common::{Fixture, ISSUER, REDIRECT_URL, basic_auth, client_secret, fixture};
use federated_oidc::oauth2::id_token::IdTokenClaims;
use federated_oidc::oauth2::login::local_user_id;
use federated_oidc::oauth2::token::TokenResponse;
use federated_oidc::session::{NewSession, SessionState};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use url::Url;

fn location(response: &TestResponse) -> Url {
    let raw = response
        .headers()
        .get(header::LOCATION)
        .expect("location header")
        .to_str()
        .expect("ascii location");
    Url::parse(raw).expect("absolute location")
}

fn query_value(url: &Url, key: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

/// Starts a flow through `/auth` and returns the session handed to the connector.
async fn start_flow(fx: &Fixture, server: &TestServer) -> String {
    let response = server
        .get("/auth")
        .add_query_param("response_type", "code")
        .add_query_param("client_id", "XXX")
        .add_query_param("connector_id", "fake")
        .add_query_param("scope", "openid email")
        .add_query_param("state", "xyz")
        .add_query_param("nonce", "n-1")
        .await;
    assert_eq!(response.status_code(), StatusCode::FOUND);
    fx.connector
        .calls()
        .last()
        .map(|(session_id, _)| session_id.clone())
        .expect("connector saw the session")
}

async fn redeem(server: &TestServer, code: &str) -> TestResponse {
    let (name, value) = basic_auth("XXX", &client_secret());
    server
        .post("/token")
        .add_header(name, value)
        .form(&[("grant_type", "authorization_code"), ("code", code)])
        .await
}

#[tokio::test]
async fn test_full_code_flow() {
    let fx = fixture();
    let server = fx.server();
    let session_id = start_flow(&fx, &server).await;

    let response = server
        .get("/callback/fake")
        .add_query_param("state", &session_id)
        .add_query_param("sub", "remote-1")
        .add_query_param("email", "ada@example.com")
        .add_query_param("name", "Ada")
        .await;
    assert_eq!(response.status_code(), StatusCode::FOUND);
    let back = location(&response);
    assert!(back.as_str().starts_with(&format!("{REDIRECT_URL}?")));
    assert_eq!(query_value(&back, "state").as_deref(), Some("xyz"));
    let code = query_value(&back, "code").expect("code in redirect");

    let session = fx.sessions.get(&session_id).await.unwrap();
    assert_eq!(session.state, SessionState::CodeIssued);
    assert_eq!(session.identity.as_ref().map(|i| i.id.as_str()), Some("remote-1"));

    let response = redeem(&server, &code).await;
    response.assert_status_ok();
    let token: TokenResponse = response.json();

    let jwks: serde_json::Value = server.get("/keys").await.json();
    let jwk = &jwks["keys"][0];
    let decoding = DecodingKey::from_rsa_components(
        jwk["n"].as_str().unwrap().trim_end_matches('='),
        jwk["e"].as_str().unwrap().trim_end_matches('='),
    )
    .unwrap();
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&["XXX"]);
    validation.set_issuer(&[ISSUER]);
    validation.validate_exp = false;
    let claims = jsonwebtoken::decode::<IdTokenClaims>(&token.id_token, &decoding, &validation)
        .expect("token verifies")
        .claims;

    assert_eq!(claims.sub, local_user_id("fake", "remote-1"));
    assert_eq!(claims.nonce.as_deref(), Some("n-1"));
    assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
    assert_eq!(claims.name.as_deref(), Some("Ada"));

    // Single use.
    let replay = redeem(&server, &code).await;
    assert_eq!(replay.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_repeated_callback_revokes_earlier_code() {
    let fx = fixture();
    let server = fx.server();
    let session_id = start_flow(&fx, &server).await;

    let mut codes = Vec::new();
    for _ in 0..2 {
        let response = server
            .get("/callback/fake")
            .add_query_param("state", &session_id)
            .add_query_param("sub", "remote-1")
            .await;
        assert_eq!(response.status_code(), StatusCode::FOUND);
        codes.push(query_value(&location(&response), "code").unwrap());
    }

    assert_eq!(
        redeem(&server, &codes[0]).await.status_code(),
        StatusCode::BAD_REQUEST
    );
    redeem(&server, &codes[1]).await.assert_status_ok();
}

#[tokio::test]
async fn test_denied_login_redirects_with_access_denied() {
    let fx = fixture();
    let server = fx.server();
    let session_id = start_flow(&fx, &server).await;

    let response = server
        .get("/callback/fake")
        .add_query_param("state", &session_id)
        .add_query_param("error", "access_denied")
        .await;
    assert_eq!(response.status_code(), StatusCode::FOUND);
    assert_eq!(
        location(&response).as_str(),
        format!("{REDIRECT_URL}?error=access_denied&state=xyz")
    );
    assert_eq!(
        fx.sessions.get(&session_id).await.unwrap().state,
        SessionState::Created
    );
}

#[tokio::test]
async fn test_callback_errors_without_session_are_direct() {
    let fx = fixture();
    let server = fx.server();
    let session_id = start_flow(&fx, &server).await;

    let cases: [(&str, &[(&str, &str)], &str); 4] = [
        ("/callback/nope", &[("state", "x"), ("sub", "r")], "invalid_request"),
        ("/callback/fake", &[("sub", "r")], "access_denied"),
        ("/callback/fake", &[("state", "unknown"), ("sub", "r")], "invalid_grant"),
        ("/callback/fake", &[("state", "unknown"), ("error", "denied")], "invalid_grant"),
    ];
    for (path, params, want) in cases {
        let mut request = server.get(path);
        for (k, v) in params {
            request = request.add_query_param(k, v);
        }
        let response = request.await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST, "{path} {params:?}");
        assert!(response.headers().get(header::LOCATION).is_none());
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], want, "{path} {params:?}");
    }

    assert_eq!(
        fx.sessions.get(&session_id).await.unwrap().state,
        SessionState::Created
    );
}

#[tokio::test]
async fn test_callback_must_come_from_the_sessions_connector() {
    let fx = fixture();
    let server = fx.server();
    let session_id = fx
        .sessions
        .new_session(NewSession {
            connector_id: "other".into(),
            client_id: "XXX".into(),
            client_state: "xyz".into(),
            redirect_uri: Url::parse(REDIRECT_URL).unwrap(),
            nonce: None,
            register: false,
            scopes: vec!["openid".into()],
        })
        .await
        .unwrap();

    let response = server
        .get("/callback/fake")
        .add_query_param("state", &session_id)
        .add_query_param("sub", "remote-1")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(fx.sessions.get(&session_id).await.unwrap().identity.is_none());
}

#[tokio::test]
async fn test_callback_rejects_other_methods() {
    let fx = fixture();
    let server = fx.server();
    let session_id = start_flow(&fx, &server).await;

    for method in [Method::HEAD, Method::POST, Method::PUT, Method::DELETE] {
        let response = server
            .method(method.clone(), "/callback/fake")
            .add_query_param("state", &session_id)
            .add_query_param("sub", "remote-1")
            .await;
        assert_eq!(
            response.status_code(),
            StatusCode::METHOD_NOT_ALLOWED,
            "{method}"
        );
    }
    assert_eq!(
        fx.sessions.get(&session_id).await.unwrap().state,
        SessionState::Created
    );
}
