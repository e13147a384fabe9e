//! End-to-end lifecycle runs against a wiremock token endpoint.
//!
//! Each test provisions a `.env` store in a temp dir, points the config's
//! token endpoint at the mock server, and checks what the store holds
//! after one or more `Orchestrator::run` calls.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use meli_auth::lifecycle::{reset, status};
use meli_auth::{
    CredentialStore, Error, LifecycleState, OAuthConfig, Orchestrator, Outcome, compute_challenge,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AUTHORIZE: &str = "https://auth.example.test/authorization";

fn config(server: &MockServer) -> OAuthConfig {
    OAuthConfig::new("X", Secret::new("Y".into()), "https://app.example.test/cb")
        .with_token_endpoint(format!("{}/oauth/token", server.uri()))
        .with_authorize_endpoint(AUTHORIZE)
        .with_timeout(Duration::from_secs(5))
}

async fn store_with(dir: &tempfile::TempDir, contents: &str) -> CredentialStore {
    let path = dir.path().join(".env");
    tokio::fs::write(&path, contents).await.unwrap();
    CredentialStore::open(path).await.unwrap()
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

fn token_body(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 21600,
        "scope": "offline_access read write",
        "user_id": 7,
        "refresh_token": refresh
    })
}

#[tokio::test]
async fn empty_state_generates_verifier_then_halts_with_persisted_challenge() {
    let server = MockServer::start().await;
    // No token endpoint traffic may happen before the user authorizes
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, "CLIENT_ID=X\nCLIENT_SECRET=Y\nREDIRECT_URI=Z\n").await;
    let config = config(&server);
    let orchestrator = Orchestrator::new(&config, &store, reqwest::Client::new());

    assert_eq!(
        status(&store, config.refresh_margin).await.unwrap(),
        LifecycleState::AwaitingVerifier
    );

    let first = orchestrator.run().await.unwrap();
    let state = store.load().await.unwrap();
    let verifier = state.code_verifier().expect("verifier persisted").to_owned();
    let challenge = state.code_challenge().expect("challenge persisted").to_owned();
    assert!(verifier.len() >= 43);
    assert_eq!(challenge, compute_challenge(&verifier));
    match &first {
        Outcome::AuthorizationRequired {
            verifier_generated, ..
        } => assert!(*verifier_generated),
        other => panic!("expected AuthorizationRequired, got {other:?}"),
    }

    assert_eq!(
        status(&store, config.refresh_margin).await.unwrap(),
        LifecycleState::AwaitingAuthorization
    );

    let second = orchestrator.run().await.unwrap();
    match second {
        Outcome::AuthorizationRequired {
            url,
            verifier_generated,
        } => {
            assert!(!verifier_generated, "second run must reuse the stored verifier");
            assert!(url.starts_with(AUTHORIZE));
            assert!(url.contains(&format!("code_challenge={challenge}")), "got: {url}");
            assert!(url.contains("code_challenge_method=S256"));
            assert!(url.contains("client_id=X"));
            assert!(url.contains("response_type=code"));
        }
        other => panic!("expected AuthorizationRequired, got {other:?}"),
    }

    // Verifier is stable across runs
    let again = store.load().await.unwrap();
    assert_eq!(again.code_verifier(), Some(verifier.as_str()));
}

#[tokio::test]
async fn authorization_code_is_exchanged_and_tokens_persisted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=ABC"))
        .and(body_string_contains("code_verifier=V"))
        .and(body_string_contains("client_secret=Y"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", "RT1")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_with(
        &dir,
        "CLIENT_ID=X\nCLIENT_SECRET=Y\nREDIRECT_URI=Z\nAUTHORIZATION_CODE=ABC\nCODE_VERIFIER=V\n",
    )
    .await;
    let config = config(&server);
    let orchestrator = Orchestrator::new(&config, &store, reqwest::Client::new());

    let before = now_secs();
    let outcome = orchestrator.run().await.unwrap();
    assert!(outcome.has_tokens());
    match outcome {
        Outcome::Exchanged { expires_at } => {
            let expires_at = expires_at.expect("expires_in was returned");
            assert!(expires_at >= before + 21600);
        }
        other => panic!("expected Exchanged, got {other:?}"),
    }

    let state = store.load().await.unwrap();
    assert_eq!(state.access_token(), Some("AT1"));
    assert_eq!(state.refresh_token(), Some("RT1"));
    assert_eq!(state.authorization_code(), None, "consumed code is cleared");
    assert_eq!(state.client_id(), Some("X"));
    assert_eq!(state.code_verifier(), Some("V"));

    // Fresh token: the next run is a no-op and hits no endpoint
    let next = orchestrator.run().await.unwrap();
    assert!(matches!(next, Outcome::Fresh { .. }), "got {next:?}");
}

#[tokio::test]
async fn refresh_replaces_both_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=RT1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, "REFRESH_TOKEN=RT1\n").await;
    let config = config(&server);
    let orchestrator = Orchestrator::new(&config, &store, reqwest::Client::new());

    let outcome = orchestrator.run().await.unwrap();
    assert!(matches!(outcome, Outcome::Refreshed { .. }), "got {outcome:?}");

    let state = store.load().await.unwrap();
    assert_eq!(state.access_token(), Some("AT2"));
    assert_eq!(state.refresh_token(), Some("RT2"));
    let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
    assert!(!contents.contains("RT1"), "old refresh token must be overwritten: {contents}");
}

#[tokio::test]
async fn rejected_refresh_keeps_previous_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({
                "message": "Error validating grant. Your authorization code or refresh token may be expired or it was already used",
                "error": "invalid_grant",
                "status": 400
            })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let original = "CLIENT_ID=X\nACCESS_TOKEN=AT0\nREFRESH_TOKEN=RT0\n";
    let store = store_with(&dir, original).await;
    let config = config(&server);
    let orchestrator = Orchestrator::new(&config, &store, reqwest::Client::new());

    let err = orchestrator.run().await.unwrap_err();
    match err {
        Error::TokenExchange { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("expected TokenExchange, got {other:?}"),
    }

    let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
    assert_eq!(contents, original, "store must be untouched on failure");
}

#[tokio::test]
async fn rejected_exchange_keeps_code_for_inspection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let original = "CODE_VERIFIER=V\nAUTHORIZATION_CODE=ABC\n";
    let store = store_with(&dir, original).await;
    let config = config(&server);
    let orchestrator = Orchestrator::new(&config, &store, reqwest::Client::new());

    let err = orchestrator.run().await.unwrap_err();
    assert!(err.is_rejection(), "got {err:?}");
    let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
    assert_eq!(contents, original);
}

#[tokio::test]
async fn force_refresh_ignores_fresh_expiry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let expires = now_secs() + 10_000;
    let store = store_with(
        &dir,
        &format!("ACCESS_TOKEN=AT1\nREFRESH_TOKEN=RT1\nTOKEN_EXPIRES_AT={expires}\n"),
    )
    .await;
    let config = config(&server);

    let plain = Orchestrator::new(&config, &store, reqwest::Client::new());
    assert!(matches!(plain.run().await.unwrap(), Outcome::Fresh { .. }));

    let forced = Orchestrator::new(&config, &store, reqwest::Client::new()).force_refresh(true);
    assert!(matches!(forced.run().await.unwrap(), Outcome::Refreshed { .. }));
    assert_eq!(store.load().await.unwrap().access_token(), Some("AT2"));
}

#[tokio::test]
async fn pasted_redirect_url_feeds_the_exchange() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("code=TG-pasted"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", "RT1")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, "CLIENT_ID=X\n").await;
    let config = config(&server);
    let orchestrator = Orchestrator::new(&config, &store, reqwest::Client::new());

    // Pasting before any verifier exists is refused
    let early = orchestrator
        .accept_authorization_code("TG-pasted")
        .await
        .unwrap_err();
    assert!(matches!(early, Error::MissingConfig(_)), "got {early:?}");

    orchestrator.run().await.unwrap();
    let outcome = orchestrator
        .accept_authorization_code("https://app.example.test/cb?code=TG-pasted&state=s")
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Exchanged { .. }), "got {outcome:?}");

    let state = store.load().await.unwrap();
    assert_eq!(state.access_token(), Some("AT1"));
    assert_eq!(state.refresh_token(), Some("RT1"));
    assert_eq!(state.authorization_code(), None);
    assert_eq!(
        status(&store, config.refresh_margin).await.unwrap(),
        LifecycleState::Ready
    );
}

#[tokio::test]
async fn rejected_pasted_code_keeps_working_tokens() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("code=TG-typo"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let original = "CODE_VERIFIER=V\nACCESS_TOKEN=AT0\nREFRESH_TOKEN=RT0\n";
    let store = store_with(&dir, original).await;
    let config = config(&server);
    let orchestrator = Orchestrator::new(&config, &store, reqwest::Client::new());

    let err = orchestrator
        .accept_authorization_code("TG-typo")
        .await
        .unwrap_err();
    assert!(err.is_rejection(), "got {err:?}");

    let state = store.load().await.unwrap();
    assert_eq!(state.access_token(), Some("AT0"));
    assert_eq!(state.refresh_token(), Some("RT0"));
    let contents = tokio::fs::read_to_string(store.path()).await.unwrap();
    assert_eq!(contents, original, "store must be untouched on failure");
}

#[tokio::test]
async fn pasted_code_replaces_existing_token_pair() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=TG-new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT9", "RT9")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = store_with(
        &dir,
        "CODE_VERIFIER=V\nAUTHORIZATION_CODE=TG-old\nACCESS_TOKEN=AT0\nREFRESH_TOKEN=RT0\n",
    )
    .await;
    let config = config(&server);
    let orchestrator = Orchestrator::new(&config, &store, reqwest::Client::new());

    orchestrator.accept_authorization_code("TG-new").await.unwrap();

    let state = store.load().await.unwrap();
    assert_eq!(state.access_token(), Some("AT9"));
    assert_eq!(state.refresh_token(), Some("RT9"));
    assert_eq!(state.authorization_code(), None, "stale code is cleared");
}

#[tokio::test]
async fn reset_restarts_authorization_and_keeps_identity() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(
        &dir,
        "CLIENT_ID=X\nSELLER_ID=42\nCODE_VERIFIER=V\nCODE_CHALLENGE=C\nACCESS_TOKEN=AT\nREFRESH_TOKEN=RT\n",
    )
    .await;

    reset(&store).await.unwrap();

    let state = store.load().await.unwrap();
    assert_eq!(state.client_id(), Some("X"));
    assert_eq!(state.get("SELLER_ID"), Some("42"));
    assert_eq!(state.code_verifier(), None);
    assert_eq!(state.refresh_token(), None);
    assert_eq!(
        status(&store, Duration::from_secs(300)).await.unwrap(),
        LifecycleState::AwaitingVerifier
    );

    // Idempotent
    let before = tokio::fs::read_to_string(store.path()).await.unwrap();
    reset(&store).await.unwrap();
    assert_eq!(before, tokio::fs::read_to_string(store.path()).await.unwrap());
}

#[tokio::test]
async fn stale_challenge_is_rewritten_from_verifier() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, "CODE_VERIFIER=V\nCODE_CHALLENGE=wrong\n").await;
    let config = config(&server);
    let orchestrator = Orchestrator::new(&config, &store, reqwest::Client::new());

    let outcome = orchestrator.run().await.unwrap();
    let expected = compute_challenge("V");
    match outcome {
        Outcome::AuthorizationRequired { url, .. } => {
            assert!(url.contains(&format!("code_challenge={expected}")));
        }
        other => panic!("expected AuthorizationRequired, got {other:?}"),
    }
    assert_eq!(
        store.load().await.unwrap().code_challenge(),
        Some(expected.as_str())
    );
}

#[tokio::test]
async fn status_and_reset_work_without_client_identity() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_with(&dir, "CODE_VERIFIER=V\nREFRESH_TOKEN=RT\n").await;

    assert_eq!(
        status(&store, Duration::from_secs(300)).await.unwrap(),
        LifecycleState::AwaitingRefresh
    );
    reset(&store).await.unwrap();
    assert_eq!(
        status(&store, Duration::from_secs(300)).await.unwrap(),
        LifecycleState::AwaitingVerifier
    );
}
