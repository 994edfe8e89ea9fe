// End-to-end browser login against a mocked cloud and a scripted browser

mod common;

use async_trait::async_trait;
use common::{IdleBrowser, Workspace};
use mockito::{Matcher, Server};
use rcc_auth::flow::BrowserLauncher;
use rcc_auth::AuthError;
use reqwest::Url;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Plays the user: follows the authorize URL straight to the loopback
/// redirect with a canned code.
struct ApprovingBrowser {
    code: &'static str,
    forged_state: Option<&'static str>,
    opened: Mutex<Option<String>>,
}

impl ApprovingBrowser {
    fn new(code: &'static str) -> Self {
        Self {
            code,
            forged_state: None,
            opened: Mutex::new(None),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ApprovingBrowser {
    async fn open(&self, url: &str) -> Result<(), AuthError> {
        *self.opened.lock().unwrap() = Some(url.to_string());

        let params = query(url);
        let redirect = params["redirect_uri"].replace("localhost", "127.0.0.1");
        let state = self
            .forged_state
            .map(str::to_string)
            .unwrap_or_else(|| params["state"].clone());
        let target = format!(
            "{}?code={}&state={}",
            redirect,
            urlencoding::encode(self.code),
            urlencoding::encode(&state)
        );

        tokio::spawn(async move {
            let _ = reqwest::get(target).await;
        });
        Ok(())
    }
}

struct BrokenBrowser;

#[async_trait]
impl BrowserLauncher for BrokenBrowser {
    async fn open(&self, _url: &str) -> Result<(), AuthError> {
        Err(AuthError::Browser(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no display",
        )))
    }
}

fn query(url: &str) -> HashMap<String, String> {
    Url::parse(url)
        .unwrap()
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

fn callback_port(authorize_url: &str) -> u16 {
    Url::parse(&query(authorize_url)["redirect_uri"])
        .unwrap()
        .port()
        .unwrap()
}

async fn token_endpoint(cloud: &mut Server, hits: usize) -> mockito::Mock {
    cloud
        .mock("POST", "/api/oauth/token")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
            Matcher::UrlEncoded("code".into(), "one-time-code".into()),
            Matcher::UrlEncoded("client_id".into(), "test-client".into()),
            Matcher::Regex("code_verifier=[0-9a-f-]{72}".into()),
            Matcher::Regex("redirect_uri=http%3A%2F%2Flocalhost%3A[0-9]+%2Fcallback".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"login-access","expires_in":3600,"scope":"offline_access","refresh_token":"login-refresh","token_type":"Bearer"}"#,
        )
        .expect(hits)
        .create_async()
        .await
}

#[tokio::test]
async fn test_login_persists_record() {
    let mut cloud = Server::new_async().await;
    let mock = token_endpoint(&mut cloud, 1).await;

    let ws = Workspace::new();
    let browser = Arc::new(ApprovingBrowser::new("one-time-code"));
    let auth = ws.auth(&cloud.url(), browser.clone());

    assert!(!auth.has_token().await.unwrap());
    let token = auth.execute_auth_flow().await.unwrap();

    assert_eq!(token, "login-access");
    mock.assert_async().await;

    // Persisted before the flow returned
    let record = ws.store().auth_record().unwrap();
    assert_eq!(record.token.refresh_token, "login-refresh");
    assert!(!record.is_expired());
    assert!(auth.has_token().await.unwrap());
    assert_eq!(auth.get_token().await.unwrap(), "login-access");

    let opened = browser.opened.lock().unwrap().clone().unwrap();
    let params = query(&opened);
    assert!(opened.starts_with(&format!("{}/authorize?", cloud.url())));
    assert_eq!(params["client_id"], "test-client");
    assert_eq!(params["response_type"], "code");
    assert_eq!(params["code_challenge_method"], "S256");
    assert_eq!(params["code_challenge"].len(), 43);
    assert!(!params["code_challenge"].contains('='));

    // Listener is gone once the flow returns
    let port = callback_port(&opened);
    std::net::TcpListener::bind(("127.0.0.1", port)).unwrap();
}

#[tokio::test]
async fn test_login_rejects_forged_state() {
    let mut cloud = Server::new_async().await;
    let mock = token_endpoint(&mut cloud, 0).await;

    let ws = Workspace::new();
    let browser = Arc::new(ApprovingBrowser {
        forged_state: Some("attacker"),
        ..ApprovingBrowser::new("one-time-code")
    });
    let auth = ws.auth(&cloud.url(), browser);

    let err = auth.execute_auth_flow().await.unwrap_err();
    assert!(matches!(err, AuthError::StateMismatch));
    mock.assert_async().await;
    assert!(!auth.has_token().await.unwrap());
}

#[tokio::test]
async fn test_browser_failure_aborts_login() {
    let ws = Workspace::new();
    let auth = ws.auth("http://127.0.0.1:9", Arc::new(BrokenBrowser));

    let err = auth.execute_auth_flow().await.unwrap_err();
    assert!(matches!(err, AuthError::Browser(_)));
    assert!(!auth.has_token().await.unwrap());
}

#[tokio::test]
async fn test_login_times_out_and_releases_port() {
    let ws = Workspace::new();
    let mut config = ws.config("http://127.0.0.1:9");
    config.callback_timeout_seconds = 1;
    let browser = Arc::new(IdleBrowser::new());
    let auth = rcc_auth::CloudAuth::with_collaborators(
        config,
        Arc::new(common::FixedProbe(common::host())),
        browser.clone(),
    );

    let err = auth.execute_auth_flow().await.unwrap_err();
    assert!(matches!(err, AuthError::CallbackTimeout(1)));

    let opened = browser.opened.lock().unwrap()[0].clone();
    std::net::TcpListener::bind(("127.0.0.1", callback_port(&opened))).unwrap();
}

#[tokio::test]
async fn test_second_login_while_pending_is_refused() {
    let ws = Workspace::new();
    let mut config = ws.config("http://127.0.0.1:9");
    config.callback_timeout_seconds = 1;
    let auth = rcc_auth::CloudAuth::with_collaborators(
        config,
        Arc::new(common::FixedProbe(common::host())),
        Arc::new(IdleBrowser::new()),
    );

    let (first, second) = tokio::join!(auth.execute_auth_flow(), auth.execute_auth_flow());
    let outcomes = [first.unwrap_err(), second.unwrap_err()];

    assert_eq!(
        outcomes
            .iter()
            .filter(|e| matches!(e, AuthError::FlowInProgress))
            .count(),
        1
    );
    assert_eq!(
        outcomes
            .iter()
            .filter(|e| matches!(e, AuthError::CallbackTimeout(_)))
            .count(),
        1
    );

    // The guard is released once the first flow finishes
    let again = auth.execute_auth_flow().await.unwrap_err();
    assert!(matches!(again, AuthError::CallbackTimeout(_)));
}
