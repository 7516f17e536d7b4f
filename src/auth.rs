//! OAuth 2.0 credentials for the YouTube Data API.
//!
//! A token is loaded from the token file when possible, refreshed silently
//! when it has expired and carries a refresh token, and otherwise obtained
//! through the browser consent flow with a loopback redirect on a fixed port.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::time::Duration;

use crate::models::Config;
use crate::paths::AppPaths;
use crate::store;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, TimeDelta, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, HttpRequest, HttpResponse,
    PkceCodeChallenge, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use ureq::Agent;
use url::Url;

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

pub const SCOPES: [&str; 4] = [
    "https://www.googleapis.com/auth/youtube.upload",
    "https://www.googleapis.com/auth/youtube.readonly",
    "https://www.googleapis.com/auth/youtube",
    "https://www.googleapis.com/auth/youtubepartner",
];

/// How long an accepted loopback connection may take to send its request line.
const REDIRECT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Tokens this close to expiry are treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 60;

const OAUTH_DONE_HTML: &str = "<html><body><h2>Signed in.</h2>\
    <p>You can close this tab and return to the terminal.</p></body></html>";
const OAUTH_FAILED_HTML: &str = "<html><body><h2>Sign-in failed.</h2>\
    <p>Check the terminal for details.</p></body></html>";

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

/// OAuth client registration as downloaded from the Google Cloud console.
#[derive(Deserialize, Debug, Clone)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub auth_uri: Option<String>,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ClientSecrets {
    fn auth_uri(&self) -> String {
        self.auth_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_AUTH_URI.to_string())
    }

    fn token_uri(&self) -> String {
        self.token_uri
            .clone()
            .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string())
    }
}

pub fn load_client_secrets(path: &Path) -> Result<ClientSecrets> {
    let data = fs::read_to_string(path).with_context(|| {
        format!(
            "client secrets not found at {}. Download an OAuth client (Desktop app) \
             from the Google Cloud console and save it there.",
            path.display()
        )
    })?;

    let file: ClientSecretsFile = serde_json::from_str(&data)
        .with_context(|| format!("{} is not a valid client secrets file", path.display()))?;

    file.installed
        .or(file.web)
        .with_context(|| format!("{} has neither an 'installed' nor a 'web' section", path.display()))
}

/// What is persisted in the token file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl StoredToken {
    /// Builds the record from a token endpoint response. Refresh responses
    /// usually omit the refresh token, so the previous one is carried over.
    fn from_response(
        response: &BasicTokenResponse,
        previous_refresh: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = response
            .expires_in()
            .and_then(|d| TimeDelta::from_std(d).ok())
            .map(|d| now + d);

        let scopes = response
            .scopes()
            .map(|s| s.iter().map(|s| s.as_str().to_string()).collect())
            .unwrap_or_else(|| SCOPES.iter().map(|s| s.to_string()).collect());

        Self {
            access_token: response.access_token().secret().clone(),
            refresh_token: response
                .refresh_token()
                .map(|t| t.secret().clone())
                .or(previous_refresh),
            expires_at,
            scopes,
        }
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty()
            && self
                .expires_at
                .is_some_and(|expires| expires - now > TimeDelta::seconds(EXPIRY_MARGIN_SECS))
    }
}

/// A usable access token.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: String,
}

#[derive(Debug, PartialEq, Eq)]
enum NextStep {
    UseStored,
    Refresh,
    Consent,
}

fn next_step(token: Option<&StoredToken>, now: DateTime<Utc>) -> NextStep {
    match token {
        Some(t) if t.is_valid_at(now) => NextStep::UseStored,
        Some(t) if t.refresh_token.as_deref().is_some_and(|r| !r.is_empty()) => NextStep::Refresh,
        _ => NextStep::Consent,
    }
}

/// Loads the token file. A file that does not parse is deleted and treated as absent.
fn load_stored_token(path: &Path) -> Option<StoredToken> {
    let data = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&data) {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::warn!(path = %path.display(), "discarding unreadable token file: {e}");
            let _ = fs::remove_file(path);
            None
        }
    }
}

fn save_token(path: &Path, token: &StoredToken) -> Result<()> {
    let data = serde_json::to_string_pretty(token)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("failed to write token file {}", path.display()))?;
    file.write_all(data.as_bytes())?;
    Ok(())
}

fn discard_token(path: &Path) {
    if path.exists() && fs::remove_file(path).is_err() {
        tracing::warn!(path = %path.display(), "could not remove stale token file");
    }
}

/// Returns a valid access token, refreshing or asking for consent as needed.
/// The (possibly renewed) token is written back to the token file.
pub fn get_credentials(paths: &AppPaths, cfg: &Config) -> Result<Credentials> {
    store::with_auth_lock(paths, || {
        let stored = load_stored_token(&paths.token_file);

        let token = match next_step(stored.as_ref(), Utc::now()) {
            NextStep::UseStored => {
                let token = stored.context("stored token vanished")?;
                tracing::debug!("using stored access token");
                return Ok(Credentials {
                    access_token: token.access_token,
                });
            }
            NextStep::Refresh => {
                let token = stored.context("stored token vanished")?;
                let secrets =
                    load_client_secrets(&cfg.effective_client_secrets(&paths.client_secret_file))?;
                match refresh(&secrets, &token) {
                    Ok(renewed) => renewed,
                    Err(e) => {
                        discard_token(&paths.token_file);
                        return Err(e.context(
                            "failed to refresh the access token; the stored token was removed, \
                             run the command again to sign in",
                        ));
                    }
                }
            }
            NextStep::Consent => {
                let secrets =
                    load_client_secrets(&cfg.effective_client_secrets(&paths.client_secret_file))?;
                match consent(&secrets, cfg.oauth_port) {
                    Ok(token) => token,
                    Err(e) => {
                        discard_token(&paths.token_file);
                        return Err(e.context("sign-in did not complete"));
                    }
                }
            }
        };

        save_token(&paths.token_file, &token)?;
        Ok(Credentials {
            access_token: token.access_token,
        })
    })
}

/// Synchronous HTTP transport for the oauth2 crate.
fn http_client() -> impl Fn(HttpRequest) -> Result<HttpResponse, ureq::Error> {
    // Token errors come back as 400 bodies that oauth2 parses itself.
    let config = Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
        .build();
    let agent = Agent::new_with_config(config);

    move |request: HttpRequest| {
        let (parts, body) = request.into_parts();
        let response = agent.run(http::Request::from_parts(parts, body.as_slice()))?;
        let (parts, mut body) = response.into_parts();
        let bytes = body.read_to_vec()?;
        Ok(http::Response::from_parts(parts, bytes))
    }
}

fn refresh(secrets: &ClientSecrets, token: &StoredToken) -> Result<StoredToken> {
    let refresh_token = token
        .refresh_token
        .clone()
        .context("no refresh token available")?;

    let client = BasicClient::new(ClientId::new(secrets.client_id.clone()))
        .set_client_secret(ClientSecret::new(secrets.client_secret.clone()))
        .set_token_uri(TokenUrl::new(secrets.token_uri()).context("invalid token URI")?);

    tracing::debug!("refreshing OAuth token");
    let http = http_client();
    let response = client
        .exchange_refresh_token(&RefreshToken::new(refresh_token.clone()))
        .request(&http)
        .context("exchange refresh token")?;

    Ok(StoredToken::from_response(
        &response,
        Some(refresh_token),
        Utc::now(),
    ))
}

fn consent(secrets: &ClientSecrets, port: u16) -> Result<StoredToken> {
    // Bind first so the redirect cannot race the browser.
    let listener = TcpListener::bind(("127.0.0.1", port)).with_context(|| {
        format!(
            "failed to listen on 127.0.0.1:{port} for the sign-in redirect; \
             free the port or set another with `vbyt config oauth_port <port>`"
        )
    })?;

    let client = BasicClient::new(ClientId::new(secrets.client_id.clone()))
        .set_client_secret(ClientSecret::new(secrets.client_secret.clone()))
        .set_auth_uri(AuthUrl::new(secrets.auth_uri()).context("invalid auth URI")?)
        .set_token_uri(TokenUrl::new(secrets.token_uri()).context("invalid token URI")?)
        .set_redirect_uri(
            RedirectUrl::new(format!("http://127.0.0.1:{port}")).context("invalid redirect URL")?,
        );

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(SCOPES.iter().map(|s| Scope::new(s.to_string())))
        .add_extra_param("access_type", "offline")
        .add_extra_param("prompt", "consent")
        .set_pkce_challenge(pkce_challenge)
        .url();

    tracing::info!(url = %auth_url, "asking user to follow OAuth flow");
    println!("Opening your browser to sign in. If it does not open, visit:\n  {auth_url}");
    if let Err(e) = open::that(auth_url.as_str()) {
        tracing::warn!("could not open browser: {e}");
    }

    let code = wait_for_code(&listener, csrf.secret(), REDIRECT_READ_TIMEOUT)?;

    let http = http_client();
    let response = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pkce_verifier)
        .request(&http)
        .context("exchange authorization code for an access token")?;

    Ok(StoredToken::from_response(&response, None, Utc::now()))
}

/// Serves the loopback redirect until a request carrying the authorization code arrives.
/// Connections that stay silent for `read_timeout` are dropped.
fn wait_for_code(
    listener: &TcpListener,
    expected_state: &str,
    read_timeout: Duration,
) -> Result<String> {
    for stream in listener.incoming() {
        let mut stream = stream.context("failed to accept sign-in redirect")?;
        stream
            .set_read_timeout(Some(read_timeout))
            .context("failed to configure sign-in connection")?;

        let mut request_line = String::new();
        if let Err(e) = BufReader::new(&stream).read_line(&mut request_line) {
            // Browser preconnects often open a socket and never write to it
            tracing::debug!("skipping silent loopback connection: {e}");
            continue;
        }

        match parse_redirect(&request_line, expected_state) {
            // Favicon and other stray requests
            Ok(None) => {
                let _ = respond(&mut stream, "404 Not Found", "");
            }
            Ok(Some(code)) => {
                respond(&mut stream, "200 OK", OAUTH_DONE_HTML)?;
                return Ok(code);
            }
            Err(e) => {
                let _ = respond(&mut stream, "400 Bad Request", OAUTH_FAILED_HTML);
                return Err(e);
            }
        }
    }

    bail!("sign-in listener closed before the redirect arrived")
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) -> Result<()> {
    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()?;
    Ok(())
}

/// Extracts the authorization code from a request line such as
/// `GET /?state=..&code=.. HTTP/1.1`. `Ok(None)` means the request is unrelated.
fn parse_redirect(request_line: &str, expected_state: &str) -> Result<Option<String>> {
    let Some(target) = request_line.split_whitespace().nth(1) else {
        return Ok(None);
    };

    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .with_context(|| format!("malformed redirect target '{target}'"))?;

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (k, v) in url.query_pairs() {
        match &*k {
            "code" => code = Some(v.into_owned()),
            "state" => state = Some(v.into_owned()),
            "error" => error = Some(v.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        bail!("authorization was refused: {error}");
    }
    let Some(code) = code else {
        return Ok(None);
    };
    if state.as_deref() != Some(expected_state) {
        bail!("sign-in redirect carried an unexpected state parameter");
    }

    Ok(Some(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(expires_in_secs: Option<i64>, refresh: Option<&str>) -> StoredToken {
        StoredToken {
            access_token: "ya29.token".into(),
            refresh_token: refresh.map(String::from),
            expires_at: expires_in_secs.map(|s| Utc::now() + TimeDelta::seconds(s)),
            scopes: vec![],
        }
    }

    #[test]
    fn next_step_decisions() {
        let now = Utc::now();
        assert_eq!(next_step(None, now), NextStep::Consent);
        assert_eq!(
            next_step(Some(&token(Some(3600), None)), now),
            NextStep::UseStored
        );
        assert_eq!(
            next_step(Some(&token(Some(-10), Some("1//r"))), now),
            NextStep::Refresh
        );
        assert_eq!(next_step(Some(&token(Some(-10), None)), now), NextStep::Consent);
        assert_eq!(next_step(Some(&token(Some(-10), Some(""))), now), NextStep::Consent);
        // Inside the safety margin
        assert_eq!(
            next_step(Some(&token(Some(30), Some("1//r"))), now),
            NextStep::Refresh
        );
        // Unknown expiry is not trusted
        assert_eq!(next_step(Some(&token(None, Some("1//r"))), now), NextStep::Refresh);
    }

    #[test]
    fn corrupt_token_file_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("token.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(load_stored_token(&path).is_none());
        assert!(!path.exists());
    }

    #[test]
    fn valid_stored_token_is_used_without_network() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::in_dir(tmp.path()).unwrap();
        save_token(&paths.token_file, &token(Some(3600), Some("1//r"))).unwrap();

        let creds = get_credentials(&paths, &Config::default()).unwrap();
        assert_eq!(creds.access_token, "ya29.token");
    }

    #[test]
    fn missing_client_secrets_is_actionable() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::in_dir(tmp.path()).unwrap();
        let cfg = Config {
            client_secrets: Some(tmp.path().join("absent.json")),
            ..Config::default()
        };
        // Expired without refresh token -> consent -> needs secrets
        save_token(&paths.token_file, &token(Some(-100), None)).unwrap();

        let err = get_credentials(&paths, &cfg).unwrap_err();
        assert!(format!("{err:#}").contains("client secrets not found"));
    }

    #[test]
    fn failed_refresh_removes_stored_token() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = AppPaths::in_dir(tmp.path()).unwrap();
        let secrets = tmp.path().join("secrets.json");
        // Nothing listens on port 1, so the token request is refused
        fs::write(
            &secrets,
            r#"{"installed": {"client_id": "id", "client_secret": "s",
                "token_uri": "http://127.0.0.1:1/token"}}"#,
        )
        .unwrap();
        let cfg = Config {
            client_secrets: Some(secrets),
            ..Config::default()
        };
        save_token(&paths.token_file, &token(Some(-100), Some("1//r"))).unwrap();

        let err = get_credentials(&paths, &cfg).unwrap_err();

        assert!(err.to_string().contains("failed to refresh"));
        assert!(!paths.token_file.exists());
    }

    #[test]
    fn silent_connection_does_not_block_the_redirect() {
        use std::io::Read;

        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let _idle = TcpStream::connect(addr).unwrap();
        let mut browser = TcpStream::connect(addr).unwrap();
        browser
            .write_all(b"GET /?state=abc&code=xyz HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
            .unwrap();

        let code = wait_for_code(&listener, "abc", Duration::from_millis(200)).unwrap();
        assert_eq!(code, "xyz");

        let mut reply = String::new();
        browser.read_to_string(&mut reply).unwrap();
        assert!(reply.starts_with("HTTP/1.1 200 OK"));
    }

    #[test]
    fn from_response_keeps_previous_refresh_token() {
        let response: BasicTokenResponse = serde_json::from_str(
            r#"{"access_token": "new", "token_type": "Bearer", "expires_in": 3599}"#,
        )
        .unwrap();
        let now = Utc::now();

        let stored = StoredToken::from_response(&response, Some("1//old".into()), now);
        assert_eq!(stored.access_token, "new");
        assert_eq!(stored.refresh_token.as_deref(), Some("1//old"));
        assert_eq!(stored.expires_at, Some(now + TimeDelta::seconds(3599)));
        assert_eq!(stored.scopes.len(), SCOPES.len());
    }

    #[test]
    fn from_response_prefers_new_refresh_token() {
        let response: BasicTokenResponse = serde_json::from_str(
            r#"{"access_token": "a", "token_type": "Bearer", "refresh_token": "1//new",
                "scope": "https://www.googleapis.com/auth/youtube"}"#,
        )
        .unwrap();

        let stored = StoredToken::from_response(&response, Some("1//old".into()), Utc::now());
        assert_eq!(stored.refresh_token.as_deref(), Some("1//new"));
        assert_eq!(stored.expires_at, None);
        assert_eq!(stored.scopes, vec!["https://www.googleapis.com/auth/youtube"]);
    }

    #[test]
    fn client_secrets_installed_and_web_layouts() {
        let tmp = tempfile::tempdir().unwrap();
        let installed = tmp.path().join("installed.json");
        fs::write(
            &installed,
            r#"{"installed": {"client_id": "id1", "client_secret": "s1",
                "token_uri": "https://oauth2.googleapis.com/token"}}"#,
        )
        .unwrap();
        let web = tmp.path().join("web.json");
        fs::write(&web, r#"{"web": {"client_id": "id2", "client_secret": "s2"}}"#).unwrap();
        let neither = tmp.path().join("neither.json");
        fs::write(&neither, r#"{"other": {}}"#).unwrap();

        let s = load_client_secrets(&installed).unwrap();
        assert_eq!(s.client_id, "id1");
        assert_eq!(s.auth_uri(), DEFAULT_AUTH_URI);
        assert_eq!(load_client_secrets(&web).unwrap().client_secret, "s2");
        assert!(load_client_secrets(&neither).is_err());
    }

    #[test]
    fn redirect_with_code_and_matching_state() {
        let code = parse_redirect("GET /?state=abc&code=4%2F0Ab&scope=x HTTP/1.1\r\n", "abc")
            .unwrap();
        assert_eq!(code.as_deref(), Some("4/0Ab"));
    }

    #[test]
    fn redirect_with_wrong_state_is_rejected() {
        assert!(parse_redirect("GET /?state=evil&code=c HTTP/1.1", "abc").is_err());
        assert!(parse_redirect("GET /?code=c HTTP/1.1", "abc").is_err());
    }

    #[test]
    fn redirect_with_error_is_reported() {
        let err = parse_redirect("GET /?error=access_denied&state=abc HTTP/1.1", "abc").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn unrelated_requests_are_ignored() {
        assert_eq!(parse_redirect("GET /favicon.ico HTTP/1.1", "abc").unwrap(), None);
        assert_eq!(parse_redirect("", "abc").unwrap(), None);
    }
}
