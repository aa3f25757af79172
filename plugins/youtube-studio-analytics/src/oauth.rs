//! OAuth 2.0 against Google for read-only YouTube and YouTube Analytics access.
//!
//! The authorization request asks for offline access with forced consent, so that Google always
//! hands out a refresh token. The redirect lands on a short-lived loopback HTTP server (see
//! [`loopback_redirect`]) unless the host is configured with a fixed callback URL.

use bytes::Bytes;
use crate::youtube_api::GoogleEndpoints;
use eyre::Context;
use ha_integration_sdk::application_credentials::ClientCredential;
use http_body_util::Full;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body};
use oauth2::basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicTokenResponse};
use oauth2::reqwest;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenUrl,
};
use std::future::Future;

/// Scopes requested from the user.
pub const SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/youtube.readonly",
    "https://www.googleapis.com/auth/yt-analytics.readonly",
];

/// Why talking to the token endpoint failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    /// Google no longer accepts the grant or the client. Only a new consent can fix this.
    #[error("token rejected: {0}")]
    Revoked(String),
    #[error("no refresh token available")]
    MissingRefreshToken,
    /// Anything transient: network trouble, 5xx, unparseable responses.
    #[error("token request failed: {0}")]
    Request(String),
}

impl TokenError {
    fn from_request<RE>(e: RequestTokenError<RE, BasicErrorResponse>) -> Self
    where
        RE: std::error::Error + 'static,
    {
        match e {
            RequestTokenError::ServerResponse(ref sr)
                if matches!(
                    sr.error(),
                    BasicErrorResponseType::InvalidGrant
                        | BasicErrorResponseType::InvalidClient
                        | BasicErrorResponseType::UnauthorizedClient
                ) =>
            {
                let detail = match sr.error_description() {
                    Some(description) => format!("{}: {description}", sr.error()),
                    None => sr.error().to_string(),
                };
                TokenError::Revoked(detail)
            }
            e => TokenError::Request(e.to_string()),
        }
    }
}

/// An authorization request the user has been (or is about to be) sent to.
///
/// Holds the secrets needed to complete the exchange once Google redirects back.
#[derive(Debug)]
pub struct PendingAuthorization {
    /// Where to send the user.
    pub url: url::Url,
    pub csrf: CsrfToken,
    pub redirect_url: RedirectUrl,
    pkce_verifier: PkceCodeVerifier,
}

/// Performs the token-endpoint side of the OAuth flow for one client application.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    credential: ClientCredential,
    endpoints: GoogleEndpoints,
    http: reqwest::Client,
}

impl OAuthManager {
    pub fn new(credential: ClientCredential, endpoints: GoogleEndpoints) -> Self {
        let http = reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("building reqwest client should not fail");
        Self {
            credential,
            endpoints,
            http,
        }
    }

    /// Builds the consent URL for a fresh authorization.
    pub fn authorize(&self, redirect_url: RedirectUrl) -> PendingAuthorization {
        let client = BasicClient::new(ClientId::new(self.credential.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.credential.client_secret.clone()))
            .set_auth_uri(AuthUrl::from_url(self.endpoints.auth_url.clone()))
            .set_redirect_uri(redirect_url.clone());

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, csrf) = client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(SCOPES.iter().map(|s| Scope::new(s.to_string())))
            // both needed for Google to hand out a refresh token every time
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .add_extra_param("include_granted_scopes", "true")
            .set_pkce_challenge(pkce_challenge)
            .url();

        PendingAuthorization {
            url,
            csrf,
            redirect_url,
            pkce_verifier,
        }
    }

    /// Exchanges the authorization code Google redirected back with for tokens.
    pub async fn exchange_code(
        &self,
        pending: PendingAuthorization,
        code: AuthorizationCode,
    ) -> Result<BasicTokenResponse, TokenError> {
        let client = BasicClient::new(ClientId::new(self.credential.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.credential.client_secret.clone()))
            .set_token_uri(TokenUrl::from_url(self.endpoints.token_url.clone()))
            .set_redirect_uri(pending.redirect_url);

        let token = client
            .exchange_code(code)
            .set_pkce_verifier(pending.pkce_verifier)
            .request_async(&self.http)
            .await
            .map_err(TokenError::from_request)?;
        tracing::debug!("exchanged authorization code for tokens");
        Ok(token)
    }

    /// Obtains a new access token for `refresh_token`.
    ///
    /// Google usually leaves the refresh token out of the response; callers keep the one they
    /// already have in that case.
    pub async fn refresh_token(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<BasicTokenResponse, TokenError> {
        tracing::debug!("attempting to refresh OAuth token");

        let client = BasicClient::new(ClientId::new(self.credential.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.credential.client_secret.clone()))
            .set_token_uri(TokenUrl::from_url(self.endpoints.token_url.clone()));

        match client
            .exchange_refresh_token(refresh_token)
            .request_async(&self.http)
            .await
        {
            Ok(token) => {
                tracing::debug!("successfully refreshed OAuth token");
                Ok(token)
            }
            Err(e) => {
                let e = TokenError::from_request(e);
                if let TokenError::Revoked(reason) = &e {
                    tracing::warn!(%reason, "OAuth refresh token is no longer accepted");
                }
                Err(e)
            }
        }
    }
}

/// The query parameters Google appends to the redirect URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set instead of `code` when the user declined, e.g. `access_denied`.
    pub error: Option<String>,
}

impl OAuthCallback {
    pub fn from_query(query: &str) -> Self {
        let mut callback = Self::default();
        for (k, v) in form_urlencoded::parse(query.as_bytes()) {
            match &*k {
                "code" => callback.code = Some(v.into_owned()),
                "state" => callback.state = Some(v.into_owned()),
                "error" => callback.error = Some(v.into_owned()),
                _ => {}
            }
        }
        callback
    }

    fn is_oauth_redirect(&self) -> bool {
        self.state.is_some() || self.code.is_some() || self.error.is_some()
    }
}

/// Sets up a local HTTP server to receive the OAuth redirect.
///
/// Returns the redirect URL to register with the authorization request, and a future that
/// resolves with the parameters of the first request that looks like an OAuth redirect. The
/// server shuts down right after.
pub async fn loopback_redirect(
    done_html: &'static str,
) -> eyre::Result<(RedirectUrl, impl Future<Output = eyre::Result<OAuthCallback>>)> {
    let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .context("bind to localhost")?;
    let addr = socket.local_addr().context("get local address")?;
    let url = RedirectUrl::new(format!("http://{}:{}", addr.ip(), addr.port()))
        .context("construct redirect url")?;

    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let r = async move {
            let (conn, _) = socket.accept().await.context("accept")?;
            let conn = hyper_util::rt::TokioIo::new(conn);
            let (got, mut gotten) = tokio::sync::mpsc::channel(1);
            let service = service_fn(move |req: Request<body::Incoming>| {
                let got = got.clone();
                async move {
                    let callback = OAuthCallback::from_query(req.uri().query().unwrap_or(""));
                    if !callback.is_oauth_redirect() {
                        let mut response = Response::new(Full::<Bytes>::from("not found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        return Ok::<_, std::convert::Infallible>(response);
                    }
                    // only the first redirect counts; later ones find the channel full or gone
                    let _ = got.try_send(callback);
                    Ok(Response::new(Full::<Bytes>::from(done_html)))
                }
            });
            let mut serve = std::pin::pin!(
                hyper::server::conn::http1::Builder::new().serve_connection(conn, service)
            );

            tokio::select! {
                exit = &mut serve => {
                    if let Err(e) = exit {
                        Err(e).context("redirect server got bad request")
                    } else {
                        eyre::bail!("redirect server exit prematurely");
                    }
                }
                callback = gotten.recv() => {
                    serve.as_mut().graceful_shutdown();
                    // let the response to the browser go out
                    let _ = serve.await;
                    callback.ok_or_else(|| eyre::eyre!("redirect server closed without a callback"))
                }
            }
        };
        let _ = tx.send(r.await);
    });

    Ok((url, async move {
        rx.await.context("redirect future dropped prematurely")?
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manager(server: &mockito::Server) -> OAuthManager {
        OAuthManager::new(
            ClientCredential::new("client-id", "client-secret"),
            GoogleEndpoints::with_base_url(&server.url()).unwrap(),
        )
    }

    #[test]
    fn authorize_url_requests_offline_consent() {
        let manager = OAuthManager::new(
            ClientCredential::new("client-id", "client-secret"),
            GoogleEndpoints::default(),
        );
        let redirect = RedirectUrl::new("http://127.0.0.1:8123/callback".to_string()).unwrap();
        let pending = manager.authorize(redirect);

        let params: std::collections::HashMap<_, _> = pending.url.query_pairs().collect();
        assert_eq!(pending.url.host_str(), Some("accounts.google.com"));
        assert_eq!(params["client_id"], "client-id");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["include_granted_scopes"], "true");
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8123/callback");
        assert_eq!(params["state"], pending.csrf.secret().as_str());
        assert_eq!(params["scope"], SCOPES.join(" "));
    }

    #[tokio::test]
    async fn refresh_returns_new_access_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"fresh","token_type":"Bearer","expires_in":3599}"#)
            .create_async()
            .await;

        let token = manager(&server)
            .refresh_token(&RefreshToken::new("refresh".to_string()))
            .await
            .unwrap();
        use oauth2::TokenResponse;
        assert_eq!(token.access_token().secret(), "fresh");
        assert!(token.refresh_token().is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn invalid_grant_is_revoked() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
            )
            .create_async()
            .await;

        let err = manager(&server)
            .refresh_token(&RefreshToken::new("refresh".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Revoked(_)), "{err:?}");
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(503)
            .with_body("unavailable")
            .create_async()
            .await;

        let err = manager(&server)
            .refresh_token(&RefreshToken::new("refresh".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::Request(_)), "{err:?}");
    }

    #[test]
    fn callback_query_parsing() {
        assert_eq!(
            OAuthCallback::from_query("state=abc&code=4%2F0Ad&scope=x"),
            OAuthCallback {
                code: Some("4/0Ad".to_string()),
                state: Some("abc".to_string()),
                error: None,
            }
        );
        assert!(!OAuthCallback::from_query("").is_oauth_redirect());
        assert!(OAuthCallback::from_query("error=access_denied").is_oauth_redirect());
    }

    #[tokio::test]
    async fn loopback_captures_redirect() {
        let (url, callback) = loopback_redirect("done").await.unwrap();
        let target = format!("{}/?state=s&code=c", url.as_str().trim_end_matches('/'));
        let http = reqwest::Client::builder().no_proxy().build().unwrap();
        let response = http.get(target).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "done");

        let callback = callback.await.unwrap();
        assert_eq!(callback.code.as_deref(), Some("c"));
        assert_eq!(callback.state.as_deref(), Some("s"));
    }
}
