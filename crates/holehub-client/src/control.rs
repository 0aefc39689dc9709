//! HTTP client for the control plane API

use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use holehub_proto::{
    AckResponse, CreateHoleRequest, ErrorResponse, HoleDescriptor, HoleList, PingResponse,
    Scheme, SessionResponse, SigninRequest,
};

use crate::{ClientConfig, ClientError};

/// PEM material fetched for the signed-in user
#[derive(Clone)]
pub struct TunnelMaterial {
    pub ca_pem: String,
    pub cert_pem: String,
    pub key_pem: String,
}

impl std::fmt::Debug for TunnelMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelMaterial")
            .field("ca_pem", &self.ca_pem.len())
            .field("cert_pem", &self.cert_pem.len())
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct ControlClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ControlClient {
    /// `host` is either `host:port` or a full `http(s)://` URL
    pub fn new(host: &str) -> Self {
        let trimmed = host.trim_end_matches('/');
        let base_url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("http://{}", trimmed)
        };

        Self {
            http: reqwest::Client::new(),
            base_url,
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ClientError::Session("no session token".into()))?;
        Ok(builder.bearer_auth(token))
    }

    async fn check(response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.bytes().await?;
        Err(match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(err) => ClientError::Api {
                status: status.as_u16(),
                code: err.code,
                message: err.error,
                suggestion: err.suggestion,
            },
            Err(_) => ClientError::Api {
                status: status.as_u16(),
                code: 0,
                message: format!("HTTP {}: {}", status, String::from_utf8_lossy(&body)),
                suggestion: None,
            },
        })
    }

    async fn json<T: DeserializeOwned>(builder: RequestBuilder) -> Result<T, ClientError> {
        let response = Self::check(builder.send().await?).await?;
        Ok(response.json().await?)
    }

    async fn text(builder: RequestBuilder) -> Result<String, ClientError> {
        let response = Self::check(builder.send().await?).await?;
        Ok(response.text().await?)
    }

    pub async fn signin(&mut self, username: &str, password: &str) -> Result<SessionResponse, ClientError> {
        let request = self.http.post(self.url("signin")).json(&SigninRequest {
            username: username.to_string(),
            password: password.to_string(),
        });
        let session: SessionResponse = Self::json(request).await?;
        info!("Signed in as {}", session.username);
        self.token = Some(session.token.clone());
        Ok(session)
    }

    pub async fn ping(&self) -> Result<PingResponse, ClientError> {
        let mut request = self.http.get(self.url("ping"));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Self::json(request).await
    }

    /// Reuse the stored session when the server still accepts it,
    /// otherwise log in once with the stored credentials
    ///
    /// Returns whether `config` changed and should be saved.
    pub async fn ensure_session(&mut self, config: &mut ClientConfig) -> Result<bool, ClientError> {
        if self.token.is_none() {
            self.token = config.session_token.clone();
        }
        if self.token.is_some() && self.ping().await?.ok {
            debug!("Reusing cached session");
            return Ok(false);
        }

        let (Some(username), Some(password)) = (config.username.clone(), config.password.clone())
        else {
            return Err(ClientError::Session(
                "session expired and no stored credentials; run `holehub login`".into(),
            ));
        };
        let session = self.signin(&username, &password).await?;
        config.session_token = Some(session.token);
        Ok(true)
    }

    pub async fn create_hole(
        &self,
        name: Option<&str>,
        scheme: Scheme,
    ) -> Result<HoleDescriptor, ClientError> {
        let request = self.authorized(self.http.post(self.url("holes")))?.json(&CreateHoleRequest {
            name: name.map(str::to_string),
            scheme: Some(scheme.to_string()),
        });
        Self::json(request).await
    }

    pub async fn list_holes(&self) -> Result<HoleList, ClientError> {
        Self::json(self.authorized(self.http.get(self.url("holes")))?).await
    }

    pub async fn get_hole(&self, id: &str) -> Result<HoleDescriptor, ClientError> {
        Self::json(self.authorized(self.http.get(self.url(&format!("holes/{}", id))))?).await
    }

    pub async fn start_hole(&self, id: &str) -> Result<AckResponse, ClientError> {
        self.hole_action(id, "start").await
    }

    pub async fn kill_hole(&self, id: &str) -> Result<AckResponse, ClientError> {
        self.hole_action(id, "kill").await
    }

    pub async fn remove_hole(&self, id: &str) -> Result<AckResponse, ClientError> {
        self.hole_action(id, "remove").await
    }

    async fn hole_action(&self, id: &str, action: &str) -> Result<AckResponse, ClientError> {
        let url = self.url(&format!("holes/{}/{}", id, action));
        Self::json(self.authorized(self.http.post(url))?).await
    }

    /// Fetch the session user's CA certificate, leaf certificate and leaf key
    pub async fn fetch_material(&self) -> Result<TunnelMaterial, ClientError> {
        Ok(TunnelMaterial {
            ca_pem: Self::text(self.authorized(self.http.get(self.url("ca.pem")))?).await?,
            cert_pem: Self::text(self.authorized(self.http.get(self.url("cert.pem")))?).await?,
            key_pem: Self::text(self.authorized(self.http.get(self.url("cert.key")))?).await?,
        })
    }
}
