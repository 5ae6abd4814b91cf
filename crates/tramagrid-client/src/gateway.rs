//! Remote Canvas Gateway: stateless request/response calls to the canvas service.
//!
//! [`CanvasGateway`] is the seam every other component talks through;
//! [`HttpGateway`] implements it over HTTP with `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use tramagrid_core::config::ClientConfig;
use tramagrid_core::error::{Result, TramaGridError};
use tramagrid_core::types::{ExportFormat, MutationRequest, ReadRequest, SourceImage};

#[async_trait]
pub trait CanvasGateway: Send + Sync {
    /// Ask the server for a fresh session id.
    async fn create_session(&self) -> Result<String>;

    async fn upload_image(&self, session_id: &str, image: &SourceImage) -> Result<()>;

    async fn generate_grid(&self, session_id: &str) -> Result<()>;

    /// Send one mutation. Returns the decoded response body (`Null` when empty).
    async fn mutate(&self, session_id: &str, request: &MutationRequest) -> Result<Value>;

    /// Snapshot read. `cache_token` must be unique per call so no cache
    /// between client and server can answer it.
    async fn read(&self, session_id: &str, request: ReadRequest, cache_token: &str)
    -> Result<Value>;

    /// Palette index at a grid cell; the server answers `-1` outside the grid.
    async fn query_pixel(&self, session_id: &str, x: u32, y: u32) -> Result<i64>;

    async fn export(&self, session_id: &str, format: ExportFormat) -> Result<Vec<u8>>;

    /// Direct download of an image from its own host.
    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>>;

    /// Download an image through the server's proxy endpoint.
    async fn fetch_image_via_proxy(&self, url: &str) -> Result<Vec<u8>>;
}

/// HTTP implementation of [`CanvasGateway`].
pub struct HttpGateway {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    #[serde(default)]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    index: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
}

impl HttpGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_millis(config.timeout_ms()));
        if let Some(agent) = config.user_agent() {
            builder = builder.user_agent(agent.to_string());
        }
        let client = builder.build().map_err(transport)?;
        Ok(Self {
            base_url: config.base_url(),
            client,
        })
    }

    /// Point at a different server, keeping the configured client.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for an image location. Locations without a scheme are
    /// taken relative to the server, so `/images/a.png` lands on its origin.
    fn image_url(&self, location: &str) -> Result<reqwest::Url> {
        match reqwest::Url::parse(location) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = reqwest::Url::parse(&format!("{}/", self.base_url))
                    .map_err(|e| TramaGridError::Config(format!("invalid server URL: {e}")))?;
                base.join(location).map_err(|e| {
                    TramaGridError::InvalidDescriptor(format!("bad image location {location}: {e}"))
                })
            }
            Err(e) => Err(TramaGridError::InvalidDescriptor(format!(
                "bad image location {location}: {e}"
            ))),
        }
    }

    fn session_url(&self, endpoint: &str, session_id: &str) -> String {
        format!("{}/api/{endpoint}/{session_id}", self.base_url)
    }

    async fn download(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>> {
        let resp = request.send().await.map_err(transport)?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await.map_err(transport)?;
        Ok(bytes.to_vec())
    }
}

fn transport(e: reqwest::Error) -> TramaGridError {
    TramaGridError::Transport(e.to_string())
}

/// Extract a FastAPI-style `detail` from an error body. Non-string details
/// (validation error lists) are rendered as JSON text.
fn detail_text(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TramaGridError::Server {
        status: status.as_u16(),
        detail: detail_text(&body),
    })
}

async fn json_body(resp: reqwest::Response) -> Result<Value> {
    let text = resp.text().await.map_err(transport)?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

#[async_trait]
impl CanvasGateway for HttpGateway {
    async fn create_session(&self) -> Result<String> {
        let url = format!("{}/api/session", self.base_url);
        debug!(%url, "Creating session");
        let resp = self.client.post(&url).send().await.map_err(transport)?;
        let resp = check_status(resp).await?;
        let body: CreateSessionResponse = serde_json::from_value(json_body(resp).await?)?;
        if body.session_id.is_empty() {
            return Err(TramaGridError::Decode(
                "server returned an empty session id".into(),
            ));
        }
        Ok(body.session_id)
    }

    async fn upload_image(&self, session_id: &str, image: &SourceImage) -> Result<()> {
        let url = self.session_url("upload", session_id);
        debug!(%url, bytes = image.bytes.len(), file = %image.file_name, "Uploading image");
        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(image.file_name.clone())
            .mime_str(&image.mime)
            .map_err(transport)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn generate_grid(&self, session_id: &str) -> Result<()> {
        let url = self.session_url("generate", session_id);
        debug!(%url, "Generating grid");
        let resp = self.client.post(&url).send().await.map_err(transport)?;
        check_status(resp).await?;
        Ok(())
    }

    async fn mutate(&self, session_id: &str, request: &MutationRequest) -> Result<Value> {
        let url = self.session_url(request.endpoint(), session_id);
        debug!(%url, "Sending mutation");
        let mut builder = self.client.post(&url);
        if let Some(body) = request.body() {
            builder = builder.json(&body);
        }
        let resp = builder.send().await.map_err(transport)?;
        let resp = check_status(resp).await?;
        json_body(resp).await
    }

    async fn read(
        &self,
        session_id: &str,
        request: ReadRequest,
        cache_token: &str,
    ) -> Result<Value> {
        let url = self.session_url(request.endpoint(), session_id);
        debug!(%url, token = cache_token, "Reading snapshot");
        let mut query = request.query();
        query.push(("t", cache_token.to_string()));
        let resp = self
            .client
            .get(&url)
            .query(&query)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        json_body(resp).await
    }

    async fn query_pixel(&self, session_id: &str, x: u32, y: u32) -> Result<i64> {
        let url = self.session_url("query-pixel", session_id);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "x": x, "y": y }))
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;
        let body: IndexResponse = serde_json::from_value(json_body(resp).await?)?;
        Ok(body.index)
    }

    async fn export(&self, session_id: &str, format: ExportFormat) -> Result<Vec<u8>> {
        let url = format!(
            "{}/api/export/{}/{session_id}",
            self.base_url,
            format.as_str()
        );
        debug!(%url, "Downloading export");
        self.download(self.client.get(&url)).await
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.image_url(url)?;
        debug!(%url, "Fetching image directly");
        self.download(self.client.get(url)).await
    }

    async fn fetch_image_via_proxy(&self, url: &str) -> Result<Vec<u8>> {
        let url = self.image_url(url)?;
        let proxy = format!("{}/api/proxy-image", self.base_url);
        debug!(%url, %proxy, "Fetching image through proxy");
        self.download(self.client.get(&proxy).query(&[("url", url.as_str())]))
            .await
    }
}
