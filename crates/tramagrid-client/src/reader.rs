//! Consistency-Aware Reader: snapshot reads that always see the latest write.
//!
//! Every GET carries a unique cache token, so a browser, proxy, or CDN cache
//! can never answer with a response that predates an acknowledged mutation.
//! Without an active session every read returns an empty value.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use tramagrid_core::error::{Result, TramaGridError};
use tramagrid_core::types::{
    ColorCluster, ColorIndex, ExportFormat, GridParams, PaletteEntry, ReadRequest, RowRun,
};

use crate::gateway::CanvasGateway;
use crate::state::ClientState;

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A token no earlier call in this process has produced: wall-clock millis
/// plus a process-wide counter.
pub fn cache_token() -> String {
    let seq = TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}-{seq}", chrono::Utc::now().timestamp_millis())
}

/// The shapes the grid endpoint has been seen to answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridPayload {
    /// A bare string: a data URI or raw base64.
    Bare(String),
    /// `{"image_base64": "..."}`, itself either a data URI or raw base64.
    Embedded(String),
    /// Null, an empty object, or anything else.
    Empty,
}

impl GridPayload {
    pub fn decode(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Bare(s),
            Value::Object(mut map) => match map.remove("image_base64") {
                Some(Value::String(s)) => Self::Embedded(s),
                _ => Self::Empty,
            },
            _ => Self::Empty,
        }
    }

    /// Normalize to a data URI. Empty payloads become an empty image.
    pub fn into_image(self) -> GridImage {
        let raw = match self {
            Self::Bare(s) | Self::Embedded(s) => s,
            Self::Empty => return GridImage::default(),
        };
        let raw = raw.trim();
        if raw.is_empty() {
            GridImage::default()
        } else if raw.starts_with("data:") {
            GridImage(raw.to_string())
        } else {
            GridImage(format!("{PNG_DATA_URI_PREFIX}{raw}"))
        }
    }
}

/// A rendered grid as a data URI. Empty when there is nothing to show.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridImage(String);

impl GridImage {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Decode the base64 payload of the data URI.
    pub fn image_bytes(&self) -> Result<Vec<u8>> {
        let (_, data) = self
            .0
            .split_once(";base64,")
            .ok_or_else(|| TramaGridError::Decode("grid image is not a base64 data URI".into()))?;
        STANDARD
            .decode(data)
            .map_err(|e| TramaGridError::Decode(format!("invalid grid image base64: {e}")))
    }
}

#[derive(Debug, Default, Deserialize)]
struct RowSummaryResponse {
    #[serde(default)]
    summary: Vec<RowRun>,
}

#[derive(Debug, Default, Deserialize)]
struct ClustersResponse {
    #[serde(default)]
    clusters: Vec<ColorCluster>,
}

/// Decode a JSON body, treating `null` as the type's default.
fn decode_or_default<T>(value: Value) -> Result<T>
where
    T: Default + serde::de::DeserializeOwned,
{
    if value.is_null() {
        return Ok(T::default());
    }
    Ok(serde_json::from_value(value)?)
}

pub struct SnapshotReader {
    gateway: Arc<dyn CanvasGateway>,
    state: Arc<ClientState>,
}

impl SnapshotReader {
    pub fn new(gateway: Arc<dyn CanvasGateway>, state: Arc<ClientState>) -> Self {
        Self { gateway, state }
    }

    /// Cache-busted GET. `None` when there is no session to read from.
    async fn fetch(&self, request: ReadRequest) -> Result<Option<Value>> {
        let Some(session_id) = self.state.session_id().await else {
            debug!(endpoint = request.endpoint(), "No session, skipping read");
            return Ok(None);
        };
        let token = cache_token();
        let value = self.gateway.read(&session_id, request, &token).await?;
        Ok(Some(value))
    }

    /// Palette entries, most used first as ordered by the server.
    pub async fn palette(&self) -> Result<Vec<PaletteEntry>> {
        match self.fetch(ReadRequest::Palette).await? {
            Some(value) => decode_or_default(value),
            None => Ok(Vec::new()),
        }
    }

    pub async fn grid_image(&self) -> Result<GridImage> {
        match self.fetch(ReadRequest::Grid).await? {
            Some(value) => Ok(GridPayload::decode(value).into_image()),
            None => Ok(GridImage::default()),
        }
    }

    /// Color runs of a 1-based row, in stitching order.
    pub async fn row_summary(&self, row: u32) -> Result<Vec<RowRun>> {
        match self.fetch(ReadRequest::RowSummary { row }).await? {
            Some(value) => Ok(decode_or_default::<RowSummaryResponse>(value)?.summary),
            None => Ok(Vec::new()),
        }
    }

    pub async fn params(&self) -> Result<GridParams> {
        match self.fetch(ReadRequest::Params).await? {
            Some(value) => decode_or_default(value),
            None => Ok(GridParams::default()),
        }
    }

    /// Groups of similar palette entries suggested for merging.
    pub async fn clusters(&self) -> Result<Vec<ColorCluster>> {
        match self.fetch(ReadRequest::Clusters).await? {
            Some(value) => Ok(decode_or_default::<ClustersResponse>(value)?.clusters),
            None => Ok(Vec::new()),
        }
    }

    /// Palette index under a cell. `None` outside the grid or without a session.
    pub async fn pixel_index(&self, x: u32, y: u32) -> Result<Option<ColorIndex>> {
        let Some(session_id) = self.state.session_id().await else {
            return Ok(None);
        };
        let index = self.gateway.query_pixel(&session_id, x, y).await?;
        Ok(ColorIndex::try_from(index).ok())
    }

    /// Download the rendered pattern. Requires a session.
    pub async fn export(&self, format: ExportFormat) -> Result<Vec<u8>> {
        let session_id = self
            .state
            .session_id()
            .await
            .ok_or(TramaGridError::NoSession)?;
        self.gateway.export(&session_id, format).await
    }
}
