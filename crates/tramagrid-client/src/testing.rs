//! In-memory stand-in for the canvas service used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Value, json};

use tramagrid_core::error::{Result, TramaGridError};
use tramagrid_core::types::{
    ExportFormat, GridParams, MutationRequest, ReadRequest, SourceImage,
};

use crate::bus::RefreshBus;
use crate::gateway::CanvasGateway;

/// Everything the fake has been asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateSession,
    Upload(String),
    Generate(String),
    Mutate(String, MutationRequest),
    Read(String, ReadRequest, String),
    QueryPixel(String, u32, u32),
    Export(String, ExportFormat),
    FetchDirect(String),
    FetchProxy(String),
}

#[derive(Default)]
struct Inner {
    calls: Vec<Call>,
    /// Sessions the server knows about.
    sessions: Vec<String>,
    /// Palette per session, `index -> hex`.
    palettes: HashMap<String, Vec<(u32, String)>>,
    params: HashMap<String, GridParams>,
    uploads: HashMap<String, usize>,
    generated: Vec<String>,
    /// Undo history depth per session.
    history: HashMap<String, u32>,
    /// Queued failures keyed by operation name ("create", "upload", "paint", ...).
    failures: HashMap<&'static str, VecDeque<TramaGridError>>,
    images: HashMap<String, Vec<u8>>,
    proxied_images: HashMap<String, Vec<u8>>,
    grid_payload: Option<Value>,
    pixel: i64,
}

/// Fake gateway with a tiny server-side model: sessions, a palette, params,
/// and an undo counter.
#[derive(Clone, Default)]
pub struct FakeGateway {
    inner: Arc<Mutex<Inner>>,
    next_session: Arc<AtomicU64>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session the server already knows about.
    pub fn with_session(self, id: &str) -> Self {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.sessions.push(id.to_string());
            inner
                .palettes
                .insert(id.to_string(), vec![(0, "#000000".into()), (1, "#ffffff".into())]);
        }
        self
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: TramaGridError) {
        self.inner
            .lock()
            .unwrap()
            .failures
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn serve_image(&self, url: &str, bytes: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .images
            .insert(url.to_string(), bytes.to_vec());
    }

    pub fn serve_proxied_image(&self, url: &str, bytes: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .proxied_images
            .insert(url.to_string(), bytes.to_vec());
    }

    pub fn set_grid_payload(&self, payload: Value) {
        self.inner.lock().unwrap().grid_payload = Some(payload);
    }

    pub fn set_pixel(&self, index: i64) {
        self.inner.lock().unwrap().pixel = index;
    }

    pub fn forget_session(&self, id: &str) {
        self.inner.lock().unwrap().sessions.retain(|s| s != id);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn mutation_calls(&self) -> Vec<MutationRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Mutate(_, req) => Some(req),
                _ => None,
            })
            .collect()
    }

    pub fn network_calls(&self) -> usize {
        self.calls().len()
    }

    pub fn uploaded_bytes(&self, id: &str) -> Option<usize> {
        self.inner.lock().unwrap().uploads.get(id).copied()
    }

    pub fn generated(&self, id: &str) -> bool {
        self.inner.lock().unwrap().generated.iter().any(|g| g == id)
    }

    pub fn params_of(&self, id: &str) -> Option<GridParams> {
        self.inner.lock().unwrap().params.get(id).cloned()
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }

    fn take_failure(&self, op: &'static str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.failures.get_mut(op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn require_session(&self, id: &str) -> Result<()> {
        if self.inner.lock().unwrap().sessions.iter().any(|s| s == id) {
            Ok(())
        } else {
            Err(TramaGridError::Server {
                status: 404,
                detail: Some("Sessão não encontrada".into()),
            })
        }
    }
}

#[async_trait]
impl CanvasGateway for FakeGateway {
    async fn create_session(&self) -> Result<String> {
        self.record(Call::CreateSession);
        self.take_failure("create")?;
        let id = format!("session-{}", self.next_session.fetch_add(1, Ordering::SeqCst) + 1);
        let mut inner = self.inner.lock().unwrap();
        inner.sessions.push(id.clone());
        inner
            .palettes
            .insert(id.clone(), vec![(0, "#000000".into()), (1, "#ffffff".into())]);
        Ok(id)
    }

    async fn upload_image(&self, session_id: &str, image: &SourceImage) -> Result<()> {
        self.record(Call::Upload(session_id.to_string()));
        self.take_failure("upload")?;
        self.require_session(session_id)?;
        self.inner
            .lock()
            .unwrap()
            .uploads
            .insert(session_id.to_string(), image.bytes.len());
        Ok(())
    }

    async fn generate_grid(&self, session_id: &str) -> Result<()> {
        self.record(Call::Generate(session_id.to_string()));
        self.take_failure("generate")?;
        self.require_session(session_id)?;
        self.inner
            .lock()
            .unwrap()
            .generated
            .push(session_id.to_string());
        Ok(())
    }

    async fn mutate(&self, session_id: &str, request: &MutationRequest) -> Result<Value> {
        self.record(Call::Mutate(session_id.to_string(), request.clone()));
        let op = match request {
            MutationRequest::AddColor { .. } => "add_color",
            MutationRequest::UpdateParams { .. } => "params",
            _ => "mutate",
        };
        self.take_failure(op)?;
        self.require_session(session_id)?;

        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let history = inner.history.entry(session_id.to_string()).or_insert(0);
        let response = match request {
            MutationRequest::Undo => {
                if *history == 0 {
                    json!({ "ok": false })
                } else {
                    *history -= 1;
                    json!({ "ok": true })
                }
            }
            MutationRequest::UpdateParams { settings } => {
                inner.params.insert(session_id.to_string(), settings.clone());
                json!({ "ok": true })
            }
            MutationRequest::AddColor { color } => {
                *history += 1;
                let palette = inner.palettes.entry(session_id.to_string()).or_default();
                let index = palette.iter().map(|(i, _)| *i + 1).max().unwrap_or(0);
                palette.push((index, color.clone()));
                json!({ "index": index })
            }
            MutationRequest::DeleteColor { index } => {
                *history += 1;
                if let Some(palette) = inner.palettes.get_mut(session_id) {
                    palette.retain(|(i, _)| i != index);
                }
                json!({ "ok": true })
            }
            _ => {
                *history += 1;
                json!({ "ok": true })
            }
        };
        Ok(response)
    }

    async fn read(
        &self,
        session_id: &str,
        request: ReadRequest,
        cache_token: &str,
    ) -> Result<Value> {
        self.record(Call::Read(
            session_id.to_string(),
            request,
            cache_token.to_string(),
        ));
        self.take_failure("read")?;
        self.require_session(session_id)?;
        let inner = self.inner.lock().unwrap();
        let value = match request {
            ReadRequest::Palette => Value::Array(
                inner
                    .palettes
                    .get(session_id)
                    .map(|p| {
                        p.iter()
                            .map(|(i, hex)| json!({ "index": i, "hex": hex, "count": 1 }))
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            ReadRequest::Grid => inner
                .grid_payload
                .clone()
                .unwrap_or_else(|| json!({ "image_base64": "iVBORw0KGgo=" })),
            ReadRequest::RowSummary { .. } => {
                json!({
                    "summary": [
                        { "count": 3, "hex": "#000000" },
                        { "count": 2, "hex": "#ffffff" }
                    ]
                })
            }
            ReadRequest::Params => serde_json::to_value(
                inner.params.get(session_id).cloned().unwrap_or_default(),
            )?,
            ReadRequest::Clusters => json!({ "clusters": [[0, 1]] }),
        };
        Ok(value)
    }

    async fn query_pixel(&self, session_id: &str, x: u32, y: u32) -> Result<i64> {
        self.record(Call::QueryPixel(session_id.to_string(), x, y));
        self.require_session(session_id)?;
        Ok(self.inner.lock().unwrap().pixel)
    }

    async fn export(&self, session_id: &str, format: ExportFormat) -> Result<Vec<u8>> {
        self.record(Call::Export(session_id.to_string(), format));
        self.require_session(session_id)?;
        Ok(match format {
            ExportFormat::Png => b"\x89PNG".to_vec(),
            ExportFormat::Pdf => b"%PDF-1.4".to_vec(),
        })
    }

    async fn fetch_image(&self, url: &str) -> Result<Vec<u8>> {
        self.record(Call::FetchDirect(url.to_string()));
        self.inner
            .lock()
            .unwrap()
            .images
            .get(url)
            .cloned()
            .ok_or_else(|| TramaGridError::Transport(format!("blocked by CORS: {url}")))
    }

    async fn fetch_image_via_proxy(&self, url: &str) -> Result<Vec<u8>> {
        self.record(Call::FetchProxy(url.to_string()));
        self.inner
            .lock()
            .unwrap()
            .proxied_images
            .get(url)
            .cloned()
            .ok_or(TramaGridError::Server {
                status: 502,
                detail: Some("upstream unreachable".into()),
            })
    }
}

/// Counts refresh notifications.
pub fn refresh_counter(bus: &RefreshBus) -> Arc<AtomicU64> {
    let count = Arc::new(AtomicU64::new(0));
    let c = count.clone();
    bus.subscribe(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    count
}
