//! Import Orchestrator: materialize a stored project into a fresh session.
//!
//! Fetch the source image, create a session, upload, apply settings, generate.
//! Either every step succeeds or the new session is torn down.

use std::sync::Arc;

use tracing::{debug, info, warn};

use tramagrid_core::error::{Result, TramaGridError};
use tramagrid_core::types::{ImportDescriptor, ImportStep, MutationRequest, SourceImage};

use crate::dispatcher::MutationDispatcher;
use crate::gateway::CanvasGateway;
use crate::session::SessionManager;

type StepResult<T> = std::result::Result<T, (ImportStep, TramaGridError)>;

fn at(step: ImportStep) -> impl FnOnce(TramaGridError) -> (ImportStep, TramaGridError) {
    move |e| (step, e)
}

pub struct ImportOrchestrator {
    gateway: Arc<dyn CanvasGateway>,
    sessions: Arc<SessionManager>,
    dispatcher: Arc<MutationDispatcher>,
}

impl ImportOrchestrator {
    pub fn new(
        gateway: Arc<dyn CanvasGateway>,
        sessions: Arc<SessionManager>,
        dispatcher: Arc<MutationDispatcher>,
    ) -> Self {
        Self {
            gateway,
            sessions,
            dispatcher,
        }
    }

    /// Run the import. On success the new session is active and exactly one
    /// refresh has been published. On failure no session is left active and
    /// the error names the step that failed.
    ///
    /// A failure before the new session exists only clears the in-memory id;
    /// the persisted id of an earlier session is left for a later restore.
    pub async fn import_project(&self, descriptor: &ImportDescriptor) -> Result<bool> {
        match self.run(descriptor).await {
            Ok(session_id) => {
                info!(session_id = %session_id, "Project imported");
                Ok(true)
            }
            Err((step, source)) => {
                warn!(%step, error = %source, "Project import failed, rolling back");
                if step == ImportStep::ResolveImage {
                    self.sessions.deactivate().await;
                } else {
                    self.sessions.purge().await;
                }
                Err(TramaGridError::Import {
                    step,
                    source: Box::new(source),
                })
            }
        }
    }

    async fn run(&self, descriptor: &ImportDescriptor) -> StepResult<String> {
        let location = descriptor.image_location().ok_or_else(|| {
            (
                ImportStep::ResolveImage,
                TramaGridError::InvalidDescriptor("project has no image location".into()),
            )
        })?;

        let bytes = self
            .resolve_image(location)
            .await
            .map_err(at(ImportStep::ResolveImage))?;
        info!(bytes = bytes.len(), "Source image fetched");

        let session = self
            .sessions
            .create_session()
            .await
            .map_err(at(ImportStep::CreateSession))?;

        self.dispatcher
            .upload_image(&SourceImage::project_source(bytes))
            .await
            .map_err(at(ImportStep::Upload))?;
        info!(session_id = %session.id, "Source image uploaded");

        if let Some(settings) = descriptor.parameters().filter(|p| !p.is_empty()) {
            let request = MutationRequest::UpdateParams {
                settings: settings.clone(),
            };
            // Silent: the generate step publishes the only refresh
            self.dispatcher
                .apply_silently(&session.id, &request)
                .await
                .map_err(at(ImportStep::ApplySettings))?;
            info!(session_id = %session.id, "Project settings applied");
        }

        self.dispatcher
            .generate_grid()
            .await
            .map_err(at(ImportStep::Generate))?;

        Ok(session.id)
    }

    /// Direct download first, then exactly one attempt through the server proxy.
    async fn resolve_image(&self, url: &str) -> Result<Vec<u8>> {
        match self.gateway.fetch_image(url).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                debug!(url, error = %e, "Direct image fetch failed, using proxy");
                self.gateway.fetch_image_via_proxy(url).await
            }
        }
    }
}
