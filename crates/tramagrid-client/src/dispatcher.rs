//! Mutation Dispatcher: one call per editing operation.
//!
//! Each call is a single independent request; nothing is queued or batched.
//! An accepted mutation publishes one refresh; a failed or rejected one
//! publishes nothing. Without a session the call is a no-op and never reaches
//! the network.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use tramagrid_core::error::{Result, TramaGridError};
use tramagrid_core::types::{ColorIndex, GridParams, MutationRequest, Region, SourceImage};

use crate::bus::RefreshBus;
use crate::gateway::CanvasGateway;
use crate::state::ClientState;

const ADD_COLOR_FALLBACK: &str = "Failed to add color";

/// Where the merge gesture stands after a palette click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeProgress {
    /// Gesture not armed; the click was ignored.
    Idle,
    /// Waiting for the target color.
    SourceSelected(ColorIndex),
    Merged { from: ColorIndex, to: ColorIndex },
}

pub struct MutationDispatcher {
    gateway: Arc<dyn CanvasGateway>,
    state: Arc<ClientState>,
    bus: Arc<RefreshBus>,
}

/// The server's `ok` flag. Success responses without one count as accepted.
fn accepted(value: &Value) -> bool {
    value.get("ok").and_then(Value::as_bool).unwrap_or(true)
}

impl MutationDispatcher {
    pub fn new(
        gateway: Arc<dyn CanvasGateway>,
        state: Arc<ClientState>,
        bus: Arc<RefreshBus>,
    ) -> Self {
        Self {
            gateway,
            state,
            bus,
        }
    }

    /// Send without publishing. `None` means there was no session.
    async fn send(&self, request: &MutationRequest) -> Result<Option<Value>> {
        let Some(session_id) = self.state.session_id().await else {
            debug!(endpoint = request.endpoint(), "No session, mutation skipped");
            return Ok(None);
        };
        match self.gateway.mutate(&session_id, request).await {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(endpoint = request.endpoint(), error = %e, "Mutation failed");
                Err(e)
            }
        }
    }

    /// Mutations that report acceptance.
    async fn acknowledged(&self, request: MutationRequest) -> Result<bool> {
        let Some(value) = self.send(&request).await? else {
            return Ok(false);
        };
        let ok = accepted(&value);
        if ok {
            self.bus.publish();
        } else {
            debug!(endpoint = request.endpoint(), "Mutation rejected by server");
        }
        Ok(ok)
    }

    async fn apply(&self, request: MutationRequest) -> Result<()> {
        if self.send(&request).await?.is_some() {
            self.bus.publish();
        }
        Ok(())
    }

    /// Apply without notifying subscribers; the caller publishes later.
    pub(crate) async fn apply_silently(
        &self,
        session_id: &str,
        request: &MutationRequest,
    ) -> Result<()> {
        self.gateway.mutate(session_id, request).await?;
        Ok(())
    }

    async fn require_session(&self) -> Result<String> {
        self.state
            .session_id()
            .await
            .ok_or(TramaGridError::NoSession)
    }

    /// Paint a cell with the active color. Returns whether the server accepted it.
    pub async fn paint(&self, x: u32, y: u32) -> Result<bool> {
        let color_index = self.state.active_color();
        self.acknowledged(MutationRequest::Paint { x, y, color_index })
            .await
    }

    /// Returns false when there was nothing to undo.
    pub async fn undo(&self) -> Result<bool> {
        self.acknowledged(MutationRequest::Undo).await
    }

    /// Returns false when there was nothing to redo.
    pub async fn redo(&self) -> Result<bool> {
        self.acknowledged(MutationRequest::Redo).await
    }

    pub async fn merge_colors(&self, from: ColorIndex, to: ColorIndex) -> Result<()> {
        self.apply(MutationRequest::MergeColors { from, to }).await
    }

    pub async fn merge_batch(&self, from: &[ColorIndex], to: ColorIndex) -> Result<()> {
        self.apply(MutationRequest::MergeBatch {
            from: from.to_vec(),
            to,
        })
        .await
    }

    pub async fn replace_color(&self, index: ColorIndex, new_color: &str) -> Result<()> {
        self.apply(MutationRequest::ReplaceColor {
            index,
            new_color: new_color.to_string(),
        })
        .await
    }

    pub async fn delete_color(&self, index: ColorIndex) -> Result<()> {
        self.apply(MutationRequest::DeleteColor { index }).await
    }

    /// Add a palette color, returning its index.
    ///
    /// A server refusal (palette full, bad hex) becomes
    /// [`TramaGridError::Rejected`] carrying the server's message.
    pub async fn add_color(&self, color: &str) -> Result<ColorIndex> {
        let session_id = self.require_session().await?;
        let request = MutationRequest::AddColor {
            color: color.to_string(),
        };
        let value = match self.gateway.mutate(&session_id, &request).await {
            Ok(value) => value,
            Err(TramaGridError::Server { status, detail }) => {
                warn!(status, detail = ?detail, "Color add rejected");
                return Err(TramaGridError::Rejected(
                    detail.unwrap_or_else(|| ADD_COLOR_FALLBACK.to_string()),
                ));
            }
            Err(e) => return Err(e),
        };

        let index = value
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| ColorIndex::try_from(i).ok());
        match index {
            Some(index) => {
                self.bus.publish();
                Ok(index)
            }
            None => {
                let detail = value
                    .get("detail")
                    .and_then(Value::as_str)
                    .unwrap_or(ADD_COLOR_FALLBACK);
                Err(TramaGridError::Rejected(detail.to_string()))
            }
        }
    }

    pub async fn replace_region(
        &self,
        region: Region,
        from: ColorIndex,
        to: ColorIndex,
    ) -> Result<()> {
        self.apply(MutationRequest::ReplaceRegion { region, from, to })
            .await
    }

    pub async fn update_params(&self, settings: GridParams) -> Result<()> {
        self.apply(MutationRequest::UpdateParams { settings }).await
    }

    /// Upload the session's source image. Nothing renderable changes until
    /// [`Self::generate_grid`], so no refresh is published.
    pub async fn upload_image(&self, image: &SourceImage) -> Result<()> {
        let session_id = self.require_session().await?;
        self.gateway.upload_image(&session_id, image).await
    }

    pub async fn generate_grid(&self) -> Result<()> {
        let session_id = self.require_session().await?;
        self.gateway.generate_grid(&session_id).await?;
        self.bus.publish();
        Ok(())
    }

    /// Arm the merge gesture; the next two palette picks choose source and target.
    pub fn begin_merge(&self) {
        self.state.update_merge(|m| m.begin());
    }

    pub fn cancel_merge(&self) {
        self.state.update_merge(|m| m.cancel());
    }

    /// Feed a palette pick into the merge gesture, merging once both ends are chosen.
    pub async fn merge_pick(&self, index: ColorIndex) -> Result<MergeProgress> {
        let (pair, merge) = self.state.update_merge(|m| (m.pick(index), *m));
        if let Some((from, to)) = pair {
            self.merge_colors(from, to).await?;
            return Ok(MergeProgress::Merged { from, to });
        }
        Ok(match merge.source_index {
            Some(source) if merge.active => MergeProgress::SourceSelected(source),
            _ => MergeProgress::Idle,
        })
    }
}
