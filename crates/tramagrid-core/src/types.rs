//! Data model shared by the gateway, dispatcher, reader, and import pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A palette slot as addressed by the server.
pub type ColorIndex = u32;

/// An editing session issued by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub valid: bool,
}

impl Session {
    pub fn active(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            valid: true,
        }
    }
}

/// Zero-payload "something changed server-side, re-fetch" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshEvent;

/// A rectangle on the grid. The server clips it to the image bounds, so the
/// origin may be negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

/// Grid generation parameters. Unset fields are left untouched by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_colors: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_width_cells: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contrast: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saturation: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gamma: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posterize: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gauge_stitches: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gauge_rows: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_grid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlighted_row: Option<i32>,
}

impl GridParams {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One palette entry with its current pixel usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub index: ColorIndex,
    pub hex: String,
    #[serde(default)]
    pub count: u64,
}

/// A run of identical colors within one row, in stitching order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowRun {
    pub count: u32,
    pub hex: String,
}

/// Palette indices the server considers close enough to merge.
pub type ColorCluster = Vec<ColorIndex>;

/// Every state-changing request the client can issue against a session.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationRequest {
    Paint {
        x: u32,
        y: u32,
        color_index: ColorIndex,
    },
    Undo,
    Redo,
    MergeColors {
        from: ColorIndex,
        to: ColorIndex,
    },
    MergeBatch {
        from: Vec<ColorIndex>,
        to: ColorIndex,
    },
    ReplaceColor {
        index: ColorIndex,
        new_color: String,
    },
    DeleteColor {
        index: ColorIndex,
    },
    AddColor {
        color: String,
    },
    ReplaceRegion {
        region: Region,
        from: ColorIndex,
        to: ColorIndex,
    },
    UpdateParams {
        settings: GridParams,
    },
}

impl MutationRequest {
    /// Path segment under `/api/` (the session id is appended after it).
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Paint { .. } => "paint",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::MergeColors { .. } => "merge",
            Self::MergeBatch { .. } => "merge-batch",
            Self::ReplaceColor { .. } => "color/replace",
            Self::DeleteColor { .. } => "color/delete",
            Self::AddColor { .. } => "color/add",
            Self::ReplaceRegion { .. } => "region/replace",
            Self::UpdateParams { .. } => "params",
        }
    }

    /// JSON body, or `None` for bodiless requests.
    pub fn body(&self) -> Option<serde_json::Value> {
        let body = match self {
            Self::Paint { x, y, color_index } => json!({
                "x": x,
                "y": y,
                "color_index": color_index,
            }),
            Self::Undo | Self::Redo => return None,
            Self::MergeColors { from, to } => json!({
                "from_index": from,
                "to_index": to,
            }),
            Self::MergeBatch { from, to } => json!({
                "from_indices": from,
                "to_index": to,
            }),
            Self::ReplaceColor { index, new_color } => json!({
                "index": index,
                "new_hex": new_color,
            }),
            Self::DeleteColor { index } => json!({ "index": index }),
            Self::AddColor { color } => json!({ "hex": color }),
            Self::ReplaceRegion { region, from, to } => json!({
                "x": region.x,
                "y": region.y,
                "w": region.w,
                "h": region.h,
                "from_index": from,
                "to_index": to,
            }),
            Self::UpdateParams { settings } => {
                serde_json::to_value(settings).unwrap_or_else(|_| json!({}))
            }
        };
        Some(body)
    }
}

/// Cacheable snapshot reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRequest {
    Palette,
    Grid,
    RowSummary { row: u32 },
    Params,
    Clusters,
}

impl ReadRequest {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Palette => "palette",
            Self::Grid => "grid",
            Self::RowSummary { .. } => "row-summary",
            Self::Params => "params",
            Self::Clusters => "clusters",
        }
    }

    /// Extra query parameters besides the cache-busting token.
    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::RowSummary { row } => vec![("row", row.to_string())],
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Png,
    Pdf,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Pdf => "pdf",
        }
    }
}

/// Image bytes to upload as a session's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime: String,
}

impl SourceImage {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            mime: mime.into(),
        }
    }

    /// Source image of a restored project. Stored projects are always PNG.
    pub fn project_source(bytes: Vec<u8>) -> Self {
        Self::new(bytes, "project_source.png", "image/png")
    }
}

/// A stored project to materialize into a fresh session.
///
/// Older projects used `image_path` and `params`; current ones use
/// `image_url` and `settings`. Both spellings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<GridParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<GridParams>,
}

impl ImportDescriptor {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            image_url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_settings(mut self, settings: GridParams) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Image location, preferring `image_url` over the legacy `image_path`.
    pub fn image_location(&self) -> Option<&str> {
        [&self.image_url, &self.image_path]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.trim().is_empty())
    }

    /// Settings to apply, preferring `settings` over the legacy `params`.
    pub fn parameters(&self) -> Option<&GridParams> {
        self.settings.as_ref().or(self.params.as_ref())
    }
}

/// Steps of the import transaction, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStep {
    ResolveImage,
    CreateSession,
    Upload,
    ApplySettings,
    Generate,
}

impl fmt::Display for ImportStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ResolveImage => "fetch the source image",
            Self::CreateSession => "create a session",
            Self::Upload => "upload the source image",
            Self::ApplySettings => "apply the project settings",
            Self::Generate => "generate the grid",
        };
        f.write_str(s)
    }
}

/// Local state of the two-click "pick source, then target" merge gesture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeUiState {
    pub active: bool,
    pub source_index: Option<ColorIndex>,
}

impl MergeUiState {
    pub fn begin(&mut self) {
        self.active = true;
        self.source_index = None;
    }

    pub fn cancel(&mut self) {
        *self = Self::default();
    }

    /// Feed a palette click into the gesture. Returns `(from, to)` once both
    /// ends are known, disarming the gesture.
    pub fn pick(&mut self, index: ColorIndex) -> Option<(ColorIndex, ColorIndex)> {
        if !self.active {
            return None;
        }
        match self.source_index {
            None => {
                self.source_index = Some(index);
                None
            }
            Some(source) if source == index => None,
            Some(source) => {
                self.cancel();
                Some((source, index))
            }
        }
    }
}
