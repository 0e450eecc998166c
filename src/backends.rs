//! Backend registry.
//!
//! Holds the resolved list of model backends and picks the one a request
//! runs against. The registry performs no I/O.

use crate::errors::NlshError;
use serde::{Deserialize, Serialize};

/// Image size limit applied when a backend does not declare one.
pub const DEFAULT_MAX_IMAGE_SIZE_MB: f64 = 20.0;

/// Name fragments that mark a model as emitting reasoning tokens.
const REASONING_NAME_MARKERS: &[&str] = &["reason", "think"];
/// Short markers that must match a whole name segment (`deepseek-r1`, `o3-mini`).
const REASONING_NAME_SEGMENTS: &[&str] = &["r1", "o1", "o3", "o4"];

/// A configured OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(rename = "url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    pub model: String,
    #[serde(default)]
    pub supports_vision: bool,
    #[serde(default)]
    pub max_image_size_mb: Option<f64>,
    #[serde(default)]
    pub is_reasoning_model: bool,
}

impl BackendConfig {
    /// Whether this backend streams reasoning tokens.
    ///
    /// The explicit flag is authoritative. The model-name check is a
    /// best-effort fallback and can misclassify custom model names.
    pub fn reasoning_enabled(&self) -> bool {
        if self.is_reasoning_model {
            return true;
        }
        let model = self.model.to_lowercase();
        if REASONING_NAME_MARKERS.iter().any(|m| model.contains(m)) {
            return true;
        }
        model
            .split(|c: char| matches!(c, '-' | '/' | ':' | '.' | '_'))
            .any(|segment| REASONING_NAME_SEGMENTS.contains(&segment))
    }

    /// Effective image size limit in megabytes.
    pub fn image_limit_mb(&self) -> f64 {
        self.max_image_size_mb.unwrap_or(DEFAULT_MAX_IMAGE_SIZE_MB)
    }

    /// Chat completions endpoint for this backend.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Resolved, immutable set of backends.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    backends: Vec<BackendConfig>,
    default_index: usize,
}

impl BackendRegistry {
    pub fn new(backends: Vec<BackendConfig>, default_index: usize) -> Self {
        Self {
            backends,
            default_index,
        }
    }

    /// Picks the backend for a request.
    ///
    /// `index` falls back to the configured default. When `has_image` is set
    /// the chosen backend must accept image input.
    pub fn select(&self, index: Option<usize>, has_image: bool) -> Result<&BackendConfig, NlshError> {
        let index = index.unwrap_or(self.default_index);
        let backend = self.backends.get(index).ok_or(NlshError::BackendNotFound {
            index,
            available: self.backends.len(),
        })?;

        if has_image && !backend.supports_vision {
            return Err(NlshError::BackendNotVisionCapable {
                backend: backend.name.clone(),
            });
        }

        Ok(backend)
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
