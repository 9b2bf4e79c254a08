//! Project-state snapshots.
//!
//! A snapshot bundles everything needed to restore one image in a saved
//! project: the source path, the engine's opaque layer state, and optional
//! host view settings. Decoding is best-effort: compatibility problems
//! become warnings alongside a usable result, not hard failures.

use serde::{Deserialize, Serialize};

use crate::foundation::error::{BridgeError, BridgeResult};

pub const PROJECT_VERSION: u32 = 1;

/// Host view settings restored per image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub zoom: f64,
    /// Relative scroll position, 0.0-1.0.
    #[serde(default, rename = "scrollX", skip_serializing_if = "is_zero")]
    pub scroll_x: f64,
    /// Relative scroll position, 0.0-1.0.
    #[serde(default, rename = "scrollY", skip_serializing_if = "is_zero")]
    pub scroll_y: f64,
}

fn is_zero(v: &f64) -> bool {
    *v == 0.0
}

/// One image's saved state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectState {
    pub version: u32,
    pub file_path: String,
    /// Opaque layer state from the compositing engine.
    pub layers: String,
    /// `None` in snapshots written before view state existed.
    #[serde(default, rename = "viewState", skip_serializing_if = "Option::is_none")]
    pub view_state: Option<ViewState>,
}

impl ProjectState {
    pub fn encode(&self) -> BridgeResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| BridgeError::content(format!("failed to encode project state: {e}")))
    }

    /// Decode a snapshot, collecting compatibility warnings.
    ///
    /// A malformed document is a [`BridgeError::Content`] failure. A snapshot
    /// written by a newer version decodes as far as it can and yields a
    /// warning; missing view state is silently accepted.
    pub fn decode(bytes: &[u8]) -> BridgeResult<(Self, Vec<String>)> {
        let state: Self = serde_json::from_slice(bytes)
            .map_err(|e| BridgeError::content(format!("malformed project state: {e}")))?;

        let mut warnings = Vec::new();
        if state.version > PROJECT_VERSION {
            warnings.push(format!(
                "project state version {} is newer than supported version {PROJECT_VERSION}; \
                 restoring what this build understands",
                state.version
            ));
        }
        Ok((state, warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let state = ProjectState {
            version: PROJECT_VERSION,
            file_path: "chars/alice.psd".to_string(),
            layers: "V.1".to_string(),
            view_state: Some(ViewState {
                zoom: 2.0,
                scroll_x: 0.25,
                scroll_y: 0.75,
            }),
        };
        let bytes = state.encode().unwrap();
        let (back, warnings) = ProjectState::decode(&bytes).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(back.file_path, state.file_path);
        assert_eq!(back.view_state, state.view_state);
    }

    #[test]
    fn missing_view_state_is_accepted() {
        let json = br#"{"version":1,"file_path":"a.psd","layers":"V.0"}"#;
        let (state, warnings) = ProjectState::decode(json).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(state.view_state, None);
    }

    #[test]
    fn newer_version_warns_but_decodes() {
        let json = br#"{"version":99,"file_path":"a.psd","layers":"V.1"}"#;
        let (state, warnings) = ProjectState::decode(json).unwrap();
        assert_eq!(state.version, 99);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("newer than supported"));
    }

    #[test]
    fn malformed_document_is_content_error() {
        let err = ProjectState::decode(b"{not json").unwrap_err();
        assert!(matches!(err, BridgeError::Content(_)));
        assert!(!err.is_fatal());
    }
}
