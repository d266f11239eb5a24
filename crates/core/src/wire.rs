use serde::{Deserialize, Serialize};
use snafu::ensure;

use super::error::{CoreResult, InvalidBoxGeometrySnafu, MissingLabelSnafu};
use super::geometry::NormalizedRect;
use super::ids::ServerBoxId;

/// Persisted shape of one annotated region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireBox {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ServerBoxId>,
    #[serde(alias = "page_number")]
    pub page_number: i64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub label: String,
    #[serde(default, alias = "enhanced_s3_path")]
    pub enhanced_asset_ref: Option<String>,
    #[serde(default, alias = "use_enhanced")]
    pub use_enhanced: bool,
}

impl WireBox {
    pub fn rect(&self) -> NormalizedRect {
        NormalizedRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }

    /// Rejects rows that cannot be placed on a page.
    ///
    /// Rows that overshoot the page edge by a rounding error are accepted and
    /// clipped by the engine when ingested.
    pub fn validate(&self) -> CoreResult<()> {
        ensure!(
            !self.label.trim().is_empty(),
            MissingLabelSnafu {
                stage: "validate-wire-box",
                page_number: self.page_number,
            }
        );
        ensure!(
            self.rect().is_within_page(),
            InvalidBoxGeometrySnafu {
                stage: "validate-wire-box",
                label: self.label.clone(),
                details: format!(
                    "x={} y={} width={} height={}",
                    self.x, self.y, self.width, self.height
                ),
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;

    #[test]
    fn serializes_camel_case_without_local_id() {
        let wire = WireBox {
            id: None,
            page_number: 2,
            x: 0.1,
            y: 0.2,
            width: 0.3,
            height: 0.4,
            label: "DIAGRAM-1".to_string(),
            enhanced_asset_ref: None,
            use_enhanced: false,
        };
        let json = serde_json::to_value(&wire).expect("serialize");
        assert_eq!(json["pageNumber"], 2);
        assert_eq!(json["enhancedAssetRef"], serde_json::Value::Null);
        assert_eq!(json["useEnhanced"], false);
        assert!(json.get("id").is_none());
    }

    #[test]
    fn accepts_backend_snake_case_rows() {
        let wire: WireBox = serde_json::from_str(
            r#"{"id":7,"job_id":"x","page_number":0,"x":0.1,"y":0.1,"width":0.2,"height":0.2,
                "label":"DIAGRAM-1","enhanced_s3_path":"enhanced/a.png","use_enhanced":true}"#,
        )
        .expect("backend row");
        assert_eq!(wire.id, Some(ServerBoxId::new(7)));
        assert_eq!(wire.enhanced_asset_ref.as_deref(), Some("enhanced/a.png"));
        assert!(wire.use_enhanced);
        assert!(wire.validate().is_ok());
    }

    #[test]
    fn validate_rejects_overflowing_and_unlabeled_rows() {
        let mut wire: WireBox = serde_json::from_str(
            r#"{"pageNumber":1,"x":0.9,"y":0.1,"width":0.5,"height":0.2,"label":"DIAGRAM-1"}"#,
        )
        .expect("row");
        assert!(matches!(
            wire.validate(),
            Err(CoreError::InvalidBoxGeometry { .. })
        ));

        wire.width = 0.1;
        wire.label = "  ".to_string();
        assert!(matches!(wire.validate(), Err(CoreError::MissingLabel { .. })));
    }
}
