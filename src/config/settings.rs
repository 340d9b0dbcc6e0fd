//! User-supplied magnifier settings.
//!
//! These are the values a settings screen (or a JSON file handed to the CLI)
//! feeds into a session before the first frame. They are read once; nothing
//! is written back.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::magnifier::{validate_zoom_bounds, ColorFilterMode, Shape};
use crate::error::{MagnifierError, MagnifierResult};

/// Which shader asset to load: a named asset or the passthrough program.
///
/// Serialized as a plain string id; `null`, `""` and `"none"` all select the
/// passthrough program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum ShaderSelection {
    None,
    Asset(String),
}

impl ShaderSelection {
    pub fn from_id(id: &str) -> Self {
        let id = id.trim();
        if id.is_empty() || id.eq_ignore_ascii_case("none") {
            ShaderSelection::None
        } else {
            ShaderSelection::Asset(id.to_string())
        }
    }

    pub fn as_id(&self) -> Option<&str> {
        match self {
            ShaderSelection::None => None,
            ShaderSelection::Asset(id) => Some(id),
        }
    }
}

impl From<Option<String>> for ShaderSelection {
    fn from(value: Option<String>) -> Self {
        value
            .as_deref()
            .map(ShaderSelection::from_id)
            .unwrap_or(ShaderSelection::None)
    }
}

impl From<ShaderSelection> for Option<String> {
    fn from(value: ShaderSelection) -> Self {
        match value {
            ShaderSelection::None => None,
            ShaderSelection::Asset(id) => Some(id),
        }
    }
}

fn default_region_size() -> u32 {
    200
}

fn default_output_size() -> u32 {
    500
}

fn default_zoom() -> f32 {
    2.5
}

fn default_min_zoom() -> f32 {
    1.5
}

fn default_max_zoom() -> f32 {
    10.0
}

fn default_zoom_step() -> f32 {
    0.5
}

fn default_shader() -> ShaderSelection {
    ShaderSelection::Asset("2xbr".to_string())
}

/// Magnifier settings as supplied by the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MagnifierSettings {
    #[serde(default)]
    pub shape: Shape,
    #[serde(default)]
    pub region_x: i32,
    #[serde(default)]
    pub region_y: i32,
    #[serde(default = "default_region_size")]
    pub region_size: u32,
    #[serde(default = "default_output_size")]
    pub output_size: u32,
    #[serde(default = "default_zoom")]
    pub zoom: f32,
    #[serde(default = "default_min_zoom")]
    pub min_zoom: f32,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: f32,
    #[serde(default = "default_zoom_step")]
    pub zoom_step: f32,
    #[serde(default)]
    pub color_filter: ColorFilterMode,
    #[serde(default = "default_shader")]
    pub shader: ShaderSelection,
}

impl Default for MagnifierSettings {
    fn default() -> Self {
        Self {
            shape: Shape::Square,
            region_x: 0,
            region_y: 0,
            region_size: default_region_size(),
            output_size: default_output_size(),
            zoom: default_zoom(),
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            zoom_step: default_zoom_step(),
            color_filter: ColorFilterMode::Normal,
            shader: default_shader(),
        }
    }
}

impl MagnifierSettings {
    pub fn from_json(json: &str) -> MagnifierResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> MagnifierResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        log::debug!("[CONFIG] Loading settings from {}", path.display());
        Self::from_json(&json)
    }

    /// Validate settings.
    pub fn validate(&self) -> MagnifierResult<()> {
        if self.region_size == 0 {
            return Err(MagnifierError::config("regionSize", "must be greater than 0"));
        }
        if self.output_size == 0 {
            return Err(MagnifierError::config("outputSize", "must be greater than 0"));
        }
        validate_zoom_bounds(self.min_zoom, self.max_zoom)?;
        if !self.zoom.is_finite() || self.zoom <= 0.0 {
            return Err(MagnifierError::config("zoom", "must be a positive number"));
        }
        if !self.zoom_step.is_finite() || self.zoom_step <= 0.0 {
            return Err(MagnifierError::config("zoomStep", "must be a positive number"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let settings = MagnifierSettings::from_json("{}").unwrap();
        assert_eq!(settings, MagnifierSettings::default());
    }

    #[test]
    fn camel_case_fields() {
        let settings = MagnifierSettings::from_json(
            r#"{
                "shape": "circle",
                "regionX": -20,
                "regionSize": 150,
                "outputSize": 400,
                "colorFilter": "inverse",
                "shader": "scanlines"
            }"#,
        )
        .unwrap();
        assert_eq!(settings.shape, Shape::Circle);
        assert_eq!(settings.region_x, -20);
        assert_eq!(settings.region_size, 150);
        assert_eq!(settings.output_size, 400);
        assert_eq!(settings.color_filter, ColorFilterMode::Inverse);
        assert_eq!(settings.shader.as_id(), Some("scanlines"));
    }

    #[test]
    fn shader_none_variants() {
        for json in [r#"{"shader": null}"#, r#"{"shader": ""}"#, r#"{"shader": "none"}"#] {
            let settings = MagnifierSettings::from_json(json).unwrap();
            assert_eq!(settings.shader, ShaderSelection::None);
        }
    }

    #[test]
    fn rejects_bad_values() {
        assert!(MagnifierSettings::from_json(r#"{"minZoom": 3, "maxZoom": 2}"#).is_err());
        assert!(MagnifierSettings::from_json(r#"{"outputSize": 0}"#).is_err());
        assert!(MagnifierSettings::from_json(r#"{"zoom": -1}"#).is_err());
        assert!(matches!(
            MagnifierSettings::from_json("not json"),
            Err(MagnifierError::Json(_))
        ));
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"zoom": 4.0}"#).unwrap();
        let settings = MagnifierSettings::from_file(&path).unwrap();
        assert_eq!(settings.zoom, 4.0);

        let missing = MagnifierSettings::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(MagnifierError::Io(_))));
    }
}
