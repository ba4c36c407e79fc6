use crate::builder::BuildOptions;
use crate::error::{Result, SceneGraphError};
use crate::export::RenderFormat;
use crate::fusion::FusionConfig;
use crate::geometry::BoxScale;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "SGFUSION_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SgConfig {
    #[serde(default)]
    pub fusion: FusionSection,
    #[serde(default)]
    pub build: BuildSection,
    #[serde(default)]
    pub render: RenderSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusionSection {
    pub min_iou: f64,
    pub carry_scores: bool,
    /// Frame size `[width, height]` for normalized STEP boxes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_frame: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildSection {
    pub min_obj_score: f64,
    pub min_rel_score: f64,
    pub postprocess_attributes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderSection {
    pub format: RenderFormat,
    pub dot_program: String,
}

impl Default for FusionSection {
    fn default() -> Self {
        Self {
            min_iou: 0.0,
            carry_scores: false,
            normalized_frame: None,
        }
    }
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            min_obj_score: 0.0,
            min_rel_score: 0.0,
            postprocess_attributes: false,
        }
    }
}

impl Default for RenderSection {
    fn default() -> Self {
        Self {
            format: RenderFormat::Pdf,
            dot_program: "dot".to_string(),
        }
    }
}

impl FusionSection {
    pub fn to_fusion_config(&self) -> FusionConfig {
        FusionConfig {
            min_iou: self.min_iou,
            box_scale: match self.normalized_frame {
                Some([width, height]) => BoxScale::Normalized { width, height },
                None => BoxScale::Pixel,
            },
            carry_scores: self.carry_scores,
        }
    }
}

impl BuildSection {
    pub fn to_build_options(&self) -> BuildOptions {
        BuildOptions {
            min_obj_score: self.min_obj_score,
            min_rel_score: self.min_rel_score,
            postprocess_attributes: self.postprocess_attributes,
            visual_labels: None,
        }
    }
}

impl SgConfig {
    /// Resolve the configuration: an explicit path wins, then `$SGFUSION_CONFIG`,
    /// then the user config file.
    ///
    /// An explicitly named file must exist and parse; the user config file
    /// falls back to defaults when absent.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from));
        if let Some(path) = named {
            return Self::from_file(&path);
        }

        if let Some(path) = Self::config_file_path()
            && path.exists()
        {
            return Self::from_file(&path);
        }
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SceneGraphError::io(path, e))?;
        toml::from_str(&content)
            .map_err(|e| SceneGraphError::malformed(format!("config {}: {}", path.display(), e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SceneGraphError::io(parent, e))?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| SceneGraphError::malformed(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| SceneGraphError::io(path, e))
    }

    pub fn config_file_path() -> Option<PathBuf> {
        Self::config_dir().map(|mut path| {
            path.push("config.toml");
            path
        })
    }

    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push("sgfusion");
            path
        })
    }
}
