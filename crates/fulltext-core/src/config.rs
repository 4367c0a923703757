use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::addressing::ShardLayout;
use crate::error::Result;

/// Root configuration, loaded from `~/.config/fulltext/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FulltextConfig {
    pub store: StoreConfig,
    pub extraction: ExtractionConfig,
    pub pdf: PdfConfig,
    pub http: HttpConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_pdf: Option<StructuredPdfConfig>,
    pub facilities: FacilitiesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the sharded artifact tree.
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Replaces the bundled extraction rules when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules_path: Option<String>,
    pub max_word_length: usize,
    /// Records processed at the same time by a batch run.
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PdfConfig {
    /// Executable invoked with the PDF path; prints the text on stdout.
    pub converter: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuredPdfConfig {
    pub url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FacilitiesConfig {
    pub enabled: bool,
    pub names: Vec<String>,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for StoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("fulltext")
            .join("live");
        Self {
            root: data_dir.to_string_lossy().to_string(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            rules_path: None,
            max_word_length: 200,
            concurrency: 8,
        }
    }
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            converter: "scripts/extract_pdf_with_pdftotext.sh".to_string(),
            timeout_secs: 300,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "ADSClient".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for StructuredPdfConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8070/api/processFulltextDocument".to_string(),
            timeout_secs: 120,
        }
    }
}

impl Default for FacilitiesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            names: [
                "ALMA",
                "Chandra",
                "Gaia",
                "Hubble Space Telescope",
                "Keck",
                "Spitzer",
                "VLA",
                "VLT",
                "XMM-Newton",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl FulltextConfig {
    /// Standard config file path: `~/.config/fulltext/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("FULLTEXT_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("fulltext")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = Self::load_from(&path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load config from a specific path. Environment overrides are not applied.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(root) = std::env::var("FULLTEXT_EXTRACT_PATH")
            && !root.is_empty()
        {
            self.store.root = root;
        }
    }

    // ─── Derived ───────────────────────────────────────────

    pub fn layout(&self) -> ShardLayout {
        ShardLayout::new(&self.store.root)
    }

    pub fn rules_path(&self) -> Option<PathBuf> {
        self.extraction.rules_path.as_ref().map(PathBuf::from)
    }
}
