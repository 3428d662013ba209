//! Configuration loading and validation for apkport.
//!
//! Settings are layered with [`figment`], later layers winning:
//!
//! 1. Built-in defaults ([`Settings::default`]).
//! 2. A configuration file. TOML, JSON and YAML are supported and picked by
//!    extension. Without an explicit path, `config.toml` in the platform
//!    configuration directory is used if it exists.
//! 3. Environment variables prefixed with `APKPORT_`, using `__` to reach
//!    nested keys (`APKPORT_EXPORT__COMPRESSION=high`).

pub mod error;

use crate::error::{ErrorKind, Result};
use apkport_archive::{CompressionLevel, DEFAULT_BUNDLE_EXTENSION};
use directories::{BaseDirs, ProjectDirs};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "APKPORT_";
pub const DEFAULT_PACKAGE_TEMPLATE: &str = "{{ package }}-{{ version.code }}";
pub const DEFAULT_BUNDLE_TEMPLATE: &str = "{{ package }}-{{ version.code }}";
pub const DEFAULT_EXPORT_RETRIES: u32 = 2;

/// Which roots the archive scanner walks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanScope {
    /// Main storage, plus the document tree if one is granted.
    #[default]
    All,
    /// Only the configured output destination.
    ExportLocation,
}

/// Ordering of the scanned import list. Ties keep scan order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortOrder {
    #[default]
    ScanOrder,
    NameAscending,
    NameDescending,
    SizeAscending,
    SizeDescending,
    ModifiedAscending,
    ModifiedDescending,
}

/// Which backend receives package outputs and exported archives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputBackend {
    #[default]
    Direct,
    DocumentTree,
}

/// A permission-scoped document tree the user has granted access to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeGrant {
    /// Where the granted root is reachable on this host.
    pub root: PathBuf,
    /// Label shown in place of the root in display paths.
    #[serde(default = "default_tree_label")]
    pub label: String,
    /// Segments beneath the root to find-or-create for output.
    #[serde(default)]
    pub segments: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSettings {
    pub scope: ScanScope,
    /// One more extension to accept on top of the built-in archive ones.
    pub custom_extension: Option<String>,
    pub sort: SortOrder,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    pub backend: OutputBackend,
    /// Destination directory for the direct backend.
    pub path: PathBuf,
    pub tree: Option<TreeGrant>,
}

/// File-name templates, rendered with `upon`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Templates {
    /// Name of a bare package output, without extension.
    pub package: String,
    /// Name of a bundle output, without extension.
    pub bundle: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSettings {
    pub bundle_extension: String,
    pub compression: CompressionLevel,
    /// Additional attempts for an item whose export failed.
    pub retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Root of the device's main storage. Data and expansion files are
    /// restored beneath it.
    pub storage_root: PathBuf,
    pub scan: ScanSettings,
    pub output: OutputSettings,
    pub templates: Templates,
    pub export: ExportSettings,
}

fn default_tree_label() -> String {
    "tree".to_string()
}

fn default_storage_root() -> PathBuf {
    BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()).unwrap_or_else(|| PathBuf::from("/"))
}

impl Default for Settings {
    fn default() -> Self {
        let storage_root = default_storage_root();
        Self {
            output: OutputSettings { backend: OutputBackend::Direct, path: storage_root.join("apkport"), tree: None },
            storage_root,
            scan: ScanSettings { scope: ScanScope::All, custom_extension: None, sort: SortOrder::ScanOrder },
            templates: Templates {
                package: DEFAULT_PACKAGE_TEMPLATE.to_string(),
                bundle: DEFAULT_BUNDLE_TEMPLATE.to_string(),
            },
            export: ExportSettings {
                bundle_extension: DEFAULT_BUNDLE_EXTENSION.to_string(),
                compression: CompressionLevel::Default,
                retries: DEFAULT_EXPORT_RETRIES,
            },
        }
    }
}

impl Settings {
    /// Platform default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "apkport").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load settings from defaults, a configuration file and the environment.
    ///
    /// An explicit `path` must exist; the platform default is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) if !path.exists() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.exists()),
        };
        let mut figment = Self::figment(file.as_deref())?;
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(&figment)
    }

    /// Defaults plus an optional configuration file, without the environment.
    pub fn figment(file: Option<&Path>) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        let Some(file) = file else {
            return Ok(figment);
        };
        tracing::debug!(path = %file.display(), "loading configuration file");
        let extension = file.extension().and_then(|ext| ext.to_str()).map(str::to_lowercase);
        Ok(match extension.as_deref() {
            Some("toml") => figment.merge(Toml::file(file)),
            Some("json") => figment.merge(Json::file(file)),
            Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
            _ => exn::bail!(ErrorKind::UnsupportedFormat(file.to_path_buf())),
        })
    }

    pub fn extract(figment: &Figment) -> Result<Self> {
        let settings: Self = figment.extract().map_err(|e| ErrorKind::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject combinations the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !self.storage_root.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!(
                "storage root must be absolute: {}",
                self.storage_root.display()
            )));
        }
        match (self.output.backend, &self.output.tree) {
            (OutputBackend::Direct, _) if !self.output.path.is_absolute() => exn::bail!(ErrorKind::Invalid(format!(
                "output path must be absolute: {}",
                self.output.path.display()
            ))),
            (OutputBackend::DocumentTree, None) => {
                exn::bail!(ErrorKind::Invalid("document tree output requires a tree grant".to_string()))
            },
            _ => {},
        }
        if let Some(tree) = &self.output.tree {
            if !tree.root.is_absolute() {
                exn::bail!(ErrorKind::Invalid(format!("tree root must be absolute: {}", tree.root.display())));
            }
            if let Some(segment) = tree.segments.iter().find(|s| s.is_empty() || s.contains(['/', '\\'])) {
                exn::bail!(ErrorKind::Invalid(format!("invalid tree segment: {segment:?}")));
            }
        }
        if self.templates.package.trim().is_empty() || self.templates.bundle.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("file name templates must not be empty".to_string()));
        }
        let extension = self.bundle_extension();
        if extension.is_empty() || extension.contains(['/', '\\']) {
            exn::bail!(ErrorKind::Invalid(format!("invalid bundle extension: {:?}", self.export.bundle_extension)));
        }
        if let Some(custom) = self.custom_extension()
            && (custom.is_empty() || custom.contains(['/', '\\']))
        {
            exn::bail!(ErrorKind::Invalid(format!("invalid custom extension: {custom:?}")));
        }
        Ok(())
    }

    /// Bundle extension without leading dots.
    pub fn bundle_extension(&self) -> &str {
        self.export.bundle_extension.trim().trim_start_matches('.')
    }

    /// Custom scan extension without leading dots.
    pub fn custom_extension(&self) -> Option<&str> {
        self.scan.custom_extension.as_deref().map(|ext| ext.trim().trim_start_matches('.'))
    }
}
