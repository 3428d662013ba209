use crate::error::{ErrorKind, Result};
use crate::template::NameTemplate;
use apkport_archive::{CompressionLevel, SCAN_EXTENSIONS};
use apkport_config::{OutputBackend, ScanScope, Settings, SortOrder};
use apkport_storage::tree::MountedTree;
use apkport_storage::{StorageLocation, TreeHandle};
use exn::ResultExt;
use std::path::PathBuf;
use std::sync::Arc;

/// Where package outputs and exported archives are written.
#[derive(Clone)]
pub enum Destination {
    Direct(PathBuf),
    Tree { tree: TreeHandle, segments: Vec<String> },
}

/// Everything a scan or transfer needs to know, resolved from [`Settings`].
pub struct Context {
    pub storage_root: StorageLocation,
    pub destination: Destination,
    /// Granted document tree, if any; scanned when the scope is
    /// [`ScanScope::All`].
    pub tree: Option<TreeHandle>,
    pub scope: ScanScope,
    pub sort: SortOrder,
    /// Lowercase extensions (no dot) accepted by the scanner.
    pub extensions: Vec<String>,
    pub package_template: NameTemplate,
    pub bundle_template: NameTemplate,
    pub bundle_extension: String,
    pub compression: CompressionLevel,
    pub retries: u32,
}

impl Context {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let tree: Option<TreeHandle> = match &settings.output.tree {
            Some(grant) => {
                let mounted = MountedTree::new(&grant.label, &grant.root).map_err(ErrorKind::storage)?;
                Some(Arc::new(mounted))
            },
            None => None,
        };
        let destination = match (settings.output.backend, &tree, &settings.output.tree) {
            (OutputBackend::DocumentTree, Some(tree), Some(grant)) => {
                Destination::Tree { tree: Arc::clone(tree), segments: grant.segments.clone() }
            },
            (OutputBackend::DocumentTree, _, _) => {
                exn::bail!(ErrorKind::Setup("document tree output requires a tree grant".to_string()))
            },
            (OutputBackend::Direct, _, _) => Destination::Direct(settings.output.path.clone()),
        };
        let mut ctx = Self::new(StorageLocation::direct(&settings.storage_root), destination)?
            .with_templates(&settings.templates.package, &settings.templates.bundle)?
            .with_custom_extension(settings.custom_extension());
        ctx.tree = tree;
        ctx.scope = settings.scan.scope;
        ctx.sort = settings.scan.sort;
        ctx.bundle_extension = settings.bundle_extension().to_string();
        ctx.compression = settings.export.compression;
        ctx.retries = settings.export.retries;
        Ok(ctx)
    }

    /// A context with default templates and export settings.
    pub fn new(storage_root: StorageLocation, destination: Destination) -> Result<Self> {
        let defaults = Settings::default();
        Ok(Self {
            storage_root,
            destination,
            tree: None,
            scope: ScanScope::All,
            sort: SortOrder::ScanOrder,
            extensions: SCAN_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            package_template: defaults.templates.package.parse()?,
            bundle_template: defaults.templates.bundle.parse()?,
            bundle_extension: defaults.bundle_extension().to_string(),
            compression: defaults.export.compression,
            retries: defaults.export.retries,
        })
    }

    pub fn with_templates(mut self, package: &str, bundle: &str) -> Result<Self> {
        self.package_template = package.parse()?;
        self.bundle_template = bundle.parse()?;
        Ok(self)
    }

    pub fn with_custom_extension(mut self, extension: Option<&str>) -> Self {
        if let Some(extension) = extension.map(|ext| ext.trim_start_matches('.').to_lowercase())
            && !extension.is_empty()
            && !self.extensions.contains(&extension)
        {
            self.extensions.push(extension);
        }
        self
    }

    /// Find-or-create the destination directory. Failure here is fatal for
    /// a run.
    pub fn output_dir(&self) -> Result<StorageLocation> {
        let resolved = match &self.destination {
            Destination::Direct(path) => std::fs::create_dir_all(path)
                .map(|_| StorageLocation::direct(path))
                .or_raise(|| ErrorKind::Setup(format!("cannot create {}", path.display()))),
            Destination::Tree { tree, segments } => StorageLocation::open_tree(Arc::clone(tree), segments)
                .or_raise(|| ErrorKind::Setup(format!("cannot open {}", segments.join("/")))),
        }?;
        tracing::debug!(destination = %resolved, "resolved output directory");
        Ok(resolved)
    }

    /// The destination directory if it already exists. Never creates
    /// anything.
    pub fn find_output_dir(&self) -> Result<Option<StorageLocation>> {
        match &self.destination {
            Destination::Direct(path) => {
                let location = StorageLocation::direct(path);
                Ok(location.exists().map_err(ErrorKind::storage)?.then_some(location))
            },
            Destination::Tree { tree, segments } => {
                StorageLocation::tree_root(Arc::clone(tree)).lookup(segments.join("/")).map_err(ErrorKind::storage)
            },
        }
    }

    /// Roots the scanner walks for the configured scope.
    pub fn scan_roots(&self) -> Result<Vec<StorageLocation>> {
        Ok(match self.scope {
            ScanScope::All => {
                let mut roots = vec![self.storage_root.clone()];
                roots.extend(self.tree.iter().map(|tree| StorageLocation::tree_root(Arc::clone(tree))));
                roots
            },
            ScanScope::ExportLocation => self.find_output_dir()?.into_iter().collect(),
        })
    }

    /// Whether the scanner should pick up a file with this name.
    pub fn accepts(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.extensions.iter().any(|ext| {
            lower.strip_suffix(ext.as_str()).is_some_and(|stem| stem.len() > 1 && stem.ends_with('.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apkport_config::TreeGrant;
    use apkport_storage::tree::MemoryTree;
    use rstest::rstest;

    #[rstest]
    #[case("app.apk", true)]
    #[case("APP.APK", true)]
    #[case("bundle.Zip", true)]
    #[case("game.xapk", true)]
    #[case("backup.bak", true)]
    #[case("notes.txt", false)]
    #[case("apk", false)]
    #[case(".apk", false)]
    #[case("archive.zip.part", false)]
    fn test_accepts(#[case] name: &str, #[case] expected: bool) {
        let ctx = Context::new(StorageLocation::direct("/s"), Destination::Direct("/s/out".into()))
            .unwrap()
            .with_custom_extension(Some(".BAK"));
        assert_eq!(ctx.accepts(name), expected);
    }

    #[test]
    fn test_output_dir_tree_is_found_or_created() {
        let tree: TreeHandle = Arc::new(MemoryTree::default());
        let destination = Destination::Tree { tree: tree.clone(), segments: vec!["Backups".into(), "Apps".into()] };
        let ctx = Context::new(StorageLocation::direct("/s"), destination).unwrap();
        assert!(ctx.find_output_dir().unwrap().is_none());
        let out = ctx.output_dir().unwrap();
        assert_eq!(out.display_path(), PathBuf::from("memory/Backups/Apps"));
        assert_eq!(ctx.find_output_dir().unwrap(), Some(out));
    }

    #[test]
    fn test_output_dir_failure_is_setup_error() {
        let memory = Arc::new(MemoryTree::default());
        memory.set_read_only(true);
        let destination = Destination::Tree { tree: memory, segments: vec!["Apps".into()] };
        let ctx = Context::new(StorageLocation::direct("/s"), destination).unwrap();
        let err = ctx.output_dir().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Setup(_)));
    }

    #[test]
    fn test_scan_roots_by_scope() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.storage_root = temp_dir.path().join("storage");
        settings.output.path = temp_dir.path().join("storage/out");
        settings.output.tree =
            Some(TreeGrant { root: temp_dir.path().join("card"), label: "SD".into(), segments: vec![] });
        let mut ctx = Context::from_settings(&settings).unwrap();
        let roots = ctx.scan_roots().unwrap();
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[1].display_path(), PathBuf::from("SD"));

        ctx.scope = ScanScope::ExportLocation;
        assert!(ctx.scan_roots().unwrap().is_empty());
        ctx.output_dir().unwrap();
        assert_eq!(ctx.scan_roots().unwrap(), vec![StorageLocation::direct(temp_dir.path().join("storage/out"))]);
    }

    #[test]
    fn test_from_settings_rejects_bad_template() {
        let mut settings = Settings::default();
        settings.templates.bundle = "{{ oops".to_string();
        assert!(Context::from_settings(&settings).is_err());
    }
}
