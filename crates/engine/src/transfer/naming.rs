use crate::error::{ErrorKind, Result};
use apkport_archive::split_extension;
use apkport_storage::StorageLocation;

/// Picks free file names in a destination directory.
///
/// A taken name gets a number appended to its stem. The number keeps counting
/// up across every name allocated during a run, so one run never hands out
/// the same suffix twice.
#[derive(Debug, Default)]
pub struct NameAllocator {
    counter: u64,
}
impl NameAllocator {
    /// First free variant of `name` in `dir`, checked against live storage.
    pub fn allocate(&mut self, dir: &StorageLocation, name: &str) -> Result<String> {
        let (stem, extension) = split_extension(name);
        let mut candidate = name.to_string();
        while dir.find(&candidate).map_err(ErrorKind::storage)?.is_some() {
            self.counter += 1;
            candidate = format!("{stem}{}{extension}", self.counter);
        }
        if candidate != name {
            tracing::debug!(requested = %name, allocated = %candidate, "name taken, numbering");
        }
        Ok(candidate)
    }
}
