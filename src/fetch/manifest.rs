//! Per-job record of which assets landed locally and where.

use std::path::PathBuf;

/// Outcome of one asset fetch, keyed by the asset's ordinal.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    /// The asset's 1-based ordinal (final page position).
    pub ordinal: u32,
    /// Where the asset was written. Meaningless when `error` is set.
    pub local_path: PathBuf,
    /// Bytes written. Zero when the fetch failed.
    pub byte_size: u64,
    /// Fetch failure, when one occurred. Failed entries are excluded from
    /// assembly but retained for reporting.
    pub error: Option<String>,
    /// Width hint carried over from the asset reference.
    pub width: Option<u32>,
    /// Height hint carried over from the asset reference.
    pub height: Option<u32>,
}

impl ManifestEntry {
    /// Returns true when the asset fetched successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Ordered record of one job's asset fetches.
///
/// Entries are kept in ascending ordinal order regardless of fetch
/// completion order.
#[derive(Debug, Clone, Default)]
pub struct DownloadManifest {
    entries: Vec<ManifestEntry>,
}

impl DownloadManifest {
    /// Builds a manifest, sorting entries by ordinal.
    #[must_use]
    pub fn new(mut entries: Vec<ManifestEntry>) -> Self {
        entries.sort_by_key(|entry| entry.ordinal);
        Self { entries }
    }

    /// All entries, ascending by ordinal.
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Successful entries, ascending by ordinal.
    pub fn successes(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|entry| entry.is_success())
    }

    /// Failed entries, ascending by ordinal.
    pub fn failures(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|entry| !entry.is_success())
    }

    /// Number of successful entries.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the manifest holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks an entry up by ordinal.
    #[must_use]
    pub fn get(&self, ordinal: u32) -> Option<&ManifestEntry> {
        self.entries.iter().find(|entry| entry.ordinal == ordinal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ordinal: u32, error: Option<&str>) -> ManifestEntry {
        ManifestEntry {
            ordinal,
            local_path: PathBuf::from(format!("{ordinal}.jpg")),
            byte_size: if error.is_some() { 0 } else { 100 },
            error: error.map(String::from),
            width: None,
            height: None,
        }
    }

    #[test]
    fn test_manifest_orders_by_ordinal_not_insertion() {
        let manifest = DownloadManifest::new(vec![entry(3, None), entry(1, None), entry(2, None)]);
        let ordinals: Vec<u32> = manifest.entries().iter().map(|e| e.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }

    #[test]
    fn test_manifest_success_and_failure_partition() {
        let manifest = DownloadManifest::new(vec![
            entry(1, None),
            entry(2, Some("HTTP 404")),
            entry(3, None),
        ]);
        assert_eq!(manifest.success_count(), 2);
        assert_eq!(manifest.failures().count(), 1);
        assert_eq!(manifest.len(), 3);
        assert!(manifest.get(2).is_some_and(|e| !e.is_success()));
    }
}
