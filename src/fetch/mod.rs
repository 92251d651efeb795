//! Concurrent asset downloader.
//!
//! Given an ordered list of remote asset references, fetches all of them to
//! local storage with a bounded worker pool, isolating per-asset failures
//! and producing an ordinal-keyed [`DownloadManifest`].
//!
//! # Features
//!
//! - Streaming writes (memory-efficient for large galleries)
//! - Semaphore-bounded fan-out with RAII permit release
//! - Deterministic `<ordinal>.<ext>` target filenames
//! - Per-asset error isolation; only zero successes fails the job

mod client;
mod error;
mod fetcher;
mod manifest;

pub use client::AssetClient;
pub use error::FetchError;
pub use fetcher::{AssetFetcher, DEFAULT_FETCH_CONCURRENCY};
pub use manifest::{DownloadManifest, ManifestEntry};
