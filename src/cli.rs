//! CLI argument definitions using clap derive macros.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use mediagrab_core::poll::PollPolicy;
use mediagrab_core::{Config, Credentials, DEFAULT_FETCH_CONCURRENCY};

/// Download third-party hosted media as directly servable artifacts.
///
/// Mediagrab drives a browser session against the source site, recovers the
/// media references, and produces either a raw media file or an assembled
/// multi-page PDF under the public serving root.
#[derive(Parser, Debug)]
#[command(name = "mediagrab")]
#[command(author, version, about)]
pub struct Args {
    /// Source site (tiktok, twitter, instagram, pinterest, gallery,
    /// chapter, upscale)
    pub site: String,

    /// URL or content code; for upscale, the path to a local image file
    pub input: String,

    /// List a chapter series' index instead of downloading (chapter only)
    #[arg(long)]
    pub chapter_list: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Public serving root for produced artifacts
    #[arg(long, default_value = "public/downloads")]
    pub public_root: PathBuf,

    /// Directory for persisted session state
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Maximum concurrent asset fetches (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_FETCH_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Run the browser with a visible window
    #[arg(long)]
    pub headed: bool,

    /// Maximum completion-polling attempts (1-100)
    #[arg(long, default_value_t = 20, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub poll_attempts: u32,

    /// Seconds between completion-polling attempts
    #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u64).range(1..=60))]
    pub poll_interval_secs: u64,
}

impl Args {
    /// Builds the pipeline configuration from the parsed flags and the
    /// credentials resolved by the entry point.
    #[must_use]
    pub fn to_config(&self, credentials: HashMap<String, Credentials>) -> Config {
        Config {
            public_root: self.public_root.clone(),
            data_dir: self.data_dir.clone(),
            browser_download_dir: self.data_dir.join("browser-downloads"),
            fetch_concurrency: usize::from(self.concurrency),
            poll: PollPolicy::new(
                self.poll_attempts,
                Duration::from_secs(self.poll_interval_secs),
            ),
            headless: !self.headed,
            credentials,
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parse_successfully() {
        let args = Args::try_parse_from(["mediagrab", "tiktok", "https://t.example/v/1"]).unwrap();
        assert_eq!(args.site, "tiktok");
        assert_eq!(args.concurrency, 10); // DEFAULT_FETCH_CONCURRENCY
        assert!(!args.chapter_list);
        assert!(!args.headed);
        assert_eq!(args.poll_attempts, 20);
    }

    #[test]
    fn test_cli_rejects_out_of_range_concurrency() {
        let result = Args::try_parse_from(["mediagrab", "-c", "0", "gallery", "177013"]);
        assert!(result.is_err());
        let result = Args::try_parse_from(["mediagrab", "-c", "101", "gallery", "177013"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_to_config_carries_flags() {
        let args = Args::try_parse_from([
            "mediagrab",
            "--headed",
            "--poll-attempts",
            "5",
            "--poll-interval-secs",
            "1",
            "gallery",
            "177013",
        ])
        .unwrap();
        let config = args.to_config(HashMap::new());
        assert!(!config.headless);
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.poll.interval, Duration::from_secs(1));
    }
}
