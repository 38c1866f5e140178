//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// S3-compatible object storage via the AWS SDK.
    Aws,
}

#[derive(Debug, Parser)]
#[command(
    name = "bucketfs",
    about = "Mount an object-storage bucket as a local filesystem",
    version
)]
pub struct Cli {
    /// Kernel mount point
    #[arg(long, default_value = "/tmp/myown-filesystem")]
    pub mountdir: PathBuf,

    /// Object storage provider
    #[arg(long, value_enum, default_value_t = Provider::Aws)]
    pub provider: Provider,

    /// Deployment environment; "local" targets a localstack endpoint with
    /// path-style addressing
    #[arg(long, default_value = "local")]
    pub env: String,

    /// Bucket name
    #[arg(long, default_value = "default-bucket")]
    pub bucket: String,

    /// Per-call deadline for store operations, in seconds
    #[arg(long, default_value_t = 30)]
    pub call_timeout_secs: u64,

    /// TTL for cached negative lookups, in seconds
    #[arg(long, default_value_t = 10)]
    pub negative_ttl_secs: u32,

    /// Maximum number of cached negative lookups
    #[arg(long, default_value_t = 10_000)]
    pub negative_capacity: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let cli = Cli::parse_from(["bucketfs"]);
        assert_eq!(cli.mountdir, PathBuf::from("/tmp/myown-filesystem"));
        assert_eq!(cli.provider, Provider::Aws);
        assert_eq!(cli.env, "local");
        assert_eq!(cli.bucket, "default-bucket");
        assert_eq!(cli.call_timeout_secs, 30);
        assert_eq!(cli.negative_ttl_secs, 10);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "bucketfs",
            "--mountdir",
            "/mnt/b",
            "--env",
            "production",
            "--bucket",
            "assets",
        ]);
        assert_eq!(cli.mountdir, PathBuf::from("/mnt/b"));
        assert_eq!(cli.env, "production");
        assert_eq!(cli.bucket, "assets");
    }
}
