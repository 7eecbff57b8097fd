use std::{path::PathBuf, time::Duration};

use clap::Args;

use crate::poll::MIN_INTERVAL;

/// How to reach the cluster, shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Cluster CLI binary used for every query.
    #[arg(long = "oc", env = "OC_BINARY", default_value = "oc")]
    pub oc_binary: PathBuf,

    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Directory receiving captured command output.
    #[arg(long, env = "ARTIFACT_DIR")]
    pub artifact_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 10)]
    pub poll_interval_secs: u64,
}

impl Config {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs).max(MIN_INTERVAL)
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
