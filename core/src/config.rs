//! Startup configuration.
//!
//! The broker persists nothing; it recovers its namespace by replaying the
//! mounts listed in an externally supplied configuration.

use serde::{Deserialize, Serialize};
use vfs_proto::{Errno, ServiceId, VfsResult};

use crate::ops::Broker;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MountSpec {
    pub fs_name: String,
    #[serde(default)]
    pub instance: u32,
    pub mount_point: String,
    pub service_id: u64,
    #[serde(default)]
    pub opts: String,
    /// Wait for the backend to register instead of failing the replay.
    #[serde(default)]
    pub blocking: bool,
}

impl BrokerConfig {
    pub fn from_toml(raw: &str) -> VfsResult<Self> {
        toml::from_str(raw).map_err(|err| {
            tracing::warn!(%err, "broker config rejected");
            Errno::Invalid
        })
    }
}

impl Broker {
    /// Replay the configured mounts in order. Stops at the first failure,
    /// leaving earlier mounts in place.
    pub async fn replay_mounts(&self, config: &BrokerConfig) -> VfsResult<()> {
        for spec in &config.mounts {
            tracing::debug!(fs = %spec.fs_name, mp = %spec.mount_point, "replaying mount");
            self.mount(
                &spec.fs_name,
                spec.instance,
                spec.blocking,
                ServiceId(spec.service_id),
                &spec.mount_point,
                &spec.opts,
            )
            .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses() {
        let config = BrokerConfig::from_toml(
            r#"
            [[mounts]]
            fs_name = "tmpfs"
            mount_point = "/"
            service_id = 7

            [[mounts]]
            fs_name = "tmpfs"
            instance = 1
            mount_point = "/data"
            service_id = 8
            opts = "size=64m"
            blocking = true
            "#,
        )
        .expect("parse");
        assert_eq!(config.mounts.len(), 2);
        assert_eq!(config.mounts[0].mount_point, "/");
        assert!(!config.mounts[0].blocking);
        assert_eq!(config.mounts[1].opts, "size=64m");
        assert!(config.mounts[1].blocking);
    }

    #[test]
    fn empty_config_is_fine() {
        let config = BrokerConfig::from_toml("").expect("parse");
        assert!(config.mounts.is_empty());
    }

    #[test]
    fn garbage_is_invalid() {
        assert_eq!(
            BrokerConfig::from_toml("mounts = 3").expect_err("reject"),
            Errno::Invalid
        );
    }
}
