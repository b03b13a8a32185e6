use crate::config::VolumeConfig;
use crate::error::ReconcileError;
use crate::gluster::{ClusterManager, VolumeStatus};
use cmd_lib::*;
use std::fmt;

pub const AUTH_ALLOW: &str = "auth.allow";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionChange {
    Set { key: String, value: String },
    Reset { key: String },
    EnableQuota,
    LimitUsage { limit: String },
}

impl fmt::Display for OptionChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionChange::Set { key, value } => write!(f, "set {key}={value}"),
            OptionChange::Reset { key } => write!(f, "reset {key}"),
            OptionChange::EnableQuota => f.write_str("enable quota"),
            OptionChange::LimitUsage { limit } => write!(f, "limit-usage / {limit}"),
        }
    }
}

/// An empty allow-list clears the restriction instead of setting an empty value.
pub fn plan_acl(volume: &VolumeConfig, status: &VolumeStatus) -> Option<OptionChange> {
    let current = status.option(AUTH_ALLOW);
    if volume.allowed_hosts.is_empty() {
        current.map(|_| OptionChange::Reset {
            key: AUTH_ALLOW.to_string(),
        })
    } else {
        let value = volume.allowed_hosts.join(",");
        (current != Some(value.as_str())).then(|| OptionChange::Set {
            key: AUTH_ALLOW.to_string(),
            value,
        })
    }
}

pub fn plan_quota(volume: &VolumeConfig, status: &VolumeStatus) -> Vec<OptionChange> {
    let Some(limit) = volume.quota.as_deref() else {
        return Vec::new();
    };
    let mut changes = Vec::new();
    if !status.quota_enabled() {
        changes.push(OptionChange::EnableQuota);
    }
    if !status.has_quota_limit(limit) {
        changes.push(OptionChange::LimitUsage {
            limit: limit.to_string(),
        });
    }
    changes
}

pub struct OptionReconciler<'a> {
    cluster: &'a dyn ClusterManager,
}

impl<'a> OptionReconciler<'a> {
    pub fn new(cluster: &'a dyn ClusterManager) -> Self {
        Self { cluster }
    }

    /// Computes the option deltas for `name` and applies them; returns what changed.
    pub fn reconcile(
        &self,
        name: &str,
        volume: &VolumeConfig,
        status: &VolumeStatus,
    ) -> Result<Vec<OptionChange>, ReconcileError> {
        let mut changes: Vec<OptionChange> = plan_acl(volume, status).into_iter().collect();
        changes.extend(plan_quota(volume, status));

        for (key, value) in &volume.options {
            let current = self.cluster.get_option(name, key).map_err(|e| {
                ReconcileError::operational(name, format!("failed to read option {key}: {e}"))
            })?;
            if current.as_deref() != Some(value.as_str()) {
                changes.push(OptionChange::Set {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }

        for change in &changes {
            info!("Volume {name}: {change}");
            self.apply(name, change).map_err(|e| {
                ReconcileError::operational(name, format!("failed to {change}: {e}"))
            })?;
        }
        Ok(changes)
    }

    fn apply(&self, name: &str, change: &OptionChange) -> CmdResult {
        match change {
            OptionChange::Set { key, value } => self.cluster.set_option(name, key, value),
            OptionChange::Reset { key } => self.cluster.reset_option(name, key),
            OptionChange::EnableQuota => self.cluster.enable_quota(name),
            OptionChange::LimitUsage { limit } => self.cluster.limit_usage(name, limit),
        }
    }
}
