use crate::config::VolumeConfig;
use crate::error::ReconcileError;
use regex::Regex;

/// Names the local node answers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub fqdn: String,
    pub hostname: String,
}

impl NodeIdentity {
    /// Both names must be non-empty: an empty name would match every peer entry.
    pub fn new(fqdn: &str, hostname: &str) -> Result<Self, ReconcileError> {
        let fqdn = fqdn.trim();
        let hostname = hostname.trim();
        if fqdn.is_empty() || hostname.is_empty() {
            return Err(ReconcileError::Identity(format!(
                "empty hostname (fqdn: {fqdn:?}, short: {hostname:?})"
            )));
        }
        Ok(Self {
            fqdn: fqdn.to_string(),
            hostname: hostname.to_string(),
        })
    }

    /// Whether a declared peer entry refers to this node. Either name may
    /// appear anywhere in the entry (`user@gfs1`, `gfs1.example.com`) but
    /// only on hostname-label boundaries, so `gfs1` never matches `gfs10`.
    pub fn matches(&self, peer: &str) -> bool {
        [&self.fqdn, &self.hostname]
            .into_iter()
            .any(|name| name_pattern(name).is_match(peer))
    }

    pub fn is_master(&self, volume: &VolumeConfig) -> bool {
        volume.master().is_some_and(|master| self.matches(master))
    }

    /// The peer entry under which this node registers its bricks.
    pub fn local_peer<'a>(&'a self, volume: &'a VolumeConfig) -> &'a str {
        volume
            .peers
            .iter()
            .find(|peer| self.matches(peer))
            .map(String::as_str)
            .unwrap_or(&self.fqdn)
    }
}

fn name_pattern(name: &str) -> Regex {
    let pattern = format!(r"(^|[^A-Za-z0-9-]){}($|[^A-Za-z0-9-])", regex::escape(name));
    Regex::new(&pattern).expect("escaped host name is a valid pattern")
}
