//! Control-plane surface of the gluster cluster manager: mutating commands
//! plus typed views of live and persisted volume state.

use crate::topology::CreateVariant;
use cmd_lib::*;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::LazyLock;

pub const GLUSTERD_VOLS_DIR: &str = "/var/lib/glusterd/vols";

static BRICK_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Brick\d+:\s*([^:\s]+):(\S+)").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveBrick {
    pub host: String,
    pub path: String,
}

/// Output of `gluster volume info <name>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveInfo {
    pub name: String,
    pub status: String,
    pub bricks: Vec<LiveBrick>,
    pub options: BTreeMap<String, String>,
}

/// Everything the reconcilers need to know about one volume, queried once per pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeStatus {
    pub exists: bool,
    pub started: bool,
    pub bricks: Vec<LiveBrick>,
    /// "Options Reconfigured" reported by the live query.
    pub options: BTreeMap<String, String>,
    /// Key/value pairs of glusterd's persisted volume info file.
    pub persisted: BTreeMap<String, String>,
}

impl VolumeStatus {
    pub fn absent() -> Self {
        Self::default()
    }

    /// Live info wins; without it glusterd's persisted `status=1` marks a started volume.
    pub fn from_parts(persisted: Option<BTreeMap<String, String>>, live: Option<LiveInfo>) -> Self {
        let exists = persisted.is_some() || live.is_some();
        let persisted = persisted.unwrap_or_default();
        let started = match &live {
            Some(live) => live.status == "Started",
            None => persisted.get("status").map(String::as_str) == Some("1"),
        };
        let live = live.unwrap_or_default();
        Self {
            exists,
            started,
            bricks: live.bricks,
            options: live.options,
            persisted,
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .get(key)
            .or_else(|| self.persisted.get(key))
            .map(String::as_str)
    }

    pub fn quota_enabled(&self) -> bool {
        self.option("features.quota") == Some("on")
    }

    pub fn has_quota_limit(&self, limit: &str) -> bool {
        let expected = format!("/:{limit}");
        self.option("features.limit-usage") == Some(expected.as_str())
    }

    /// Whether a brick at `path` is hosted under any of `hosts`.
    pub fn has_brick(&self, hosts: &[&str], path: &str) -> bool {
        self.bricks
            .iter()
            .any(|b| b.path == path && hosts.contains(&b.host.as_str()))
    }
}

pub fn parse_volume_info(output: &str) -> Option<LiveInfo> {
    let mut info = LiveInfo::default();
    let mut in_options = false;
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            in_options = false;
            continue;
        }
        if line.ends_with("does not exist") || line == "No volumes present" {
            return None;
        }
        if line == "Options Reconfigured:" {
            in_options = true;
            continue;
        }
        if in_options {
            if let Some((key, value)) = line.split_once(':') {
                info.options
                    .insert(key.trim().to_string(), value.trim().to_string());
            }
            continue;
        }
        if let Some(caps) = BRICK_LINE.captures(line) {
            info.bricks.push(LiveBrick {
                host: caps[1].to_string(),
                path: caps[2].to_string(),
            });
        } else if let Some(name) = line.strip_prefix("Volume Name:") {
            info.name = name.trim().to_string();
        } else if let Some(status) = line.strip_prefix("Status:") {
            info.status = status.trim().to_string();
        }
    }
    if info.name.is_empty() { None } else { Some(info) }
}

fn reports_absent(output: &str) -> bool {
    output.lines().map(str::trim).any(|line| {
        (line.starts_with("Volume ") && line.ends_with("does not exist"))
            || line == "No volumes present"
    })
}

/// Interprets the combined output of `gluster volume info <name>`. Only an
/// explicit "does not exist" reply means absent; anything unparseable is an error.
pub fn live_info_from_reply(volume: &str, output: &str) -> io::Result<Option<LiveInfo>> {
    if reports_absent(output) {
        return Ok(None);
    }
    match parse_volume_info(output) {
        Some(info) => Ok(Some(info)),
        None => Err(io::Error::other(format!(
            "gluster volume info {volume} failed: {}",
            output.trim()
        ))),
    }
}

pub fn parse_info_file(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

/// Value of `key` in `gluster volume get <name> <key>` output.
pub fn parse_volume_get(output: &str, key: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let line = line.trim();
        let rest = line.strip_prefix(key)?;
        if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
            return None;
        }
        Some(rest.trim().to_string())
    })
}

pub trait ClusterManager {
    fn volume_status(&self, volume: &str) -> io::Result<VolumeStatus>;

    fn get_option(&self, volume: &str, key: &str) -> io::Result<Option<String>>;

    fn create_volume(&self, volume: &str, args: &[String], variant: CreateVariant) -> CmdResult;

    fn start_volume(&self, volume: &str) -> CmdResult;

    fn add_brick(&self, volume: &str, brick: &str) -> CmdResult;

    fn start_rebalance(&self, volume: &str) -> CmdResult;

    fn set_option(&self, volume: &str, key: &str, value: &str) -> CmdResult;

    fn reset_option(&self, volume: &str, key: &str) -> CmdResult;

    fn enable_quota(&self, volume: &str) -> CmdResult;

    fn limit_usage(&self, volume: &str, limit: &str) -> CmdResult;
}

/// Drives the `gluster` binary found on PATH.
pub struct GlusterCli {
    vols_dir: PathBuf,
}

impl Default for GlusterCli {
    fn default() -> Self {
        Self::new(PathBuf::from(GLUSTERD_VOLS_DIR))
    }
}

impl GlusterCli {
    pub fn new(vols_dir: PathBuf) -> Self {
        Self { vols_dir }
    }

    fn read_info_file(&self, volume: &str) -> io::Result<Option<BTreeMap<String, String>>> {
        let path = self.vols_dir.join(volume).join("info");
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(parse_info_file(&content))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl ClusterManager for GlusterCli {
    fn volume_status(&self, volume: &str) -> io::Result<VolumeStatus> {
        let persisted = self.read_info_file(volume)?;
        let output = run_fun!(ignore gluster volume info $volume 2>&1)?;
        let live = live_info_from_reply(volume, &output)?;
        Ok(VolumeStatus::from_parts(persisted, live))
    }

    fn get_option(&self, volume: &str, key: &str) -> io::Result<Option<String>> {
        let output = run_fun!(gluster volume get $volume $key)?;
        Ok(parse_volume_get(&output, key))
    }

    fn create_volume(&self, volume: &str, args: &[String], variant: CreateVariant) -> CmdResult {
        match variant {
            CreateVariant::Standard => run_cmd!(gluster volume create $volume $[args]),
            CreateVariant::Forced(_) => {
                run_cmd!(echo y | gluster volume create $volume $[args] force)
            }
        }
    }

    fn start_volume(&self, volume: &str) -> CmdResult {
        run_cmd!(gluster volume start $volume)
    }

    fn add_brick(&self, volume: &str, brick: &str) -> CmdResult {
        run_cmd!(gluster volume add-brick $volume $brick)
    }

    fn start_rebalance(&self, volume: &str) -> CmdResult {
        run_cmd!(gluster volume rebalance $volume start)
    }

    fn set_option(&self, volume: &str, key: &str, value: &str) -> CmdResult {
        run_cmd!(gluster volume set $volume $key $value)
    }

    fn reset_option(&self, volume: &str, key: &str) -> CmdResult {
        run_cmd!(gluster volume reset $volume $key)
    }

    fn enable_quota(&self, volume: &str) -> CmdResult {
        run_cmd!(gluster volume quota $volume enable)
    }

    fn limit_usage(&self, volume: &str, limit: &str) -> CmdResult {
        run_cmd!(gluster volume quota $volume limit-usage / $limit)
    }
}
