use crate::config::{ClientConfig, ServerConfig};
use cmd_lib::*;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const FSTAB_PATH: &str = "/etc/fstab";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountAction {
    Mount,
    Unmount,
    /// Persist the mount in fstab.
    Enable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRequest {
    pub volume: String,
    pub server: String,
    pub mount_point: PathBuf,
    pub options: String,
}

impl MountRequest {
    pub fn device(&self) -> String {
        format!("{}:/{}", self.server, self.volume)
    }

    pub fn fstab_line(&self) -> String {
        format!(
            "{} {} glusterfs {} 0 0",
            self.device(),
            self.mount_point.display(),
            self.options
        )
    }
}

pub trait MountManager {
    fn apply(&self, request: &MountRequest, action: MountAction) -> CmdResult;
}

pub struct GlusterMount {
    fstab: PathBuf,
}

impl Default for GlusterMount {
    fn default() -> Self {
        Self::new(PathBuf::from(FSTAB_PATH))
    }
}

impl GlusterMount {
    pub fn new(fstab: PathBuf) -> Self {
        Self { fstab }
    }

    fn is_mounted(mount_point: &str) -> bool {
        run_cmd!(mountpoint -q $mount_point).is_ok()
    }

    fn enable(&self, request: &MountRequest) -> CmdResult {
        let content = match fs::read_to_string(&self.fstab) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };
        if has_fstab_entry(&content, &request.device(), &request.mount_point) {
            return Ok(());
        }
        let mut updated = content;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&request.fstab_line());
        updated.push('\n');
        fs::write(&self.fstab, updated)?;
        info!("Added {} to {}", request.device(), self.fstab.display());
        Ok(())
    }
}

impl MountManager for GlusterMount {
    fn apply(&self, request: &MountRequest, action: MountAction) -> CmdResult {
        let mount_point = request.mount_point.display().to_string();
        let device = request.device();
        let options = &request.options;
        match action {
            MountAction::Mount => {
                fs::create_dir_all(&request.mount_point)?;
                if Self::is_mounted(&mount_point) {
                    return Ok(());
                }
                run_cmd! {
                    info "Mounting $device at $mount_point";
                    mount -t glusterfs -o $options $device $mount_point;
                }
            }
            MountAction::Unmount => {
                if !Self::is_mounted(&mount_point) {
                    return Ok(());
                }
                run_cmd! {
                    info "Unmounting $mount_point";
                    umount $mount_point;
                }
            }
            MountAction::Enable => self.enable(request),
        }
    }
}

fn has_fstab_entry(content: &str, device: &str, mount_point: &Path) -> bool {
    let mount_point = mount_point.display().to_string();
    content
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .any(|l| {
            let mut fields = l.split_whitespace();
            fields.next() == Some(device) && fields.next() == Some(mount_point.as_str())
        })
}

pub fn client_mount_options(base: &str, backup_server: Option<&str>) -> String {
    match backup_server {
        Some(backup) => format!("{base},backupvolfile-server={backup}"),
        None => base.to_string(),
    }
}

/// The request every server uses to mount a volume from itself.
pub fn self_mount_request(server: &ServerConfig, volume: &str, fqdn: &str) -> MountRequest {
    MountRequest {
        volume: volume.to_string(),
        server: fqdn.to_string(),
        mount_point: server.self_mount_point(volume),
        options: crate::config::DEFAULT_MOUNT_OPTIONS.to_string(),
    }
}

/// Mounts and enables every configured client volume. Entries without a
/// server or mount point are skipped; returns the volumes that failed.
pub fn mount_clients(client: &ClientConfig, mounts: &dyn MountManager) -> Vec<(String, io::Error)> {
    info!("Mounting {} GlusterFS client volume(s)", client.volumes.len());
    let mut failures = Vec::new();
    for (volume, values) in &client.volumes {
        let (Some(server), Some(mount_point)) = (&values.server, &values.mount_point) else {
            warn!("No server or mount_point configured for client volume {volume}. Skipping...");
            continue;
        };
        let request = MountRequest {
            volume: volume.clone(),
            server: server.clone(),
            mount_point: mount_point.clone(),
            options: client_mount_options(&client.mount_options, values.backup_server.as_deref()),
        };
        let result = mounts
            .apply(&request, MountAction::Mount)
            .and_then(|_| mounts.apply(&request, MountAction::Enable));
        if let Err(e) = result {
            error!("Failed to mount client volume {volume}: {e}");
            failures.push((volume.clone(), e));
        }
    }
    failures
}

/// Unmounts every server volume's self-mount ahead of a package upgrade.
pub fn unmount_for_upgrade(
    server: &ServerConfig,
    fqdn: &str,
    mounts: &dyn MountManager,
) -> Vec<(String, io::Error)> {
    let mut failures = Vec::new();
    for volume in server.volumes.keys() {
        let request = self_mount_request(server, volume, fqdn);
        if let Err(e) = mounts.apply(&request, MountAction::Unmount) {
            error!("Failed to unmount volume {volume}: {e}");
            failures.push((volume.clone(), e));
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> MountRequest {
        MountRequest {
            volume: "gv0".to_string(),
            server: "gfs1.example.com".to_string(),
            mount_point: PathBuf::from("/mnt/gluster/gv0"),
            options: "defaults,_netdev".to_string(),
        }
    }

    #[test]
    fn test_fstab_line() {
        assert_eq!(
            request().fstab_line(),
            "gfs1.example.com:/gv0 /mnt/gluster/gv0 glusterfs defaults,_netdev 0 0"
        );
    }

    #[test]
    fn test_enable_appends_once() {
        let temp_dir = tempfile::tempdir().unwrap();
        let fstab = temp_dir.path().join("fstab");
        fs::write(&fstab, "/dev/sda1 / ext4 defaults 0 1").unwrap();
        let mounts = GlusterMount::new(fstab.clone());

        mounts.apply(&request(), MountAction::Enable).unwrap();
        mounts.apply(&request(), MountAction::Enable).unwrap();

        let content = fs::read_to_string(&fstab).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.ends_with("glusterfs defaults,_netdev 0 0\n"));
    }

    #[test]
    fn test_commented_entry_is_ignored() {
        let content = "# gfs1.example.com:/gv0 /mnt/gluster/gv0 glusterfs defaults 0 0\n";
        assert!(!has_fstab_entry(
            content,
            "gfs1.example.com:/gv0",
            Path::new("/mnt/gluster/gv0")
        ));
    }

    #[test]
    fn test_client_mount_options() {
        assert_eq!(
            client_mount_options("defaults,_netdev", Some("gfs2")),
            "defaults,_netdev,backupvolfile-server=gfs2"
        );
        assert_eq!(client_mount_options("defaults", None), "defaults");
    }
}
