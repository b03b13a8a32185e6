use crate::error::ReconcileError;
use crate::peer::NodeIdentity;
use cmd_lib::*;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Local node queries and filesystem preparation.
pub trait LocalHost {
    fn identity(&self) -> Result<NodeIdentity, ReconcileError>;

    fn user_exists(&self, user: &str) -> bool;

    fn path_exists(&self, path: &Path) -> bool;

    /// Creates `path` (mode 0755) and any missing parents.
    fn ensure_dir(&self, path: &Path) -> io::Result<()>;

    /// Mount point of the filesystem holding `path`.
    fn mount_target(&self, path: &Path) -> io::Result<String>;
}

pub struct SystemHost;

impl LocalHost for SystemHost {
    fn identity(&self) -> Result<NodeIdentity, ReconcileError> {
        let fqdn = run_fun!(hostname --fqdn)
            .map_err(|e| ReconcileError::Identity(format!("hostname --fqdn failed: {e}")))?;
        let hostname = run_fun!(hostname -s)
            .map_err(|e| ReconcileError::Identity(format!("hostname -s failed: {e}")))?;
        NodeIdentity::new(&fqdn, &hostname)
    }

    fn user_exists(&self, user: &str) -> bool {
        run_cmd!(getent passwd $user >/dev/null).is_ok()
    }

    fn path_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        if path.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(path)?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
        info!("Created directory {}", path.display());
        Ok(())
    }

    fn mount_target(&self, path: &Path) -> io::Result<String> {
        let path = path.display().to_string();
        let output = run_fun!(df $path --output=target)?;
        parse_df_target(&output)
            .ok_or_else(|| io::Error::other(format!("unexpected df output for {path}: {output}")))
    }
}

fn parse_df_target(output: &str) -> Option<String> {
    output
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}
