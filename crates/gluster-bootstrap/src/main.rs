use clap::{Parser, Subcommand};
use cmd_lib::*;
use gluster_bootstrap::config::{BootstrapConfig, DEFAULT_CONFIG_PATH};
use gluster_bootstrap::gluster::GlusterCli;
use gluster_bootstrap::host::{LocalHost, SystemHost};
use gluster_bootstrap::membership::SshShell;
use gluster_bootstrap::mount::{self, GlusterMount};
use gluster_bootstrap::reconciler::{Collaborators, VolumeReconciler};
use gluster_bootstrap::registry;
use std::io::Error;
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "gluster-bootstrap",
    about = "Converge GlusterFS peers and volumes to a declared state"
)]
struct Opts {
    #[arg(long, env = "GLUSTER_BOOTSTRAP_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create, join, start and configure every declared server volume
    #[command(name = "server-setup")]
    ServerSetup,
    /// Mount the declared client volumes
    #[command(name = "client-mount")]
    ClientMount,
    /// Unmount server self-mounts before a package upgrade
    #[command(name = "prepare-upgrade")]
    PrepareUpgrade,
    /// Show brick layout and create decisions without changing anything
    #[command(name = "plan")]
    Plan,
}

#[cmd_lib::main]
fn main() -> CmdResult {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let opts = Opts::parse();
    let config = BootstrapConfig::load(&opts.config)?;

    match opts.cmd {
        Cmd::ServerSetup => server_setup(&config),
        Cmd::ClientMount => client_mount(&config),
        Cmd::PrepareUpgrade => prepare_upgrade(&config),
        Cmd::Plan => plan(&config),
    }
}

fn server_setup(config: &BootstrapConfig) -> CmdResult {
    let cluster = GlusterCli::default();
    let registry = registry::open(&config.registry);
    let mounts = GlusterMount::default();
    let deps = Collaborators {
        cluster: &cluster,
        registry: registry.as_ref(),
        shell: &SshShell,
        host: &SystemHost,
        mounts: &mounts,
    };

    let reconciler = VolumeReconciler::new(&config.server, deps)?;
    let report = reconciler.run();
    report.log_summary();

    if !report.is_success() {
        return Err(Error::other("server setup did not converge for every volume"));
    }
    info!("All {} volume(s) processed", report.volumes.len());
    Ok(())
}

fn client_mount(config: &BootstrapConfig) -> CmdResult {
    let failures = mount::mount_clients(&config.client, &GlusterMount::default());
    if !failures.is_empty() {
        return Err(Error::other(format!("failed to mount {} client volume(s)", failures.len())));
    }
    Ok(())
}

fn prepare_upgrade(config: &BootstrapConfig) -> CmdResult {
    let identity = SystemHost.identity()?;
    let failures =
        mount::unmount_for_upgrade(&config.server, &identity.fqdn, &GlusterMount::default());
    if !failures.is_empty() {
        return Err(Error::other(format!("failed to unmount {} volume(s)", failures.len())));
    }
    Ok(())
}

fn plan(config: &BootstrapConfig) -> CmdResult {
    let cluster = GlusterCli::default();
    let registry = registry::open(&config.registry);
    let mounts = GlusterMount::default();
    let deps = Collaborators {
        cluster: &cluster,
        registry: registry.as_ref(),
        shell: &SshShell,
        host: &SystemHost,
        mounts: &mounts,
    };
    let reconciler = VolumeReconciler::new(&config.server, deps)?;

    for (name, volume) in &config.server.volumes {
        let plan = reconciler.plan_volume(name, volume)?;
        println!("volume {name} ({})", volume.volume_type);
        let master = if plan.is_master {
            "this node"
        } else {
            volume.master().unwrap_or("-")
        };
        println!("  master: {master}");
        println!("  local bricks: {}", plan.local_bricks.join(", "));
        for peer in &plan.layout.peers {
            println!("  peer {}: {}", peer.peer, peer.bricks.join(", "));
        }
        if !plan.layout.missing.is_empty() {
            println!("  peers without bricks: {}", plan.layout.missing.join(", "));
        }
        match (&plan.topology, &plan.command, &plan.root_fs_error) {
            (Err(reason), _, _) => println!("  skip: {reason}"),
            (Ok(_), Some(command), _) => println!("  create: {command}"),
            (Ok(_), None, Some(e)) => {
                println!("  create: undetermined, root filesystem check failed: {e}")
            }
            (Ok(_), None, None) => {}
        }
    }
    Ok(())
}
