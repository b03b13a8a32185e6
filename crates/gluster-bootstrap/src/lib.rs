pub mod config;
pub mod error;
pub mod gluster;
pub mod host;
pub mod membership;
pub mod mount;
pub mod options;
pub mod peer;
pub mod planner;
pub mod reconciler;
pub mod registry;
pub mod topology;

pub use config::{BootstrapConfig, ServerConfig, VolumeConfig, VolumeType};
pub use error::{ReconcileError, Severity};
pub use reconciler::{Collaborators, RunReport, VolumeOutcome, VolumeReconciler};
