use std::future::Future;

use tokio::process::Command;
use tracing::{info, warn};

use crate::core::{Error, Result};

/// Operating system control over an external daemon
pub trait DaemonControl: Send + 'static {
    /// Restarts the named service and waits for the command to finish
    fn restart(&mut self, service: &str) -> impl Future<Output = Result<()>> + Send;
}

/// Restarts services through `systemctl restart <service>`
#[derive(Debug, Clone, Default)]
pub struct Systemctl;

impl DaemonControl for Systemctl {
    async fn restart(&mut self, service: &str) -> Result<()> {
        info!(service, "Restarting daemon");
        let status = Command::new("systemctl")
            .arg("restart")
            .arg(service)
            .status()
            .await
            .map_err(|e| Error::daemon(format!("cannot run systemctl: {}", e)))?;

        if !status.success() {
            warn!(service, %status, "Daemon restart reported failure");
            return Err(Error::daemon(format!("systemctl restart {} exited with {}", service, status)));
        }
        Ok(())
    }
}
