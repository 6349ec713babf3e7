//! Plugin process lifecycle

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use migrator_common::PLUGIN_KUBECONFIG_ENV;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::action::{ExportItemAction, ReplayItemAction};
use crate::builtin::builtin_replay_actions;
use crate::error::PluginError;
use crate::protocol::{ActionKind, PluginConnection, RemoteAction};
use crate::registry::PluginRegistry;

/// Time a plugin has to answer the describe handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Time a plugin has to exit after a shutdown request
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

struct PluginProcess {
    name: String,
    child: Child,
    connection: Arc<Mutex<PluginConnection>>,
}

/// Starts plugin processes for one phase and hands out their actions
///
/// Every process is launched with the kubeconfig of the cluster the phase
/// acts on in `MIGRATOR_PLUGIN_KUBECONFIG` and `KUBECONFIG`. Processes are
/// killed if the manager is dropped without [`PluginManager::release_all`].
pub struct PluginManager {
    registry: PluginRegistry,
    kubeconfig: PathBuf,
    processes: Vec<PluginProcess>,
    builtin_actions: Vec<Arc<dyn ReplayItemAction>>,
    export_actions: Vec<Arc<dyn ExportItemAction>>,
    replay_actions: Vec<Arc<dyn ReplayItemAction>>,
}

impl PluginManager {
    /// Manager for the plugins in `registry`, acting on the cluster of `kubeconfig`
    pub fn new(registry: PluginRegistry, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            kubeconfig: kubeconfig.into(),
            processes: Vec::new(),
            builtin_actions: builtin_replay_actions(),
            export_actions: Vec::new(),
            replay_actions: Vec::new(),
        }
    }

    /// Discover and launch every plugin, collecting the actions they advertise.
    ///
    /// On failure all processes started so far are released.
    pub async fn start(&mut self) -> Result<(), PluginError> {
        let plugins = self.registry.discover()?;
        for path in plugins {
            if let Err(e) = self.launch(&path).await {
                self.release_all().await;
                return Err(e);
            }
        }

        info!(
            plugins = self.processes.len(),
            export_actions = self.export_actions.len(),
            replay_actions = self.builtin_actions.len() + self.replay_actions.len(),
            "Plugins started"
        );
        Ok(())
    }

    async fn launch(&mut self, path: &Path) -> Result<(), PluginError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let launch_error = |message: String| PluginError::Launch {
            plugin: name.clone(),
            message,
        };

        let mut child = Command::new(path)
            .env(PLUGIN_KUBECONFIG_ENV, &self.kubeconfig)
            .env("KUBECONFIG", &self.kubeconfig)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| launch_error(e.to_string()))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(launch_error("stdio not captured".to_string()));
        };
        let mut connection = PluginConnection::new(name.clone(), stdout, stdin);

        let actions = match timeout(HANDSHAKE_TIMEOUT, connection.describe()).await {
            Ok(Ok(actions)) => actions,
            Ok(Err(e)) => return Err(launch_error(e.to_string())),
            Err(_) => return Err(launch_error("describe timed out".to_string())),
        };

        let mut known: HashSet<&str> = self.export_actions.iter().map(|a| a.name()).collect();
        known.extend(self.replay_actions.iter().map(|a| a.name()));
        known.extend(self.builtin_actions.iter().map(|a| a.name()));
        if let Some(dup) = actions.iter().find(|a| known.contains(a.name.as_str())) {
            return Err(launch_error(format!("duplicate action name {}", dup.name)));
        }

        let connection = Arc::new(Mutex::new(connection));
        for descriptor in actions {
            debug!(plugin = %name, action = %descriptor.name, kind = ?descriptor.kind, "Registered action");
            let kind = descriptor.kind;
            let action = RemoteAction::new(descriptor, connection.clone());
            match kind {
                ActionKind::Export => self.export_actions.push(Arc::new(action)),
                ActionKind::Replay => self.replay_actions.push(Arc::new(action)),
            }
        }

        self.processes.push(PluginProcess {
            name,
            child,
            connection,
        });
        Ok(())
    }

    /// Export actions from all started plugins
    pub fn export_actions(&self) -> Vec<Arc<dyn ExportItemAction>> {
        self.export_actions.clone()
    }

    /// Built-in replay actions followed by those of all started plugins
    pub fn replay_actions(&self) -> Vec<Arc<dyn ReplayItemAction>> {
        self.builtin_actions
            .iter()
            .chain(&self.replay_actions)
            .cloned()
            .collect()
    }

    /// Number of running plugin processes
    pub fn running(&self) -> usize {
        self.processes.len()
    }

    /// Shut down every plugin process and wait for it to exit.
    ///
    /// Plugins that do not acknowledge or exit in time are killed. Safe to
    /// call more than once.
    pub async fn release_all(&mut self) {
        self.export_actions.clear();
        self.replay_actions.clear();

        for mut process in self.processes.drain(..) {
            let acknowledged = timeout(SHUTDOWN_TIMEOUT, async {
                process.connection.lock().await.shutdown().await
            })
            .await;
            match acknowledged {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(plugin = %process.name, error = %e, "Plugin did not acknowledge shutdown");
                }
                Err(_) => {
                    warn!(plugin = %process.name, "Plugin shutdown timed out");
                }
            }

            match timeout(SHUTDOWN_TIMEOUT, process.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(plugin = %process.name, %status, "Plugin exited");
                }
                _ => {
                    warn!(plugin = %process.name, "Killing plugin");
                    if let Err(e) = process.child.kill().await {
                        warn!(plugin = %process.name, error = %e, "Failed to kill plugin");
                    }
                }
            }
        }
    }
}
