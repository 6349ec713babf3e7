//! JSON-lines protocol between the host and plugin processes
//!
//! The host writes one [`PluginRequest`] per line to the plugin's stdin and
//! reads exactly one [`PluginResponse`] line back from its stdout. Requests
//! on a connection are strictly sequential.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::action::{
    ExportActionOutput, ExportItemAction, ReplayActionOutput, ReplayItemAction, ResourceSelector,
};
use crate::error::PluginError;

/// Phase an action runs in
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    /// Runs on each exported item
    Export,
    /// Runs on each replayed item
    Replay,
}

/// An action a plugin advertises in its describe response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    /// Action name
    pub name: String,
    /// Phase the action runs in
    pub kind: ActionKind,
    /// Objects the action applies to
    #[serde(default)]
    pub applies_to: ResourceSelector,
}

/// Message sent from the host to a plugin
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PluginRequest {
    /// List the actions the plugin provides
    Describe,
    /// Run an export action on one item
    Export {
        /// Action name
        action: String,
        /// Qualified resource name of the item
        resource: String,
        /// The object
        item: Value,
    },
    /// Run a replay action on one item
    Replay {
        /// Action name
        action: String,
        /// Qualified resource name of the item
        resource: String,
        /// The object
        item: Value,
        /// Name of the export being replayed
        #[serde(rename = "exportName")]
        export_name: String,
    },
    /// Stop serving and exit
    Shutdown,
}

/// Message sent from a plugin back to the host
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PluginResponse {
    /// Actions the plugin provides
    Describe {
        /// Advertised actions
        actions: Vec<ActionDescriptor>,
    },
    /// Result of an export action
    Export {
        /// Action output
        output: ExportActionOutput,
    },
    /// Result of a replay action
    Replay {
        /// Action output
        output: ReplayActionOutput,
    },
    /// The request failed
    Error {
        /// Failure description
        message: String,
    },
    /// Shutdown acknowledged
    Ack,
}

/// Host side of a plugin connection
pub struct PluginConnection {
    plugin: String,
    reader: Box<dyn AsyncBufRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl std::fmt::Debug for PluginConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginConnection")
            .field("plugin", &self.plugin)
            .finish_non_exhaustive()
    }
}

impl PluginConnection {
    /// Wrap the stdout (`reader`) and stdin (`writer`) of a plugin
    pub fn new<R, W>(plugin: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            plugin: plugin.into(),
            reader: Box::new(BufReader::new(reader)),
            writer: Box::new(writer),
        }
    }

    /// Plugin name used in errors and logs
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Send one request and wait for its response
    pub async fn call(&mut self, request: &PluginRequest) -> Result<PluginResponse, PluginError> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;

        let mut response = String::new();
        if self.reader.read_line(&mut response).await? == 0 {
            return Err(PluginError::protocol(
                &self.plugin,
                "connection closed before response",
            ));
        }

        serde_json::from_str(response.trim_end()).map_err(|e| {
            PluginError::protocol(&self.plugin, format!("invalid response: {}", e))
        })
    }

    /// Ask the plugin for its actions
    pub async fn describe(&mut self) -> Result<Vec<ActionDescriptor>, PluginError> {
        match self.call(&PluginRequest::Describe).await? {
            PluginResponse::Describe { actions } => Ok(actions),
            PluginResponse::Error { message } => Err(PluginError::protocol(&self.plugin, message)),
            other => Err(unexpected(&self.plugin, "describe", &other)),
        }
    }

    /// Ask the plugin to exit
    pub async fn shutdown(&mut self) -> Result<(), PluginError> {
        match self.call(&PluginRequest::Shutdown).await? {
            PluginResponse::Ack => Ok(()),
            other => Err(unexpected(&self.plugin, "shutdown", &other)),
        }
    }
}

fn unexpected(plugin: &str, request: &str, response: &PluginResponse) -> PluginError {
    PluginError::protocol(
        plugin,
        format!("unexpected response to {}: {:?}", request, response),
    )
}

/// An action served by a plugin process
///
/// All actions of one plugin share its connection.
#[derive(Clone, Debug)]
pub struct RemoteAction {
    descriptor: ActionDescriptor,
    connection: Arc<Mutex<PluginConnection>>,
}

impl RemoteAction {
    /// Bind an advertised action to its plugin connection
    pub fn new(descriptor: ActionDescriptor, connection: Arc<Mutex<PluginConnection>>) -> Self {
        Self {
            descriptor,
            connection,
        }
    }

    /// The advertised action
    pub fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    async fn request(&self, request: PluginRequest) -> Result<PluginResponse, PluginError> {
        let mut connection = self.connection.lock().await;
        match connection.call(&request).await? {
            PluginResponse::Error { message } => {
                Err(PluginError::action(&self.descriptor.name, message))
            }
            response => Ok(response),
        }
    }
}

#[async_trait]
impl ExportItemAction for RemoteAction {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn applies_to(&self) -> &ResourceSelector {
        &self.descriptor.applies_to
    }

    async fn execute(
        &self,
        resource: &str,
        item: Value,
    ) -> Result<ExportActionOutput, PluginError> {
        let response = self
            .request(PluginRequest::Export {
                action: self.descriptor.name.clone(),
                resource: resource.to_string(),
                item,
            })
            .await?;
        match response {
            PluginResponse::Export { output } => Ok(output),
            other => Err(unexpected(&self.descriptor.name, "export", &other)),
        }
    }
}

#[async_trait]
impl ReplayItemAction for RemoteAction {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn applies_to(&self) -> &ResourceSelector {
        &self.descriptor.applies_to
    }

    async fn execute(
        &self,
        resource: &str,
        item: Value,
        export_name: &str,
    ) -> Result<ReplayActionOutput, PluginError> {
        let response = self
            .request(PluginRequest::Replay {
                action: self.descriptor.name.clone(),
                resource: resource.to_string(),
                item,
                export_name: export_name.to_string(),
            })
            .await?;
        match response {
            PluginResponse::Replay { output } => Ok(output),
            other => Err(unexpected(&self.descriptor.name, "replay", &other)),
        }
    }
}

/// Plugin side of the protocol
///
/// A plugin binary registers its actions and calls [`PluginServer::serve_stdio`]:
///
/// ```no_run
/// # async fn run(action: impl migrator_plugin::ReplayItemAction + 'static) {
/// use migrator_plugin::PluginServer;
///
/// PluginServer::new()
///     .with_replay_action(action)
///     .serve_stdio()
///     .await
///     .unwrap();
/// # }
/// ```
#[derive(Default)]
pub struct PluginServer {
    export_actions: Vec<Arc<dyn ExportItemAction>>,
    replay_actions: Vec<Arc<dyn ReplayItemAction>>,
}

impl PluginServer {
    /// Server with no actions
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an export action
    pub fn with_export_action(mut self, action: impl ExportItemAction + 'static) -> Self {
        self.export_actions.push(Arc::new(action));
        self
    }

    /// Register a replay action
    pub fn with_replay_action(mut self, action: impl ReplayItemAction + 'static) -> Self {
        self.replay_actions.push(Arc::new(action));
        self
    }

    fn describe(&self) -> Vec<ActionDescriptor> {
        let export = self.export_actions.iter().map(|a| ActionDescriptor {
            name: a.name().to_string(),
            kind: ActionKind::Export,
            applies_to: a.applies_to().clone(),
        });
        let replay = self.replay_actions.iter().map(|a| ActionDescriptor {
            name: a.name().to_string(),
            kind: ActionKind::Replay,
            applies_to: a.applies_to().clone(),
        });
        export.chain(replay).collect()
    }

    async fn handle(&self, request: PluginRequest) -> PluginResponse {
        let result = match request {
            PluginRequest::Describe => {
                return PluginResponse::Describe {
                    actions: self.describe(),
                }
            }
            PluginRequest::Shutdown => return PluginResponse::Ack,
            PluginRequest::Export {
                action,
                resource,
                item,
            } => match self.export_actions.iter().find(|a| a.name() == action) {
                Some(a) => a
                    .execute(&resource, item)
                    .await
                    .map(|output| PluginResponse::Export { output }),
                None => Err(PluginError::action(action, "no such export action")),
            },
            PluginRequest::Replay {
                action,
                resource,
                item,
                export_name,
            } => match self.replay_actions.iter().find(|a| a.name() == action) {
                Some(a) => a
                    .execute(&resource, item, &export_name)
                    .await
                    .map(|output| PluginResponse::Replay { output }),
                None => Err(PluginError::action(action, "no such replay action")),
            },
        };

        result.unwrap_or_else(|e| PluginResponse::Error {
            message: e.to_string(),
        })
    }

    /// Answer requests until shutdown or end of input
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<(), PluginError>
    where
        R: AsyncRead + Send + Unpin,
        W: AsyncWrite + Send + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            let (response, stop) = match serde_json::from_str::<PluginRequest>(&line) {
                Ok(request) => {
                    let stop = request == PluginRequest::Shutdown;
                    (self.handle(request).await, stop)
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed request");
                    let response = PluginResponse::Error {
                        message: format!("malformed request: {}", e),
                    };
                    (response, false)
                }
            };

            let mut out = serde_json::to_string(&response)?;
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;

            if stop {
                debug!("Shutdown requested");
                return Ok(());
            }
        }
        Ok(())
    }

    /// Answer requests on stdin/stdout
    pub async fn serve_stdio(&self) -> Result<(), PluginError> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct LabelAction {
        selector: ResourceSelector,
    }

    #[async_trait]
    impl ExportItemAction for LabelAction {
        fn name(&self) -> &str {
            "test/label"
        }

        fn applies_to(&self) -> &ResourceSelector {
            &self.selector
        }

        async fn execute(
            &self,
            _resource: &str,
            mut item: Value,
        ) -> Result<ExportActionOutput, PluginError> {
            item["metadata"]["labels"]["exported"] = json!("true");
            Ok(ExportActionOutput::unchanged(item))
        }
    }

    struct RejectAction {
        selector: ResourceSelector,
    }

    #[async_trait]
    impl ReplayItemAction for RejectAction {
        fn name(&self) -> &str {
            "test/reject"
        }

        fn applies_to(&self) -> &ResourceSelector {
            &self.selector
        }

        async fn execute(
            &self,
            resource: &str,
            _item: Value,
            export_name: &str,
        ) -> Result<ReplayActionOutput, PluginError> {
            Err(PluginError::action(
                self.name(),
                format!("{} from {} not allowed", resource, export_name),
            ))
        }
    }

    fn test_server() -> PluginServer {
        PluginServer::new()
            .with_export_action(LabelAction {
                selector: ResourceSelector::for_resources(&["configmaps"]),
            })
            .with_replay_action(RejectAction {
                selector: ResourceSelector::default(),
            })
    }

    fn connect(server: PluginServer) -> (PluginConnection, tokio::task::JoinHandle<()>) {
        let (host, plugin) = tokio::io::duplex(64 * 1024);
        let (host_read, host_write) = tokio::io::split(host);
        let (plugin_read, plugin_write) = tokio::io::split(plugin);
        let task = tokio::spawn(async move {
            server.serve(plugin_read, plugin_write).await.unwrap();
        });
        (PluginConnection::new("test", host_read, host_write), task)
    }

    #[test]
    fn request_wire_format() {
        let request = PluginRequest::Replay {
            action: "a".to_string(),
            resource: "pods".to_string(),
            item: json!({}),
            export_name: "e".to_string(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "replay");
        assert_eq!(value["exportName"], "e");

        let value = serde_json::to_value(PluginRequest::Describe).unwrap();
        assert_eq!(value, json!({"type": "describe"}));
    }

    #[tokio::test]
    async fn describe_lists_all_actions() {
        let (mut conn, _task) = connect(test_server());

        let actions = conn.describe().await.unwrap();

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].name, "test/label");
        assert_eq!(actions[0].kind, ActionKind::Export);
        assert_eq!(
            actions[0].applies_to.included_resources,
            vec!["configmaps".to_string()]
        );
        assert_eq!(actions[1].kind, ActionKind::Replay);
    }

    #[tokio::test]
    async fn remote_export_action_round_trips_item() {
        let (mut conn, _task) = connect(test_server());
        let descriptor = conn.describe().await.unwrap().remove(0);
        let action = RemoteAction::new(descriptor, Arc::new(Mutex::new(conn)));

        let output = ExportItemAction::execute(
            &action,
            "configmaps",
            json!({"metadata": {"name": "settings"}}),
        )
        .await
        .unwrap();

        assert_eq!(output.item["metadata"]["labels"]["exported"], "true");
        assert_eq!(ExportItemAction::name(&action), "test/label");
    }

    #[tokio::test]
    async fn remote_replay_failure_is_action_error() {
        let (mut conn, _task) = connect(test_server());
        let descriptor = conn.describe().await.unwrap().remove(1);
        let action = RemoteAction::new(descriptor, Arc::new(Mutex::new(conn)));

        let err = ReplayItemAction::execute(&action, "pods", json!({}), "export-1")
            .await
            .unwrap_err();

        match err {
            PluginError::Action { action, message } => {
                assert_eq!(action, "test/reject");
                assert!(message.contains("pods from export-1 not allowed"));
            }
            other => panic!("expected action error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_action_is_reported() {
        let (mut conn, _task) = connect(test_server());

        let response = conn
            .call(&PluginRequest::Export {
                action: "missing".to_string(),
                resource: "pods".to_string(),
                item: json!({}),
            })
            .await
            .unwrap();

        assert!(matches!(response, PluginResponse::Error { .. }));
    }

    #[tokio::test]
    async fn malformed_request_gets_error_response() {
        let (host, plugin) = tokio::io::duplex(4096);
        let (host_read, mut host_write) = tokio::io::split(host);
        let (plugin_read, plugin_write) = tokio::io::split(plugin);
        let task = tokio::spawn(async move {
            test_server().serve(plugin_read, plugin_write).await
        });

        host_write.write_all(b"{not json}\n").await.unwrap();
        let mut lines = BufReader::new(host_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let response: PluginResponse = serde_json::from_str(&line).unwrap();
        assert!(matches!(response, PluginResponse::Error { .. }));

        // Closing input ends the server cleanly
        drop(host_write);
        drop(lines);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn shutdown_stops_server() {
        let (mut conn, task) = connect(test_server());

        conn.shutdown().await.unwrap();

        task.await.unwrap();
    }
}
