//! Item actions for export and replay
//!
//! Actions let extensions rewrite each object as it is exported from the
//! source or replayed into the destination, and pull related objects along.
//!
//! ## Architecture
//!
//! ```text
//! PluginManager
//! ─────────────────
//! built-in actions (in-process)        plugin directory
//!   ├─ PodReplayAction                   ├─ plugin-a  ──┐ spawned with
//!   └─ ServiceReplayAction               └─ plugin-b  ──┤ MIGRATOR_PLUGIN_KUBECONFIG
//!                                                       │
//!                 JSON lines over stdin/stdout ◄────────┘
//!                 describe → actions
//!                 export / replay → output
//!                 shutdown → ack
//! ```
//!
//! Plugin binaries implement their side with [`PluginServer`].

mod action;
mod builtin;
mod error;
mod manager;
mod protocol;
mod registry;

pub use action::{
    resource_matches, ExportActionOutput, ExportItemAction, ReplayActionOutput, ReplayItemAction,
    ResourceIdentifier, ResourceSelector,
};
pub use builtin::{builtin_replay_actions, PodReplayAction, ServiceReplayAction};
pub use error::PluginError;
pub use manager::PluginManager;
pub use protocol::{
    ActionDescriptor, ActionKind, PluginConnection, PluginRequest, PluginResponse, PluginServer,
    RemoteAction,
};
pub use registry::PluginRegistry;
