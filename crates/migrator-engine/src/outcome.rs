//! Replay outcome
//!
//! Per-object failures during replay are recorded here instead of aborting
//! the run. The warning and error views partition the recorded events by
//! scope for reporting.

use std::collections::BTreeMap;
use std::fmt;

use migrator_plugin::ResourceIdentifier;

/// Part of the system an event relates to
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// Cluster-scoped objects or the cluster as a whole
    Cluster,
    /// Objects in one namespace
    Namespace(String),
    /// Item actions and the replay run itself
    Plugin,
}

impl Scope {
    /// Scope for an object in `namespace`, cluster scope when absent
    pub fn for_namespace(namespace: Option<&str>) -> Self {
        match namespace {
            Some(ns) => Scope::Namespace(ns.to_string()),
            None => Scope::Cluster,
        }
    }
}

/// Event severity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Object replayed with caveats
    Warning,
    /// Object not replayed
    Error,
}

/// Reference to the object an event is about
pub type ResourceRef = ResourceIdentifier;

/// One warning or error from a replay run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplayEvent {
    /// Where the event belongs
    pub scope: Scope,
    /// Warning or error
    pub severity: Severity,
    /// What happened
    pub message: String,
    /// Object involved, if any
    pub resource: Option<ResourceRef>,
}

impl fmt::Display for ReplayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource {
            Some(r) => match &r.namespace {
                Some(ns) => write!(f, "{} {}/{}: {}", r.resource, ns, r.name, self.message),
                None => write!(f, "{} {}: {}", r.resource, r.name, self.message),
            },
            None => f.write_str(&self.message),
        }
    }
}

/// How a replay run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// No warnings or errors
    Succeeded,
    /// Warnings but no errors
    CompletedWithWarnings,
    /// At least one error
    CompletedWithErrors,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Completion::Succeeded => "completed successfully",
            Completion::CompletedWithWarnings => "completed with warnings",
            Completion::CompletedWithErrors => "completed with errors",
        })
    }
}

/// Messages of one severity grouped by scope
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopedMessages {
    /// Cluster-scoped messages
    pub cluster: Vec<String>,
    /// Messages per namespace
    pub namespaces: BTreeMap<String, Vec<String>>,
    /// Plugin and run-level messages
    pub plugins: Vec<String>,
}

impl ScopedMessages {
    /// Whether there are no messages
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of messages
    pub fn len(&self) -> usize {
        self.cluster.len()
            + self.plugins.len()
            + self.namespaces.values().map(Vec::len).sum::<usize>()
    }
}

impl fmt::Display for ScopedMessages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.cluster.is_empty() {
            writeln!(f, "Cluster:")?;
            for msg in &self.cluster {
                writeln!(f, "  {}", msg)?;
            }
        }
        if !self.namespaces.is_empty() {
            writeln!(f, "Namespaces:")?;
            for (ns, messages) in &self.namespaces {
                for msg in messages {
                    writeln!(f, "  {}: {}", ns, msg)?;
                }
            }
        }
        if !self.plugins.is_empty() {
            writeln!(f, "Plugins:")?;
            for msg in &self.plugins {
                writeln!(f, "  {}", msg)?;
            }
        }
        Ok(())
    }
}

/// Result of one replay run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    events: Vec<ReplayEvent>,
    restored: usize,
}

impl ReplayOutcome {
    /// Empty outcome
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event
    pub fn record(&mut self, event: ReplayEvent) {
        self.events.push(event);
    }

    /// Record a warning
    pub fn warn(&mut self, scope: Scope, resource: Option<ResourceRef>, message: impl Into<String>) {
        self.record(ReplayEvent {
            scope,
            severity: Severity::Warning,
            message: message.into(),
            resource,
        });
    }

    /// Record an error
    pub fn error(&mut self, scope: Scope, resource: Option<ResourceRef>, message: impl Into<String>) {
        self.record(ReplayEvent {
            scope,
            severity: Severity::Error,
            message: message.into(),
            resource,
        });
    }

    /// Count one object created on the destination
    pub fn restored_one(&mut self) {
        self.restored += 1;
    }

    /// Objects created on the destination
    pub fn restored(&self) -> usize {
        self.restored
    }

    /// All events in the order they were recorded
    pub fn events(&self) -> &[ReplayEvent] {
        &self.events
    }

    /// Warnings grouped by scope
    pub fn warnings(&self) -> ScopedMessages {
        self.partition(Severity::Warning)
    }

    /// Errors grouped by scope
    pub fn errors(&self) -> ScopedMessages {
        self.partition(Severity::Error)
    }

    /// Whether any error was recorded
    pub fn has_errors(&self) -> bool {
        self.events.iter().any(|e| e.severity == Severity::Error)
    }

    /// Whether any warning was recorded
    pub fn has_warnings(&self) -> bool {
        self.events.iter().any(|e| e.severity == Severity::Warning)
    }

    /// Classify the run: errors win over warnings
    pub fn completion(&self) -> Completion {
        if self.has_errors() {
            Completion::CompletedWithErrors
        } else if self.has_warnings() {
            Completion::CompletedWithWarnings
        } else {
            Completion::Succeeded
        }
    }

    fn partition(&self, severity: Severity) -> ScopedMessages {
        let mut messages = ScopedMessages::default();
        for event in self.events.iter().filter(|e| e.severity == severity) {
            let text = event.to_string();
            match &event.scope {
                Scope::Cluster => messages.cluster.push(text),
                Scope::Namespace(ns) => messages.namespaces.entry(ns.clone()).or_default().push(text),
                Scope::Plugin => messages.plugins.push(text),
            }
        }
        messages
    }
}
