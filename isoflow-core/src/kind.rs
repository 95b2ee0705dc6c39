//! Flow kinds and the read-only descriptor table built from them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Operation code sent to the worker alongside the parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpCode(pub i32);

impl OpCode {
    pub const EXECUTE: OpCode = OpCode(1);
    pub const DOWNLOAD: OpCode = OpCode(2);
    pub const RENDER: OpCode = OpCode(3);
    pub const WEB_VIEW_EVENT: OpCode = OpCode(4);
    pub const TRAINING_EXAMPLE: OpCode = OpCode(5);
    pub const WEB_TRIGGER: OpCode = OpCode(6);
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", self.0)
    }
}

/// Admission priority when the background pool is saturated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    AppRequest,
    Render,
    WebTrigger,
    WebView,
    ExampleStore,
    Download,
}

impl FlowKind {
    pub const ALL: [FlowKind; 6] = [
        FlowKind::AppRequest,
        FlowKind::Render,
        FlowKind::WebTrigger,
        FlowKind::WebView,
        FlowKind::ExampleStore,
        FlowKind::Download,
    ];

    pub fn task_name(&self) -> &'static str {
        match self {
            FlowKind::AppRequest => "AppRequest",
            FlowKind::Render => "Render",
            FlowKind::WebTrigger => "WebTrigger",
            FlowKind::WebView => "WebView",
            FlowKind::ExampleStore => "ExampleStore",
            FlowKind::Download => "DownloadJob",
        }
    }

    pub fn op_code(&self) -> OpCode {
        match self {
            FlowKind::AppRequest => OpCode::EXECUTE,
            FlowKind::Render => OpCode::RENDER,
            FlowKind::WebTrigger => OpCode::WEB_TRIGGER,
            FlowKind::WebView => OpCode::WEB_VIEW_EVENT,
            FlowKind::ExampleStore => OpCode::TRAINING_EXAMPLE,
            FlowKind::Download => OpCode::DOWNLOAD,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            FlowKind::AppRequest | FlowKind::Render => Priority::High,
            FlowKind::Download => Priority::Low,
            _ => Priority::Normal,
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.task_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowKindDescriptor {
    pub kind: FlowKind,
    pub task_name: &'static str,
    pub op_code: OpCode,
    pub priority: Priority,
    pub deadline: Duration,
}

/// Process-wide descriptor table. Built once at start, then only read.
#[derive(Debug, Clone)]
pub struct FlowKindTable {
    entries: HashMap<FlowKind, FlowKindDescriptor>,
}

impl FlowKindTable {
    pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

    pub fn new(default_deadline: Duration) -> Self {
        Self::with_overrides(default_deadline, &HashMap::new())
    }

    pub fn with_overrides(
        default_deadline: Duration,
        overrides: &HashMap<FlowKind, Duration>,
    ) -> Self {
        let entries = FlowKind::ALL
            .iter()
            .map(|&kind| {
                let deadline = overrides.get(&kind).copied().unwrap_or(default_deadline);
                (
                    kind,
                    FlowKindDescriptor {
                        kind,
                        task_name: kind.task_name(),
                        op_code: kind.op_code(),
                        priority: kind.priority(),
                        deadline,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn descriptor(&self, kind: FlowKind) -> &FlowKindDescriptor {
        // every kind is inserted by the constructors
        &self.entries[&kind]
    }

    pub fn deadline(&self, kind: FlowKind) -> Duration {
        self.descriptor(kind).deadline
    }

    pub fn iter(&self) -> impl Iterator<Item = &FlowKindDescriptor> {
        self.entries.values()
    }
}

impl Default for FlowKindTable {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DEADLINE)
    }
}
