//! The routine data model.
//!
//! A [`Routine`] is immutable configuration for one automation target:
//! nodes, edges, reference-frame metadata and scheduling groups. Routines
//! are loaded once per runtime session and never mutated afterwards — only
//! [`crate::graph::RoutineGraph`] and the navigation runtime hold any
//! mutable state derived from one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::exec_result::ExecResult;

/// Immutable configuration for one automation target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Routine {
    pub id: String,
    pub name: String,
    pub window_name: String,
    pub start_command: String,
    pub nodes: HashMap<String, Node>,
    pub frames: HashMap<String, FrameMeta>,
    pub scheduling_groups: HashMap<String, SchedulingGroup>,
}

/// The id every runnable routine must contain.
pub const START_NODE_ID: &str = "start";

/// Dimensions of a reference frame. The pixel data itself lives on disk
/// and is loaded lazily through
/// [`crate::frame_cache::FrameCache`] rather than stored inline here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameMeta {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub default_condition: Condition,
    /// Outgoing edges of this node. Always empty for [`NodeKind::Return`]
    /// nodes — their outgoing behavior is synthesized at navigation time
    /// from the call stack.
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Standard,
    /// Marks the entry of a subroutine graph.
    Init,
    /// Marks a return site; has no stored outgoing edges.
    Return,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    /// Source node id. Blank until [`crate::graph::RoutineGraph::build`]
    /// fills it in from the owning node.
    #[serde(default)]
    pub from: String,
    pub to: String,
    pub trigger: EdgeTrigger,
    pub precondition: Condition,
    pub postcondition: Condition,
    pub action: EdgeAction,
    pub repeat_lower: u32,
    pub repeat_upper: u32,
    pub schedules: Vec<ScheduleBinding>,
    pub dependencies: Vec<Dependency>,
}

impl Edge {
    /// The node this edge enters a subroutine at, if its action is a
    /// subroutine call. Used by augmented-graph synthesis.
    pub fn subroutine_entry(&self) -> Option<&str> {
        match &self.action {
            EdgeAction::Subroutine { entry } => Some(entry.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeTrigger {
    Standard,
    /// Selected before any standard edge at the same node whenever its
    /// precondition passes.
    Interrupt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EdgeAction {
    None,
    Replay(InputReplay),
    Subroutine { entry: String },
}

/// Binds an edge to a [`SchedulingGroup`] by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleBinding {
    pub group: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub id: String,
    /// The edge-id that must complete.
    pub requires: String,
    pub requirement: ExecResult,
    /// Number of satisfactions needed before this dependency is met.
    pub count: u32,
    pub kind: DependencyKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyKind {
    Explicit,
}

/// A condition to evaluate against a frame.
///
/// `delay`/`interval`/`timeout` govern [`crate::condition::check`]'s polling
/// loop regardless of which variant is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub kind: ConditionKind,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Defaults to 30_000ms when unset.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_interval_ms() -> u64 {
    200
}

impl Condition {
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

    pub fn none() -> Self {
        Self {
            kind: ConditionKind::None,
            delay_ms: 0,
            interval_ms: default_interval_ms(),
            timeout_ms: None,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(Self::DEFAULT_TIMEOUT_MS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConditionKind {
    None,
    Image(ImageCondition),
    /// Reserved; not implemented.
    Text(TextCondition),
    /// Use the source node's default for precondition, destination's for
    /// postcondition. Resolved afresh per call, never stored.
    Auto,
    /// Always means "use destination's default condition".
    Target,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextCondition {
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    CcorrNormed,
    CcoeffNormed,
    SqdiffNormed,
}

impl Default for MatchMethod {
    fn default() -> Self {
        MatchMethod::CcorrNormed
    }
}

/// A rectangle in pixel coordinates, both bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl Rect {
    pub fn width(&self) -> i64 {
        self.right - self.left + 1
    }

    pub fn height(&self) -> i64 {
        self.bottom - self.top + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageCondition {
    pub frame_id: String,
    pub regions: Vec<Rect>,
    #[serde(default)]
    pub allow_regions: Vec<Rect>,
    #[serde(default)]
    pub method: MatchMethod,
    pub threshold: f32,
    /// NMS exclusion radius in pixels.
    pub padding: i64,
    pub match_limit: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputReplay {
    pub events: Vec<InputEvent>,
    #[serde(default)]
    pub relative: bool,
    #[serde(default)]
    pub offset: Option<(i64, i64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputEvent {
    pub timestamp_ms: u64,
    pub kind: InputEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InputEventKind {
    Move { x: i64, y: i64 },
    MouseDown,
    MouseUp,
    /// Reserved; not implemented.
    KeyDown(u32),
    /// Reserved; not implemented.
    KeyUp(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodPreset {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
}

/// A periodic dispatch source binding a set of edges to fire at specified
/// offsets within the period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingGroup {
    /// Arbitrary period in seconds. Mutually exclusive with
    /// `period_preset`.
    #[serde(default)]
    pub period: Option<u64>,
    #[serde(default)]
    pub period_preset: Option<PeriodPreset>,
    /// Offsets within the period, in seconds. Sorted and de-duplicated on
    /// load.
    pub dispatch_times: Vec<u64>,
}

/// Per-edge execution statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExecutionInfo {
    pub total_attempts: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    /// Monotonic milliseconds (see [`crate::time::now_ms`]) before which
    /// this edge should not be reattempted.
    pub next_retry_ms: i64,
}

impl ExecutionInfo {
    pub fn ready_at(&self, now_ms: i64) -> bool {
        now_ms >= self.next_retry_ms
    }
}
