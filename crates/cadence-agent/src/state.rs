//! Run state and partial updates.
//!
//! A run owns a single [`RunState`].  Nodes never mutate it directly: each
//! node returns a [`StateUpdate`] describing the fields it wants to change,
//! and the engine merges it with [`RunState::apply`].
//!
//! Merge rules:
//!
//! - scalar fields: last writer wins
//! - `messages`: appended, or replaced wholesale by compaction
//! - `current_graph_step`: merged with `max`, so it never decreases

use serde::{Deserialize, Serialize};

use crate::llm::types::Message;

// ---------------------------------------------------------------------------
// Node identifiers
// ---------------------------------------------------------------------------

/// Every node of the orchestration graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Planner,
    PlannerValidator,
    Executor,
    ExecValidator,
    Tools,
    AdaptivePlanner,
    Human,
    Summarize,
    /// Boundary between the engine and the outside world (supervisor
    /// directives, caller input).
    Supervisor,
    End,
}

impl NodeId {
    /// Canonical node name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::PlannerValidator => "planner_validator",
            Self::Executor => "executor",
            Self::ExecValidator => "exec_validator",
            Self::Tools => "tools",
            Self::AdaptivePlanner => "adaptive_planner",
            Self::Human => "human",
            Self::Summarize => "summarize",
            Self::Supervisor => "supervisor",
            Self::End => "end",
        }
    }

    /// All node identifiers.
    pub const ALL: [NodeId; 10] = [
        Self::Planner,
        Self::PlannerValidator,
        Self::Executor,
        Self::ExecValidator,
        Self::Tools,
        Self::AdaptivePlanner,
        Self::Human,
        Self::Summarize,
        Self::Supervisor,
        Self::End,
    ];
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Execution status of a step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// What kind of work a step represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Answered by the model in plain text.
    #[default]
    Message,
    /// Requires tool calls.
    Tools,
    /// Requires input from a human before it can complete.
    HumanInTheLoop,
}

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Zero-based position in the plan.
    pub index: usize,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default)]
    pub kind: StepKind,
    /// Text produced by the executor once the step completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl Step {
    /// A pending step.
    pub fn new(
        index: usize,
        name: impl Into<String>,
        description: impl Into<String>,
        kind: StepKind,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            description: description.into(),
            status: StepStatus::Pending,
            kind,
            result: None,
        }
    }
}

/// Ordered steps plus a summary of the strategy.
///
/// An empty plan means "no active plan"; there is no null plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub summary: String,
}

impl Plan {
    /// The canonical empty plan.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Position of the first pending step strictly after `index`.
    pub fn next_pending_after(&self, index: usize) -> Option<usize> {
        self.steps
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, s)| s.status == StepStatus::Pending)
            .map(|(position, _)| position)
    }

    /// Append steps after the existing ones, renumbering them to follow on.
    /// Returns the index of the first appended step.
    pub fn append(&mut self, steps: impl IntoIterator<Item = Step>) -> usize {
        let first = self.steps.len();
        for (offset, mut step) in steps.into_iter().enumerate() {
            step.index = first + offset;
            step.status = StepStatus::Pending;
            step.result = None;
            self.steps.push(step);
        }
        first
    }
}

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

/// The complete state of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub last_node: Option<NodeId>,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub current_step_index: usize,
    #[serde(default)]
    pub current_graph_step: u32,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub memory_context: String,
    #[serde(default)]
    pub rag_context: String,
}

impl RunState {
    /// A fresh run seeded with the caller's message.
    pub fn new(input: Message) -> Self {
        Self {
            messages: vec![input],
            ..Self::default()
        }
    }

    /// The most recent message.
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The step at `current_step_index`, if the plan has one there.
    pub fn active_step(&self) -> Option<&Step> {
        self.plan.steps.get(self.current_step_index)
    }

    /// The last `window` messages.
    pub fn recent_messages(&self, window: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    /// Sum of completion tokens over the whole history.
    pub fn completion_tokens(&self) -> u64 {
        self.messages
            .iter()
            .map(|m| u64::from(m.completion_tokens()))
            .sum()
    }

    /// Content of the first human message, used as the run's objective.
    pub fn objective(&self) -> &str {
        self.messages
            .iter()
            .find(|m| m.role == crate::llm::types::Role::Human)
            .map_or("", |m| m.content.as_str())
    }

    /// Merge a node's partial update into the state.
    pub fn apply(&mut self, update: StateUpdate) {
        match update.messages {
            Some(MessagesUpdate::Append(mut messages)) => self.messages.append(&mut messages),
            Some(MessagesUpdate::Replace(messages)) => self.messages = messages,
            None => {}
        }
        if let Some(node) = update.last_node {
            self.last_node = Some(node);
        }
        if let Some(plan) = update.plan {
            self.plan = plan;
        }
        if let Some(index) = update.current_step_index {
            self.current_step_index = index;
        }
        if let Some(step) = update.current_graph_step {
            self.current_graph_step = self.current_graph_step.max(step);
        }
        if let Some(count) = update.retry_count {
            self.retry_count = count;
        }
        if let Some(ctx) = update.memory_context {
            self.memory_context = ctx;
        }
        if let Some(ctx) = update.rag_context {
            self.rag_context = ctx;
        }

        if !self.plan.is_empty() && self.current_step_index >= self.plan.steps.len() {
            let clamped = self.plan.steps.len() - 1;
            tracing::warn!(
                index = self.current_step_index,
                clamped,
                "step index out of range after merge"
            );
            self.current_step_index = clamped;
        }
    }
}

// ---------------------------------------------------------------------------
// Partial updates
// ---------------------------------------------------------------------------

/// How a node changes the message history.
#[derive(Debug, Clone, PartialEq)]
pub enum MessagesUpdate {
    /// Append messages in order.
    Append(Vec<Message>),
    /// Replace the whole history (compaction only).
    Replace(Vec<Message>),
}

/// A partial update returned by a node.  `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub messages: Option<MessagesUpdate>,
    pub last_node: Option<NodeId>,
    pub plan: Option<Plan>,
    pub current_step_index: Option<usize>,
    pub current_graph_step: Option<u32>,
    pub retry_count: Option<u32>,
    pub memory_context: Option<String>,
    pub rag_context: Option<String>,
}

impl StateUpdate {
    /// An update that records one graph step taken by `node`.
    pub fn step(node: NodeId, state: &RunState) -> Self {
        Self {
            last_node: Some(node),
            current_graph_step: Some(state.current_graph_step + 1),
            ..Self::default()
        }
    }

    /// Builder: append a message.
    pub fn message(mut self, message: Message) -> Self {
        match self.messages.as_mut() {
            Some(MessagesUpdate::Append(messages)) => messages.push(message),
            Some(MessagesUpdate::Replace(messages)) => messages.push(message),
            None => self.messages = Some(MessagesUpdate::Append(vec![message])),
        }
        self
    }

    /// Builder: append several messages.
    pub fn messages(self, messages: impl IntoIterator<Item = Message>) -> Self {
        messages.into_iter().fold(self, Self::message)
    }

    /// Builder: replace the history.
    pub fn replace_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(MessagesUpdate::Replace(messages));
        self
    }

    pub fn plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    pub fn step_index(mut self, index: usize) -> Self {
        self.current_step_index = Some(index);
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Messages this update appends (empty for replacements).
    pub fn appended(&self) -> &[Message] {
        match &self.messages {
            Some(MessagesUpdate::Append(messages)) => messages,
            _ => &[],
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
