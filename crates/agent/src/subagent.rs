//! Sub-agent spawning — bounded, one-level-deep delegation.
//!
//! Two capabilities are exposed to the model as ordinary tools:
//!
//! - [`ExploreContextTool`] runs up to N read-only exploration tasks
//!   concurrently, each as a child inner loop.
//! - [`ParallelExecuteTool`] runs a DAG of subtasks in topological
//!   waves, each wave bounded by the concurrency cap.
//!
//! Children share the parent's provider and tool registry but never its
//! memory buffer — each child runs a detached loop over its own
//! transcript. Depth and live-agent caps are enforced before any child
//! work starts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use ironloop_core::{Message, Provider, SideEffect, Tool, ToolError, ToolRegistry};
use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::ToolExecutor;
use crate::react::ReactLoop;

/// Caps and limits for sub-agent execution.
#[derive(Debug, Clone)]
pub struct SubAgentConfig {
    /// Concurrent children per spawning tool call
    pub max_parallel: usize,
    /// Live children across the whole task
    pub max_live_agents: usize,
    /// Maximum nesting depth (root is 0)
    pub max_depth: u32,
    /// Inner-loop iterations granted to each child
    pub child_max_iterations: u32,
    /// Per-child output ceiling in characters
    pub child_output_chars: usize,
    /// Tool timeout inside child loops
    pub tool_timeout: Duration,
}

impl Default for SubAgentConfig {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            max_live_agents: 8,
            max_depth: 2,
            child_max_iterations: 10,
            child_output_chars: 2000,
            tool_timeout: Duration::from_secs(600),
        }
    }
}

/// Everything a child loop needs to run.
#[derive(Debug, Clone)]
pub struct SubAgentSpec {
    /// The subtask prompt
    pub task: String,
    /// Role framing installed as the child's system message
    pub role_prompt: String,
    /// Parent-context snapshot prepended to the child transcript.
    /// Children never see the live parent buffer.
    pub context_snapshot: Vec<Message>,
    /// Iteration budget override; `None` uses the configured child limit
    pub max_iterations: Option<u32>,
    /// Nesting depth of the child
    pub depth: u32,
}

/// Creates bounded child loops with filtered tool sets.
///
/// The registry handle is set once, after the registry (which contains
/// the spawner's own tools) has been fully built; from then on the
/// registry is immutable.
pub struct SubAgentSpawner {
    provider: Arc<dyn Provider>,
    model: String,
    config: SubAgentConfig,
    registry: OnceLock<Arc<ToolRegistry>>,
    live_agents: AtomicUsize,
}

impl SubAgentSpawner {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        config: SubAgentConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            model: model.into(),
            config,
            registry: OnceLock::new(),
            live_agents: AtomicUsize::new(0),
        })
    }

    /// Install the fully built tool registry. May only happen once.
    pub fn set_registry(&self, registry: Arc<ToolRegistry>) {
        if self.registry.set(registry).is_err() {
            warn!("Sub-agent registry was already set, ignoring");
        }
    }

    pub fn config(&self) -> &SubAgentConfig {
        &self.config
    }

    fn registry(&self) -> Result<&Arc<ToolRegistry>, ToolError> {
        self.registry.get().ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: "sub_agent".into(),
            reason: "tool registry not yet installed".into(),
        })
    }

    /// Tool set for exploration children: read-only and network tools,
    /// optionally narrowed further by name, plus one more level of
    /// `explore_context`.
    fn explore_registry(
        self: &Arc<Self>,
        child_depth: u32,
        tool_filter: Option<&[String]>,
    ) -> Result<Arc<ToolRegistry>, ToolError> {
        let base = self.registry()?;
        let mut filtered = base.subset(|t| {
            matches!(t.side_effect(), SideEffect::ReadOnly | SideEffect::Network)
                && tool_filter.map_or(true, |names| names.iter().any(|n| n == t.name()))
        });
        filtered.register(Arc::new(ExploreContextTool::new(self.clone(), child_depth)));
        Ok(Arc::new(filtered))
    }

    /// Tool set for parallel-execute children: everything except
    /// `parallel_execute` itself; `explore_context` is re-issued at the
    /// child's depth.
    fn execute_registry(self: &Arc<Self>, child_depth: u32) -> Result<Arc<ToolRegistry>, ToolError> {
        let base = self.registry()?;
        let mut filtered = base.subset(|t| t.side_effect() != SideEffect::SpawnsSubAgent);
        filtered.register(Arc::new(ExploreContextTool::new(self.clone(), child_depth)));
        Ok(Arc::new(filtered))
    }

    /// Run one child loop over a detached transcript.
    ///
    /// Returns `Err` with an `Error:`-shaped marker on cap or loop
    /// failure; partial failures are reported alongside successes by the
    /// callers.
    async fn run_child(
        self: &Arc<Self>,
        spec: SubAgentSpec,
        registry: Arc<ToolRegistry>,
        cancel: CancellationToken,
    ) -> Result<String, String> {
        let _slot = self.try_acquire_slot().ok_or_else(|| {
            format!(
                "Error: max_agents: live sub-agent limit ({}) reached",
                self.config.max_live_agents
            )
        })?;

        let executor = Arc::new(ToolExecutor::new(registry, self.config.tool_timeout));
        let react = ReactLoop::new(self.provider.clone(), self.model.clone(), executor)
            .with_max_iterations(
                spec.max_iterations
                    .unwrap_or(self.config.child_max_iterations),
            );

        debug!(depth = spec.depth, "Starting child loop");

        let mut seed = vec![Message::system(spec.role_prompt)];
        seed.extend(spec.context_snapshot);
        seed.push(Message::user(spec.task));

        let result = react
            .run_detached(seed, cancel)
            .await
            .map_err(|e| format!("Error: sub-agent failed: {e}"))?;

        Ok(truncate_chars(&result, self.config.child_output_chars))
    }

    fn try_acquire_slot(&self) -> Option<LiveAgentSlot<'_>> {
        let cap = self.config.max_live_agents;
        self.live_agents
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < cap {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .ok()
            .map(|_| LiveAgentSlot(&self.live_agents))
    }

    /// Live children right now (for tests and stats).
    pub fn live_agents(&self) -> usize {
        self.live_agents.load(Ordering::SeqCst)
    }
}

/// RAII guard releasing a live-agent slot.
struct LiveAgentSlot<'a>(&'a AtomicUsize);

impl Drop for LiveAgentSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{cut}... [truncated]")
    }
}

const EXPLORER_SYSTEM_PROMPT: &str = "You are an exploration agent gathering information for a \
parent agent. Use the available read-only tools to discover relevant information. Focus only on \
the assigned aspect, report findings concisely and specifically, and do not try to solve the \
parent's problem — just gather information.";

const SUBTASK_SYSTEM_PROMPT: &str = "You are executing one subtask of a larger parallel plan. \
Focus only on completing this specific task with the available tools, then provide a clear \
summary of what was accomplished. Do not attempt the other tasks.";

// ── explore_context ───────────────────────────────────────────────────────

/// Parallel read-only exploration, exposed to the model as a tool.
pub struct ExploreContextTool {
    spawner: Arc<SubAgentSpawner>,
    depth: u32,
}

impl ExploreContextTool {
    /// `depth` is the nesting depth of the agent holding this tool.
    pub fn new(spawner: Arc<SubAgentSpawner>, depth: u32) -> Self {
        Self { spawner, depth }
    }
}

#[async_trait]
impl Tool for ExploreContextTool {
    fn name(&self) -> &str {
        "explore_context"
    }

    fn description(&self) -> &str {
        "Gather context through parallel exploration sub-agents. Each task runs in isolation \
         with read-only tools and returns a compressed summary. Use for exploring code \
         structure, documentation, or multiple information sources at once. Do not use it for \
         making changes or for single, simple lookups."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "description": "Exploration tasks to run in parallel",
                    "items": {
                        "type": "object",
                        "properties": {
                            "aspect": {
                                "type": "string",
                                "description": "Brief name of the exploration aspect"
                            },
                            "description": {
                                "type": "string",
                                "description": "What to find out"
                            }
                        },
                        "required": ["aspect", "description"]
                    }
                },
                "tool_filter": {
                    "type": "array",
                    "description": "Optional subset of read-only tool names the explorers may use",
                    "items": { "type": "string" }
                }
            },
            "required": ["tasks"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::SpawnsSubAgent
    }

    async fn execute(
        &self,
        arguments: Value,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        if self.depth >= self.spawner.config.max_depth {
            return Err(ToolError::ExecutionFailed {
                tool_name: "explore_context".into(),
                reason: format!(
                    "max_depth: sub-agent nesting limit ({}) reached",
                    self.spawner.config.max_depth
                ),
            });
        }

        let tasks = parse_explore_tasks(&arguments)?;
        if tasks.is_empty() {
            return Err(ToolError::InvalidArguments(
                "no exploration tasks provided".into(),
            ));
        }

        let limit = self.spawner.config.max_parallel;
        if tasks.len() > limit {
            debug!(dropped = tasks.len() - limit, "Capping exploration tasks");
        }
        let tasks: Vec<_> = tasks.into_iter().take(limit).collect();

        let tool_filter: Option<Vec<String>> = arguments["tool_filter"].as_array().map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(String::from))
                .collect()
        });

        let child_depth = self.depth + 1;
        let registry = self
            .spawner
            .explore_registry(child_depth, tool_filter.as_deref())?;

        info!(tasks = tasks.len(), depth = child_depth, "Spawning exploration agents");

        let mut joins = JoinSet::new();
        for (idx, (aspect, description)) in tasks.iter().cloned().enumerate() {
            let spawner = self.spawner.clone();
            let registry = registry.clone();
            let cancel = cancel.child_token();
            joins.spawn(async move {
                let spec = SubAgentSpec {
                    task: format!(
                        "Exploration aspect: {aspect}\nWhat to find: {description}\n\nExplore and report your findings."
                    ),
                    role_prompt: EXPLORER_SYSTEM_PROMPT.into(),
                    context_snapshot: Vec::new(),
                    max_iterations: None,
                    depth: child_depth,
                };
                let outcome = spawner.run_child(spec, registry, cancel).await;
                (idx, outcome)
            });
        }

        let mut results: Vec<Option<Result<String, String>>> = vec![None; tasks.len()];
        while let Some(joined) = joins.join_next().await {
            match joined {
                Ok((idx, outcome)) => results[idx] = Some(outcome),
                Err(e) => warn!(error = %e, "Exploration child join failed"),
            }
        }

        let mut out = String::from("# Exploration results\n");
        for (idx, (aspect, _)) in tasks.iter().enumerate() {
            let body = match results[idx].take() {
                Some(Ok(text)) => text,
                Some(Err(marker)) => marker,
                None => "Error: sub-agent failed: exploration task crashed".into(),
            };
            out.push_str(&format!("\n## {aspect}\n{body}\n"));
        }
        Ok(out)
    }
}

fn parse_explore_tasks(arguments: &Value) -> Result<Vec<(String, String)>, ToolError> {
    let raw = arguments["tasks"]
        .as_array()
        .ok_or_else(|| ToolError::InvalidArguments("'tasks' must be an array".into()))?;

    raw.iter()
        .map(|t| {
            let aspect = t["aspect"]
                .as_str()
                .ok_or_else(|| ToolError::InvalidArguments("task missing 'aspect'".into()))?;
            let description = t["description"].as_str().ok_or_else(|| {
                ToolError::InvalidArguments("task missing 'description'".into())
            })?;
            Ok((aspect.to_string(), description.to_string()))
        })
        .collect()
}

// ── parallel_execute ──────────────────────────────────────────────────────

/// Dependency-aware parallel task execution, exposed to the model as a
/// tool.
pub struct ParallelExecuteTool {
    spawner: Arc<SubAgentSpawner>,
    depth: u32,
}

impl ParallelExecuteTool {
    /// `depth` is the nesting depth of the agent holding this tool.
    pub fn new(spawner: Arc<SubAgentSpawner>, depth: u32) -> Self {
        Self { spawner, depth }
    }
}

#[derive(Debug, Clone)]
enum TaskOutcome {
    Pending,
    Ok(String),
    Error(String),
    Skipped(String),
}

impl TaskOutcome {
    fn is_done(&self) -> bool {
        !matches!(self, TaskOutcome::Pending)
    }

    fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Pending => "pending",
            TaskOutcome::Ok(_) => "ok",
            TaskOutcome::Error(_) => "error",
            TaskOutcome::Skipped(_) => "skipped",
        }
    }
}

#[async_trait]
impl Tool for ParallelExecuteTool {
    fn name(&self) -> &str {
        "parallel_execute"
    }

    fn description(&self) -> &str {
        "Execute multiple subtasks concurrently, respecting declared dependencies. Tasks run in \
         dependency order; independent tasks run in parallel. Use for 3+ independent or \
         semi-dependent operations. 'dependencies' maps a task index to the indices it waits \
         for, e.g. {\"2\": [\"0\", \"1\"]}."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tasks": {
                    "type": "array",
                    "description": "Task descriptions to execute",
                    "items": { "type": "string" }
                },
                "dependencies": {
                    "type": "object",
                    "description": "Map of task index to array of dependency indices",
                    "additionalProperties": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                }
            },
            "required": ["tasks"]
        })
    }

    fn side_effect(&self) -> SideEffect {
        SideEffect::SpawnsSubAgent
    }

    async fn execute(
        &self,
        arguments: Value,
        cancel: CancellationToken,
    ) -> Result<String, ToolError> {
        if self.depth >= self.spawner.config.max_depth {
            return Err(ToolError::ExecutionFailed {
                tool_name: "parallel_execute".into(),
                reason: format!(
                    "max_depth: sub-agent nesting limit ({}) reached",
                    self.spawner.config.max_depth
                ),
            });
        }

        let tasks: Vec<String> = arguments["tasks"]
            .as_array()
            .ok_or_else(|| ToolError::InvalidArguments("'tasks' must be an array".into()))?
            .iter()
            .map(|t| {
                t.as_str()
                    .map(String::from)
                    .ok_or_else(|| ToolError::InvalidArguments("tasks must be strings".into()))
            })
            .collect::<Result<_, _>>()?;

        if tasks.is_empty() {
            return Err(ToolError::InvalidArguments("no tasks provided".into()));
        }

        let deps = parse_dependencies(&arguments["dependencies"], tasks.len())?;

        // Cycle detection runs before any task starts.
        if let Some(cycle) = find_cycle(tasks.len(), &deps) {
            let members: Vec<String> = cycle.iter().map(|i| format!("task {i}")).collect();
            return Err(ToolError::ExecutionFailed {
                tool_name: "parallel_execute".into(),
                reason: format!("dependency_cycle: {} form a cycle", members.join(", ")),
            });
        }

        let child_depth = self.depth + 1;
        let registry = self.spawner.execute_registry(child_depth)?;

        info!(
            tasks = tasks.len(),
            depth = child_depth,
            "Starting parallel execution"
        );

        let mut outcomes: Vec<TaskOutcome> = vec![TaskOutcome::Pending; tasks.len()];

        while outcomes.iter().any(|o| !o.is_done()) {
            // Skip tasks whose dependencies finished badly.
            for idx in 0..tasks.len() {
                if outcomes[idx].is_done() {
                    continue;
                }
                let task_deps = deps.get(&idx).cloned().unwrap_or_default();
                if task_deps.iter().all(|d| outcomes[*d].is_done()) {
                    if let Some(failed) = task_deps
                        .iter()
                        .find(|d| !matches!(outcomes[**d], TaskOutcome::Ok(_)))
                    {
                        outcomes[idx] = TaskOutcome::Skipped(format!(
                            "Skipped because dependency task {failed} did not succeed."
                        ));
                    }
                }
            }

            // Wave: pending tasks whose dependencies all succeeded.
            let ready: Vec<usize> = (0..tasks.len())
                .filter(|idx| {
                    !outcomes[*idx].is_done()
                        && deps
                            .get(idx)
                            .map(|d| d.iter().all(|d| matches!(outcomes[*d], TaskOutcome::Ok(_))))
                            .unwrap_or(true)
                })
                .collect();

            if ready.is_empty() {
                if outcomes.iter().any(|o| !o.is_done()) {
                    // Cannot happen once the cycle check has passed.
                    warn!("Parallel execution stalled with pending tasks");
                    for outcome in outcomes.iter_mut().filter(|o| !o.is_done()) {
                        *outcome =
                            TaskOutcome::Skipped("Skipped: scheduler made no progress.".into());
                    }
                }
                break;
            }

            let batch: Vec<usize> = ready
                .into_iter()
                .take(self.spawner.config.max_parallel)
                .collect();
            debug!(wave = ?batch, "Executing wave");

            let context = completed_context(&tasks, &outcomes);
            let mut joins = JoinSet::new();
            for idx in batch.clone() {
                let spawner = self.spawner.clone();
                let registry = registry.clone();
                let cancel = cancel.child_token();
                let description = tasks[idx].clone();
                let context = context.clone();
                let child_depth = self.depth + 1;
                joins.spawn(async move {
                    let spec = SubAgentSpec {
                        task: format!(
                            "Task #{idx}: {description}\n{context}\nExecute the task now."
                        ),
                        role_prompt: SUBTASK_SYSTEM_PROMPT.into(),
                        context_snapshot: Vec::new(),
                        max_iterations: None,
                        depth: child_depth,
                    };
                    let outcome = spawner.run_child(spec, registry, cancel).await;
                    (idx, outcome)
                });
            }

            while let Some(joined) = joins.join_next().await {
                match joined {
                    Ok((idx, Ok(result))) => outcomes[idx] = TaskOutcome::Ok(result),
                    Ok((idx, Err(marker))) => outcomes[idx] = TaskOutcome::Error(marker),
                    Err(e) => warn!(error = %e, "Parallel child join failed"),
                }
            }

            // A panicked child never reported back; count it as failed so
            // the scheduler cannot re-run it forever.
            for idx in batch {
                if !outcomes[idx].is_done() {
                    outcomes[idx] =
                        TaskOutcome::Error("Error: sub-agent failed: task crashed".into());
                }
            }
        }

        // Result ordering follows the declared task order.
        let mut out = String::from("# Parallel execution results\n");
        for (idx, description) in tasks.iter().enumerate() {
            let desc_excerpt = truncate_chars(description, 100);
            let body = match &outcomes[idx] {
                TaskOutcome::Ok(text) => text.clone(),
                TaskOutcome::Error(marker) => marker.clone(),
                TaskOutcome::Skipped(reason) => reason.clone(),
                TaskOutcome::Pending => "Error: task never ran".into(),
            };
            out.push_str(&format!(
                "\n## Task {idx}: {desc_excerpt}\nStatus: {}\n{body}\n",
                outcomes[idx].label()
            ));
        }
        Ok(out)
    }
}

/// Render completed task results as context for the next wave.
fn completed_context(tasks: &[String], outcomes: &[TaskOutcome]) -> String {
    let done: Vec<String> = outcomes
        .iter()
        .enumerate()
        .filter_map(|(idx, o)| match o {
            TaskOutcome::Ok(result) => Some(format!(
                "Task #{idx} ({}): {}",
                truncate_chars(&tasks[idx], 60),
                truncate_chars(result, 500)
            )),
            _ => None,
        })
        .collect();

    if done.is_empty() {
        String::new()
    } else {
        format!("\nResults from completed tasks:\n{}\n", done.join("\n"))
    }
}

fn parse_dependencies(
    raw: &Value,
    task_count: usize,
) -> Result<HashMap<usize, Vec<usize>>, ToolError> {
    let mut deps = HashMap::new();
    let Some(map) = raw.as_object() else {
        return Ok(deps);
    };

    for (key, value) in map {
        let task_idx: usize = key.parse().map_err(|_| {
            ToolError::InvalidArguments(format!("invalid task index '{key}'"))
        })?;
        if task_idx >= task_count {
            return Err(ToolError::InvalidArguments(format!(
                "task index {task_idx} out of range (have {task_count} tasks)"
            )));
        }

        let list = value
            .as_array()
            .ok_or_else(|| ToolError::InvalidArguments("dependencies must be arrays".into()))?;
        let mut parsed = Vec::with_capacity(list.len());
        for dep in list {
            let dep_idx: usize = match dep {
                Value::String(s) => s.parse().map_err(|_| {
                    ToolError::InvalidArguments(format!("invalid dependency index '{s}'"))
                })?,
                Value::Number(n) => n.as_u64().ok_or_else(|| {
                    ToolError::InvalidArguments(format!("invalid dependency index '{n}'"))
                })? as usize,
                other => {
                    return Err(ToolError::InvalidArguments(format!(
                        "invalid dependency index '{other}'"
                    )))
                }
            };
            if dep_idx >= task_count {
                return Err(ToolError::InvalidArguments(format!(
                    "dependency index {dep_idx} out of range (have {task_count} tasks)"
                )));
            }
            parsed.push(dep_idx);
        }
        deps.insert(task_idx, parsed);
    }

    Ok(deps)
}

/// DFS cycle detection. Returns the participating task indices when a
/// cycle exists.
fn find_cycle(task_count: usize, deps: &HashMap<usize, Vec<usize>>) -> Option<Vec<usize>> {
    // Edges run dependency → dependent.
    let mut graph: Vec<Vec<usize>> = vec![Vec::new(); task_count];
    for (task, task_deps) in deps {
        for dep in task_deps {
            graph[*dep].push(*task);
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn dfs(
        node: usize,
        graph: &[Vec<usize>],
        colors: &mut [Color],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        colors[node] = Color::Gray;
        stack.push(node);

        for &next in &graph[node] {
            match colors[next] {
                Color::Gray => {
                    let pos = stack.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle = stack[pos..].to_vec();
                    cycle.sort_unstable();
                    return Some(cycle);
                }
                Color::White => {
                    if let Some(cycle) = dfs(next, graph, colors, stack) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        stack.pop();
        colors[node] = Color::Black;
        None
    }

    let mut colors = vec![Color::White; task_count];
    let mut stack = Vec::new();
    for n in 0..task_count {
        if colors[n] == Color::White {
            if let Some(cycle) = dfs(n, &graph, &mut colors, &mut stack) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;

    fn spawner_with(
        provider: Arc<SequentialMockProvider>,
        config: SubAgentConfig,
    ) -> Arc<SubAgentSpawner> {
        let spawner = SubAgentSpawner::new(provider, "mock", config);
        let mut registry = ironloop_tools::default_registry();
        registry.register(Arc::new(ExploreContextTool::new(spawner.clone(), 0)));
        registry.register(Arc::new(ParallelExecuteTool::new(spawner.clone(), 0)));
        spawner.set_registry(Arc::new(registry));
        spawner
    }

    fn quick_config() -> SubAgentConfig {
        SubAgentConfig {
            max_parallel: 3,
            max_live_agents: 8,
            max_depth: 2,
            child_max_iterations: 5,
            child_output_chars: 2000,
            tool_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn explore_runs_tasks_and_labels_results() {
        let provider = SequentialMockProvider::new(vec![
            text_response("finding one"),
            text_response("finding two"),
        ]);
        let spawner = spawner_with(provider, quick_config());
        let tool = ExploreContextTool::new(spawner, 0);

        let out = tool
            .execute(
                serde_json::json!({
                    "tasks": [
                        {"aspect": "layout", "description": "map the module layout"},
                        {"aspect": "deps", "description": "list the dependencies"}
                    ]
                }),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(out.contains("## layout"));
        assert!(out.contains("## deps"));
        assert!(out.contains("finding one") || out.contains("finding two"));
    }

    #[tokio::test]
    async fn explore_at_max_depth_refused_without_work() {
        // Zero scripted responses: any provider call would panic.
        let provider = SequentialMockProvider::new(vec![]);
        let spawner = spawner_with(provider, quick_config());
        let tool = ExploreContextTool::new(spawner, 2);

        let err = tool
            .execute(
                serde_json::json!({"tasks": [{"aspect": "a", "description": "d"}]}),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("max_depth"));
    }

    #[tokio::test]
    async fn depth_increments_per_level() {
        // A depth-1 explorer may spawn depth-2 children; those children's
        // own explore tool is at depth 2 and must refuse.
        let provider = SequentialMockProvider::new(vec![text_response("leaf finding")]);
        let spawner = spawner_with(provider, quick_config());
        let tool = ExploreContextTool::new(spawner.clone(), 1);

        let out = tool
            .execute(
                serde_json::json!({"tasks": [{"aspect": "deep", "description": "look"}]}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.contains("leaf finding"));
    }

    #[tokio::test]
    async fn max_agents_reported_before_spawning() {
        let mut config = quick_config();
        config.max_live_agents = 0;
        let provider = SequentialMockProvider::new(vec![]);
        let spawner = spawner_with(provider, config);
        let tool = ExploreContextTool::new(spawner, 0);

        let out = tool
            .execute(
                serde_json::json!({"tasks": [{"aspect": "a", "description": "d"}]}),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.contains("max_agents"));
    }

    #[tokio::test]
    async fn parallel_execute_respects_dependencies() {
        // Wave 1: tasks 0 and 1 (two responses); wave 2: task 2
        let provider = SequentialMockProvider::new(vec![
            text_response("result A"),
            text_response("result B"),
            text_response("result C"),
        ]);
        let spawner = spawner_with(provider, quick_config());
        let tool = ParallelExecuteTool::new(spawner, 0);

        let out = tool
            .execute(
                serde_json::json!({
                    "tasks": ["do A", "do B", "combine A and B"],
                    "dependencies": {"2": ["0", "1"]}
                }),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(out.contains("## Task 0"));
        assert!(out.contains("## Task 2"));
        let ok_count = out.matches("Status: ok").count();
        assert_eq!(ok_count, 3);
        // Declared order in the aggregate
        let pos0 = out.find("## Task 0").unwrap();
        let pos1 = out.find("## Task 1").unwrap();
        let pos2 = out.find("## Task 2").unwrap();
        assert!(pos0 < pos1 && pos1 < pos2);
    }

    #[tokio::test]
    async fn failed_dependency_skips_dependents() {
        // Task 0 succeeds; task 1's child loop hits a provider failure;
        // task 2 depends on task 1 and must be skipped, never run.
        let provider = SequentialMockProvider::with_script(vec![
            Ok(text_response("result A")),
            Err(ironloop_core::ProviderError::Network("down".into())),
        ]);
        // Serial waves so the script lines up with task order.
        let mut config = quick_config();
        config.max_parallel = 1;
        let spawner = spawner_with(provider, config);
        let tool = ParallelExecuteTool::new(spawner, 0);

        let out = tool
            .execute(
                serde_json::json!({
                    "tasks": ["do A", "do B", "combine"],
                    "dependencies": {"1": ["0"], "2": ["1"]}
                }),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(out.contains("## Task 0: do A\nStatus: ok"));
        assert!(out.contains("## Task 1: do B\nStatus: error"));
        assert!(out.contains("## Task 2: combine\nStatus: skipped"));
    }

    #[tokio::test]
    async fn cycle_detected_before_any_execution() {
        // Zero responses: if any task ran, the provider would panic.
        let provider = SequentialMockProvider::new(vec![]);
        let spawner = spawner_with(provider, quick_config());
        let tool = ParallelExecuteTool::new(spawner, 0);

        let err = tool
            .execute(
                serde_json::json!({
                    "tasks": ["a", "b", "c"],
                    "dependencies": {"0": ["2"], "1": ["0"], "2": ["1"]}
                }),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("dependency_cycle"));
        assert!(msg.contains("task 0"));
        assert!(msg.contains("task 1"));
        assert!(msg.contains("task 2"));
    }

    #[tokio::test]
    async fn invalid_dependency_index_rejected() {
        let provider = SequentialMockProvider::new(vec![]);
        let spawner = spawner_with(provider, quick_config());
        let tool = ParallelExecuteTool::new(spawner, 0);

        let err = tool
            .execute(
                serde_json::json!({
                    "tasks": ["a"],
                    "dependencies": {"0": ["7"]}
                }),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn find_cycle_basics() {
        let mut deps = HashMap::new();
        deps.insert(0, vec![1]);
        deps.insert(1, vec![0]);
        let cycle = find_cycle(2, &deps).unwrap();
        assert_eq!(cycle, vec![0, 1]);

        let mut chain = HashMap::new();
        chain.insert(2, vec![0, 1]);
        assert!(find_cycle(3, &chain).is_none());

        // Self-dependency
        let mut self_dep = HashMap::new();
        self_dep.insert(0, vec![0]);
        assert!(find_cycle(1, &self_dep).is_some());
    }

    #[test]
    fn truncation_marks_cut() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = "x".repeat(20);
        let cut = truncate_chars(&long, 10);
        assert!(cut.ends_with("[truncated]"));
        assert!(cut.starts_with("xxxxxxxxxx"));
    }
}
