use cadence_core::{AgentType, Priority, Task, TaskStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Placeholder in template descriptions replaced by the parent task's description.
pub const TASK_PLACEHOLDER: &str = "{task}";

/// One step produced by a decomposition method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskTemplate {
    /// Subtask description; `{task}` expands to the parent's description.
    pub description: String,
    /// Preferred agent type for routing.
    #[serde(default)]
    pub agent_type: Option<AgentType>,
    /// Priority given to the generated subtask.
    #[serde(default)]
    pub priority: Priority,
}

/// A pre-authored way to expand a compound task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtnMethod {
    /// Method name, recorded on generated subtasks.
    pub name: String,
    /// Exact-match entries that must be present in the task context.
    #[serde(default)]
    pub preconditions: BTreeMap<String, Value>,
    /// Steps in execution order.
    #[serde(default)]
    pub subtasks: Vec<SubtaskTemplate>,
}

impl HtnMethod {
    /// A method with no preconditions or steps.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            preconditions: BTreeMap::new(),
            subtasks: Vec::new(),
        }
    }

    /// Require `key` to equal `value` in the task context.
    pub fn with_precondition(mut self, key: impl Into<String>, value: Value) -> Self {
        self.preconditions.insert(key.into(), value);
        self
    }

    /// Append a step routed to `agent_type`.
    pub fn with_subtask(
        mut self,
        description: impl Into<String>,
        agent_type: AgentType,
        priority: Priority,
    ) -> Self {
        self.subtasks.push(SubtaskTemplate {
            description: description.into(),
            agent_type: Some(agent_type),
            priority,
        });
        self
    }

    /// Whether every precondition matches the task's context.
    pub fn applies_to(&self, task: &Task) -> bool {
        task.context.satisfies(&self.preconditions)
    }
}

/// Read-only view of a task and its descendants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    /// Task id.
    pub id: Uuid,
    /// Task description.
    pub description: String,
    /// Current status.
    pub status: TaskStatus,
    /// Task priority.
    pub priority: Priority,
    /// True for leaves.
    pub is_primitive: bool,
    /// Agent that executed the task.
    pub assigned_agent_id: Option<String>,
    /// Subtasks in creation order.
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    /// Number of nodes in this subtree, including the root.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TaskNode::size).sum::<usize>()
    }
}

/// Hierarchical task network planner.
///
/// Methods are keyed by task type and tried in registration order; the first
/// one whose preconditions match wins. Lookup is a table scan with no search or
/// backtracking, so decomposition is deterministic for a given context.
#[derive(Debug, Clone, Default)]
pub struct HtnPlanner {
    methods: HashMap<String, Vec<HtnMethod>>,
}

impl HtnPlanner {
    /// A planner with no methods; every task is primitive.
    pub fn new() -> Self {
        Self::default()
    }

    /// A planner preloaded with the built-in methods.
    pub fn with_default_methods() -> Self {
        let mut planner = Self::new();
        for (task_type, method) in default_methods() {
            planner.register_method(task_type, method);
        }
        planner
    }

    /// Append a method to the ordered list for `task_type`.
    pub fn register_method(&mut self, task_type: impl Into<String>, method: HtnMethod) {
        self.methods.entry(task_type.into()).or_default().push(method);
    }

    /// All registered methods, grouped by task type in sorted order.
    pub fn methods(&self) -> Vec<(&str, &HtnMethod)> {
        let mut types: Vec<&String> = self.methods.keys().collect();
        types.sort();
        types
            .into_iter()
            .flat_map(|t| self.methods[t].iter().map(move |m| (t.as_str(), m)))
            .collect()
    }

    /// Total number of registered methods.
    pub fn method_count(&self) -> usize {
        self.methods.values().map(Vec::len).sum()
    }

    /// The first registered method for the task's type whose preconditions match.
    pub fn select_method(&self, task: &Task) -> Option<&HtnMethod> {
        let task_type = task.task_type()?;
        self.methods
            .get(task_type)?
            .iter()
            .find(|m| m.applies_to(task))
    }

    /// Expand `task` into subtasks, or return an empty list when it is primitive.
    ///
    /// Each subtask inherits the parent's context without the `type` key, so it
    /// is never re-expanded by the same planner, and gains `parent_task_id`,
    /// `subtask_index` and `total_subtasks`.
    pub fn decompose(&self, task: &Task) -> Vec<Task> {
        let Some(method) = self.select_method(task) else {
            return Vec::new();
        };

        let total = method.subtasks.len();
        method
            .subtasks
            .iter()
            .enumerate()
            .map(|(index, template)| {
                let mut context = task.context.clone();
                context.task_type = None;
                context.parent_task_id = Some(task.id);
                context.subtask_index = Some(index);
                context.total_subtasks = Some(total);

                let description = template
                    .description
                    .replace(TASK_PLACEHOLDER, &task.description);
                let mut subtask = Task::child_of(task.id, description)
                    .with_priority(template.priority)
                    .with_context(context)
                    .with_input(task.input_data.clone());
                subtask.metadata.agent_type_hint = template.agent_type;
                subtask.metadata.decomposition_method = Some(method.name.clone());
                subtask
            })
            .collect()
    }

    /// True iff [`HtnPlanner::decompose`] would return no subtasks.
    pub fn is_primitive(&self, task: &Task) -> bool {
        self.select_method(task)
            .map_or(true, |method| method.subtasks.is_empty())
    }

    /// Nested view of `root` and every task below it in `all_tasks`.
    ///
    /// Children are found by scanning the whole slice at every level, which is
    /// fine for the small trees decomposition produces but grows quadratically.
    pub fn build_hierarchy(&self, root: &Task, all_tasks: &[Task]) -> TaskNode {
        let mut visited = HashSet::new();
        self.build_node(root, all_tasks, &mut visited)
    }

    fn build_node(&self, node: &Task, all_tasks: &[Task], visited: &mut HashSet<Uuid>) -> TaskNode {
        visited.insert(node.id);

        let mut children: Vec<&Task> = all_tasks
            .iter()
            .filter(|t| t.parent_task_id == Some(node.id) && !visited.contains(&t.id))
            .collect();
        children.sort_by_key(|t| (t.context.subtask_index, t.created_at));

        let children = children
            .into_iter()
            .map(|child| self.build_node(child, all_tasks, visited))
            .collect();

        TaskNode {
            id: node.id,
            description: node.description.clone(),
            status: node.status,
            priority: node.priority,
            is_primitive: self.is_primitive(node),
            assigned_agent_id: node.assigned_agent_id.clone(),
            children,
        }
    }
}

/// Built-in decomposition methods as `(task_type, method)` pairs.
pub fn default_methods() -> Vec<(&'static str, HtnMethod)> {
    vec![
        (
            "research",
            HtnMethod::new("research_default")
                .with_subtask(
                    "Gather information about: {task}",
                    AgentType::Scholar,
                    Priority::High,
                )
                .with_subtask(
                    "Analyze the gathered findings for: {task}",
                    AgentType::Logician,
                    Priority::High,
                )
                .with_subtask(
                    "Compile a report answering: {task}",
                    AgentType::Executive,
                    Priority::Medium,
                ),
        ),
        (
            "code_review",
            HtnMethod::new("code_review_default")
                .with_subtask(
                    "Analyze the code structure of: {task}",
                    AgentType::Coder,
                    Priority::High,
                )
                .with_subtask(
                    "Critique for defects and risks: {task}",
                    AgentType::Critic,
                    Priority::High,
                )
                .with_subtask(
                    "Summarize review recommendations for: {task}",
                    AgentType::Executive,
                    Priority::Medium,
                ),
        ),
        (
            "creative_writing",
            HtnMethod::new("creative_writing_default")
                .with_subtask(
                    "Brainstorm ideas for: {task}",
                    AgentType::Creative,
                    Priority::Medium,
                )
                .with_subtask("Draft content for: {task}", AgentType::Creative, Priority::High)
                .with_subtask(
                    "Critique and refine the draft for: {task}",
                    AgentType::Critic,
                    Priority::Medium,
                ),
        ),
        (
            "problem_solving",
            HtnMethod::new("problem_solving_default")
                .with_subtask(
                    "Break down the problem: {task}",
                    AgentType::Logician,
                    Priority::High,
                )
                .with_subtask(
                    "Propose candidate solutions for: {task}",
                    AgentType::Creative,
                    Priority::Medium,
                )
                .with_subtask(
                    "Evaluate the proposed solutions for: {task}",
                    AgentType::Critic,
                    Priority::High,
                ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::TaskContext;
    use serde_json::json;

    fn typed_task(description: &str, task_type: &str) -> Task {
        Task::new(description).with_context(TaskContext::typed(task_type).with_session("s-1"))
    }

    #[test]
    fn test_untyped_and_unknown_types_are_primitive() {
        let planner = HtnPlanner::with_default_methods();
        assert!(planner.is_primitive(&Task::new("no type")));
        let coding = typed_task("write a parser", "coding");
        assert!(planner.is_primitive(&coding));
        assert!(planner.decompose(&coding).is_empty());
    }

    #[test]
    fn test_research_decomposes_in_order() {
        let planner = HtnPlanner::with_default_methods();
        let task = typed_task("quantum error correction", "research");
        let subtasks = planner.decompose(&task);

        assert_eq!(subtasks.len(), 3);
        let hints: Vec<_> = subtasks
            .iter()
            .map(|t| t.metadata.agent_type_hint)
            .collect();
        assert_eq!(
            hints,
            vec![
                Some(AgentType::Scholar),
                Some(AgentType::Logician),
                Some(AgentType::Executive)
            ]
        );
        assert!(subtasks[0].description.starts_with("Gather information"));
        assert!(subtasks[1].description.starts_with("Analyze"));
        assert!(subtasks[2].description.starts_with("Compile a report"));
        assert!(subtasks[0].description.contains("quantum error correction"));
        for sub in &subtasks {
            assert_eq!(sub.parent_task_id, Some(task.id));
            assert_eq!(
                sub.metadata.decomposition_method.as_deref(),
                Some("research_default")
            );
        }
    }

    #[test]
    fn test_subtask_context_inheritance() {
        let planner = HtnPlanner::with_default_methods();
        let mut task = typed_task("topic", "research");
        task.context.rag_context = Some("prior notes".into());
        task.context.extra.insert("domain".into(), json!("physics"));

        for (i, sub) in planner.decompose(&task).iter().enumerate() {
            let mut expected = task.context.clone();
            expected.task_type = None;
            expected.parent_task_id = Some(task.id);
            expected.subtask_index = Some(i);
            expected.total_subtasks = Some(3);
            assert_eq!(sub.context, expected);
            assert!(planner.is_primitive(sub));
        }
    }

    #[test]
    fn test_decomposition_is_deterministic() {
        let planner = HtnPlanner::with_default_methods();
        let task = typed_task("topic", "problem_solving");
        let first = planner.decompose(&task);
        let second = planner.decompose(&task);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.description, b.description);
            assert_eq!(a.priority, b.priority);
            assert_eq!(a.metadata, b.metadata);
            assert_eq!(a.context, b.context);
        }
    }

    #[test]
    fn test_first_matching_method_wins() {
        let mut planner = HtnPlanner::new();
        planner.register_method(
            "analysis",
            HtnMethod::new("deep")
                .with_precondition("depth", json!("deep"))
                .with_subtask("a", AgentType::Logician, Priority::High)
                .with_subtask("b", AgentType::Critic, Priority::High),
        );
        planner.register_method(
            "analysis",
            HtnMethod::new("shallow").with_subtask("only", AgentType::Logician, Priority::Low),
        );

        let shallow = typed_task("x", "analysis");
        let subs = planner.decompose(&shallow);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].metadata.decomposition_method.as_deref(), Some("shallow"));

        let mut deep = typed_task("x", "analysis");
        deep.context.extra.insert("depth".into(), json!("deep"));
        assert_eq!(planner.decompose(&deep).len(), 2);
    }

    #[test]
    fn test_no_matching_precondition_is_primitive() {
        let mut planner = HtnPlanner::new();
        planner.register_method(
            "analysis",
            HtnMethod::new("deep")
                .with_precondition("depth", json!("deep"))
                .with_subtask("a", AgentType::Logician, Priority::High),
        );
        let task = typed_task("x", "analysis");
        assert!(planner.is_primitive(&task));
        assert!(planner.decompose(&task).is_empty());
    }

    #[test]
    fn test_empty_method_is_primitive() {
        let mut planner = HtnPlanner::new();
        planner.register_method("noop", HtnMethod::new("empty"));
        let task = typed_task("x", "noop");
        assert!(planner.is_primitive(&task));
        assert_eq!(planner.is_primitive(&task), planner.decompose(&task).is_empty());
    }

    #[test]
    fn test_build_hierarchy() {
        let planner = HtnPlanner::with_default_methods();
        let root = typed_task("topic", "research");
        let subtasks = planner.decompose(&root);
        let unrelated = Task::new("other root");

        let mut all = vec![root.clone(), unrelated];
        all.extend(subtasks.iter().rev().cloned());

        let tree = planner.build_hierarchy(&root, &all);
        assert_eq!(tree.id, root.id);
        assert!(!tree.is_primitive);
        assert_eq!(tree.children.len(), 3);
        assert_eq!(tree.size(), 4);
        let order: Vec<Uuid> = tree.children.iter().map(|c| c.id).collect();
        let expected: Vec<Uuid> = subtasks.iter().map(|t| t.id).collect();
        assert_eq!(order, expected);
        assert!(tree.children.iter().all(|c| c.is_primitive && c.children.is_empty()));

        let again = planner.build_hierarchy(&root, &all);
        assert_eq!(tree, again);
    }

    #[test]
    fn test_methods_listing() {
        let planner = HtnPlanner::with_default_methods();
        assert_eq!(planner.method_count(), 4);
        let types: Vec<&str> = planner.methods().iter().map(|(t, _)| *t).collect();
        assert_eq!(
            types,
            vec!["code_review", "creative_writing", "problem_solving", "research"]
        );
    }
}
