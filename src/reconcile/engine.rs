//! The three-phase reconciliation engine.
//!
//! Driven once per deployment operation: `start` captures the operation
//! context, `observe` asks every change-capable node whether it must act,
//! `analyze` turns the observations into an ordered action list, and
//! `finish` closes the phase sequence. The engine never executes actions
//! itself; the caller invokes them and decides how to proceed when one
//! fails. Already-applied actions are never rolled back.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{ReconcileError, Result, StevedoreError};

use super::contract::{ActionContext, ChangeType, NodeKey, ResourceNode};

/// The classified output of the external tree-diff primitive for one
/// before/after pair of resource trees.
#[derive(Default)]
pub struct TreeDiff {
    /// Nodes present before but not after.
    pub deleted: Vec<Arc<dyn ResourceNode>>,
    /// Nodes present after but not before.
    pub added: Vec<Arc<dyn ResourceNode>>,
    /// Nodes present in both trees whose declaration changed.
    pub common_modified: Vec<Arc<dyn ResourceNode>>,
}

impl TreeDiff {
    /// Creates an empty diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for TreeDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeDiff")
            .field("deleted", &self.deleted.len())
            .field("added", &self.added.len())
            .field("common_modified", &self.common_modified.len())
            .finish()
    }
}

/// The normalized result of one node's `should_act` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// The effective change type. `ChangeType::None` when the node decided
    /// not to act, regardless of which diff set it came from.
    pub change: ChangeType,
    /// Human-readable detail, preserved from the node's decision.
    pub detail: String,
}

/// Observations keyed by composite node identity, in deterministic order.
pub type Observations = BTreeMap<NodeKey, Observation>;

/// One entry in an action's change list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSummary {
    /// The composite node key.
    pub key: NodeKey,
    /// The effective change type.
    pub change: ChangeType,
    /// Human-readable detail.
    pub detail: String,
}

/// An executable change produced by `analyze` and consumed once by the
/// caller.
pub struct Action {
    change: ChangeType,
    detail: String,
    changes: Vec<ChangeSummary>,
    target: Option<Arc<dyn ResourceNode>>,
}

impl Action {
    /// Creates a real action for one node.
    fn for_node(
        node: Arc<dyn ResourceNode>,
        change: ChangeType,
        detail: String,
        key: NodeKey,
    ) -> Self {
        let changes = vec![ChangeSummary {
            key,
            change,
            detail: detail.clone(),
        }];
        Self {
            change,
            detail,
            changes,
            target: Some(node),
        }
    }

    /// Creates the synthetic aggregate no-op action.
    ///
    /// `analyze` emits at most one of these, listing every node that
    /// reported nothing to do, so change summaries stay free of
    /// per-resource noise while the no-op nodes remain auditable.
    #[must_use]
    pub fn aggregate(changes: Vec<ChangeSummary>) -> Self {
        Self {
            change: ChangeType::None,
            detail: String::from("No action required"),
            changes,
            target: None,
        }
    }

    /// The change type this action applies.
    #[must_use]
    pub const fn change(&self) -> ChangeType {
        self.change
    }

    /// Human-readable description of the action.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// The change entries covered by this action. Real actions carry one;
    /// the aggregate no-op carries one per no-op node.
    #[must_use]
    pub fn changes(&self) -> &[ChangeSummary] {
        &self.changes
    }

    /// Whether this is the synthetic aggregate no-op action.
    #[must_use]
    pub const fn is_aggregate(&self) -> bool {
        self.target.is_none()
    }

    /// Executes the action.
    ///
    /// # Errors
    ///
    /// Propagates the node's action error unchanged. Invoking an aggregate
    /// no-op that holds no changes is a protocol-misuse error.
    pub async fn act(&self, ctx: &ActionContext) -> Result<()> {
        match &self.target {
            Some(node) => {
                let key = NodeKey::of(node.as_ref());
                info!("Executing {} for {key}", self.change);
                let capability = node.as_change_action().ok_or_else(|| {
                    StevedoreError::Reconcile(ReconcileError::NotCapable {
                        key: key.to_string(),
                    })
                })?;
                capability.action(self.change, ctx).await
            }
            None => {
                if self.changes.is_empty() {
                    return Err(ReconcileError::EmptyAggregate.into());
                }
                debug!("{} nodes require no action", self.changes.len());
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("change", &self.change)
            .field("detail", &self.detail)
            .field("changes", &self.changes.len())
            .field("aggregate", &self.is_aggregate())
            .finish()
    }
}

/// Options captured by the `start` phase.
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Identifier of this deployment operation.
    pub deploy_operation_id: String,
    /// Working-data directory for this operation.
    pub working_dir: PathBuf,
}

/// The three-phase reconciliation engine.
///
/// `observe` and `analyze` run to completion, in that order, before any
/// action is invoked. Phase errors are never caught here.
#[derive(Default)]
pub struct ActionReconciler {
    context: Option<ActionContext>,
    nodes: HashMap<NodeKey, Arc<dyn ResourceNode>>,
}

impl ActionReconciler {
    /// Creates an idle reconciler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a reconciliation pass, capturing the operation context.
    ///
    /// # Errors
    ///
    /// Fails fast if the operation id or working directory is missing.
    pub fn start(&mut self, options: StartOptions) -> Result<()> {
        if options.deploy_operation_id.is_empty() {
            return Err(ReconcileError::MissingOption {
                option: "deploy_operation_id",
            }
            .into());
        }
        if options.working_dir.as_os_str().is_empty() {
            return Err(ReconcileError::MissingOption {
                option: "working_dir",
            }
            .into());
        }

        info!(
            "Starting reconciliation for operation {}",
            options.deploy_operation_id
        );
        self.context = Some(ActionContext::new(
            options.deploy_operation_id,
            options.working_dir,
        ));
        self.nodes.clear();
        Ok(())
    }

    /// The context captured at `start`.
    ///
    /// # Errors
    ///
    /// Returns a protocol-misuse error before `start`.
    pub fn context(&self) -> Result<&ActionContext> {
        self.phase_context("context")
    }

    /// Asks every change-capable node in the diff whether it must act.
    ///
    /// Nodes without the capability are skipped entirely. A node's refusal
    /// (`act: false`) is normalized to an effective [`ChangeType::None`]
    /// observation with its detail preserved.
    ///
    /// # Errors
    ///
    /// The first node error propagates out uncaught; protocol misuse
    /// (observe before start) is an error as well.
    pub async fn observe(&mut self, diff: &TreeDiff) -> Result<Observations> {
        let ctx = self.phase_context("observe")?.clone();

        debug!(
            "Observing {} deleted, {} added, {} modified nodes",
            diff.deleted.len(),
            diff.added.len(),
            diff.common_modified.len()
        );

        let mut observations = Observations::new();
        let sets = [
            (&diff.deleted, ChangeType::Delete),
            (&diff.added, ChangeType::Create),
            (&diff.common_modified, ChangeType::Modify),
        ];

        for (nodes, op) in sets {
            for node in nodes {
                let Some(capability) = node.as_change_action() else {
                    continue;
                };
                let key = NodeKey::of(node.as_ref());
                let observation = match capability.should_act(op, &ctx).await? {
                    Some(decision) => Observation {
                        change: if decision.act { op } else { ChangeType::None },
                        detail: decision.detail,
                    },
                    None => Observation {
                        change: ChangeType::None,
                        detail: String::new(),
                    },
                };
                debug!("Observed {key}: {}", observation.change);
                self.nodes.insert(key.clone(), Arc::clone(node));
                observations.insert(key, observation);
            }
        }

        Ok(observations)
    }

    /// Turns observations into an ordered, executable action list.
    ///
    /// One real action is emitted per observation whose effective type is
    /// not `None`; all no-op observations collapse into a single aggregate
    /// action appended after the real ones, and only if any exist.
    ///
    /// # Errors
    ///
    /// Protocol misuse (analyze before start, or an observation whose node
    /// was never recorded) is an error.
    pub fn analyze(&self, observations: &Observations) -> Result<Vec<Action>> {
        self.phase_context("analyze")?;

        let mut actions = Vec::new();
        let mut noops = Vec::new();

        for (key, observation) in observations {
            if observation.change == ChangeType::None {
                noops.push(ChangeSummary {
                    key: key.clone(),
                    change: ChangeType::None,
                    detail: observation.detail.clone(),
                });
                continue;
            }

            let node = self.nodes.get(key).ok_or_else(|| {
                StevedoreError::Reconcile(ReconcileError::UnknownNode {
                    key: key.to_string(),
                })
            })?;
            actions.push(Action::for_node(
                Arc::clone(node),
                observation.change,
                observation.detail.clone(),
                key.clone(),
            ));
        }

        info!(
            "Analysis produced {} actions, {} no-op nodes",
            actions.len(),
            noops.len()
        );

        if !noops.is_empty() {
            actions.push(Action::aggregate(noops));
        }

        Ok(actions)
    }

    /// Closes the phase sequence. No state persists across passes.
    ///
    /// # Errors
    ///
    /// Returns a protocol-misuse error before `start`.
    pub fn finish(&mut self) -> Result<()> {
        self.phase_context("finish")?;
        self.context = None;
        self.nodes.clear();
        Ok(())
    }

    fn phase_context(&self, phase: &'static str) -> Result<&ActionContext> {
        self.context
            .as_ref()
            .ok_or_else(|| StevedoreError::Reconcile(ReconcileError::NotStarted { phase }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::contract::{ActDecision, ChangeAction};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestNode {
        id: String,
        decision: Option<ActDecision>,
        actions_run: AtomicUsize,
    }

    impl TestNode {
        fn acting(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                decision: Some(ActDecision::act(format!("Changing '{id}'"))),
                actions_run: AtomicUsize::new(0),
            })
        }

        fn idle(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                decision: Some(ActDecision::skip(format!("'{id}' is up to date"))),
                actions_run: AtomicUsize::new(0),
            })
        }

        fn indifferent(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                decision: None,
                actions_run: AtomicUsize::new(0),
            })
        }
    }

    impl ResourceNode for TestNode {
        fn node_id(&self) -> &str {
            &self.id
        }

        fn kind_name(&self) -> &'static str {
            "test"
        }

        fn as_change_action(&self) -> Option<&dyn ChangeAction> {
            Some(self)
        }
    }

    #[async_trait]
    impl ChangeAction for TestNode {
        async fn should_act(
            &self,
            _op: ChangeType,
            _ctx: &ActionContext,
        ) -> crate::error::Result<Option<ActDecision>> {
            Ok(self.decision.clone())
        }

        async fn action(
            &self,
            _op: ChangeType,
            _ctx: &ActionContext,
        ) -> crate::error::Result<()> {
            self.actions_run.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct PlainNode;

    impl ResourceNode for PlainNode {
        fn node_id(&self) -> &str {
            "plain"
        }

        fn kind_name(&self) -> &'static str {
            "plain"
        }
    }

    fn started() -> ActionReconciler {
        let mut reconciler = ActionReconciler::new();
        reconciler
            .start(StartOptions {
                deploy_operation_id: "op-1".to_string(),
                working_dir: PathBuf::from("/tmp/work"),
            })
            .expect("starts");
        reconciler
    }

    #[tokio::test]
    async fn observe_before_start_is_protocol_misuse() {
        let mut reconciler = ActionReconciler::new();
        let err = reconciler.observe(&TreeDiff::new()).await.expect_err("fails");
        assert!(matches!(
            err,
            StevedoreError::Reconcile(ReconcileError::NotStarted { phase: "observe" })
        ));
    }

    #[test]
    fn start_requires_operation_id() {
        let mut reconciler = ActionReconciler::new();
        let err = reconciler
            .start(StartOptions {
                deploy_operation_id: String::new(),
                working_dir: PathBuf::from("/tmp/work"),
            })
            .expect_err("fails");
        assert!(matches!(
            err,
            StevedoreError::Reconcile(ReconcileError::MissingOption {
                option: "deploy_operation_id"
            })
        ));
    }

    #[tokio::test]
    async fn observe_normalizes_refusals_and_skips_incapable_nodes() {
        let mut reconciler = started();
        let mut diff = TreeDiff::new();
        diff.added.push(TestNode::acting("a"));
        diff.common_modified.push(TestNode::idle("b"));
        diff.deleted.push(Arc::new(PlainNode));

        let observations = reconciler.observe(&diff).await.expect("observes");

        assert_eq!(observations.len(), 2);
        let a = &observations[&NodeKey::new("a", "test")];
        assert_eq!(a.change, ChangeType::Create);
        assert_eq!(a.detail, "Changing 'a'");
        let b = &observations[&NodeKey::new("b", "test")];
        assert_eq!(b.change, ChangeType::None);
        assert_eq!(b.detail, "'b' is up to date");
    }

    #[tokio::test]
    async fn observe_assigns_delete_op_to_deleted_set() {
        let mut reconciler = started();
        let mut diff = TreeDiff::new();
        diff.deleted.push(TestNode::acting("gone"));

        let observations = reconciler.observe(&diff).await.expect("observes");

        assert_eq!(
            observations[&NodeKey::new("gone", "test")].change,
            ChangeType::Delete
        );
    }

    #[tokio::test]
    async fn analyze_aggregates_noops_into_one_trailing_action() {
        let mut reconciler = started();
        let mut diff = TreeDiff::new();
        diff.added.push(TestNode::acting("a"));
        diff.added.push(TestNode::acting("b"));
        diff.common_modified.push(TestNode::idle("c"));
        diff.common_modified.push(TestNode::idle("d"));
        diff.common_modified.push(TestNode::indifferent("e"));

        let observations = reconciler.observe(&diff).await.expect("observes");
        let actions = reconciler.analyze(&observations).expect("analyzes");

        // Two real actions plus exactly one aggregate for the three no-ops.
        assert_eq!(actions.len(), 3);
        assert!(!actions[0].is_aggregate());
        assert!(!actions[1].is_aggregate());
        let aggregate = &actions[2];
        assert!(aggregate.is_aggregate());
        assert_eq!(aggregate.change(), ChangeType::None);
        assert_eq!(aggregate.detail(), "No action required");
        assert_eq!(aggregate.changes().len(), 3);
    }

    #[tokio::test]
    async fn analyze_emits_no_aggregate_without_noops() {
        let mut reconciler = started();
        let mut diff = TreeDiff::new();
        diff.added.push(TestNode::acting("a"));

        let observations = reconciler.observe(&diff).await.expect("observes");
        let actions = reconciler.analyze(&observations).expect("analyzes");

        assert_eq!(actions.len(), 1);
        assert!(!actions[0].is_aggregate());
    }

    #[tokio::test]
    async fn actions_invoke_the_node() {
        let mut reconciler = started();
        let node = TestNode::acting("a");
        let mut diff = TreeDiff::new();
        diff.added.push(Arc::clone(&node) as Arc<dyn ResourceNode>);

        let observations = reconciler.observe(&diff).await.expect("observes");
        let actions = reconciler.analyze(&observations).expect("analyzes");
        let ctx = reconciler.context().expect("context").clone();

        actions[0].act(&ctx).await.expect("acts");
        assert_eq!(node.actions_run.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_aggregate_refuses_to_run() {
        let reconciler = started();
        let ctx = reconciler.context().expect("context").clone();
        let action = Action::aggregate(vec![]);

        let err = action.act(&ctx).await.expect_err("fails");
        assert!(matches!(
            err,
            StevedoreError::Reconcile(ReconcileError::EmptyAggregate)
        ));
    }

    #[tokio::test]
    async fn finish_closes_the_sequence() {
        let mut reconciler = started();
        reconciler.finish().expect("finishes");

        let err = reconciler.finish().expect_err("fails after finish");
        assert!(matches!(
            err,
            StevedoreError::Reconcile(ReconcileError::NotStarted { phase: "finish" })
        ));
    }
}
