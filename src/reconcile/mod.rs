//! Change reconciliation: the capability contract and three-phase engine.

mod contract;
mod engine;

pub use contract::{
    ActDecision, ActionContext, ChangeAction, ChangeType, NodeKey, ResourceNode,
};
pub use engine::{
    Action, ActionReconciler, ChangeSummary, Observation, Observations, StartOptions, TreeDiff,
};
