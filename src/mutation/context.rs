//! Mutation points and the per-group context that numbers them.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::operators::MutationOperator;
use crate::bytecode::{LabelId, Method};

/// Stable identity of one mutation point.
///
/// Identical input, operator list and traversal order always yield identical identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutationIdentifier {
    /// Group being mutated.
    pub group: String,
    /// Unit holding the point.
    pub unit: String,
    /// Method signature holding the point.
    pub method: String,
    /// Operator id.
    pub operator: String,
    /// Sequential index within the group.
    pub index: usize,
    /// Human-readable change.
    pub description: String,
}

impl fmt::Display for MutationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} [{}] {}::{}: {}",
            self.group, self.index, self.operator, self.unit, self.method, self.description
        )
    }
}

/// Numbers mutation points for one traversal of one group.
///
/// With no target the traversal is a dry enumeration. With a target, the point carrying
/// that index is the only one an operator may rewrite.
#[derive(Debug)]
pub struct MutationContext {
    group: String,
    unit: String,
    method: String,
    target: Option<usize>,
    points: Vec<MutationIdentifier>,
    next_label: LabelId,
}

impl MutationContext {
    /// Context for a traversal of `group` activating `target`.
    pub fn new(group: impl Into<String>, target: Option<usize>) -> Self {
        Self {
            group: group.into(),
            unit: String::new(),
            method: String::new(),
            target,
            points: Vec::new(),
            next_label: 0,
        }
    }

    /// Move the traversal to `method` of `unit`.
    pub fn enter_method(&mut self, unit: &str, method: &Method) {
        self.unit = unit.to_string();
        self.method = method.signature();
        self.next_label = method.max_label().map_or(0, |max| max + 1);
    }

    /// Record a candidate and assign it the next index. Never rewrites anything.
    pub fn register_mutation(
        &mut self,
        operator: &dyn MutationOperator,
        description: impl Into<String>,
    ) -> MutationIdentifier {
        let id = MutationIdentifier {
            group: self.group.clone(),
            unit: self.unit.clone(),
            method: self.method.clone(),
            operator: operator.id().to_string(),
            index: self.points.len(),
            description: description.into(),
        };
        self.points.push(id.clone());
        id
    }

    /// True iff `id` is the active point of this traversal.
    pub fn should_mutate(&self, id: &MutationIdentifier) -> bool {
        self.target == Some(id.index)
    }

    /// A label id unused in the current method.
    pub fn fresh_label(&mut self) -> LabelId {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// Active index, if any.
    pub fn target(&self) -> Option<usize> {
        self.target
    }

    /// Points registered so far.
    pub fn points(&self) -> &[MutationIdentifier] {
        &self.points
    }

    /// Consume the context, returning its points in index order.
    pub fn into_points(self) -> Vec<MutationIdentifier> {
        self.points
    }
}
