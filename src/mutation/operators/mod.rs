//! Mutation operator catalog and the instruction-stream transformer pipeline.
//!
//! An operator is a stateless capability. For each traversal it builds a transformer that
//! sits in a chain: every instruction of a method flows through the chain in order, and each
//! transformer either forwards it unchanged or, when its point is active, forwards a
//! replacement sequence instead. The last link collects the rewritten body.

use thiserror::Error;

use super::context::MutationContext;
use crate::bytecode::{Insn, Method};

pub mod conditionals;
pub mod math;
pub mod negation;
pub mod returns;
pub mod set_ordering;

/// One link of a transformer chain.
pub trait InsnVisitor {
    /// Consume one instruction.
    fn visit(&mut self, insn: Insn, cx: &mut MutationContext);

    /// End of method: flush and return the rewritten body.
    fn finish(self: Box<Self>, cx: &mut MutationContext) -> Vec<Insn>;
}

/// A mutation operator.
pub trait MutationOperator: Send + Sync {
    /// Stable id used in configuration and reports.
    fn id(&self) -> &'static str;

    /// Short explanation for listings.
    fn description(&self) -> &'static str;

    /// Wrap `next` in this operator's transformer.
    fn create<'a>(&self, next: Box<dyn InsnVisitor + 'a>) -> Box<dyn InsnVisitor + 'a>;
}

/// Operator lookup failures. Always fatal for a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// The id is not in the catalog.
    #[error("unknown mutation operator: {0}")]
    UnknownOperator(String),
    /// The configuration selects no operators.
    #[error("no mutation operators selected")]
    NoOperators,
}

static CATALOG: &[&dyn MutationOperator] = &[
    &math::Math,
    &conditionals::ConditionalsBoundary,
    &negation::NegateConditionals,
    &negation::InvertNegs,
    &returns::ReturnVals,
    &set_ordering::SetOrdering,
];

/// Every operator, in catalog order.
pub fn catalog() -> &'static [&'static dyn MutationOperator] {
    CATALOG
}

/// Ids of every operator, in catalog order.
pub fn catalog_ids() -> Vec<&'static str> {
    CATALOG.iter().map(|op| op.id()).collect()
}

/// Find one operator by id.
pub fn lookup(id: &str) -> Result<&'static dyn MutationOperator, CatalogError> {
    CATALOG
        .iter()
        .copied()
        .find(|op| op.id() == id)
        .ok_or_else(|| CatalogError::UnknownOperator(id.to_string()))
}

/// Resolve a configured id list, keeping its order.
pub fn resolve<S: AsRef<str>>(
    ids: &[S],
) -> Result<Vec<&'static dyn MutationOperator>, CatalogError> {
    if ids.is_empty() {
        return Err(CatalogError::NoOperators);
    }
    ids.iter().map(|id| lookup(id.as_ref())).collect()
}

/// Chain sink: collects whatever reaches the end of the chain.
#[derive(Debug, Default)]
pub struct Collector {
    out: Vec<Insn>,
}

impl InsnVisitor for Collector {
    fn visit(&mut self, insn: Insn, _cx: &mut MutationContext) {
        self.out.push(insn);
    }

    fn finish(self: Box<Self>, _cx: &mut MutationContext) -> Vec<Insn> {
        self.out
    }
}

/// Run `method` through a chain built from `operators`. The first operator sees every
/// instruction first.
pub fn rewrite_method(
    operators: &[&'static dyn MutationOperator],
    method: &Method,
    cx: &mut MutationContext,
) -> Vec<Insn> {
    let mut chain: Box<dyn InsnVisitor> = Box::new(Collector::default());
    for op in operators.iter().rev() {
        chain = op.create(chain);
    }
    for insn in &method.body {
        chain.visit(insn.clone(), cx);
    }
    chain.finish(cx)
}

/// Rule of a [`Substitute`] transformer: replacement sequence and description for an
/// instruction, or `None` if it is not a candidate.
pub type SubstituteRule = fn(&Insn) -> Option<(Vec<Insn>, String)>;

/// Transformer for operators that replace single instructions without tracking state.
pub struct Substitute<'a> {
    operator: &'static dyn MutationOperator,
    rule: SubstituteRule,
    next: Box<dyn InsnVisitor + 'a>,
}

impl<'a> Substitute<'a> {
    /// Build the transformer.
    pub fn new(
        operator: &'static dyn MutationOperator,
        rule: SubstituteRule,
        next: Box<dyn InsnVisitor + 'a>,
    ) -> Self {
        Self {
            operator,
            rule,
            next,
        }
    }
}

impl InsnVisitor for Substitute<'_> {
    fn visit(&mut self, insn: Insn, cx: &mut MutationContext) {
        if let Some((replacement, description)) = (self.rule)(&insn) {
            let id = cx.register_mutation(self.operator, description);
            if cx.should_mutate(&id) {
                for replaced in replacement {
                    self.next.visit(replaced, cx);
                }
                return;
            }
        }
        self.next.visit(insn, cx);
    }

    fn finish(self: Box<Self>, cx: &mut MutationContext) -> Vec<Insn> {
        self.next.finish(cx)
    }
}

/// Look `key` up in a static swap table.
pub(crate) fn swap<T: Copy + PartialEq>(table: &[(T, T)], key: T) -> Option<T> {
    table
        .iter()
        .find(|(from, _)| *from == key)
        .map(|(_, to)| *to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_order_is_stable() {
        assert_eq!(
            catalog_ids(),
            vec![
                "MATH",
                "CONDITIONALS_BOUNDARY",
                "NEGATE_CONDITIONALS",
                "INVERT_NEGS",
                "RETURN_VALS",
                "SET_ORDERING",
            ]
        );
    }

    #[test]
    fn resolve_keeps_configured_order_and_rejects_unknown_ids() {
        let ops = resolve(&["SET_ORDERING", "MATH"]).expect("ids are registered");
        let ids: Vec<&str> = ops.iter().map(|op| op.id()).collect();
        assert_eq!(ids, vec!["SET_ORDERING", "MATH"]);

        assert_eq!(
            resolve(&["MATH", "NOPE"]).err(),
            Some(CatalogError::UnknownOperator("NOPE".to_string()))
        );
        assert_eq!(resolve::<&str>(&[]).err(), Some(CatalogError::NoOperators));
    }

    #[test]
    fn empty_chain_is_identity() {
        let method = Method::new("m", 1, vec![Insn::Load(0), Insn::Neg, Insn::Return]);
        let mut cx = MutationContext::new("G", Some(0));
        assert_eq!(rewrite_method(&[], &method, &mut cx), method.body);
        assert!(cx.points().is_empty());
    }
}
