//! `CONDITIONALS_BOUNDARY`: move comparison boundaries by one.

use super::{InsnVisitor, MutationOperator, Substitute, swap};
use crate::bytecode::{CmpOp, Insn};

const SWAPS: &[(CmpOp, CmpOp)] = &[
    (CmpOp::Lt, CmpOp::Le),
    (CmpOp::Le, CmpOp::Lt),
    (CmpOp::Gt, CmpOp::Ge),
    (CmpOp::Ge, CmpOp::Gt),
];

/// Replaces `<` with `<=`, `>` with `>=`, and back.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionalsBoundary;

fn rule(insn: &Insn) -> Option<(Vec<Insn>, String)> {
    let Insn::Compare(op) = insn else {
        return None;
    };
    let replacement = swap(SWAPS, *op)?;
    Some((
        vec![Insn::Compare(replacement)],
        format!("changed conditional boundary {op} to {replacement}"),
    ))
}

impl MutationOperator for ConditionalsBoundary {
    fn id(&self) -> &'static str {
        "CONDITIONALS_BOUNDARY"
    }

    fn description(&self) -> &'static str {
        "change relational comparison boundaries"
    }

    fn create<'a>(&self, next: Box<dyn InsnVisitor + 'a>) -> Box<dyn InsnVisitor + 'a> {
        Box::new(Substitute::new(&ConditionalsBoundary, rule, next))
    }
}
