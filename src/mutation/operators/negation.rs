//! `NEGATE_CONDITIONALS` and `INVERT_NEGS`.

use super::{InsnVisitor, MutationOperator, Substitute, swap};
use crate::bytecode::{CmpOp, Insn};

const NEGATIONS: &[(CmpOp, CmpOp)] = &[
    (CmpOp::Eq, CmpOp::Ne),
    (CmpOp::Ne, CmpOp::Eq),
    (CmpOp::Lt, CmpOp::Ge),
    (CmpOp::Ge, CmpOp::Lt),
    (CmpOp::Gt, CmpOp::Le),
    (CmpOp::Le, CmpOp::Gt),
];

/// Negates comparisons and flips conditional jumps.
#[derive(Debug, Clone, Copy, Default)]
pub struct NegateConditionals;

fn negate(insn: &Insn) -> Option<(Vec<Insn>, String)> {
    match insn {
        Insn::Compare(op) => {
            let negated = swap(NEGATIONS, *op)?;
            Some((
                vec![Insn::Compare(negated)],
                format!("negated conditional {op} to {negated}"),
            ))
        }
        Insn::JumpIf(label) => Some((
            vec![Insn::JumpUnless(*label)],
            "negated conditional jump".to_string(),
        )),
        Insn::JumpUnless(label) => Some((
            vec![Insn::JumpIf(*label)],
            "negated conditional jump".to_string(),
        )),
        _ => None,
    }
}

impl MutationOperator for NegateConditionals {
    fn id(&self) -> &'static str {
        "NEGATE_CONDITIONALS"
    }

    fn description(&self) -> &'static str {
        "negate comparisons and conditional jumps"
    }

    fn create<'a>(&self, next: Box<dyn InsnVisitor + 'a>) -> Box<dyn InsnVisitor + 'a> {
        Box::new(Substitute::new(&NegateConditionals, negate, next))
    }
}

/// Removes arithmetic negation.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvertNegs;

fn drop_negation(insn: &Insn) -> Option<(Vec<Insn>, String)> {
    matches!(insn, Insn::Neg).then(|| (vec![Insn::Nop], "removed negation".to_string()))
}

impl MutationOperator for InvertNegs {
    fn id(&self) -> &'static str {
        "INVERT_NEGS"
    }

    fn description(&self) -> &'static str {
        "remove arithmetic negation"
    }

    fn create<'a>(&self, next: Box<dyn InsnVisitor + 'a>) -> Box<dyn InsnVisitor + 'a> {
        Box::new(Substitute::new(&InvertNegs, drop_negation, next))
    }
}
