//! `MATH`: swap binary arithmetic operations.

use super::{InsnVisitor, MutationOperator, Substitute, swap};
use crate::bytecode::{ArithOp, Insn};

const SWAPS: &[(ArithOp, ArithOp)] = &[
    (ArithOp::Add, ArithOp::Sub),
    (ArithOp::Sub, ArithOp::Add),
    (ArithOp::Mul, ArithOp::Div),
    (ArithOp::Div, ArithOp::Mul),
    (ArithOp::Rem, ArithOp::Mul),
];

/// Replaces `+` with `-`, `*` with `/` and `%` with `*`, and back.
#[derive(Debug, Clone, Copy, Default)]
pub struct Math;

fn rule(insn: &Insn) -> Option<(Vec<Insn>, String)> {
    let Insn::Arith(op) = insn else {
        return None;
    };
    let replacement = swap(SWAPS, *op)?;
    Some((
        vec![Insn::Arith(replacement)],
        format!("replaced {op} with {replacement}"),
    ))
}

impl MutationOperator for Math {
    fn id(&self) -> &'static str {
        "MATH"
    }

    fn description(&self) -> &'static str {
        "swap arithmetic operators"
    }

    fn create<'a>(&self, next: Box<dyn InsnVisitor + 'a>) -> Box<dyn InsnVisitor + 'a> {
        Box::new(Substitute::new(&Math, rule, next))
    }
}
