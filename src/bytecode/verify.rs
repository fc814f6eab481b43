//! Structural verification of method bodies.
//!
//! A method is well formed when every label is declared once, every jump targets a
//! declared label, the operand stack never underflows, every join point is reached with
//! one stack height, local slots stay in range and no path falls off the end.

use std::collections::HashMap;

use thiserror::Error;

use super::{Insn, LabelId, Method};

/// Structural faults found by [`verify_method`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// A label is declared more than once.
    #[error("{method}: label {label} declared twice")]
    DuplicateLabel {
        /// Method signature.
        method: String,
        /// Offending label.
        label: LabelId,
    },
    /// A jump targets a label that is never declared.
    #[error("{method}: jump to undeclared label {label} at {pc}")]
    UnknownLabel {
        /// Method signature.
        method: String,
        /// Offending label.
        label: LabelId,
        /// Instruction index.
        pc: usize,
    },
    /// An instruction needs more operands than the stack holds.
    #[error("{method}: stack underflow at {pc}")]
    StackUnderflow {
        /// Method signature.
        method: String,
        /// Instruction index.
        pc: usize,
    },
    /// Two paths reach one instruction with different stack heights.
    #[error("{method}: inconsistent stack height at {pc} ({expected} vs {found})")]
    HeightMismatch {
        /// Method signature.
        method: String,
        /// Instruction index.
        pc: usize,
        /// Height recorded first.
        expected: usize,
        /// Height of the later path.
        found: usize,
    },
    /// A local slot index is outside the declared locals.
    #[error("{method}: local slot {slot} out of range at {pc}")]
    BadLocal {
        /// Method signature.
        method: String,
        /// Slot index.
        slot: u16,
        /// Instruction index.
        pc: usize,
    },
    /// Control can run past the last instruction.
    #[error("{method}: control falls off the end of the body")]
    FallsOffEnd {
        /// Method signature.
        method: String,
    },
}

/// Operands popped and pushed by `insn`.
pub fn stack_effect(insn: &Insn) -> (usize, usize) {
    match insn {
        Insn::Push(_) | Insn::Load(_) | Insn::GetModule(_) => (0, 1),
        Insn::Store(_) | Insn::Pop | Insn::JumpIf(_) | Insn::JumpUnless(_) | Insn::Return => {
            (1, 0)
        }
        Insn::Dup => (1, 2),
        Insn::Swap => (2, 2),
        Insn::Arith(_) | Insn::Compare(_) => (2, 1),
        Insn::Neg | Insn::Not | Insn::InstanceOf(_) => (1, 1),
        Insn::Label(_) | Insn::Jump(_) | Insn::Nop => (0, 0),
        Insn::Invoke(m) => (m.arity as usize + 1, 1),
        Insn::Call(m) => (m.arity as usize, 1),
    }
}

/// Map each declared label to its instruction index.
pub fn label_table(method: &Method) -> Result<HashMap<LabelId, usize>, VerifyError> {
    let mut labels = HashMap::new();
    for (pc, insn) in method.body.iter().enumerate() {
        if let Insn::Label(id) = insn {
            if labels.insert(*id, pc).is_some() {
                return Err(VerifyError::DuplicateLabel {
                    method: method.signature(),
                    label: *id,
                });
            }
        }
    }
    Ok(labels)
}

/// Verify one method body.
pub fn verify_method(method: &Method) -> Result<(), VerifyError> {
    let signature = method.signature();
    let labels = label_table(method)?;
    let target = |label: &LabelId, pc: usize| {
        labels
            .get(label)
            .copied()
            .ok_or_else(|| VerifyError::UnknownLabel {
                method: signature.clone(),
                label: *label,
                pc,
            })
    };

    let body = &method.body;
    let mut heights: Vec<Option<usize>> = vec![None; body.len()];
    let mut worklist = vec![(0usize, 0usize)];

    while let Some((pc, height)) = worklist.pop() {
        if pc >= body.len() {
            return Err(VerifyError::FallsOffEnd { method: signature.clone() });
        }
        match heights[pc] {
            Some(expected) if expected == height => continue,
            Some(expected) => {
                return Err(VerifyError::HeightMismatch {
                    method: signature.clone(),
                    pc,
                    expected,
                    found: height,
                });
            }
            None => heights[pc] = Some(height),
        }

        let insn = &body[pc];
        if let Insn::Load(slot) | Insn::Store(slot) = insn {
            if *slot >= method.locals {
                return Err(VerifyError::BadLocal {
                    method: signature.clone(),
                    slot: *slot,
                    pc,
                });
            }
        }

        let (pops, pushes) = stack_effect(insn);
        if height < pops {
            return Err(VerifyError::StackUnderflow {
                method: signature.clone(),
                pc,
            });
        }
        let next = height - pops + pushes;

        match insn {
            Insn::Return => {}
            Insn::Jump(label) => worklist.push((target(label, pc)?, next)),
            Insn::JumpIf(label) | Insn::JumpUnless(label) => {
                worklist.push((target(label, pc)?, next));
                worklist.push((pc + 1, next));
            }
            _ => worklist.push((pc + 1, next)),
        }
    }

    // unreachable code still must not reference missing labels
    for (pc, insn) in body.iter().enumerate() {
        if let Insn::Jump(label) | Insn::JumpIf(label) | Insn::JumpUnless(label) = insn {
            target(label, pc)?;
        }
    }

    Ok(())
}
