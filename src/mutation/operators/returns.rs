//! `RETURN_VALS`: replace the value a method returns.

use super::{InsnVisitor, MutationOperator, Substitute};
use crate::bytecode::{Insn, MethodRef};

/// Routes every returned value through `ReturnVals.replace`, which maps integers to
/// `x == 0 ? 1 : 0`, negates booleans, maps doubles to `-(x + 1)` and strings to `""`.
/// Other values come back unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnVals;

fn rule(insn: &Insn) -> Option<(Vec<Insn>, String)> {
    if !matches!(insn, Insn::Return) {
        return None;
    }
    Some((
        vec![
            Insn::GetModule("ReturnVals".to_string()),
            Insn::Swap,
            Insn::Invoke(MethodRef::new("ReturnVals", "replace", 1)),
            Insn::Return,
        ],
        "replaced return value".to_string(),
    ))
}

impl MutationOperator for ReturnVals {
    fn id(&self) -> &'static str {
        "RETURN_VALS"
    }

    fn description(&self) -> &'static str {
        "replace returned values"
    }

    fn create<'a>(&self, next: Box<dyn InsnVisitor + 'a>) -> Box<dyn InsnVisitor + 'a> {
        Box::new(Substitute::new(&ReturnVals, rule, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{
        CancelToken, ClassPath, CodeUnit, Interpreter, Method, Program, Value, verify_method,
    };
    use crate::mutation::context::MutationContext;
    use crate::mutation::operators::rewrite_method;

    #[test]
    fn replaced_return_verifies_and_flips_the_result() {
        let method = Method::new("zero", 0, vec![Insn::int(0), Insn::Return]);
        let mut cx = MutationContext::new("Z", Some(0));
        let body = rewrite_method(&[&ReturnVals], &method, &mut cx);
        let mutated = Method::new("zero", 0, body);
        assert_eq!(verify_method(&mutated), Ok(()));

        let program = Program::new(vec![CodeUnit::new("Z", vec![mutated])]);
        let cp = ClassPath::load_program(&program).expect("mutant should load");
        let cancel = CancelToken::new();
        let mut interp = Interpreter::new(&cp, &cancel);
        assert_eq!(interp.call("Z", "zero", vec![]), Ok(Value::Int(1)));
    }
}
