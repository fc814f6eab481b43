//! `SET_ORDERING`: exposes code that depends on the iteration order of unordered sets.
//!
//! Every rewrite is guarded by a runtime type test: order-preserving sets take the original
//! path, any other set takes the mutated one.
//!
//! ```text
//! Dup
//! InstanceOf SortedSet
//! JumpIf L_orig
//! <replacement>
//! Jump L_end
//! Label L_orig
//! <original>
//! Label L_end
//! ```
//!
//! Calls that take an argument (`take`, `takeRight`, `toArray`) use the same guard with a
//! `Swap` on either side so the type test sees the set under the argument.
//!
//! `toArray` needs the element kind of its class-tag argument to pick a typed reverse. The
//! kind is tracked with a small state machine over the instructions preceding the call. Any
//! label resets it, since a jump into the label may arrive with a different tag.

use super::{InsnVisitor, MutationOperator};
use crate::bytecode::{ElementKind, Insn, MethodRef, Value};
use crate::mutation::context::MutationContext;

const ORDERED_SET: &str = "SortedSet";
const SET_OWNER: &str = "Set";

const ACCESSOR_SWAPS: &[(&str, &str)] = &[("headOption", "lastOption"), ("lastOption", "headOption")];
const SLICE_SWAPS: &[(&str, &str)] = &[("take", "takeRight"), ("takeRight", "take")];
const REVERSIBLE: &[&str] = &["toSeq", "toList", "toIndexedSeq"];

/// Swaps `headOption`/`lastOption` and `take`/`takeRight`, and reverses `toSeq`, `toList`,
/// `toIndexedSeq` and `toArray` results on sets that are not order-preserving.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOrdering;

impl MutationOperator for SetOrdering {
    fn id(&self) -> &'static str {
        "SET_ORDERING"
    }

    fn description(&self) -> &'static str {
        "perturb iteration order of unordered sets"
    }

    fn create<'a>(&self, next: Box<dyn InsnVisitor + 'a>) -> Box<dyn InsnVisitor + 'a> {
        Box::new(SetOrderingVisitor {
            next,
            tag: TagState::Neutral,
        })
    }
}

/// What is known about the class tag on top of the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
enum TagState {
    Neutral,
    ModuleLoaded,
    TypePushed(String),
    Established(ElementKind),
}

impl TagState {
    fn step(&self, insn: &Insn) -> TagState {
        match (self, insn) {
            (_, Insn::GetModule(module)) if module == "ClassTag" => TagState::ModuleLoaded,
            (TagState::ModuleLoaded, Insn::Invoke(m)) if m.owner == "ClassTag" && m.arity == 0 => {
                match m.name.as_str() {
                    "Int" => TagState::Established(ElementKind::Int),
                    "Long" => TagState::Established(ElementKind::Long),
                    "Double" => TagState::Established(ElementKind::Double),
                    "Bool" => TagState::Established(ElementKind::Bool),
                    _ => TagState::Neutral,
                }
            }
            (TagState::ModuleLoaded, Insn::Push(Value::Type(name))) => {
                TagState::TypePushed(name.clone())
            }
            (TagState::TypePushed(name), Insn::Invoke(m)) if m.is("ClassTag", "apply") => {
                TagState::Established(ElementKind::Ref(name.clone()))
            }
            (state, insn) if is_transparent(insn) => state.clone(),
            _ => TagState::Neutral,
        }
    }
}

fn is_transparent(insn: &Insn) -> bool {
    match insn {
        Insn::Nop => true,
        Insn::Invoke(m) => m.is("Predef", "implicitly") && m.arity == 1,
        _ => false,
    }
}

fn typed_reverse(kind: &ElementKind) -> Option<&'static str> {
    match kind {
        ElementKind::Int => Some("reverseInt"),
        ElementKind::Double => Some("reverseDouble"),
        ElementKind::Bool => Some("reverseBool"),
        ElementKind::Ref(_) => Some("reverseRef"),
        ElementKind::Long => None,
    }
}

struct SetOrderingVisitor<'a> {
    next: Box<dyn InsnVisitor + 'a>,
    tag: TagState,
}

impl SetOrderingVisitor<'_> {
    fn emit(&mut self, insns: Vec<Insn>, cx: &mut MutationContext) {
        for insn in insns {
            self.next.visit(insn, cx);
        }
    }

    /// `[set] -> [result]`: the replacement runs unless the receiver is order-preserving.
    fn guarded(&mut self, original: Insn, replacement: Vec<Insn>, cx: &mut MutationContext) {
        let on_original = cx.fresh_label();
        let end = cx.fresh_label();
        let mut out = vec![
            Insn::Dup,
            Insn::InstanceOf(ORDERED_SET.to_string()),
            Insn::JumpIf(on_original),
        ];
        out.extend(replacement);
        out.extend([
            Insn::Jump(end),
            Insn::Label(on_original),
            original,
            Insn::Label(end),
        ]);
        self.emit(out, cx);
    }

    /// `[set, arg] -> [result]`
    fn guarded_with_arg(&mut self, original: Insn, replacement: Vec<Insn>, cx: &mut MutationContext) {
        let on_original = cx.fresh_label();
        let end = cx.fresh_label();
        let mut out = vec![
            Insn::Swap,
            Insn::Dup,
            Insn::InstanceOf(ORDERED_SET.to_string()),
            Insn::JumpIf(on_original),
            Insn::Swap,
        ];
        out.extend(replacement);
        out.extend([
            Insn::Jump(end),
            Insn::Label(on_original),
            Insn::Swap,
            original,
            Insn::Label(end),
        ]);
        self.emit(out, cx);
    }

    fn visit_set_call(&mut self, method: &MethodRef, insn: Insn, cx: &mut MutationContext) {
        if let Some((_, swapped)) = ACCESSOR_SWAPS.iter().find(|(from, _)| *from == method.name) {
            let id = cx.register_mutation(&SetOrdering, format!("replaced {} with {swapped}", method.name));
            if cx.should_mutate(&id) {
                let replacement = Insn::Invoke(MethodRef::new(SET_OWNER, *swapped, 0));
                return self.guarded(insn, vec![replacement], cx);
            }
        } else if let Some((_, swapped)) = SLICE_SWAPS
            .iter()
            .find(|(from, _)| *from == method.name && method.arity == 1)
        {
            let id = cx.register_mutation(&SetOrdering, format!("replaced {} with {swapped}", method.name));
            if cx.should_mutate(&id) {
                let replacement = Insn::Invoke(MethodRef::new(SET_OWNER, *swapped, 1));
                return self.guarded_with_arg(insn, vec![replacement], cx);
            }
        } else if REVERSIBLE.contains(&method.name.as_str()) {
            let id = cx.register_mutation(&SetOrdering, format!("reversed result of {}", method.name));
            if cx.should_mutate(&id) {
                let replacement = vec![insn.clone(), Insn::invoke("Seq", "reverse", 0)];
                return self.guarded(insn, replacement, cx);
            }
        } else if method.name == "toArray" && method.arity == 1 {
            let id = cx.register_mutation(&SetOrdering, "reversed result of toArray");
            if cx.should_mutate(&id) {
                if let TagState::Established(kind) = &self.tag {
                    if let Some(reverse) = typed_reverse(kind) {
                        let replacement = vec![
                            insn.clone(),
                            Insn::GetModule("ArrayOps".to_string()),
                            Insn::Swap,
                            Insn::Invoke(MethodRef::new("ArrayOps", reverse, 1)),
                        ];
                        return self.guarded_with_arg(insn, replacement, cx);
                    }
                }
            }
        }
        self.next.visit(insn, cx);
    }
}

impl InsnVisitor for SetOrderingVisitor<'_> {
    fn visit(&mut self, insn: Insn, cx: &mut MutationContext) {
        let next_tag = self.tag.step(&insn);
        match &insn {
            Insn::Invoke(method) if method.owner == SET_OWNER => {
                let method = method.clone();
                self.visit_set_call(&method, insn, cx);
            }
            _ => self.next.visit(insn, cx),
        }
        self.tag = next_tag;
    }

    fn finish(self: Box<Self>, cx: &mut MutationContext) -> Vec<Insn> {
        self.next.finish(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Method, verify_method};
    use crate::mutation::operators::rewrite_method;

    fn rewrite(body: Vec<Insn>, target: Option<usize>) -> (Vec<Insn>, usize) {
        let method = Method::new("f", 2, body);
        let mut cx = MutationContext::new("G", target);
        cx.enter_method("G", &method);
        let out = rewrite_method(&[&SetOrdering], &method, &mut cx);
        let mutated = Method::new("f", 2, out.clone());
        assert_eq!(verify_method(&mutated), Ok(()), "rewritten body must verify");
        (out, cx.points().len())
    }

    fn to_array_with(tag: Vec<Insn>) -> Vec<Insn> {
        let mut body = vec![Insn::Load(0)];
        body.extend(tag);
        body.extend([Insn::invoke("Set", "toArray", 1), Insn::Return]);
        body
    }

    #[test]
    fn head_option_is_guarded() {
        let (out, count) = rewrite(
            vec![Insn::Load(0), Insn::invoke("Set", "headOption", 0), Insn::Return],
            Some(0),
        );
        assert_eq!(count, 1);
        assert_eq!(
            out,
            vec![
                Insn::Load(0),
                Insn::Dup,
                Insn::InstanceOf("SortedSet".to_string()),
                Insn::JumpIf(0),
                Insn::invoke("Set", "lastOption", 0),
                Insn::Jump(1),
                Insn::Label(0),
                Insn::invoke("Set", "headOption", 0),
                Insn::Label(1),
                Insn::Return,
            ]
        );
    }

    #[test]
    fn fresh_labels_avoid_existing_ones() {
        let body = vec![
            Insn::Label(7),
            Insn::Load(0),
            Insn::invoke("Set", "toList", 0),
            Insn::Return,
        ];
        let (out, _) = rewrite(body, Some(0));
        assert!(out.contains(&Insn::Label(8)));
        assert!(out.contains(&Insn::Label(9)));
        assert!(out.contains(&Insn::invoke("Seq", "reverse", 0)));
    }

    #[test]
    fn to_array_uses_tracked_element_kind() {
        let int_tag = vec![Insn::GetModule("ClassTag".into()), Insn::invoke("ClassTag", "Int", 0)];
        let (out, _) = rewrite(to_array_with(int_tag), Some(0));
        assert!(out.contains(&Insn::invoke("ArrayOps", "reverseInt", 1)));

        let ref_tag = vec![
            Insn::GetModule("ClassTag".into()),
            Insn::Push(Value::Type("Str".into())),
            Insn::invoke("ClassTag", "apply", 1),
            Insn::Nop,
        ];
        let (out, _) = rewrite(to_array_with(ref_tag), Some(0));
        assert!(out.contains(&Insn::invoke("ArrayOps", "reverseRef", 1)));
    }

    #[test]
    fn implicitly_is_transparent_to_tag_tracking() {
        let tag = vec![
            Insn::GetModule("Predef".into()),
            Insn::GetModule("ClassTag".into()),
            Insn::invoke("ClassTag", "Double", 0),
            Insn::invoke("Predef", "implicitly", 1),
        ];
        let (out, _) = rewrite(to_array_with(tag), Some(0));
        assert!(out.contains(&Insn::invoke("ArrayOps", "reverseDouble", 1)));
    }

    #[test]
    fn unknown_or_unsupported_tags_fall_back_to_original() {
        let from_local = vec![
            Insn::Load(0),
            Insn::Load(1),
            Insn::invoke("Set", "toArray", 1),
            Insn::Return,
        ];
        let (out, count) = rewrite(from_local.clone(), Some(0));
        assert_eq!(count, 1);
        assert_eq!(out, from_local);

        let long_tag = to_array_with(vec![
            Insn::GetModule("ClassTag".into()),
            Insn::invoke("ClassTag", "Long", 0),
        ]);
        let (out, count) = rewrite(long_tag.clone(), Some(0));
        assert_eq!(count, 1);
        assert_eq!(out, long_tag);

        let interrupted = to_array_with(vec![
            Insn::GetModule("ClassTag".into()),
            Insn::invoke("ClassTag", "Int", 0),
            Insn::Dup,
            Insn::Pop,
        ]);
        let (out, _) = rewrite(interrupted.clone(), Some(0));
        assert_eq!(out, interrupted);
    }

    #[test]
    fn tag_is_forgotten_at_join_points() {
        // the jump carries a Double tag into label 2, the fall-through an Int tag
        let join = vec![
            Insn::Load(0),
            Insn::Load(1),
            Insn::JumpIf(1),
            Insn::GetModule("ClassTag".into()),
            Insn::invoke("ClassTag", "Double", 0),
            Insn::Jump(2),
            Insn::Label(1),
            Insn::GetModule("ClassTag".into()),
            Insn::invoke("ClassTag", "Int", 0),
            Insn::Label(2),
            Insn::invoke("Set", "toArray", 1),
            Insn::Return,
        ];
        let (out, count) = rewrite(join.clone(), Some(0));
        assert_eq!(count, 1);
        assert_eq!(out, join);
    }

    #[test]
    fn take_and_take_right_swap_under_guard() {
        let body = vec![
            Insn::Load(0),
            Insn::int(2),
            Insn::invoke("Set", "take", 1),
            Insn::Return,
        ];
        let (out, count) = rewrite(body, Some(0));
        assert_eq!(count, 1);
        assert_eq!(
            out,
            vec![
                Insn::Load(0),
                Insn::int(2),
                Insn::Swap,
                Insn::Dup,
                Insn::InstanceOf("SortedSet".to_string()),
                Insn::JumpIf(0),
                Insn::Swap,
                Insn::invoke("Set", "takeRight", 1),
                Insn::Jump(1),
                Insn::Label(0),
                Insn::Swap,
                Insn::invoke("Set", "take", 1),
                Insn::Label(1),
                Insn::Return,
            ]
        );
    }

    #[test]
    fn to_indexed_seq_is_reversed() {
        let body = vec![Insn::Load(0), Insn::invoke("Set", "toIndexedSeq", 0), Insn::Return];
        let (out, count) = rewrite(body, Some(0));
        assert_eq!(count, 1);
        assert!(out.contains(&Insn::invoke("Seq", "reverse", 0)));
    }

    #[test]
    fn non_set_calls_are_ignored() {
        let body = vec![Insn::Load(0), Insn::invoke("Seq", "head", 0), Insn::Return];
        let (out, count) = rewrite(body.clone(), Some(0));
        assert_eq!(count, 0);
        assert_eq!(out, body);
    }
}
