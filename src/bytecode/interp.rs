//! Interpreter for loaded code units.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use super::classpath::{ClassPath, LoadedMethod};
use super::runtime::{self, MODULES};
use super::value::Value;
use super::{ArithOp, CmpOp, Insn};

/// Maximum nesting of `Call` frames.
pub const MAX_CALL_DEPTH: usize = 256;

/// Stack size for threads that run the interpreter. Calls recurse on the host stack, so
/// this has to hold [`MAX_CALL_DEPTH`] frames in unoptimized builds.
pub const EXEC_STACK_SIZE: usize = 64 * 1024 * 1024;

/// Runtime faults. Raised inside a test they count as a test error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    /// Operand of the wrong type.
    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        /// Expected type.
        expected: String,
        /// Actual type.
        found: String,
        /// Instruction or method involved.
        context: String,
    },
    /// Unknown unit.
    #[error("no such unit: {0}")]
    NoSuchUnit(String),
    /// Unknown method.
    #[error("no such method: {target}")]
    NoSuchMethod {
        /// `owner::name`
        target: String,
    },
    /// Unknown builtin module.
    #[error("no such module: {0}")]
    NoSuchModule(String),
    /// Wrong number of arguments.
    #[error("wrong number of arguments for {target}")]
    Arity {
        /// `owner::name`
        target: String,
    },
    /// Division or remainder by zero.
    #[error("arithmetic fault: {0}")]
    Arithmetic(String),
    /// Index outside a collection.
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        /// Requested index.
        index: i64,
        /// Collection length.
        len: usize,
    },
    /// Element access on an empty collection or option.
    #[error("{target} on empty collection")]
    EmptyCollection {
        /// `owner::name`
        target: String,
    },
    /// Operand stack underflow in unverified code.
    #[error("operand stack underflow")]
    StackUnderflow,
    /// Control ran past the end of a method.
    #[error("control fell off the end of {0}")]
    FellOffEnd(String),
    /// Call depth limit exceeded.
    #[error("call depth exceeded {MAX_CALL_DEPTH}")]
    StackOverflow,
    /// Execution was abandoned through its cancel token.
    #[error("execution cancelled")]
    Cancelled,
}

/// Shared flag used to abandon a running execution.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Every holder observes it on its next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// True once [`cancel`](Self::cancel) was called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes methods from one class path and records the units it enters.
pub struct Interpreter<'a> {
    classpath: &'a ClassPath,
    cancel: &'a CancelToken,
    touched: BTreeSet<String>,
    depth: usize,
}

impl<'a> Interpreter<'a> {
    /// Interpreter over `classpath`, abandoned when `cancel` trips.
    pub fn new(classpath: &'a ClassPath, cancel: &'a CancelToken) -> Self {
        Self {
            classpath,
            cancel,
            touched: BTreeSet::new(),
            depth: 0,
        }
    }

    /// Units entered so far.
    pub fn touched(&self) -> &BTreeSet<String> {
        &self.touched
    }

    /// Consume the interpreter, returning the units it entered.
    pub fn into_touched(self) -> BTreeSet<String> {
        self.touched
    }

    /// Invoke `unit::method` with `args`.
    pub fn call(&mut self, unit: &str, method: &str, args: Vec<Value>) -> Result<Value, ExecError> {
        let loaded_unit = self
            .classpath
            .unit(unit)
            .ok_or_else(|| ExecError::NoSuchUnit(unit.to_string()))?;
        let loaded = loaded_unit
            .method(method)
            .ok_or_else(|| ExecError::NoSuchMethod {
                target: format!("{unit}::{method}"),
            })?;
        if args.len() != loaded.method.params as usize {
            return Err(ExecError::Arity {
                target: format!("{unit}::{method}"),
            });
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecError::StackOverflow);
        }
        self.touched.insert(unit.to_string());
        self.depth += 1;
        let result = self.execute(&loaded, args);
        self.depth -= 1;
        result
    }

    fn execute(&mut self, loaded: &LoadedMethod, args: Vec<Value>) -> Result<Value, ExecError> {
        let method = &loaded.method;
        let mut locals = args;
        locals.resize(method.locals as usize, Value::Unit);
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return Err(ExecError::Cancelled);
            }
            let insn = method
                .body
                .get(pc)
                .ok_or_else(|| ExecError::FellOffEnd(method.signature()))?;
            pc += 1;

            match insn {
                Insn::Push(value) => stack.push(value.clone()),
                Insn::Load(slot) => stack.push(local(&locals, *slot)?.clone()),
                Insn::Store(slot) => {
                    let value = pop(&mut stack)?;
                    let target = locals
                        .get_mut(*slot as usize)
                        .ok_or(ExecError::StackUnderflow)?;
                    *target = value;
                }
                Insn::Dup => {
                    let top = stack.last().cloned().ok_or(ExecError::StackUnderflow)?;
                    stack.push(top);
                }
                Insn::Pop => {
                    pop(&mut stack)?;
                }
                Insn::Swap => {
                    let a = pop(&mut stack)?;
                    let b = pop(&mut stack)?;
                    stack.push(a);
                    stack.push(b);
                }
                Insn::Arith(op) => {
                    let rhs = pop(&mut stack)?;
                    let lhs = pop(&mut stack)?;
                    stack.push(arith(*op, lhs, rhs)?);
                }
                Insn::Neg => match pop(&mut stack)? {
                    Value::Int(i) => stack.push(Value::Int(i.wrapping_neg())),
                    Value::Double(d) => stack.push(Value::Double(-d)),
                    other => return Err(type_error("Int or Double", &other, "neg")),
                },
                Insn::Compare(op) => {
                    let rhs = pop(&mut stack)?;
                    let lhs = pop(&mut stack)?;
                    stack.push(Value::Bool(compare(*op, &lhs, &rhs)?));
                }
                Insn::Not => {
                    let b = pop_bool(&mut stack, "not")?;
                    stack.push(Value::Bool(!b));
                }
                Insn::Label(_) | Insn::Nop => {}
                Insn::Jump(label) => pc = jump_target(loaded, *label)?,
                Insn::JumpIf(label) => {
                    if pop_bool(&mut stack, "jump_if")? {
                        pc = jump_target(loaded, *label)?;
                    }
                }
                Insn::JumpUnless(label) => {
                    if !pop_bool(&mut stack, "jump_unless")? {
                        pc = jump_target(loaded, *label)?;
                    }
                }
                Insn::InstanceOf(type_name) => {
                    let value = pop(&mut stack)?;
                    stack.push(Value::Bool(runtime::instance_of(&value, type_name)));
                }
                Insn::GetModule(name) => {
                    if !MODULES.contains(&name.as_str()) {
                        return Err(ExecError::NoSuchModule(name.clone()));
                    }
                    stack.push(Value::Module(name.clone()));
                }
                Insn::Invoke(target) => {
                    let args = pop_args(&mut stack, target.arity)?;
                    let receiver = pop(&mut stack)?;
                    stack.push(runtime::invoke(target, receiver, args)?);
                }
                Insn::Call(target) => {
                    let args = pop_args(&mut stack, target.arity)?;
                    let result = self.call(&target.owner, &target.name, args)?;
                    stack.push(result);
                }
                Insn::Return => return pop(&mut stack),
            }
        }
    }
}

fn local(locals: &[Value], slot: u16) -> Result<&Value, ExecError> {
    locals.get(slot as usize).ok_or(ExecError::StackUnderflow)
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, ExecError> {
    stack.pop().ok_or(ExecError::StackUnderflow)
}

fn pop_args(stack: &mut Vec<Value>, arity: u8) -> Result<Vec<Value>, ExecError> {
    let arity = arity as usize;
    if stack.len() < arity {
        return Err(ExecError::StackUnderflow);
    }
    Ok(stack.split_off(stack.len() - arity))
}

fn pop_bool(stack: &mut Vec<Value>, context: &str) -> Result<bool, ExecError> {
    match pop(stack)? {
        Value::Bool(b) => Ok(b),
        other => Err(type_error("Bool", &other, context)),
    }
}

fn jump_target(loaded: &LoadedMethod, label: u32) -> Result<usize, ExecError> {
    loaded
        .labels
        .get(&label)
        .copied()
        .ok_or_else(|| ExecError::FellOffEnd(loaded.method.signature()))
}

fn type_error(expected: &str, found: &Value, context: &str) -> ExecError {
    ExecError::TypeMismatch {
        expected: expected.to_string(),
        found: found.type_name().to_string(),
        context: context.to_string(),
    }
}

fn arith(op: ArithOp, lhs: Value, rhs: Value) -> Result<Value, ExecError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                ArithOp::Add => a.wrapping_add(b),
                ArithOp::Sub => a.wrapping_sub(b),
                ArithOp::Mul => a.wrapping_mul(b),
                ArithOp::Div | ArithOp::Rem if b == 0 => {
                    return Err(ExecError::Arithmetic(format!("{a} {op} 0")));
                }
                ArithOp::Div => a.wrapping_div(b),
                ArithOp::Rem => a.wrapping_rem(b),
            };
            Ok(Value::Int(result))
        }
        (Value::Str(a), Value::Str(b)) if op == ArithOp::Add => Ok(Value::Str(a + &b)),
        (lhs, rhs) => {
            let a = as_double(&lhs, op)?;
            let b = as_double(&rhs, op)?;
            Ok(Value::Double(match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => a / b,
                ArithOp::Rem => a % b,
            }))
        }
    }
}

fn as_double(value: &Value, op: ArithOp) -> Result<f64, ExecError> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Double(d) => Ok(*d),
        other => Err(type_error("Int or Double", other, &op.to_string())),
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, ExecError> {
    let numeric = matches!(lhs, Value::Int(_) | Value::Double(_))
        && matches!(rhs, Value::Int(_) | Value::Double(_));
    match op {
        CmpOp::Eq | CmpOp::Ne => {
            let equal = if numeric {
                lhs.total_cmp(rhs).is_eq()
            } else {
                lhs == rhs
            };
            Ok(equal == (op == CmpOp::Eq))
        }
        _ => {
            let comparable = numeric
                || matches!((lhs, rhs), (Value::Str(_), Value::Str(_)))
                || matches!((lhs, rhs), (Value::Bool(_), Value::Bool(_)));
            if !comparable {
                return Err(type_error(lhs.type_name(), rhs, &op.to_string()));
            }
            let ordering = lhs.total_cmp(rhs);
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Eq | CmpOp::Ne => unreachable!("handled above"),
            })
        }
    }
}
