//! A small stack bytecode: the compiled program units the mutation engine rewrites.
//!
//! Code units hold methods; methods hold flat instruction streams with symbolic labels.
//! Units named `Outer$Inner` are compiled together with `Outer` and form one group.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod classpath;
pub mod interp;
pub mod runtime;
pub mod value;
pub mod verify;

pub use classpath::{ClassPath, LoadError};
pub use interp::{CancelToken, EXEC_STACK_SIZE, ExecError, Interpreter};
pub use value::{ArrayValue, ElementKind, SetKind, SetValue, Value};
pub use verify::{VerifyError, verify_method};

/// Symbolic jump target.
pub type LabelId = u32;

/// Binary arithmetic operations on integers and doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithOp {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a % b`
    Rem,
}

/// Comparisons. Each pops two operands and pushes a boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl fmt::Display for ArithOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        })
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

/// Reference to a method: owner type or unit, name and argument count.
///
/// For `Invoke` the receiver is an extra operand below the arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    /// Owner type (`Set`, `Seq`, a module name) or code unit name.
    pub owner: String,
    /// Method name.
    pub name: String,
    /// Number of arguments, excluding any receiver.
    pub arity: u8,
}

impl MethodRef {
    /// Build a method reference.
    pub fn new(owner: impl Into<String>, name: impl Into<String>, arity: u8) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            arity,
        }
    }

    /// True if this reference targets `owner::name`.
    pub fn is(&self, owner: &str, name: &str) -> bool {
        self.owner == owner && self.name == name
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner, self.name)
    }
}

/// One instruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Insn {
    /// Push a constant.
    Push(Value),
    /// Push a local slot.
    Load(u16),
    /// Pop into a local slot.
    Store(u16),
    /// Duplicate the top of stack.
    Dup,
    /// Discard the top of stack.
    Pop,
    /// Exchange the two topmost values.
    Swap,
    /// Binary arithmetic.
    Arith(ArithOp),
    /// Arithmetic negation.
    Neg,
    /// Comparison producing a boolean.
    Compare(CmpOp),
    /// Boolean negation.
    Not,
    /// Jump target.
    Label(LabelId),
    /// Unconditional jump.
    Jump(LabelId),
    /// Pop a boolean and jump when it is true.
    JumpIf(LabelId),
    /// Pop a boolean and jump when it is false.
    JumpUnless(LabelId),
    /// Pop a value and push whether it conforms to the named type.
    InstanceOf(String),
    /// Push a builtin module handle.
    GetModule(String),
    /// Dynamic call on a receiver: builtin collections and modules.
    Invoke(MethodRef),
    /// Static call into a code unit.
    Call(MethodRef),
    /// Return the top of stack.
    Return,
    /// Do nothing.
    Nop,
}

impl Insn {
    /// `Push(Int(i))`
    pub fn int(i: i64) -> Self {
        Self::Push(Value::Int(i))
    }

    /// `Invoke(owner::name/arity)`
    pub fn invoke(owner: &str, name: &str, arity: u8) -> Self {
        Self::Invoke(MethodRef::new(owner, name, arity))
    }

    /// `Call(unit::name/arity)`
    pub fn call(unit: &str, name: &str, arity: u8) -> Self {
        Self::Call(MethodRef::new(unit, name, arity))
    }
}

/// A method body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Method {
    /// Method name.
    pub name: String,
    /// Number of parameters, held in the first local slots.
    pub params: u16,
    /// Number of local slots, including parameters.
    pub locals: u16,
    /// Instruction stream.
    pub body: Vec<Insn>,
}

impl Method {
    /// Build a method whose locals are exactly its parameters.
    pub fn new(name: impl Into<String>, params: u16, body: Vec<Insn>) -> Self {
        Self {
            name: name.into(),
            params,
            locals: params,
            body,
        }
    }

    /// Reserve extra local slots.
    pub fn with_locals(mut self, locals: u16) -> Self {
        self.locals = locals.max(self.params);
        self
    }

    /// Stable signature, e.g. `first(1)`.
    pub fn signature(&self) -> String {
        format!("{}({})", self.name, self.params)
    }

    /// Largest label id declared in the body.
    pub fn max_label(&self) -> Option<LabelId> {
        self.body
            .iter()
            .filter_map(|insn| match insn {
                Insn::Label(id) => Some(*id),
                _ => None,
            })
            .max()
    }
}

/// A compiled code unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeUnit {
    /// Qualified name, `Outer$Inner` for nested units.
    pub name: String,
    /// Methods in declaration order.
    pub methods: Vec<Method>,
}

impl CodeUnit {
    /// Build a unit.
    pub fn new(name: impl Into<String>, methods: Vec<Method>) -> Self {
        Self {
            name: name.into(),
            methods,
        }
    }

    /// Name of the group this unit is compiled with.
    pub fn group(&self) -> &str {
        group_of(&self.name)
    }

    /// Find a method by name.
    pub fn method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Group name for a unit name: everything before the first `$`.
pub fn group_of(unit_name: &str) -> &str {
    unit_name.split('$').next().unwrap_or(unit_name)
}

/// Units that always mutate together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeGroup {
    /// Group name.
    pub name: String,
    /// Member units sorted by name.
    pub units: Vec<CodeUnit>,
}

/// A whole program: the input artefact of a mutation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    /// All code units.
    pub units: Vec<CodeUnit>,
}

impl Program {
    /// Build a program from units.
    pub fn new(units: Vec<CodeUnit>) -> Self {
        Self { units }
    }

    /// Group units by compilation group, in name order.
    pub fn groups(&self) -> Vec<CodeGroup> {
        let mut grouped: BTreeMap<&str, Vec<CodeUnit>> = BTreeMap::new();
        for unit in &self.units {
            grouped.entry(unit.group()).or_default().push(unit.clone());
        }
        grouped
            .into_iter()
            .map(|(name, mut units)| {
                units.sort_by(|a, b| a.name.cmp(&b.name));
                CodeGroup {
                    name: name.to_string(),
                    units,
                }
            })
            .collect()
    }

    /// Find a group by name.
    pub fn group(&self, name: &str) -> Option<CodeGroup> {
        self.groups().into_iter().find(|g| g.name == name)
    }
}
