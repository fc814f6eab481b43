//! Runtime values of the stack machine.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Element kind carried by class tags and typed arrays.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// 64-bit integers.
    Int,
    /// 64-bit integers declared through the `Long` tag.
    Long,
    /// Doubles.
    Double,
    /// Booleans.
    Bool,
    /// Reference elements of the named type.
    Ref(String),
}

impl ElementKind {
    /// True if `value` may be stored in an array of this kind.
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Int | Self::Long, Value::Int(_)) => true,
            (Self::Double, Value::Double(_)) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Ref(_), _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("Int"),
            Self::Long => f.write_str("Long"),
            Self::Double => f.write_str("Double"),
            Self::Bool => f.write_str("Bool"),
            Self::Ref(name) => write!(f, "Ref[{name}]"),
        }
    }
}

/// Set implementation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetKind {
    /// Unordered set iterated in hash-trie order.
    Hash,
    /// Order-preserving set iterated in ascending order.
    Sorted,
}

/// An immutable set value. Elements are kept in iteration order.
///
/// Equality ignores that order: two sets are equal when they have the same family and the
/// same elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SetRepr", into = "SetRepr")]
pub struct SetValue {
    kind: SetKind,
    elems: Vec<Value>,
}

#[derive(Serialize, Deserialize)]
struct SetRepr {
    kind: SetKind,
    elems: Vec<Value>,
}

impl From<SetRepr> for SetValue {
    fn from(repr: SetRepr) -> Self {
        Self::from_iter(repr.kind, repr.elems)
    }
}

impl From<SetValue> for SetRepr {
    fn from(set: SetValue) -> Self {
        Self {
            kind: set.kind,
            elems: set.elems,
        }
    }
}

impl PartialEq for SetValue {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.len() == other.len()
            && self.elems.iter().all(|e| other.contains(e))
    }
}

impl SetValue {
    /// Empty set of the given family.
    pub fn empty(kind: SetKind) -> Self {
        Self {
            kind,
            elems: Vec::new(),
        }
    }

    /// Build a set by inserting `values` in order.
    pub fn from_iter(kind: SetKind, values: impl IntoIterator<Item = Value>) -> Self {
        values
            .into_iter()
            .fold(Self::empty(kind), |set, value| set.incl(value))
    }

    /// Set family.
    pub fn kind(&self) -> SetKind {
        self.kind
    }

    /// Elements in iteration order.
    pub fn elems(&self) -> &[Value] {
        &self.elems
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// True if the set has no elements.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Membership test.
    pub fn contains(&self, value: &Value) -> bool {
        self.elems.iter().any(|e| e == value)
    }

    /// Return a copy with `value` added.
    pub fn incl(mut self, value: Value) -> Self {
        if self.contains(&value) {
            return self;
        }
        match self.kind {
            SetKind::Hash => {
                self.elems.push(value);
                // stable: equal trie keys keep insertion order
                self.elems.sort_by_key(|v| trie_key(v.hash_code()));
            }
            SetKind::Sorted => {
                let pos = self
                    .elems
                    .partition_point(|e| e.total_cmp(&value) == Ordering::Less);
                self.elems.insert(pos, value);
            }
        }
        self
    }
}

/// Typed array value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    /// Element kind.
    pub kind: ElementKind,
    /// Elements.
    pub elems: Vec<Value>,
}

/// A value on the operand stack or in a local slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// No value.
    Unit,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Double.
    Double(f64),
    /// String.
    Str(String),
    /// Type literal, used by class tags and type tests.
    Type(String),
    /// Handle to a builtin module.
    Module(String),
    /// Class tag for an element kind.
    Tag(ElementKind),
    /// Optional value.
    Opt(Option<Box<Value>>),
    /// Ordered sequence.
    Seq(Vec<Value>),
    /// Typed array.
    Array(ArrayValue),
    /// Set.
    Set(SetValue),
}

impl Value {
    /// Convenience constructor for strings.
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// Hash set of integers inserted in order.
    pub fn hash_set_of_ints(values: impl IntoIterator<Item = i64>) -> Self {
        Self::Set(SetValue::from_iter(
            SetKind::Hash,
            values.into_iter().map(Value::Int),
        ))
    }

    /// Sorted set of integers.
    pub fn sorted_set_of_ints(values: impl IntoIterator<Item = i64>) -> Self {
        Self::Set(SetValue::from_iter(
            SetKind::Sorted,
            values.into_iter().map(Value::Int),
        ))
    }

    /// Short type name used in diagnostics and type tests.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Unit => "Unit",
            Self::Bool(_) => "Bool",
            Self::Int(_) => "Int",
            Self::Double(_) => "Double",
            Self::Str(_) => "Str",
            Self::Type(_) => "Type",
            Self::Module(_) => "Module",
            Self::Tag(_) => "ClassTag",
            Self::Opt(_) => "Option",
            Self::Seq(_) => "Seq",
            Self::Array(_) => "Array",
            Self::Set(set) => match set.kind {
                SetKind::Hash => "HashSet",
                SetKind::Sorted => "SortedSet",
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Unit => 0,
            Self::Bool(_) => 1,
            Self::Int(_) | Self::Double(_) => 2,
            Self::Str(_) => 3,
            Self::Type(_) => 4,
            Self::Module(_) => 5,
            Self::Tag(_) => 6,
            Self::Opt(_) => 7,
            Self::Seq(_) => 8,
            Self::Array(_) => 9,
            Self::Set(_) => 10,
        }
    }

    /// Total order used by sorted sets.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Int(a), Self::Double(b)) => (*a as f64).total_cmp(b),
            (Self::Double(a), Self::Int(b)) => a.total_cmp(&(*b as f64)),
            (Self::Str(a), Self::Str(b))
            | (Self::Type(a), Self::Type(b))
            | (Self::Module(a), Self::Module(b)) => a.cmp(b),
            (Self::Opt(a), Self::Opt(b)) => match (a, b) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => a.total_cmp(b),
            },
            (Self::Seq(a), Self::Seq(b)) => cmp_slices(a, b),
            (Self::Array(a), Self::Array(b)) => cmp_slices(&a.elems, &b.elems),
            (Self::Set(a), Self::Set(b)) => cmp_slices(&a.elems, &b.elems),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    /// 32-bit hash code. Integral doubles hash like the equal integer.
    pub fn hash_code(&self) -> u32 {
        match self {
            Self::Unit => 0,
            Self::Bool(true) => 1231,
            Self::Bool(false) => 1237,
            Self::Int(i) => hash_long(*i),
            Self::Double(d) => {
                if d.fract() == 0.0 && *d >= i64::MIN as f64 && *d <= i64::MAX as f64 {
                    hash_long(*d as i64)
                } else {
                    let bits = d.to_bits();
                    (bits ^ (bits >> 32)) as u32
                }
            }
            Self::Str(s) | Self::Type(s) | Self::Module(s) => hash_str(s),
            Self::Tag(kind) => hash_str(&kind.to_string()),
            Self::Opt(None) => 0,
            Self::Opt(Some(v)) => v.hash_code().wrapping_add(1),
            Self::Seq(items) => hash_all(items),
            Self::Array(array) => hash_all(&array.elems),
            Self::Set(set) => set
                .elems
                .iter()
                .fold(0u32, |acc, v| acc.wrapping_add(v.hash_code())),
        }
    }
}

fn cmp_slices(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        match x.total_cmp(y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

fn hash_long(i: i64) -> u32 {
    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
        i as i32 as u32
    } else {
        let u = i as u64;
        (u ^ (u >> 32)) as u32
    }
}

fn hash_str(s: &str) -> u32 {
    s.chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32))
}

fn hash_all(items: &[Value]) -> u32 {
    items
        .iter()
        .fold(1u32, |h, v| h.wrapping_mul(31).wrapping_add(v.hash_code()))
}

fn spread(hash: u32) -> u32 {
    let mut h = hash.wrapping_add(!(hash << 9));
    h ^= h >> 14;
    h = h.wrapping_add(h << 4);
    h ^ (h >> 10)
}

/// Iteration key for hash sets: 5-bit trie digits, least significant first.
fn trie_key(hash: u32) -> [u8; 7] {
    let h = spread(hash);
    let mut key = [0u8; 7];
    for (level, digit) in key.iter_mut().enumerate() {
        *digit = ((h >> (5 * level)) & 0x1f) as u8;
    }
    key
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => f.write_str("()"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{d:?}"),
            Self::Str(s) => f.write_str(s),
            Self::Type(t) => write!(f, "classOf[{t}]"),
            Self::Module(m) => f.write_str(m),
            Self::Tag(kind) => write!(f, "ClassTag[{kind}]"),
            Self::Opt(None) => f.write_str("None"),
            Self::Opt(Some(v)) => write!(f, "Some({v})"),
            Self::Seq(items) => write_joined(f, "Seq(", items, ")"),
            Self::Array(array) => write_joined(f, "Array(", &array.elems, ")"),
            Self::Set(set) => write_joined(f, "Set(", &set.elems, ")"),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str(close)
}
