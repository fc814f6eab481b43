//! Builtin library reachable through `Invoke` and `GetModule`.

use super::interp::ExecError;
use super::value::{ArrayValue, ElementKind, SetKind, SetValue, Value};
use super::MethodRef;

/// Modules that `GetModule` may load.
pub const MODULES: &[&str] = &[
    "HashSet",
    "SortedSet",
    "Seq",
    "ClassTag",
    "Predef",
    "ArrayOps",
    "ReturnVals",
];

/// True if `value` conforms to the named type.
pub fn instance_of(value: &Value, type_name: &str) -> bool {
    match type_name {
        "Any" => true,
        "Set" => matches!(value, Value::Set(_)),
        "HashSet" => matches!(value, Value::Set(s) if s.kind() == SetKind::Hash),
        "SortedSet" => matches!(value, Value::Set(s) if s.kind() == SetKind::Sorted),
        "Seq" => matches!(value, Value::Seq(_)),
        "Option" => matches!(value, Value::Opt(_)),
        "Array" => matches!(value, Value::Array(_)),
        "ClassTag" => matches!(value, Value::Tag(_)),
        "Int" => matches!(value, Value::Int(_)),
        "Double" => matches!(value, Value::Double(_)),
        "Bool" => matches!(value, Value::Bool(_)),
        "Str" => matches!(value, Value::Str(_)),
        _ => false,
    }
}

/// Dispatch a dynamic call on `receiver`.
pub fn invoke(method: &MethodRef, receiver: Value, args: Vec<Value>) -> Result<Value, ExecError> {
    match receiver {
        Value::Module(module) if module == method.owner => invoke_module(method, args),
        receiver if instance_of(&receiver, &method.owner) => match receiver {
            Value::Set(set) => invoke_set(method, set, args),
            Value::Seq(items) => invoke_seq(method, items, args),
            Value::Opt(opt) => invoke_option(method, opt, args),
            Value::Array(array) => invoke_array(method, array, args),
            _ => Err(no_such_method(method)),
        },
        receiver => Err(ExecError::TypeMismatch {
            expected: method.owner.clone(),
            found: receiver.type_name().to_string(),
            context: method.to_string(),
        }),
    }
}

fn no_such_method(method: &MethodRef) -> ExecError {
    ExecError::NoSuchMethod {
        target: method.to_string(),
    }
}

fn mismatch(expected: &str, found: &Value, method: &MethodRef) -> ExecError {
    ExecError::TypeMismatch {
        expected: expected.to_string(),
        found: found.type_name().to_string(),
        context: method.to_string(),
    }
}

fn arg(args: &mut Vec<Value>, method: &MethodRef) -> Result<Value, ExecError> {
    args.pop().ok_or_else(|| ExecError::Arity {
        target: method.to_string(),
    })
}

fn index_arg(args: &mut Vec<Value>, method: &MethodRef, len: usize) -> Result<usize, ExecError> {
    match arg(args, method)? {
        Value::Int(i) if i >= 0 && (i as usize) < len => Ok(i as usize),
        Value::Int(i) => Err(ExecError::IndexOutOfBounds { index: i, len }),
        other => Err(mismatch("Int", &other, method)),
    }
}

fn count_arg(args: &mut Vec<Value>, method: &MethodRef, len: usize) -> Result<usize, ExecError> {
    match arg(args, method)? {
        Value::Int(n) => Ok(n.clamp(0, len as i64) as usize),
        other => Err(mismatch("Int", &other, method)),
    }
}

fn separator(args: &mut Vec<Value>, method: &MethodRef) -> Result<String, ExecError> {
    match arg(args, method)? {
        Value::Str(sep) => Ok(sep),
        other => Err(mismatch("Str", &other, method)),
    }
}

fn join(items: &[Value], sep: &str) -> Value {
    Value::Str(
        items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(sep),
    )
}

fn sum(items: &[Value], method: &MethodRef) -> Result<Value, ExecError> {
    let mut int_total: i64 = 0;
    let mut double_total: f64 = 0.0;
    let mut saw_double = false;
    for item in items {
        match item {
            Value::Int(i) => int_total = int_total.wrapping_add(*i),
            Value::Double(d) => {
                saw_double = true;
                double_total += d;
            }
            other => return Err(mismatch("Int or Double", other, method)),
        }
    }
    if saw_double {
        Ok(Value::Double(double_total + int_total as f64))
    } else {
        Ok(Value::Int(int_total))
    }
}

fn first_or_fail(items: &[Value], method: &MethodRef, last: bool) -> Result<Value, ExecError> {
    let item = if last { items.last() } else { items.first() };
    item.cloned().ok_or_else(|| ExecError::EmptyCollection {
        target: method.to_string(),
    })
}

fn invoke_module(method: &MethodRef, mut args: Vec<Value>) -> Result<Value, ExecError> {
    match (method.owner.as_str(), method.name.as_str()) {
        ("HashSet", "empty") => Ok(Value::Set(SetValue::empty(SetKind::Hash))),
        ("SortedSet", "empty") => Ok(Value::Set(SetValue::empty(SetKind::Sorted))),
        ("Seq", "empty") => Ok(Value::Seq(Vec::new())),
        ("ClassTag", "Int") => Ok(Value::Tag(ElementKind::Int)),
        ("ClassTag", "Long") => Ok(Value::Tag(ElementKind::Long)),
        ("ClassTag", "Double") => Ok(Value::Tag(ElementKind::Double)),
        ("ClassTag", "Bool") => Ok(Value::Tag(ElementKind::Bool)),
        ("ClassTag", "apply") => match arg(&mut args, method)? {
            Value::Type(name) => Ok(Value::Tag(ElementKind::Ref(name))),
            other => Err(mismatch("Type", &other, method)),
        },
        ("Predef", "implicitly") => arg(&mut args, method),
        ("ArrayOps", name) if name.starts_with("reverse") => {
            let expected = match name {
                "reverseInt" => Some(ElementKind::Int),
                "reverseDouble" => Some(ElementKind::Double),
                "reverseBool" => Some(ElementKind::Bool),
                "reverseRef" => None,
                _ => return Err(no_such_method(method)),
            };
            match arg(&mut args, method)? {
                Value::Array(mut array) => {
                    let fits = match &expected {
                        Some(kind) => array.kind == *kind,
                        None => matches!(array.kind, ElementKind::Ref(_)),
                    };
                    if !fits {
                        return Err(ExecError::TypeMismatch {
                            expected: name.trim_start_matches("reverse").to_string(),
                            found: format!("Array[{}]", array.kind),
                            context: method.to_string(),
                        });
                    }
                    array.elems.reverse();
                    Ok(Value::Array(array))
                }
                other => Err(mismatch("Array", &other, method)),
            }
        }
        ("ReturnVals", "replace") => Ok(match arg(&mut args, method)? {
            Value::Int(0) => Value::Int(1),
            Value::Int(_) => Value::Int(0),
            Value::Bool(b) => Value::Bool(!b),
            Value::Double(d) => Value::Double(-(d + 1.0)),
            Value::Str(_) => Value::Str(String::new()),
            other => other,
        }),
        _ => Err(no_such_method(method)),
    }
}

fn invoke_set(method: &MethodRef, set: SetValue, mut args: Vec<Value>) -> Result<Value, ExecError> {
    match method.name.as_str() {
        "incl" => Ok(Value::Set(set.incl(arg(&mut args, method)?))),
        "size" => Ok(Value::Int(set.len() as i64)),
        "contains" => Ok(Value::Bool(set.contains(&arg(&mut args, method)?))),
        "headOption" => Ok(Value::Opt(set.elems().first().cloned().map(Box::new))),
        "lastOption" => Ok(Value::Opt(set.elems().last().cloned().map(Box::new))),
        "toSeq" | "toList" | "toIndexedSeq" => Ok(Value::Seq(set.elems().to_vec())),
        "take" => {
            let n = count_arg(&mut args, method, set.len())?;
            let kept = set.elems()[..n].to_vec();
            Ok(Value::Set(SetValue::from_iter(set.kind(), kept)))
        }
        "takeRight" => {
            let n = count_arg(&mut args, method, set.len())?;
            let kept = set.elems()[set.len() - n..].to_vec();
            Ok(Value::Set(SetValue::from_iter(set.kind(), kept)))
        }
        "toArray" => match arg(&mut args, method)? {
            Value::Tag(kind) => {
                if let Some(bad) = set.elems().iter().find(|e| !kind.admits(e)) {
                    return Err(mismatch(&kind.to_string(), bad, method));
                }
                Ok(Value::Array(ArrayValue {
                    kind,
                    elems: set.elems().to_vec(),
                }))
            }
            other => Err(mismatch("ClassTag", &other, method)),
        },
        "sum" => sum(set.elems(), method),
        "mkString" => Ok(join(set.elems(), &separator(&mut args, method)?)),
        _ => Err(no_such_method(method)),
    }
}

fn invoke_seq(method: &MethodRef, mut items: Vec<Value>, mut args: Vec<Value>) -> Result<Value, ExecError> {
    match method.name.as_str() {
        "append" => {
            items.push(arg(&mut args, method)?);
            Ok(Value::Seq(items))
        }
        "reverse" => {
            items.reverse();
            Ok(Value::Seq(items))
        }
        "head" => first_or_fail(&items, method, false),
        "last" => first_or_fail(&items, method, true),
        "size" => Ok(Value::Int(items.len() as i64)),
        "get" => {
            let index = index_arg(&mut args, method, items.len())?;
            Ok(items.swap_remove(index))
        }
        "sum" => sum(&items, method),
        "mkString" => Ok(join(&items, &separator(&mut args, method)?)),
        _ => Err(no_such_method(method)),
    }
}

fn invoke_option(method: &MethodRef, opt: Option<Box<Value>>, mut args: Vec<Value>) -> Result<Value, ExecError> {
    match method.name.as_str() {
        "get" => opt.map(|v| *v).ok_or_else(|| ExecError::EmptyCollection {
            target: method.to_string(),
        }),
        "isEmpty" => Ok(Value::Bool(opt.is_none())),
        "getOrElse" => {
            let fallback = arg(&mut args, method)?;
            Ok(opt.map(|v| *v).unwrap_or(fallback))
        }
        _ => Err(no_such_method(method)),
    }
}

fn invoke_array(method: &MethodRef, mut array: ArrayValue, mut args: Vec<Value>) -> Result<Value, ExecError> {
    match method.name.as_str() {
        "length" => Ok(Value::Int(array.elems.len() as i64)),
        "get" => {
            let index = index_arg(&mut args, method, array.elems.len())?;
            Ok(array.elems.swap_remove(index))
        }
        "mkString" => Ok(join(&array.elems, &separator(&mut args, method)?)),
        _ => Err(no_such_method(method)),
    }
}
