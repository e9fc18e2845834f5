//! Dynamic value model.
//!
//! Template expressions, props, and component state all flow through a
//! single [`Value`] type. Aggregates are reactive handles: a map value *is*
//! a [`Store`] and a list value *is* a [`ListStore`], so reads through them
//! participate in dependency tracking with no extra wrapping step, and
//! handle identity is stable (`Rc`-backed).

use std::fmt;
use std::rc::Rc;

use crate::reactivity::{Computed, ListStore, Signal, Store};

/// A host function callable from template expressions and event handlers.
///
/// Compared by identity (`Rc` pointer), never by content.
#[derive(Clone)]
pub struct NativeFn {
    f: Rc<dyn Fn(&[Value]) -> Value>,
}

impl NativeFn {
    pub fn new(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self { f: Rc::new(f) }
    }

    /// Convenience for handlers that ignore their return value.
    pub fn handler(f: impl Fn(&[Value]) + 'static) -> Self {
        Self::new(move |args| {
            f(args);
            Value::Null
        })
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.f)(args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({:p})", Rc::as_ptr(&self.f))
    }
}

/// The dynamic value.
///
/// `Number` is always an `f64`, matching the loose-scalar arithmetic the
/// expression language needs. Strings are `Rc<str>` so cloning values
/// through the render pipeline stays cheap.
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    List(ListStore),
    Map(Store),
    Signal(Signal<Value>),
    Computed(Computed<Value>),
    Function(NativeFn),
}

impl Value {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness: null and `false` are falsy; `0` and `NaN` are falsy;
    /// the empty string is falsy; aggregates and functions are truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Signal(s) => s.peek().is_truthy(),
            Value::Computed(c) => c.peek().is_truthy(),
            Value::List(_) | Value::Map(_) | Value::Function(_) => true,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Render as display text the way interpolations do: null renders as
    /// the empty string, numbers drop a trailing `.0`.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::Str(s) => s.to_string(),
            Value::Signal(s) => s.peek().to_display_string(),
            Value::Computed(c) => c.peek().to_display_string(),
            Value::List(list) => {
                let parts: Vec<String> =
                    list.peek_vec().iter().map(|v| v.to_display_string()).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Map(_) => "[object]".to_string(),
            Value::Function(_) => String::new(),
        }
    }

    /// Unwrap one level of cell indirection, reading reactively.
    pub fn unref(&self) -> Value {
        match self {
            Value::Signal(s) => s.get(),
            Value::Computed(c) => c.get(),
            other => other.clone(),
        }
    }

    /// Loose equality used by the diff and by signal write short-circuits.
    /// Aggregates and functions compare by identity; scalars by content.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Map(a), Value::Map(b)) => a.ptr_eq(b),
            (Value::Signal(a), Value::Signal(b)) => a.ptr_eq(b),
            (Value::Computed(a), Value::Computed(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.loose_eq(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<Store> for Value {
    fn from(s: Store) -> Self {
        Value::Map(s)
    }
}

impl From<ListStore> for Value {
    fn from(l: ListStore) -> Self {
        Value::List(l)
    }
}

impl From<Signal<Value>> for Value {
    fn from(s: Signal<Value>) -> Self {
        Value::Signal(s)
    }
}

impl From<Computed<Value>> for Value {
    fn from(c: Computed<Value>) -> Self {
        Value::Computed(c)
    }
}

impl From<NativeFn> for Value {
    fn from(f: NativeFn) -> Self {
        Value::Function(f)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Number(0.0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Number(-1.0).is_truthy());
        assert!(Value::string("a").is_truthy());
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Value::Number(3.0).to_display_string(), "3");
        assert_eq!(Value::Number(3.5).to_display_string(), "3.5");
        assert_eq!(Value::Null.to_display_string(), "");
        assert_eq!(Value::string("hi").to_display_string(), "hi");
    }

    #[test]
    fn test_loose_eq_scalars() {
        assert_eq!(Value::Number(1.0), Value::from(1i64));
        assert_ne!(Value::Number(1.0), Value::string("1"));
        assert_eq!(Value::string("a"), Value::string("a"));
    }

    #[test]
    fn test_aggregate_identity_eq() {
        let a = Store::new();
        let b = a.clone();
        assert_eq!(Value::Map(a), Value::Map(b));
        assert_ne!(Value::Map(Store::new()), Value::Map(Store::new()));
    }
}
