use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::closure::ClosureRef;

/// Opaque, reference-counted host object.
///
/// Cloning shares the object; equality is identity.
#[derive(Clone)]
pub struct HostObject {
    type_name: &'static str,
    inner: Rc<dyn Any>,
}

impl HostObject {
    pub fn new<T: Any>(value: T) -> Self {
        Self::from_rc(Rc::new(value))
    }

    pub fn from_rc<T: Any>(value: Rc<T>) -> Self {
        Self {
            type_name: short_type_name::<T>(),
            inner: value,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref()
    }

    pub fn downcast_rc<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(&self.inner).downcast().ok()
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for HostObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({})", self.type_name)
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// An error value thrown by host code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    pub name: String,
    pub message: String,
}

impl HostError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Undefined,
    Null,
    Bool,
    Number,
    String,
    Bytes,
    Object,
    Error,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Bool => "boolean",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Bytes => "bytes",
            ValueKind::Object => "object",
            ValueKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// A host-side value as seen through the boundary.
///
/// `Display` renders the debug description handed to the compute side by `debug_string`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Object(HostObject),
    Error(HostError),
}

impl HostValue {
    pub fn object<T: Any>(value: T) -> Self {
        HostValue::Object(HostObject::new(value))
    }

    pub fn error(name: impl Into<String>, message: impl Into<String>) -> Self {
        HostValue::Error(HostError::new(name, message))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        HostValue::Error(HostError::type_error(message))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            HostValue::Undefined => ValueKind::Undefined,
            HostValue::Null => ValueKind::Null,
            HostValue::Bool(_) => ValueKind::Bool,
            HostValue::Number(_) => ValueKind::Number,
            HostValue::String(_) => ValueKind::String,
            HostValue::Bytes(_) => ValueKind::Bytes,
            HostValue::Object(_) => ValueKind::Object,
            HostValue::Error(_) => ValueKind::Error,
        }
    }

    /// `undefined` or `null`.
    pub fn is_like_none(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn is_function(&self) -> bool {
        matches!(self, HostValue::Object(obj) if obj.is::<ClosureRef>())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HostValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            HostValue::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_object()?.downcast_ref()
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Undefined => f.write_str("undefined"),
            HostValue::Null => f.write_str("null"),
            HostValue::Bool(b) => write!(f, "{b}"),
            HostValue::Number(n) => f.write_str(&number_to_string(*n)),
            HostValue::String(s) => write!(f, "\"{s}\""),
            HostValue::Bytes(b) => write!(f, "Bytes({})", b.len()),
            HostValue::Object(obj) if obj.is::<ClosureRef>() => f.write_str("Function"),
            HostValue::Object(obj) => write!(f, "Object({})", obj.type_name()),
            HostValue::Error(err) => write!(f, "{err}"),
        }
    }
}

/// Shortest round-trip rendering with the host's plain/exponent cutoffs: plain notation for
/// decimal exponents in `-6..21`, `d.ddde+N` outside it, and `-0` printed as `0`.
fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if n == 0.0 {
        return "0".to_owned();
    }
    if n < 0.0 {
        return format!("-{}", number_to_string(-n));
    }

    // `{:e}` gives the shortest digits that round-trip, as `d.ddd` `e` exponent.
    let sci = format!("{n:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    let k = digits.len() as i32;
    let point = exp.parse::<i32>().unwrap_or(0) + 1;

    if k <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - k) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat(-point as usize))
    } else {
        let e = point - 1;
        let sign = if e < 0 { '-' } else { '+' };
        let (first, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{first}e{sign}{}", e.abs())
        } else {
            format!("{first}.{rest}e{sign}{}", e.abs())
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Number(f64::from(value))
    }
}

impl From<u32> for HostValue {
    fn from(value: u32) -> Self {
        HostValue::Number(f64::from(value))
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(value: Vec<u8>) -> Self {
        HostValue::Bytes(value)
    }
}

impl From<HostObject> for HostValue {
    fn from(value: HostObject) -> Self {
        HostValue::Object(value)
    }
}

impl From<HostError> for HostValue {
    fn from(value: HostError) -> Self {
        HostValue::Error(value)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(HostValue::Undefined, Into::into)
    }
}

/// Argument extraction for host operations. Mismatches come back as a thrown `TypeError`.
pub mod args {
    use std::any::Any;
    use std::rc::Rc;

    use super::HostValue;

    fn arg(args: &[HostValue], index: usize) -> &HostValue {
        const UNDEFINED: &HostValue = &HostValue::Undefined;
        args.get(index).unwrap_or(UNDEFINED)
    }

    fn mismatch(index: usize, expected: &str, found: &HostValue) -> HostValue {
        HostValue::type_error(format!(
            "argument {index}: expected {expected}, found {}",
            found.kind()
        ))
    }

    pub fn string(args: &[HostValue], index: usize) -> Result<&str, HostValue> {
        let value = arg(args, index);
        value.as_str().ok_or_else(|| mismatch(index, "string", value))
    }

    /// `undefined`/`null` map to `None`.
    pub fn opt_string(args: &[HostValue], index: usize) -> Result<Option<&str>, HostValue> {
        let value = arg(args, index);
        if value.is_like_none() {
            return Ok(None);
        }
        string(args, index).map(Some)
    }

    pub fn number(args: &[HostValue], index: usize) -> Result<f64, HostValue> {
        let value = arg(args, index);
        value.as_f64().ok_or_else(|| mismatch(index, "number", value))
    }

    pub fn bytes(args: &[HostValue], index: usize) -> Result<&[u8], HostValue> {
        let value = arg(args, index);
        value.as_bytes().ok_or_else(|| mismatch(index, "bytes", value))
    }

    pub fn object<T: Any>(args: &[HostValue], index: usize) -> Result<Rc<T>, HostValue> {
        let value = arg(args, index);
        value
            .as_object()
            .and_then(|obj| obj.downcast_rc::<T>())
            .ok_or_else(|| mismatch(index, super::short_type_name::<T>(), value))
    }
}
