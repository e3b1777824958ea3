//! Engine values
//!
//! The engine's tagged value representation. Primitives are stored inline;
//! heap data (strings, arrays, buffers) is behind `Arc` so values stay cheap
//! to clone while the wrapped objects keep identity.

use crate::array::JsArray;
use crate::buffer::JsBuffer;
use crate::string::JsString;
use std::sync::Arc;

/// An engine value
#[derive(Clone)]
pub enum Value {
    /// The undefined value
    Undefined,
    /// The null value
    Null,
    /// A boolean
    Boolean(bool),
    /// A 32-bit integer (the engine's small-number representation)
    Int32(i32),
    /// A double
    Number(f64),
    /// An arbitrary-precision-ish integer for numbers outside the safe f64 range
    BigInt(i128),
    /// An immutable string
    String(Arc<JsString>),
    /// An array of values
    Array(Arc<JsArray>),
    /// A binary buffer object
    Buffer(Arc<JsBuffer>),
}

impl Value {
    /// Create the undefined value
    #[inline]
    pub const fn undefined() -> Self {
        Self::Undefined
    }

    /// Create the null value
    #[inline]
    pub const fn null() -> Self {
        Self::Null
    }

    /// Create a boolean value
    #[inline]
    pub const fn boolean(b: bool) -> Self {
        Self::Boolean(b)
    }

    /// Create a 32-bit integer value
    #[inline]
    pub const fn int32(n: i32) -> Self {
        Self::Int32(n)
    }

    /// Create a number value.
    ///
    /// Integral doubles in i32 range collapse to the small-integer
    /// representation, except -0.0 which must stay a double.
    #[inline]
    pub fn number(n: f64) -> Self {
        if n.fract() == 0.0
            && n >= i32::MIN as f64
            && n <= i32::MAX as f64
            && (n != 0.0 || (1.0_f64 / n).is_sign_positive())
        {
            return Self::Int32(n as i32);
        }
        Self::Number(n)
    }

    /// Create a big integer value
    #[inline]
    pub const fn bigint(n: i128) -> Self {
        Self::BigInt(n)
    }

    /// Create a string value
    pub fn string(s: Arc<JsString>) -> Self {
        Self::String(s)
    }

    /// Create an array value
    pub fn array(arr: Arc<JsArray>) -> Self {
        Self::Array(arr)
    }

    /// Create a buffer value
    pub fn buffer(buf: Arc<JsBuffer>) -> Self {
        Self::Buffer(buf)
    }

    /// Check if the value is undefined
    #[inline]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Check if the value is null
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if the value is null or undefined
    #[inline]
    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    /// Check if the value is a boolean
    #[inline]
    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Boolean(_))
    }

    /// Check if the value is a number (int32 or double)
    #[inline]
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int32(_) | Self::Number(_))
    }

    /// Check if the value is a big integer
    #[inline]
    pub fn is_bigint(&self) -> bool {
        matches!(self, Self::BigInt(_))
    }

    /// Check if the value is a string
    #[inline]
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// Check if the value is an array
    #[inline]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Check if the value is a buffer
    #[inline]
    pub fn is_buffer(&self) -> bool {
        matches!(self, Self::Buffer(_))
    }

    /// Get as boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as 32-bit integer
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Self::Int32(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as number (f64), widening int32
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Int32(n) => Some(*n as f64),
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as big integer
    pub fn as_bigint(&self) -> Option<i128> {
        match self {
            Self::BigInt(n) => Some(*n),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_string(&self) -> Option<&Arc<JsString>> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as array
    pub fn as_array(&self) -> Option<&Arc<JsArray>> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as buffer
    pub fn as_buffer(&self) -> Option<&Arc<JsBuffer>> {
        match self {
            Self::Buffer(b) => Some(b),
            _ => None,
        }
    }

    /// Get the type name (for diagnostics)
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Int32(_) | Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Buffer(_) => "buffer",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Undefined
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Int32(n) => write!(f, "{}", n),
            Self::Number(n) => write!(f, "{}", n),
            Self::BigInt(n) => write!(f, "{}n", n),
            Self::String(s) => write!(f, "{:?}", s.as_str()),
            Self::Array(a) => write!(f, "[array; {}]", a.len()),
            Self::Buffer(b) => write!(f, "[buffer; {}]", b.byte_length()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            // NaN != NaN per IEEE 754; int32 and double compare numerically
            _ if self.is_number() && other.is_number() => self.as_number() == other.as_number(),
            // Heap objects compare by identity
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Buffer(a), Self::Buffer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_null() {
        assert!(Value::undefined().is_undefined());
        assert!(Value::null().is_nullish());
        assert_eq!(Value::undefined().type_of(), "undefined");
    }

    #[test]
    fn test_number_collapses_to_int32() {
        assert_eq!(Value::number(42.0).as_int32(), Some(42));
        assert_eq!(Value::number(3.5).as_int32(), None);
        assert_eq!(Value::number(3.5).as_number(), Some(3.5));
        // -0.0 must stay a double
        assert!(matches!(Value::number(-0.0), Value::Number(_)));
        assert!(matches!(Value::number(0.0), Value::Int32(0)));
    }

    #[test]
    fn test_nan_not_equal() {
        let a = Value::number(f64::NAN);
        let b = Value::number(f64::NAN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_string_equality_by_content() {
        let a = Value::string(Arc::new(JsString::new("hi")));
        let b = Value::string(Arc::new(JsString::new("hi")));
        assert_eq!(a, b);
    }

    #[test]
    fn test_array_identity() {
        let arr = Arc::new(JsArray::with_capacity(0));
        let a = Value::array(arr.clone());
        let b = Value::array(arr);
        let c = Value::array(Arc::new(JsArray::with_capacity(0)));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
