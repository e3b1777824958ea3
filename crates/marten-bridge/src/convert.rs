//! Generic value conversion
//!
//! `ToEngine` and `FromEngine` form a closed, compile-time-dispatched
//! conversion surface between native types and engine values. There is no
//! dynamic fallback: a shape without an impl fails to build, and a runtime
//! mismatch on the way out is a `TypeError`, never a coercion.

use crate::string::RefString;
use marten_vm_core::{EngineContext, EngineError, EngineResult, Value};

/// Conversion of a native value into an engine value
pub trait ToEngine {
    /// Convert, booking any engine cells through `ctx`
    fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value>;
}

/// Conversion of an engine value back into a native value
pub trait FromEngine: Sized {
    /// Convert, failing with `TypeError` on shape mismatch
    fn from_engine(value: &Value, ctx: &EngineContext) -> EngineResult<Self>;
}

impl ToEngine for Value {
    fn to_engine(self, _ctx: &EngineContext) -> EngineResult<Value> {
        Ok(self)
    }
}

impl ToEngine for bool {
    fn to_engine(self, _ctx: &EngineContext) -> EngineResult<Value> {
        Ok(Value::boolean(self))
    }
}

impl ToEngine for i32 {
    fn to_engine(self, _ctx: &EngineContext) -> EngineResult<Value> {
        Ok(Value::int32(self))
    }
}

impl ToEngine for u32 {
    fn to_engine(self, _ctx: &EngineContext) -> EngineResult<Value> {
        match i32::try_from(self) {
            Ok(n) => Ok(Value::int32(n)),
            Err(_) => Ok(Value::number(f64::from(self))),
        }
    }
}

impl ToEngine for f64 {
    fn to_engine(self, _ctx: &EngineContext) -> EngineResult<Value> {
        Ok(Value::number(self))
    }
}

impl ToEngine for i64 {
    fn to_engine(self, _ctx: &EngineContext) -> EngineResult<Value> {
        if let Ok(n) = i32::try_from(self) {
            return Ok(Value::int32(n));
        }
        let approx = self as f64;
        // i128 comparison avoids the saturating-cast false positive at i64::MAX
        if approx as i128 == i128::from(self) {
            Ok(Value::number(approx))
        } else {
            Ok(Value::bigint(i128::from(self)))
        }
    }
}

impl ToEngine for u64 {
    fn to_engine(self, _ctx: &EngineContext) -> EngineResult<Value> {
        if let Ok(n) = i32::try_from(self) {
            return Ok(Value::int32(n));
        }
        let approx = self as f64;
        if approx as u128 == u128::from(self) {
            Ok(Value::number(approx))
        } else {
            Ok(Value::bigint(i128::from(self)))
        }
    }
}

impl ToEngine for &str {
    fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
        ctx.new_string(self)
    }
}

impl ToEngine for String {
    fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
        ctx.new_string(&self)
    }
}

impl ToEngine for &[u8] {
    fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
        ctx.new_string(&String::from_utf8_lossy(self))
    }
}

impl ToEngine for &std::ffi::CStr {
    fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
        ctx.new_string(&String::from_utf8_lossy(self.to_bytes()))
    }
}

/// Byte payload that converts as a (lossy) UTF-8 engine string.
///
/// `Vec<u8>` has no `ToEngine` impl on purpose: strings-from-bytes is a
/// deliberate choice, so callers opt in with this newtype or a `&[u8]` view.
pub struct ByteString(pub Vec<u8>);

impl ToEngine for ByteString {
    fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
        ctx.new_string(&String::from_utf8_lossy(&self.0))
    }
}

impl<T: ToEngine> ToEngine for Option<T> {
    fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
        match self {
            Some(inner) => inner.to_engine(ctx),
            None => Ok(Value::null()),
        }
    }
}

impl<T: ToEngine + Clone> ToEngine for &T {
    fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
        T::clone(self).to_engine(ctx)
    }
}

impl ToEngine for Vec<RefString> {
    fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
        // The converter owns the handles: each logical reference is released
        // whether or not the array materializes
        let array = match ctx.new_array(self.len()) {
            Ok(array) => array,
            Err(err) => {
                for handle in &self {
                    handle.deref_();
                }
                return Err(err);
            }
        };
        for (i, handle) in self.iter().enumerate() {
            array.set(i, handle.to_value());
        }
        for handle in &self {
            handle.deref_();
        }
        Ok(Value::array(array))
    }
}

macro_rules! numeric_sequence_to_engine {
    ($($elem:ty),*) => {
        $(
            impl ToEngine for Vec<$elem> {
                fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
                    self.as_slice().to_engine(ctx)
                }
            }

            impl ToEngine for &[$elem] {
                fn to_engine(self, ctx: &EngineContext) -> EngineResult<Value> {
                    let array = ctx.new_array(self.len())?;
                    for (i, &elem) in self.iter().enumerate() {
                        array.set(i, elem.to_engine(ctx)?);
                    }
                    Ok(Value::array(array))
                }
            }
        )*
    };
}

numeric_sequence_to_engine!(i32, u32, i64, f64);

/// Convert an arbitrary sequence element by element. The first element
/// failure aborts the whole conversion; no partially-converted array escapes.
pub fn sequence_to_engine<I>(items: I, ctx: &EngineContext) -> EngineResult<Value>
where
    I: IntoIterator,
    I::Item: ToEngine,
    I::IntoIter: ExactSizeIterator,
{
    let iter = items.into_iter();
    let array = ctx.new_array(iter.len())?;
    for (i, item) in iter.enumerate() {
        array.set(i, item.to_engine(ctx)?);
    }
    Ok(Value::array(array))
}

/// Enums that cross the boundary as their ordinal
pub trait OrdinalEnum {
    /// The variant's ordinal. Ordinals wider than `u32` are not supported.
    fn ordinal(&self) -> u32;
}

/// Convert an enum variant to its ordinal engine value
pub fn ordinal_to_engine<E: OrdinalEnum>(value: &E, ctx: &EngineContext) -> EngineResult<Value> {
    value.ordinal().to_engine(ctx)
}

fn type_mismatch(expected: &str, value: &Value) -> EngineError {
    EngineError::type_error(format!("expected {expected}, got {}", value.type_of()))
}

impl FromEngine for Value {
    fn from_engine(value: &Value, _ctx: &EngineContext) -> EngineResult<Self> {
        Ok(value.clone())
    }
}

impl FromEngine for bool {
    fn from_engine(value: &Value, _ctx: &EngineContext) -> EngineResult<Self> {
        value
            .as_boolean()
            .ok_or_else(|| type_mismatch("boolean", value))
    }
}

impl FromEngine for i32 {
    fn from_engine(value: &Value, _ctx: &EngineContext) -> EngineResult<Self> {
        match value {
            Value::Int32(n) => Ok(*n),
            Value::Number(n) if n.fract() == 0.0 && *n >= f64::from(i32::MIN) && *n <= f64::from(i32::MAX) => {
                Ok(*n as i32)
            }
            _ => Err(type_mismatch("int32", value)),
        }
    }
}

impl FromEngine for u32 {
    fn from_engine(value: &Value, ctx: &EngineContext) -> EngineResult<Self> {
        let wide = i64::from_engine(value, ctx).map_err(|_| type_mismatch("uint32", value))?;
        u32::try_from(wide).map_err(|_| type_mismatch("uint32", value))
    }
}

impl FromEngine for i64 {
    fn from_engine(value: &Value, _ctx: &EngineContext) -> EngineResult<Self> {
        match value {
            Value::Int32(n) => Ok(i64::from(*n)),
            Value::Number(n) if n.fract() == 0.0 && n.abs() <= 9_007_199_254_740_992.0 => {
                Ok(*n as i64)
            }
            Value::BigInt(n) => {
                i64::try_from(*n).map_err(|_| type_mismatch("int64", value))
            }
            _ => Err(type_mismatch("int64", value)),
        }
    }
}

impl FromEngine for f64 {
    fn from_engine(value: &Value, _ctx: &EngineContext) -> EngineResult<Self> {
        match value {
            Value::Int32(n) => Ok(f64::from(*n)),
            Value::Number(n) => Ok(*n),
            _ => Err(type_mismatch("number", value)),
        }
    }
}

impl FromEngine for String {
    fn from_engine(value: &Value, _ctx: &EngineContext) -> EngineResult<Self> {
        value
            .as_string()
            .map(|s| s.as_str().to_owned())
            .ok_or_else(|| type_mismatch("string", value))
    }
}

impl FromEngine for Vec<u8> {
    fn from_engine(value: &Value, _ctx: &EngineContext) -> EngineResult<Self> {
        let buf = value
            .as_buffer()
            .ok_or_else(|| type_mismatch("buffer", value))?;
        if buf.is_detached() {
            return Err(EngineError::type_error("buffer is detached"));
        }
        Ok(buf.as_slice().to_vec())
    }
}

impl<T: FromEngine> FromEngine for Option<T> {
    fn from_engine(value: &Value, ctx: &EngineContext) -> EngineResult<Self> {
        if value.is_undefined() || value.is_null() {
            return Ok(None);
        }
        T::from_engine(value, ctx).map(Some)
    }
}

impl<T: FromEngine> FromEngine for Vec<T> {
    fn from_engine(value: &Value, ctx: &EngineContext) -> EngineResult<Self> {
        let array = value
            .as_array()
            .ok_or_else(|| type_mismatch("array", value))?;
        let elements = array.to_vec();
        let mut out = Vec::with_capacity(elements.len());
        for elem in &elements {
            out.push(T::from_engine(elem, ctx)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_integers_stay_narrow() {
        let ctx = EngineContext::test();
        assert_eq!(42i64.to_engine(&ctx).unwrap(), Value::int32(42));
        assert_eq!(7u64.to_engine(&ctx).unwrap(), Value::int32(7));
        assert_eq!(u32::MAX.to_engine(&ctx).unwrap(), Value::number(4294967295.0));
    }

    #[test]
    fn test_wide_integers_never_lose_precision() {
        let ctx = EngineContext::test();
        // Exactly representable in f64
        let exact = 1i64 << 53;
        assert_eq!(exact.to_engine(&ctx).unwrap(), Value::number(exact as f64));
        // Not representable: falls to BigInt, never a rounded Number
        let inexact = (1i64 << 53) + 1;
        assert_eq!(
            inexact.to_engine(&ctx).unwrap(),
            Value::bigint(i128::from(inexact))
        );
        assert_eq!(
            u64::MAX.to_engine(&ctx).unwrap(),
            Value::bigint(i128::from(u64::MAX))
        );
    }

    #[test]
    fn test_option_maps_none_to_null() {
        let ctx = EngineContext::test();
        assert_eq!(None::<i32>.to_engine(&ctx).unwrap(), Value::null());
        assert_eq!(Some(5i32).to_engine(&ctx).unwrap(), Value::int32(5));
    }

    #[test]
    fn test_bytes_convert_lossy() {
        let ctx = EngineContext::test();
        let v = ByteString(vec![0x68, 0x69, 0xFF]).to_engine(&ctx).unwrap();
        assert_eq!(v.as_string().unwrap().as_str(), "hi\u{FFFD}");

        // Terminated byte strings convert without their terminator
        let v = c"hi".to_engine(&ctx).unwrap();
        assert_eq!(v.as_string().unwrap().as_str(), "hi");
    }

    #[test]
    fn test_refstring_vec_releases_handles() {
        let ctx = EngineContext::test();
        let a = RefString::new("one");
        let b = RefString::new("two");
        a.ref_();
        b.ref_();
        let v = vec![a.clone(), b.clone()].to_engine(&ctx).unwrap();
        let array = v.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array.get(0).unwrap().as_string().unwrap().as_str(), "one");
        // Converter consumed one reference per handle
        assert_eq!(a.ref_count(), 1);
        assert_eq!(b.ref_count(), 1);
    }

    #[test]
    fn test_refstring_vec_releases_handles_on_failure() {
        use marten_vm_core::MemoryManager;
        use std::sync::Arc;

        // Too small for even the array cell, so conversion fails immediately
        let ctx = EngineContext::new(Arc::new(MemoryManager::new(8)));
        let a = RefString::new("kept");
        a.ref_();
        assert!(vec![a.clone()].to_engine(&ctx).is_err());
        // The consumed reference was still released
        assert_eq!(a.ref_count(), 1);
    }

    #[test]
    fn test_sequence_aborts_on_element_failure() {
        use marten_vm_core::MemoryManager;
        use std::sync::Arc;
        // Enough budget for the array cell but not for the second string
        let ctx = EngineContext::new(Arc::new(MemoryManager::new(200)));
        let items = vec!["ok", "this string is far too large to book against the remaining budget because it is quite long indeed and exceeds what is left over after the array allocation took its share of the configured limit"];
        assert!(sequence_to_engine(items, &ctx).is_err());
    }

    #[test]
    fn test_ordinal_enum() {
        enum Mode {
            Read,
            Write,
        }
        impl OrdinalEnum for Mode {
            fn ordinal(&self) -> u32 {
                match self {
                    Mode::Read => 0,
                    Mode::Write => 1,
                }
            }
        }
        let ctx = EngineContext::test();
        assert_eq!(ordinal_to_engine(&Mode::Read, &ctx).unwrap(), Value::int32(0));
        assert_eq!(ordinal_to_engine(&Mode::Write, &ctx).unwrap(), Value::int32(1));
    }

    #[test]
    fn test_from_engine_rejects_mismatch() {
        let ctx = EngineContext::test();
        let err = i32::from_engine(&Value::boolean(true), &ctx).unwrap_err();
        assert!(err.to_string().contains("expected int32"));
        assert!(bool::from_engine(&Value::number(1.5), &ctx).is_err());
    }

    #[test]
    fn test_round_trip_vectors() {
        let ctx = EngineContext::test();
        let original = vec![1i32, -2, 3];
        let v = original.clone().to_engine(&ctx).unwrap();
        let back: Vec<i32> = Vec::from_engine(&v, &ctx).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_nested_optional_round_trip() {
        let ctx = EngineContext::test();
        let back: Option<String> = Option::from_engine(&Value::null(), &ctx).unwrap();
        assert_eq!(back, None);
        let v = "text".to_engine(&ctx).unwrap();
        let back: Option<String> = Option::from_engine(&v, &ctx).unwrap();
        assert_eq!(back.as_deref(), Some("text"));
    }
}
