//! Argument binding
//!
//! A `NativeBinding` validates and normalizes an engine call frame into typed
//! native arguments with a single left-to-right cursor walk. Injected
//! parameters (context, frame, this-value) consume no cursor position. The
//! first validation failure stops the walk and reports which parameter was
//! expected at which index.

use crate::effect::CallEffects;
use dashmap::DashMap;
use marten_vm_core::{
    EngineContext, EngineError, EngineResult, JsArray, JsBuffer, JsString, Value,
};
use smallvec::SmallVec;
use std::sync::Arc;

/// Parameter shape expected at one position
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamSpec {
    /// Injected: the engine context (consumes no argument)
    Context,
    /// Injected: the whole call frame (consumes no argument)
    Frame,
    /// Injected: the call's this-value (consumes no argument)
    This,
    /// A boolean argument
    Bool,
    /// A 32-bit signed integer argument
    Int32,
    /// A 32-bit unsigned integer argument
    Uint32,
    /// A double argument
    Float64,
    /// An engine string argument
    Str,
    /// A string or binary buffer, normalized to one bytes view
    StrOrBuffer,
    /// A non-detached binary buffer
    Buffer,
    /// An engine array
    Array,
    /// Any value, passed through unvalidated
    Any,
    /// Missing or nullish binds as `Absent` instead of failing
    Optional(Box<ParamSpec>),
}

impl ParamSpec {
    fn is_injected(&self) -> bool {
        matches!(self, ParamSpec::Context | ParamSpec::Frame | ParamSpec::This)
    }

    /// Human-readable description used in binding failures
    pub fn describe(&self) -> String {
        match self {
            ParamSpec::Context => "context".into(),
            ParamSpec::Frame => "frame".into(),
            ParamSpec::This => "this".into(),
            ParamSpec::Bool => "boolean".into(),
            ParamSpec::Int32 => "int32".into(),
            ParamSpec::Uint32 => "uint32".into(),
            ParamSpec::Float64 => "number".into(),
            ParamSpec::Str => "string".into(),
            ParamSpec::StrOrBuffer => "string or buffer".into(),
            ParamSpec::Buffer => "buffer".into(),
            ParamSpec::Array => "array".into(),
            ParamSpec::Any => "any value".into(),
            ParamSpec::Optional(inner) => format!("optional {}", inner.describe()),
        }
    }
}

/// One engine-side call: receiver plus positional arguments
#[derive(Debug, Clone, Default)]
pub struct CallFrame {
    /// The call's this-value
    pub this: Value,
    /// Positional arguments
    pub args: Vec<Value>,
}

impl CallFrame {
    /// A frame with an undefined receiver
    pub fn of(args: Vec<Value>) -> Self {
        Self {
            this: Value::undefined(),
            args,
        }
    }
}

/// A bound argument in its normalized native representation
#[derive(Debug, Clone)]
pub enum BoundArg {
    /// Marker for an injected context parameter
    Context,
    /// The injected call frame
    Frame(CallFrame),
    /// The injected this-value
    This(Value),
    /// A bound boolean
    Bool(bool),
    /// A bound 32-bit signed integer
    Int32(i32),
    /// A bound 32-bit unsigned integer
    Uint32(u32),
    /// A bound double
    Float64(f64),
    /// A bound engine string
    Str(Arc<JsString>),
    /// String-or-buffer content normalized to bytes
    Bytes(Vec<u8>),
    /// A bound buffer object
    Buffer(Arc<JsBuffer>),
    /// A bound array object
    Array(Arc<JsArray>),
    /// An unvalidated value
    Any(Value),
    /// An optional parameter that was missing or nullish
    Absent,
}

/// Holds values alive for the duration of a binding walk. Models the GC
/// protection a reentrant native call needs on its in-flight arguments.
#[derive(Default)]
pub struct PinScope {
    pinned: SmallVec<[Value; 8]>,
}

impl PinScope {
    /// Pin one value until the scope drops
    pub fn pin(&mut self, value: Value) {
        self.pinned.push(value);
    }

    /// Number of pinned values
    pub fn len(&self) -> usize {
        self.pinned.len()
    }

    /// True when nothing is pinned
    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }
}

type NativeFn = Box<dyn Fn(&EngineContext, &[BoundArg]) -> EngineResult<Value> + Send + Sync>;

/// A registered native function with its parameter layout and effects
pub struct NativeBinding {
    name: String,
    params: Vec<ParamSpec>,
    pin_arguments: bool,
    effects: CallEffects,
    func: NativeFn,
    fast_fn: Option<NativeFn>,
}

impl NativeBinding {
    /// A binding with conservative (top) effects and no fast path
    pub fn new(
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        func: impl Fn(&EngineContext, &[BoundArg]) -> EngineResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            pin_arguments: false,
            effects: CallEffects::top(),
            func: Box::new(func),
            fast_fn: None,
        }
    }

    /// Declare the binding's heap effects
    pub fn with_effects(mut self, effects: CallEffects) -> Self {
        self.effects = effects;
        self
    }

    /// Pin consumed argument values for the duration of binding
    pub fn with_pinned_arguments(mut self) -> Self {
        self.pin_arguments = true;
        self
    }

    /// Install a fast-path variant. It must produce results identical to the
    /// slow path for every frame the slow path accepts.
    pub fn with_fast_fn(
        mut self,
        fast_fn: impl Fn(&EngineContext, &[BoundArg]) -> EngineResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.fast_fn = Some(Box::new(fast_fn));
        self
    }

    /// Binding name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared effects
    pub fn effects(&self) -> &CallEffects {
        &self.effects
    }

    /// Bind the frame and call the native function (slow path)
    pub fn invoke(&self, ctx: &EngineContext, frame: &CallFrame) -> EngineResult<Value> {
        let bound = self.bind(frame)?;
        (self.func)(ctx, &bound)
    }

    /// Bind the frame and call the fast-path function when one is installed
    pub fn invoke_fast(&self, ctx: &EngineContext, frame: &CallFrame) -> EngineResult<Value> {
        let bound = self.bind(frame)?;
        match &self.fast_fn {
            Some(fast) => fast(ctx, &bound),
            None => (self.func)(ctx, &bound),
        }
    }

    fn bind(&self, frame: &CallFrame) -> EngineResult<SmallVec<[BoundArg; 8]>> {
        let mut scratch: SmallVec<[BoundArg; 8]> = SmallVec::new();
        let mut pins = PinScope::default();
        let mut cursor = 0usize;

        for spec in &self.params {
            if spec.is_injected() {
                scratch.push(match spec {
                    ParamSpec::Context => BoundArg::Context,
                    ParamSpec::Frame => BoundArg::Frame(frame.clone()),
                    _ => BoundArg::This(frame.this.clone()),
                });
                continue;
            }

            let arg = frame.args.get(cursor).cloned().unwrap_or_default();
            if self.pin_arguments {
                pins.pin(arg.clone());
            }
            // First mismatch wins: scratch is dropped, nothing else consumed
            scratch.push(bind_one(spec, &arg, cursor)?);
            cursor += 1;
        }
        Ok(scratch)
    }
}

fn bind_one(spec: &ParamSpec, arg: &Value, index: usize) -> EngineResult<BoundArg> {
    let fail = || EngineError::invalid_argument(spec.describe(), index);
    match spec {
        ParamSpec::Bool => arg.as_boolean().map(BoundArg::Bool).ok_or_else(fail),
        ParamSpec::Int32 => int32_of(arg).map(BoundArg::Int32).ok_or_else(fail),
        ParamSpec::Uint32 => uint32_of(arg).map(BoundArg::Uint32).ok_or_else(fail),
        ParamSpec::Float64 => match arg {
            Value::Int32(n) => Ok(BoundArg::Float64(f64::from(*n))),
            Value::Number(n) => Ok(BoundArg::Float64(*n)),
            _ => Err(fail()),
        },
        ParamSpec::Str => arg
            .as_string()
            .map(|s| BoundArg::Str(Arc::clone(s)))
            .ok_or_else(fail),
        ParamSpec::StrOrBuffer => {
            if let Some(s) = arg.as_string() {
                Ok(BoundArg::Bytes(s.as_str().as_bytes().to_vec()))
            } else if let Some(buf) = arg.as_buffer() {
                if buf.is_detached() {
                    return Err(fail());
                }
                Ok(BoundArg::Bytes(buf.as_slice().to_vec()))
            } else {
                Err(fail())
            }
        }
        ParamSpec::Buffer => {
            let buf = arg.as_buffer().ok_or_else(fail)?;
            if buf.is_detached() {
                return Err(fail());
            }
            Ok(BoundArg::Buffer(Arc::clone(buf)))
        }
        ParamSpec::Array => arg
            .as_array()
            .map(|a| BoundArg::Array(Arc::clone(a)))
            .ok_or_else(fail),
        ParamSpec::Any => Ok(BoundArg::Any(arg.clone())),
        ParamSpec::Optional(inner) => {
            if arg.is_undefined() || arg.is_null() {
                Ok(BoundArg::Absent)
            } else {
                bind_one(inner, arg, index)
            }
        }
        ParamSpec::Context | ParamSpec::Frame | ParamSpec::This => {
            Err(EngineError::internal("injected parameter in cursor walk"))
        }
    }
}

/// Mirrors `u32::from_engine`: the full uint32 domain, including values the
/// engine stores as doubles because they exceed the int32 range
fn uint32_of(arg: &Value) -> Option<u32> {
    match arg {
        Value::Int32(n) => u32::try_from(*n).ok(),
        Value::Number(n) if n.fract() == 0.0 && *n >= 0.0 && *n < 4_294_967_296.0 => {
            Some(*n as u32)
        }
        Value::BigInt(n) => u32::try_from(*n).ok(),
        _ => None,
    }
}

fn int32_of(arg: &Value) -> Option<i32> {
    match arg {
        Value::Int32(n) => Some(*n),
        Value::Number(n)
            if n.fract() == 0.0 && *n >= f64::from(i32::MIN) && *n <= f64::from(i32::MAX) =>
        {
            Some(*n as i32)
        }
        _ => None,
    }
}

/// Name-keyed registry of native bindings
pub struct BindingRegistry {
    bindings: DashMap<String, Arc<NativeBinding>>,
}

impl BindingRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Register a binding under its name, replacing any previous entry
    pub fn register(&self, binding: NativeBinding) {
        tracing::debug!(name = binding.name(), "registering native binding");
        self.bindings
            .insert(binding.name().to_owned(), Arc::new(binding));
    }

    /// Look up a binding by name
    pub fn get(&self, name: &str) -> Option<Arc<NativeBinding>> {
        self.bindings.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Invoke a binding through the slow path
    pub fn invoke(&self, name: &str, ctx: &EngineContext, frame: &CallFrame) -> EngineResult<Value> {
        let binding = self
            .get(name)
            .ok_or_else(|| EngineError::type_error(format!("unknown binding: {name}")))?;
        binding.invoke(ctx, frame)
    }

    /// Invoke a binding, preferring its fast path when one exists
    pub fn invoke_fast(
        &self,
        name: &str,
        ctx: &EngineContext,
        frame: &CallFrame,
    ) -> EngineResult<Value> {
        let binding = self
            .get(name)
            .ok_or_else(|| EngineError::type_error(format!("unknown binding: {name}")))?;
        binding.invoke_fast(ctx, frame)
    }

    /// Number of registered bindings
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_binding() -> NativeBinding {
        NativeBinding::new(
            "sum",
            vec![ParamSpec::Context, ParamSpec::Int32, ParamSpec::Int32],
            |_ctx, args| match (&args[1], &args[2]) {
                (BoundArg::Int32(a), BoundArg::Int32(b)) => Ok(Value::int32(a + b)),
                _ => Err(EngineError::internal("bad binding")),
            },
        )
    }

    #[test]
    fn test_injected_params_consume_no_cursor() {
        let ctx = EngineContext::test();
        let frame = CallFrame::of(vec![Value::int32(2), Value::int32(3)]);
        let result = sum_binding().invoke(&ctx, &frame).unwrap();
        assert_eq!(result, Value::int32(5));
    }

    #[test]
    fn test_first_failure_names_parameter_and_index() {
        let ctx = EngineContext::test();
        let frame = CallFrame::of(vec![Value::int32(2), Value::boolean(true)]);
        let err = sum_binding().invoke(&ctx, &frame).unwrap_err();
        match err {
            EngineError::InvalidArgument { expected, index } => {
                assert_eq!(expected, "int32");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_required_argument_fails() {
        let ctx = EngineContext::test();
        let frame = CallFrame::of(vec![Value::int32(2)]);
        let err = sum_binding().invoke(&ctx, &frame).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { index: 1, .. }));
    }

    #[test]
    fn test_uint32_binds_full_domain() {
        use crate::convert::ToEngine;

        let ctx = EngineContext::test();
        let binding = NativeBinding::new(
            "ident",
            vec![ParamSpec::Uint32],
            |_ctx, args| match &args[0] {
                BoundArg::Uint32(n) => Ok(Value::number(f64::from(*n))),
                _ => Err(EngineError::internal("bad binding")),
            },
        );

        // Values above i32::MAX arrive from the converter as doubles and
        // must still bind
        for n in [0u32, 7, i32::MAX as u32, i32::MAX as u32 + 1, u32::MAX] {
            let arg = n.to_engine(&ctx).unwrap();
            let result = binding.invoke(&ctx, &CallFrame::of(vec![arg])).unwrap();
            assert_eq!(result, Value::number(f64::from(n)));
        }

        // Out of domain: negative, fractional, one past the top
        for arg in [
            Value::int32(-1),
            Value::number(1.5),
            Value::number(4_294_967_296.0),
        ] {
            let err = binding.invoke(&ctx, &CallFrame::of(vec![arg])).unwrap_err();
            assert!(matches!(err, EngineError::InvalidArgument { index: 0, .. }));
        }
    }

    #[test]
    fn test_optional_binds_absent_on_nullish() {
        let ctx = EngineContext::test();
        let binding = NativeBinding::new(
            "maybe",
            vec![ParamSpec::Optional(Box::new(ParamSpec::Str))],
            |_ctx, args| Ok(Value::boolean(matches!(args[0], BoundArg::Absent))),
        );
        let absent = binding.invoke(&ctx, &CallFrame::of(vec![])).unwrap();
        assert_eq!(absent, Value::boolean(true));
        let absent = binding.invoke(&ctx, &CallFrame::of(vec![Value::null()])).unwrap();
        assert_eq!(absent, Value::boolean(true));

        let s = ctx.new_string("present").unwrap();
        let present = binding.invoke(&ctx, &CallFrame::of(vec![s])).unwrap();
        assert_eq!(present, Value::boolean(false));

        // Present but wrong shape still fails
        let err = binding
            .invoke(&ctx, &CallFrame::of(vec![Value::int32(1)]))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { index: 0, .. }));
    }

    #[test]
    fn test_str_or_buffer_normalizes_to_bytes() {
        let ctx = EngineContext::test();
        let binding = NativeBinding::new(
            "bytes_len",
            vec![ParamSpec::StrOrBuffer],
            |_ctx, args| match &args[0] {
                BoundArg::Bytes(b) => Ok(Value::int32(b.len() as i32)),
                _ => Err(EngineError::internal("bad binding")),
            },
        );
        let s = ctx.new_string("abc").unwrap();
        assert_eq!(binding.invoke(&ctx, &CallFrame::of(vec![s])).unwrap(), Value::int32(3));

        let buf = Value::buffer(Arc::new(JsBuffer::from_vec(vec![1, 2, 3, 4])));
        assert_eq!(
            binding.invoke(&ctx, &CallFrame::of(vec![buf])).unwrap(),
            Value::int32(4)
        );
    }

    #[test]
    fn test_detached_buffer_rejected() {
        let ctx = EngineContext::test();
        let binding = NativeBinding::new("take", vec![ParamSpec::Buffer], |_ctx, _args| {
            Ok(Value::undefined())
        });
        let buf = Arc::new(JsBuffer::from_vec(vec![1]));
        buf.detach();
        let err = binding
            .invoke(&ctx, &CallFrame::of(vec![Value::buffer(buf)]))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument { index: 0, .. }));
    }

    #[test]
    fn test_registry_fast_and_slow_paths_agree() {
        let ctx = EngineContext::test();
        let registry = BindingRegistry::new();
        registry.register(
            NativeBinding::new(
                "double",
                vec![ParamSpec::Int32],
                |_ctx, args| match &args[0] {
                    BoundArg::Int32(n) => Ok(Value::int32(n * 2)),
                    _ => Err(EngineError::internal("bad binding")),
                },
            )
            .with_effects(CallEffects::pure())
            .with_fast_fn(|_ctx, args| match &args[0] {
                BoundArg::Int32(n) => Ok(Value::int32(n << 1)),
                _ => Err(EngineError::internal("bad binding")),
            }),
        );

        for n in [-5, 0, 3, 1000] {
            let frame = CallFrame::of(vec![Value::int32(n)]);
            let slow = registry.invoke("double", &ctx, &frame).unwrap();
            let fast = registry.invoke_fast("double", &ctx, &frame).unwrap();
            assert_eq!(slow, fast);
        }
    }

    #[test]
    fn test_unknown_binding() {
        let ctx = EngineContext::test();
        let registry = BindingRegistry::new();
        assert!(registry.invoke("missing", &ctx, &CallFrame::default()).is_err());
    }
}
