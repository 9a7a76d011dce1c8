//! QuickJS runtime for extension scripts.
//!
//! Every call builds a fresh runtime and context, installs the host
//! capabilities and the invocation's globals, evaluates the script and calls
//! one of its entry points. Nothing survives the call, so one script can never
//! observe another's state.
//!
//! ```text
//! Runtime::new ─> limits (heap, interrupt deadline)
//!   Context::full ─> host prelude ─> payload globals
//!     eval(program) ─> globals[entry](arg) ─> js_to_json(result)
//! ```

use std::time::{Duration, Instant};

use rquickjs::prelude::This;
use rquickjs::{Context, Ctx, Function, IntoJs, Object, Runtime, Value};

use crate::error::{Error, Result};
use crate::host::{HostBindings, ScriptLogContext};
use crate::model::Payload;

/// Nesting depth beyond which a returned value is treated as unconvertible.
const MAX_CONVERSION_DEPTH: usize = 64;

/// Optional per-invocation budgets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeLimits {
    pub max_execution: Option<Duration>,
    pub memory_limit_bytes: Option<usize>,
}

/// One call into a script.
#[derive(Debug, Clone, Copy)]
pub struct EntryCall<'a> {
    /// Script identity used in errors.
    pub script: &'a str,
    pub program: &'a str,
    pub entry: &'a str,
    pub globals: &'a Payload,
    pub argument: Option<&'a serde_json::Value>,
    pub log_context: &'a ScriptLogContext,
}

pub struct ScriptRuntime {
    host: HostBindings,
    limits: RuntimeLimits,
}

impl ScriptRuntime {
    pub const fn new(host: HostBindings, limits: RuntimeLimits) -> Self {
        Self { host, limits }
    }

    pub const fn host(&self) -> &HostBindings {
        &self.host
    }

    pub const fn limits(&self) -> RuntimeLimits {
        self.limits
    }

    /// Check that QuickJS accepts the source without running any of it.
    ///
    /// The source is wrapped in a function expression that is never called;
    /// callers must only pass sources the static validator accepted, so the
    /// wrapper cannot be closed early from inside the script.
    pub fn check_syntax(&self, script: &str, source: &str) -> Result<()> {
        let runtime = Runtime::new().map_err(|e| Error::compile(script, format!("QuickJS: {e}")))?;
        let context =
            Context::full(&runtime).map_err(|e| Error::compile(script, format!("QuickJS: {e}")))?;
        let wrapped = format!("(function () {{\n{source}\n}})");
        context.with(|ctx| {
            ctx.eval::<(), _>(wrapped)
                .map_err(|err| Error::compile(script, caught(&ctx, err).to_string()))
        })
    }

    /// Evaluate the program and call `entry` with the optional argument.
    pub fn call_entry(&self, call: &EntryCall<'_>) -> Result<serde_json::Value> {
        let script = call.script;
        let runtime = Runtime::new().map_err(|e| Error::runtime(script, format!("QuickJS: {e}")))?;
        if let Some(limit) = self.limits.memory_limit_bytes {
            runtime.set_memory_limit(limit);
        }
        let deadline = self.limits.max_execution.map(|budget| Instant::now() + budget);
        if let Some(deadline) = deadline {
            runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));
        }
        let context =
            Context::full(&runtime).map_err(|e| Error::runtime(script, format!("QuickJS: {e}")))?;

        let over_budget = || {
            deadline.filter(|deadline| Instant::now() >= *deadline).map(|_| {
                let budget = self.limits.max_execution.unwrap_or_default();
                Error::runtime(
                    script,
                    format!("execution exceeded time budget of {} ms", budget.as_millis()),
                )
            })
        };

        context.with(|ctx| {
            let runtime_error = |err: rquickjs::Error| {
                over_budget().unwrap_or_else(|| Error::runtime(script, caught(&ctx, err).to_string()))
            };

            self.host
                .install(&ctx, call.log_context)
                .map_err(runtime_error)?;
            let global = ctx.globals();
            for (key, value) in call.globals {
                let value = json_to_js(&ctx, value).map_err(runtime_error)?;
                global.set(key.as_str(), value).map_err(runtime_error)?;
            }

            if let Err(err) = ctx.eval::<(), _>(call.program) {
                if let Some(err) = over_budget() {
                    return Err(err);
                }
                let failure = caught(&ctx, err);
                return Err(if failure.name.as_deref() == Some("SyntaxError") {
                    Error::compile(script, failure.to_string())
                } else {
                    Error::runtime(script, failure.to_string())
                });
            }

            let function: Function = global.get(call.entry).map_err(|_| {
                Error::runtime(script, format!("'{}' is not a function", call.entry))
            })?;
            let result: Value = match call.argument {
                Some(argument) => {
                    let argument = json_to_js(&ctx, argument).map_err(runtime_error)?;
                    function.call((argument,))
                }
                None => function.call(()),
            }
            .map_err(runtime_error)?;

            js_to_json(&result, 0).map_err(|message| Error::conversion(script, message))
        })
    }
}

/// An exception pulled out of a context after a failed call.
#[derive(Debug, Clone, PartialEq, Eq)]
struct JsFailure {
    name: Option<String>,
    message: String,
}

impl std::fmt::Display for JsFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) if !name.is_empty() => write!(f, "{name}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

fn caught(ctx: &Ctx<'_>, err: rquickjs::Error) -> JsFailure {
    if !matches!(err, rquickjs::Error::Exception) {
        return JsFailure {
            name: None,
            message: format!("QuickJS: {err}"),
        };
    }
    let value = ctx.catch();
    if let Some(exception) = value.as_exception() {
        return JsFailure {
            name: exception.as_object().get::<_, String>("name").ok(),
            message: exception.message().unwrap_or_default(),
        };
    }
    let message = match js_to_json(&value, 0) {
        Ok(serde_json::Value::String(text)) => text,
        Ok(other) => other.to_string(),
        Err(_) => "uncaught exception".to_string(),
    };
    JsFailure {
        name: None,
        message,
    }
}

/// Convert a serde_json value into a QuickJS value.
pub fn json_to_js<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    match value {
        serde_json::Value::Null => Ok(Value::new_null(ctx.clone())),
        serde_json::Value::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Ok(Value::new_int(ctx.clone(), i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::new_float(ctx.clone(), f))
            } else {
                Ok(Value::new_null(ctx.clone()))
            }
        }
        serde_json::Value::String(s) => s.as_str().into_js(ctx),
        serde_json::Value::Array(arr) => {
            let js_arr = rquickjs::Array::new(ctx.clone())?;
            for (i, v) in arr.iter().enumerate() {
                let js_v = json_to_js(ctx, v)?;
                js_arr.set(i, js_v)?;
            }
            Ok(js_arr.into_value())
        }
        serde_json::Value::Object(obj) => {
            let js_obj = Object::new(ctx.clone())?;
            for (k, v) in obj {
                let js_v = json_to_js(ctx, v)?;
                js_obj.set(k.as_str(), js_v)?;
            }
            Ok(js_obj.into_value())
        }
    }
}

/// Convert a QuickJS value to JSON with `JSON.stringify` semantics:
/// `toJSON` is honoured, functions and `undefined` are dropped from objects
/// and become `null` in arrays.
pub fn js_to_json(value: &Value<'_>, depth: usize) -> std::result::Result<serde_json::Value, String> {
    if depth > MAX_CONVERSION_DEPTH {
        return Err(format!(
            "value nests deeper than {MAX_CONVERSION_DEPTH} levels (cyclic structure?)"
        ));
    }
    let js_err = |e: rquickjs::Error| format!("QuickJS: {e}");

    if value.is_null() || value.is_undefined() || value.is_function() {
        return Ok(serde_json::Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(serde_json::Value::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(serde_json::json!(i));
    }
    if let Some(f) = value.as_float() {
        return Ok(float_to_json(f));
    }
    if let Some(s) = value.as_string() {
        return s.to_string().map(serde_json::Value::String).map_err(js_err);
    }
    if let Some(arr) = value.as_array() {
        let mut result = Vec::with_capacity(arr.len());
        for i in 0..arr.len() {
            let item: Value<'_> = arr.get(i).map_err(js_err)?;
            result.push(js_to_json(&item, depth + 1)?);
        }
        return Ok(serde_json::Value::Array(result));
    }
    if let Some(obj) = value.as_object() {
        if let Ok(to_json) = obj.get::<_, Function>("toJSON") {
            let converted: Value<'_> = to_json.call((This(obj.clone()),)).map_err(js_err)?;
            return js_to_json(&converted, depth + 1);
        }
        let mut result = serde_json::Map::new();
        for item in obj.props::<String, Value<'_>>() {
            let (k, v) = item.map_err(js_err)?;
            if v.is_undefined() || v.is_function() {
                continue;
            }
            result.insert(k, js_to_json(&v, depth + 1)?);
        }
        return Ok(serde_json::Value::Object(result));
    }
    // Symbols, BigInt and other exotic values.
    Ok(serde_json::Value::Null)
}

#[allow(clippy::cast_possible_truncation)]
fn float_to_json(f: f64) -> serde_json::Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER {
        serde_json::json!(f as i64)
    } else {
        // NaN and the infinities have no JSON form and map to null.
        serde_json::json!(f)
    }
}
