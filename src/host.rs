//! Host capabilities bound into every script context.
//!
//! Scripts see exactly these globals: `log`, `simpleHttpClient`, `json` and
//! `utils` (plus the per-invocation payload installed by the runtime). Each is
//! a frozen JS object built by [`HOST_PRELUDE_JS`] on top of private native
//! functions, which the prelude captures and then removes from the global
//! object.

use std::sync::Arc;

use rquickjs::Ctx;
use rquickjs::prelude::Func;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::connectors::http::{HttpClient, HttpRequest};
use crate::connectors::{HostCallError, host_result};
use crate::crypto_shim;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptLogLevel {
    Info,
    Warn,
    Error,
}

impl ScriptLogLevel {
    fn parse(raw: &str) -> Self {
        match raw {
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Who is logging: attached to every `log.*` call from a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptLogContext {
    pub script: String,
    pub scope: String,
    pub event: String,
}

/// Sink for script `log.info/warn/error` calls.
pub trait ScriptLogger: Send + Sync {
    fn log(&self, level: ScriptLogLevel, context: &ScriptLogContext, message: &str);
}

/// Forwards script logs to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingScriptLogger;

impl ScriptLogger for TracingScriptLogger {
    fn log(&self, level: ScriptLogLevel, context: &ScriptLogContext, message: &str) {
        match level {
            ScriptLogLevel::Info => info!(
                event = "script.log",
                script = %context.script,
                scope = %context.scope,
                extension_event = %context.event,
                "{message}"
            ),
            ScriptLogLevel::Warn => warn!(
                event = "script.log",
                script = %context.script,
                scope = %context.scope,
                extension_event = %context.event,
                "{message}"
            ),
            ScriptLogLevel::Error => error!(
                event = "script.log",
                script = %context.script,
                scope = %context.scope,
                extension_event = %context.event,
                "{message}"
            ),
        }
    }
}

/// The capability implementations shared by every invocation.
#[derive(Clone)]
pub struct HostBindings {
    logger: Arc<dyn ScriptLogger>,
    http: Arc<dyn HttpClient>,
}

impl HostBindings {
    pub fn new(logger: Arc<dyn ScriptLogger>, http: Arc<dyn HttpClient>) -> Self {
        Self { logger, http }
    }

    pub fn logger(&self) -> &Arc<dyn ScriptLogger> {
        &self.logger
    }

    /// Install natives and evaluate the prelude in a fresh context.
    pub fn install(&self, ctx: &Ctx<'_>, log_context: &ScriptLogContext) -> rquickjs::Result<()> {
        let global = ctx.globals();

        let logger = Arc::clone(&self.logger);
        let context = log_context.clone();
        global.set(
            "__extscript_log_native",
            Func::from(move |level: String, message: String| {
                logger.log(ScriptLogLevel::parse(&level), &context, &message);
            }),
        )?;

        global.set(
            "__extscript_json_stringify_native",
            Func::from(|text: String, pretty: bool| -> String {
                host_result(json_stringify(&text, pretty).map(Value::String))
            }),
        )?;
        global.set(
            "__extscript_json_parse_native",
            Func::from(|text: String| -> String { host_result(json_parse(&text)) }),
        )?;

        let http = Arc::clone(&self.http);
        global.set(
            "__extscript_http_native",
            Func::from(move |request: String, save_to_file: bool| -> String {
                host_result(http_call(http.as_ref(), &request, save_to_file))
            }),
        )?;

        crypto_shim::register_utility_hostcalls(&global)?;
        ctx.eval::<(), _>(HOST_PRELUDE_JS)
    }
}

fn json_stringify(text: &str, pretty: bool) -> Result<String, HostCallError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| HostCallError::invalid_request(format!("json.stringify: {e}")))?;
    let rendered = if pretty {
        serde_json::to_string_pretty(&value)
    } else {
        serde_json::to_string(&value)
    };
    rendered.map_err(|e| HostCallError::invalid_request(format!("json.stringify: {e}")))
}

fn json_parse(text: &str) -> Result<Value, HostCallError> {
    serde_json::from_str(text).map_err(|e| HostCallError::invalid_request(format!("json.parse: {e}")))
}

fn http_call(
    client: &dyn HttpClient,
    raw_request: &str,
    save_to_file: bool,
) -> Result<Value, HostCallError> {
    let request: HttpRequest = serde_json::from_str(raw_request).map_err(|e| {
        HostCallError::invalid_request(format!("Invalid HTTP request params: {e}"))
    })?;
    let response = client.execute(&request, save_to_file)?;
    serde_json::to_value(&response).map_err(|e| {
        HostCallError::new(
            crate::connectors::HostCallErrorCode::Internal,
            format!("HTTP response serialization failed: {e}"),
        )
    })
}

/// Builds the script-facing capability objects from the private natives.
pub const HOST_PRELUDE_JS: &str = r"
(function (global) {
  'use strict';
  const natives = {
    log: global.__extscript_log_native,
    jsonStringify: global.__extscript_json_stringify_native,
    jsonParse: global.__extscript_json_parse_native,
    http: global.__extscript_http_native,
    md5: global.__extscript_md5_native,
    hmacSha256: global.__extscript_hmac_sha256_native,
    base64Url: global.__extscript_base64url_native,
    formatDateTime: global.__extscript_format_datetime_native,
  };
  delete global.__extscript_log_native;
  delete global.__extscript_json_stringify_native;
  delete global.__extscript_json_parse_native;
  delete global.__extscript_http_native;
  delete global.__extscript_md5_native;
  delete global.__extscript_hmac_sha256_native;
  delete global.__extscript_base64url_native;
  delete global.__extscript_format_datetime_native;

  function unwrap(raw) {
    const result = JSON.parse(raw);
    if (!result.ok) {
      const err = new Error(result.message);
      err.code = result.code;
      throw err;
    }
    return result.value;
  }

  function render(args) {
    return Array.prototype.map.call(args, function (arg) {
      if (typeof arg === 'string') return arg;
      if (arg instanceof Error) return arg.name + ': ' + arg.message;
      try {
        const text = JSON.stringify(arg);
        return text === undefined ? String(arg) : text;
      } catch (e) {
        return String(arg);
      }
    }).join(' ');
  }

  global.log = Object.freeze({
    info: function () { natives.log('info', render(arguments)); },
    warn: function () { natives.log('warn', render(arguments)); },
    error: function () { natives.log('error', render(arguments)); },
  });

  global.json = Object.freeze({
    stringify: function (value, pretty) {
      const text = JSON.stringify(value === undefined ? null : value);
      return unwrap(natives.jsonStringify(text, !!pretty));
    },
    parse: function (text) {
      return unwrap(natives.jsonParse(String(text)));
    },
  });

  function send(method, url, headers, body, saveToFile) {
    const request = { method: method, url: String(url), headers: headers || {} };
    if (body !== undefined) request.body = body;
    return unwrap(natives.http(JSON.stringify(request), !!saveToFile));
  }

  function payload(body) {
    if (body === undefined || body === null) return undefined;
    if (typeof body === 'string') return { type: 'text', value: body };
    return { type: 'json', value: body };
  }

  global.simpleHttpClient = Object.freeze({
    get: function (url, headers) { return send('GET', url, headers); },
    head: function (url, headers) { return send('HEAD', url, headers); },
    delete: function (url, headers) { return send('DELETE', url, headers); },
    post: function (url, headers, body) { return send('POST', url, headers, payload(body)); },
    put: function (url, headers, body) { return send('PUT', url, headers, payload(body)); },
    patch: function (url, headers, body) { return send('PATCH', url, headers, payload(body)); },
    postJSON: function (url, headers, body) {
      return send('POST', url, headers, { type: 'json', value: body === undefined ? null : body });
    },
    postForm: function (url, headers, fields) {
      return send('POST', url, headers, { type: 'form', value: fields || {} });
    },
    postMultipart: function (url, headers, parts) {
      return send('POST', url, headers, { type: 'multipart', value: parts || [] });
    },
    postFileAndSaveResponse: function (url, headers, parts) {
      return send('POST', url, headers, { type: 'multipart', value: parts || [] }, true);
    },
    getAndSaveResponse: function (url, headers) {
      return send('GET', url, headers, undefined, true);
    },
  });

  global.utils = Object.freeze({
    md5: function (text) { return natives.md5(String(text)); },
    hmacSha256: function (key, text) { return natives.hmacSha256(String(key), String(text)); },
    base64UrlSafe: function (text) { return natives.base64Url(String(text)); },
    formatDateTime: function (iso, pattern, utc) {
      return unwrap(natives.formatDateTime(String(iso), String(pattern), !!utc));
    },
  });
})(globalThis);
";
