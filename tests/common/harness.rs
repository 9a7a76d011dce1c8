//! Test harness: a fully wired service with observable collaborators.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use extscript::clock::ManualClock;
use extscript::config::EngineConfig;
use extscript::connectors::HostCallError;
use extscript::connectors::http::{HttpClient, HttpRequest, HttpResponse};
use extscript::host::{ScriptLogContext, ScriptLogLevel, ScriptLogger};
use extscript::model::{Payload, ScopePath};
use extscript::store::InMemoryScriptStore;
use extscript::{ExtensionService, ServiceComponents};

/// One `log.*` call made by a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedLine {
    pub level: ScriptLogLevel,
    pub script: String,
    pub scope: String,
    pub event: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct RecordingLogger {
    lines: Mutex<Vec<LoggedLine>>,
}

impl RecordingLogger {
    pub fn lines(&self) -> Vec<LoggedLine> {
        self.lines.lock().expect("lock").clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.lines().into_iter().map(|line| line.message).collect()
    }
}

impl ScriptLogger for RecordingLogger {
    fn log(&self, level: ScriptLogLevel, context: &ScriptLogContext, message: &str) {
        self.lines.lock().expect("lock").push(LoggedLine {
            level,
            script: context.script.clone(),
            scope: context.scope.clone(),
            event: context.event.clone(),
            message: message.to_string(),
        });
    }
}

/// Answers every request with a fixed body and records what was asked.
#[derive(Debug, Default)]
pub struct StubHttpClient {
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubHttpClient {
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().expect("lock").clone()
    }
}

impl HttpClient for StubHttpClient {
    fn execute(&self, request: &HttpRequest, _save_to_file: bool) -> Result<HttpResponse, HostCallError> {
        self.requests.lock().expect("lock").push(request.clone());
        Ok(HttpResponse {
            status: 200,
            successful: true,
            headers: Default::default(),
            body: Some(r#"{"ok":true}"#.to_string()),
            temp_file_path: None,
            size_bytes: 11,
            duration_ms: 1,
        })
    }
}

pub struct TestHarness {
    pub service: ExtensionService,
    pub store: Arc<InMemoryScriptStore>,
    pub logger: Arc<RecordingLogger>,
    pub http: Arc<StubHttpClient>,
    pub clock: Arc<ManualClock>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(&EngineConfig::default())
    }

    pub fn with_config(config: &EngineConfig) -> Self {
        let store = Arc::new(InMemoryScriptStore::new());
        let logger = Arc::new(RecordingLogger::default());
        let http = Arc::new(StubHttpClient::default());
        let clock = Arc::new(ManualClock::new(1_000));
        let service = ExtensionService::new(
            config,
            ServiceComponents {
                store: store.clone(),
                logger: logger.clone(),
                http: http.clone(),
                clock: clock.clone(),
            },
        );
        Self {
            service,
            store,
            logger,
            http,
            clock,
        }
    }
}

pub fn scope(raw: &str) -> ScopePath {
    ScopePath::parse(raw).expect("scope path")
}

pub fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("payload must be an object, got {other}"),
    }
}

/// Poll until `condition` holds or ten seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
