//! Authoring: validation, metadata extraction, hashing, caching and deletion.

mod common;

use common::harness::{TestHarness, payload, scope};
use common::scripts::{invoice_script, script};
use extscript::Error;
use extscript::config::EngineConfig;
use extscript::extension_events::InvoiceGeneration;
use extscript::model::{ScriptDraft, content_hash};
use extscript::store::ScriptStore;
use extscript::validator::IssueKind;
use serde_json::json;

const INVOICE: &str = "INVOICE_GENERATION";

fn rejection(harness: &TestHarness, source: &str) -> extscript::validator::ValidationError {
    match harness
        .service
        .save_script(ScriptDraft::new(scope("acme"), "candidate", source))
    {
        Err(Error::Validation(err)) => err,
        Err(other) => panic!("expected a validation error, got {other}"),
        Ok(definition) => panic!("expected rejection, saved {}", definition.id()),
    }
}

#[test]
fn disallowed_constructs_are_rejected_and_nothing_is_stored() {
    let harness = TestHarness::new();
    for body in [
        "  while (true) {}",
        "  do { x(); } while (false);",
        "  with (payload) { return a; }",
        "  outer: for (var i = 0; i < 3; i++) { break outer; }",
    ] {
        let err = rejection(&harness, &script("bad", &[INVOICE], false, body));
        assert!(err.has_kind(IssueKind::DisallowedConstruct), "{body}: {err}");
    }
    assert!(harness.service.list_scripts().expect("list").is_empty());
}

#[test]
fn bounded_loops_and_recursion_are_accepted() {
    let harness = TestHarness::new();
    let body = r"
  function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }
  var total = 0;
  for (var i = 0; i < 10; i++) { total += i; }
  for (var key in { a: 1 }) { total += 1; }
  for (var item of [1, 2]) { total += item; }
  return { invoiceNumber: 'N' + (total + fib(10)) };";
    harness
        .service
        .save_script(ScriptDraft::new(scope("acme"), "loops", script("loops", &[INVOICE], false, body)))
        .expect("accepted");
    let result: InvoiceGeneration = harness
        .service
        .fire_sync(INVOICE, &scope("acme"), &payload(json!({})), InvoiceGeneration::default())
        .expect("fire");
    assert_eq!(result.invoice_number.as_deref(), Some("N104"));
}

#[test]
fn syntax_errors_report_positions() {
    let harness = TestHarness::new();
    let err = rejection(&harness, "function getScriptMetadata() {\n  return {;\n}\n");
    assert!(err.has_kind(IssueKind::Syntax));
    assert!(err.issues.iter().any(|issue| issue.span.line == 2), "{err}");
}

#[test]
fn entry_points_are_required() {
    let harness = TestHarness::new();
    let err = rejection(&harness, "function executeScript() { return 1; }");
    assert!(err.has_kind(IssueKind::MissingEntryPoint));
}

#[test]
fn metadata_failures_are_permanent_rejections() {
    let harness = TestHarness::new();
    let throwing = "function getScriptMetadata() { throw new Error('no'); }\nfunction executeScript() {}";
    assert!(rejection(&harness, throwing).has_kind(IssueKind::Metadata));

    let unknown_event = script("x", &["NOT_AN_EVENT"], false, "  return 1;");
    assert!(rejection(&harness, &unknown_event).has_kind(IssueKind::Metadata));

    let not_object = "function getScriptMetadata() { return 'meta'; }\nfunction executeScript() {}";
    assert!(rejection(&harness, not_object).has_kind(IssueKind::Metadata));

    assert!(harness.service.list_scripts().expect("list").is_empty());
}

#[test]
fn save_round_trips_source_and_hash() {
    let harness = TestHarness::new();
    let source = invoice_script("numbering", "'A'");
    let saved = harness
        .service
        .save_script(ScriptDraft::new(scope("acme"), "numbering", source.clone()))
        .expect("save");
    let loaded = harness
        .service
        .get_script(&scope("acme"), "numbering")
        .expect("get")
        .expect("present");
    assert_eq!(loaded, saved);
    assert_eq!(loaded.source, source);
    assert_eq!(loaded.content_hash, content_hash(&source));
    assert_eq!(loaded.metadata.id, "numbering");
    assert!(loaded.subscribes_to(INVOICE));
    assert_eq!(
        harness.store.get_source(&scope("acme"), "numbering").expect("source"),
        Some(source)
    );
}

#[test]
fn artifacts_compile_once_and_updates_invalidate_the_old_hash() {
    let harness = TestHarness::new();
    let service = &harness.service;
    let cache = service.artifact_cache();
    let first = service
        .save_script(ScriptDraft::new(scope("acme"), "numbering", invoice_script("numbering", "'A'")))
        .expect("save");

    let fire = || -> Option<String> {
        service
            .fire_sync(INVOICE, &scope("acme"), &payload(json!({})), InvoiceGeneration::default())
            .expect("fire")
            .invoice_number
    };
    assert_eq!(fire().as_deref(), Some("A"));
    assert_eq!(fire().as_deref(), Some("A"));
    assert_eq!(cache.compilations(), 1);
    assert!(cache.contains(&first.content_hash));

    let second = service
        .save_script(ScriptDraft::new(scope("acme"), "numbering", invoice_script("numbering", "'B'")))
        .expect("update");
    assert_ne!(first.content_hash, second.content_hash);
    assert!(!cache.contains(&first.content_hash));
    assert_eq!(fire().as_deref(), Some("B"));
    assert_eq!(cache.compilations(), 2);
}

#[test]
fn idle_artifacts_are_evicted_by_the_clock() {
    let harness = TestHarness::with_config(&EngineConfig {
        artifact_idle_secs: 60,
        ..EngineConfig::default()
    });
    let saved = harness
        .service
        .save_script(ScriptDraft::new(scope("acme"), "numbering", invoice_script("numbering", "'A'")))
        .expect("save");
    let fire = || {
        harness
            .service
            .fire_sync(INVOICE, &scope("acme"), &payload(json!({})), InvoiceGeneration::default())
            .expect("fire");
    };
    fire();
    harness.clock.advance(61_000);
    assert_eq!(harness.service.artifact_cache().evict_idle(), 1);
    assert!(!harness.service.artifact_cache().contains(&saved.content_hash));
    fire();
    assert_eq!(harness.service.artifact_cache().compilations(), 2);
}

#[test]
fn delete_removes_definition_parameters_and_artifact() {
    let harness = TestHarness::new();
    let service = &harness.service;
    let saved = service
        .save_script(ScriptDraft::new(scope("acme"), "numbering", invoice_script("numbering", "'A'")))
        .expect("save");
    service
        .set_parameter_values(&scope("acme"), "numbering", payload(json!({ "prefix": "X" })))
        .expect("params");
    let _: InvoiceGeneration = service
        .fire_sync(INVOICE, &scope("acme"), &payload(json!({})), InvoiceGeneration::default())
        .expect("fire");

    assert!(service.delete_script(&scope("acme"), "numbering").expect("delete"));
    assert!(!service.delete_script(&scope("acme"), "numbering").expect("delete again"));
    assert!(service.get_script(&scope("acme"), "numbering").expect("get").is_none());
    assert!(
        harness
            .store
            .parameter_values(&scope("acme"), "numbering")
            .expect("values")
            .is_empty()
    );
    assert!(!service.artifact_cache().contains(&saved.content_hash));
    assert!(
        service
            .resolve_active_scripts(INVOICE, &scope("acme"), false)
            .expect("resolve")
            .is_empty()
    );
}

#[test]
fn toggling_an_unknown_script_is_not_found() {
    let harness = TestHarness::new();
    let err = harness
        .service
        .set_enabled(&scope("acme"), "ghost", false)
        .expect_err("missing");
    assert!(matches!(err, Error::ScriptNotFound(ref id) if id == "acme/ghost"));
}

#[test]
fn list_returns_every_definition() {
    let harness = TestHarness::new();
    for (path, name) in [("acme", "b"), ("", "a"), ("acme.conf", "c")] {
        harness
            .service
            .save_script(ScriptDraft::new(scope(path), name, invoice_script(name, "'x'")))
            .expect("save");
    }
    let ids: Vec<String> = harness
        .service
        .list_scripts()
        .expect("list")
        .iter()
        .map(|d| d.id().to_string())
        .collect();
    assert_eq!(ids, vec!["/a", "acme/b", "acme.conf/c"]);
}
