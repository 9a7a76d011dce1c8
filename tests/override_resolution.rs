//! Scope override rules, observed through the service.

mod common;

use common::harness::{TestHarness, payload, scope};
use common::scripts::{invoice_script, script};
use extscript::extension_events::InvoiceGeneration;
use extscript::model::{ScopePath, ScriptDraft};
use serde_json::json;

const INVOICE: &str = "INVOICE_GENERATION";

#[test]
fn event_level_script_overrides_organization_script() {
    let harness = TestHarness::new();
    let service = &harness.service;
    service
        .save_script(ScriptDraft::new(scope("acme"), "numbering", invoice_script("numbering", "'ACME-' + orderId")))
        .expect("save org script");
    service
        .save_script(ScriptDraft::new(
            scope("acme.summer-conf"),
            "numbering",
            invoice_script("numbering", "'SUMMER-' + orderId"),
        ))
        .expect("save event script");

    let body = payload(json!({ "orderId": 42 }));
    let at_event: InvoiceGeneration = service
        .fire_sync(INVOICE, &scope("acme.summer-conf"), &body, InvoiceGeneration::default())
        .expect("fire at event");
    assert_eq!(at_event.invoice_number.as_deref(), Some("SUMMER-42"));

    // A category below the event inherits the event-level script.
    let at_category: InvoiceGeneration = service
        .fire_sync(INVOICE, &scope("acme.summer-conf.vip"), &body, InvoiceGeneration::default())
        .expect("fire at category");
    assert_eq!(at_category.invoice_number.as_deref(), Some("SUMMER-42"));

    let at_other_event: InvoiceGeneration = service
        .fire_sync(INVOICE, &scope("acme.winter-conf"), &body, InvoiceGeneration::default())
        .expect("fire at sibling");
    assert_eq!(at_other_event.invoice_number.as_deref(), Some("ACME-42"));

    let elsewhere: InvoiceGeneration = service
        .fire_sync(INVOICE, &scope("globex"), &body, InvoiceGeneration::default())
        .expect("fire elsewhere");
    assert_eq!(elsewhere, InvoiceGeneration::default());
}

#[test]
fn disabling_falls_back_and_enabling_restores() {
    let harness = TestHarness::new();
    let service = &harness.service;
    service
        .save_script(ScriptDraft::new(ScopePath::root(), "numbering", invoice_script("numbering", "'SYS'")))
        .expect("save root");
    service
        .save_script(ScriptDraft::new(scope("acme"), "numbering", invoice_script("numbering", "'ACME'")))
        .expect("save org");

    let fire = || -> Option<String> {
        service
            .fire_sync(INVOICE, &scope("acme.conf"), &payload(json!({})), InvoiceGeneration::default())
            .expect("fire")
            .invoice_number
    };
    assert_eq!(fire().as_deref(), Some("ACME"));

    service.set_enabled(&scope("acme"), "numbering", false).expect("disable");
    assert_eq!(fire().as_deref(), Some("SYS"));
    assert!(service.get_script(&scope("acme"), "numbering").expect("get").is_some());

    service.set_enabled(&scope("acme"), "numbering", true).expect("enable");
    assert_eq!(fire().as_deref(), Some("ACME"));
}

#[test]
fn saving_a_disabled_draft_keeps_it_out_of_resolution() {
    let harness = TestHarness::new();
    harness
        .service
        .save_script(ScriptDraft::new(scope("acme"), "numbering", invoice_script("numbering", "'X'")).disabled())
        .expect("save");
    let resolved = harness
        .service
        .resolve_active_scripts(INVOICE, &scope("acme"), false)
        .expect("resolve");
    assert!(resolved.is_empty());
}

#[test]
fn async_scripts_only_resolve_for_async_firing() {
    let harness = TestHarness::new();
    let service = &harness.service;
    service
        .save_script(ScriptDraft::new(
            scope("acme"),
            "webhook",
            script("webhook", &["RESERVATION_CONFIRMED"], true, "  log.info('sent');"),
        ))
        .expect("save async");
    service
        .save_script(ScriptDraft::new(
            scope("acme"),
            "audit",
            script("audit", &["RESERVATION_CONFIRMED"], false, "  return true;"),
        ))
        .expect("save sync");

    let sync_names: Vec<String> = service
        .resolve_active_scripts("RESERVATION_CONFIRMED", &scope("acme.conf"), false)
        .expect("sync")
        .into_iter()
        .map(|d| d.name)
        .collect();
    let async_names: Vec<String> = service
        .resolve_active_scripts("RESERVATION_CONFIRMED", &scope("acme.conf"), true)
        .expect("async")
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(sync_names, vec!["audit"]);
    assert_eq!(async_names, vec!["webhook"]);

    let stored = service.get_script(&scope("acme"), "webhook").expect("get").expect("exists");
    assert!(stored.async_capable);
    assert!(stored.metadata.is_async);
}

#[test]
fn unrelated_events_resolve_nothing() {
    let harness = TestHarness::new();
    harness
        .service
        .save_script(ScriptDraft::new(scope("acme"), "numbering", invoice_script("numbering", "'X'")))
        .expect("save");
    assert!(
        harness
            .service
            .resolve_active_scripts("USER_SIGNED_UP", &scope("acme"), false)
            .expect("resolve")
            .is_empty()
    );
}
