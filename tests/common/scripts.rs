//! Script source builders.

#![allow(dead_code)]

/// A well-formed script subscribed to `events` whose `executeScript` body is
/// `body`.
pub fn script(id: &str, events: &[&str], is_async: bool, body: &str) -> String {
    let events = events
        .iter()
        .map(|event| format!("'{event}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "function getScriptMetadata() {{\n  return {{ id: '{id}', displayName: '{id}', async: {is_async}, events: [{events}] }};\n}}\nfunction executeScript(scriptEvent) {{\n{body}\n}}\n"
    )
}

/// Sync script returning `{ invoiceNumber: <value> }`.
pub fn invoice_script(id: &str, value_expr: &str) -> String {
    script(
        id,
        &["INVOICE_GENERATION"],
        false,
        &format!("  return {{ invoiceNumber: {value_expr} }};"),
    )
}
