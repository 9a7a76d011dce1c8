//! Extension event vocabulary and typed results for the events whose callers
//! consume a script's return value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle events a script may subscribe to.
///
/// Serialized as the upper-snake-case name used in script metadata
/// (e.g. `"RESERVATION_CONFIRMED"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExtensionEvent {
    ReservationConfirmed,
    ReservationExpired,
    ReservationCancelled,
    TicketAssigned,
    TicketCancelled,
    TicketCheckedIn,
    WaitingQueueSubscribed,
    /// Sync: scripts may supply the invoice number.
    InvoiceGeneration,
    /// Sync: scripts decide whether a tax id is acceptable.
    TaxIdNumberValidation,
    EventCreated,
    EventStatusChange,
    UserSignedUp,
    PdfGeneration,
    WebApiHook,
}

impl ExtensionEvent {
    pub const ALL: [Self; 14] = [
        Self::ReservationConfirmed,
        Self::ReservationExpired,
        Self::ReservationCancelled,
        Self::TicketAssigned,
        Self::TicketCancelled,
        Self::TicketCheckedIn,
        Self::WaitingQueueSubscribed,
        Self::InvoiceGeneration,
        Self::TaxIdNumberValidation,
        Self::EventCreated,
        Self::EventStatusChange,
        Self::UserSignedUp,
        Self::PdfGeneration,
        Self::WebApiHook,
    ];

    pub const fn event_name(self) -> &'static str {
        match self {
            Self::ReservationConfirmed => "RESERVATION_CONFIRMED",
            Self::ReservationExpired => "RESERVATION_EXPIRED",
            Self::ReservationCancelled => "RESERVATION_CANCELLED",
            Self::TicketAssigned => "TICKET_ASSIGNED",
            Self::TicketCancelled => "TICKET_CANCELLED",
            Self::TicketCheckedIn => "TICKET_CHECKED_IN",
            Self::WaitingQueueSubscribed => "WAITING_QUEUE_SUBSCRIBED",
            Self::InvoiceGeneration => "INVOICE_GENERATION",
            Self::TaxIdNumberValidation => "TAX_ID_NUMBER_VALIDATION",
            Self::EventCreated => "EVENT_CREATED",
            Self::EventStatusChange => "EVENT_STATUS_CHANGE",
            Self::UserSignedUp => "USER_SIGNED_UP",
            Self::PdfGeneration => "PDF_GENERATION",
            Self::WebApiHook => "WEB_API_HOOK",
        }
    }
}

impl fmt::Display for ExtensionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent(pub String);

impl fmt::Display for UnknownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown extension event '{}'", self.0)
    }
}

impl std::error::Error for UnknownEvent {}

impl FromStr for ExtensionEvent {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.event_name() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// Result of an `INVOICE_GENERATION` chain.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceGeneration {
    pub invoice_number: Option<String>,
}

/// Result of a `TAX_ID_NUMBER_VALIDATION` chain.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaxIdValidation {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl Default for TaxIdValidation {
    fn default() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn names_round_trip_through_from_str() {
        for event in ExtensionEvent::ALL {
            assert_eq!(event.event_name().parse::<ExtensionEvent>(), Ok(event));
        }
        assert_eq!(
            "NOT_AN_EVENT".parse::<ExtensionEvent>(),
            Err(UnknownEvent("NOT_AN_EVENT".to_string()))
        );
    }

    #[test]
    fn serde_uses_event_names() {
        let value = serde_json::to_value(ExtensionEvent::TaxIdNumberValidation).expect("serialize");
        assert_eq!(value, json!("TAX_ID_NUMBER_VALIDATION"));
        let parsed: ExtensionEvent = serde_json::from_value(json!("USER_SIGNED_UP")).expect("parse");
        assert_eq!(parsed, ExtensionEvent::UserSignedUp);
    }

    #[test]
    fn typed_results_accept_script_shapes() {
        let invoice: InvoiceGeneration =
            serde_json::from_value(json!({ "invoiceNumber": "INV-7" })).expect("invoice");
        assert_eq!(invoice.invoice_number.as_deref(), Some("INV-7"));

        let tax: TaxIdValidation = serde_json::from_value(json!({ "valid": false })).expect("tax");
        assert!(!tax.valid);
        assert!(TaxIdValidation::default().valid);
    }
}
