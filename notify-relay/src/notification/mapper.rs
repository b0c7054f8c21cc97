//! Event-to-notification mapping.
//!
//! Dispatch is a static rule table: each entry names the event type, the
//! notification kind, title and message templates and the `data` field that
//! identifies the recipient. Adding a notification kind is a table edit.

use serde_json::{Map, Value};

use super::events::{EventEnvelope, NotificationDraft, NotificationKind};

/// Static mapping rule for one event type.
#[derive(Debug, Clone, Copy)]
pub struct MappingRule {
    /// Event type as published on the broker.
    pub event_type: &'static str,
    pub kind: NotificationKind,
    pub title: &'static str,
    /// Message template; `{field}` is replaced by `data.field`.
    pub message: &'static str,
    /// `data` field holding the recipient id, `None` for broadcasts.
    pub recipient_field: Option<&'static str>,
}

const MAPPING_RULES: &[MappingRule] = &[
    MappingRule {
        event_type: "order_created",
        kind: NotificationKind::OrderCreated,
        title: "Order Created",
        message: "Your order #{order_id} has been created",
        recipient_field: Some("user_id"),
    },
    MappingRule {
        event_type: "order_shipped",
        kind: NotificationKind::OrderShipped,
        title: "Order Shipped",
        message: "Your order #{order_id} has been shipped",
        recipient_field: Some("user_id"),
    },
    MappingRule {
        event_type: "order_delivered",
        kind: NotificationKind::OrderDelivered,
        title: "Order Delivered",
        message: "Your order #{order_id} has been delivered",
        recipient_field: Some("user_id"),
    },
    MappingRule {
        event_type: "user_registered",
        kind: NotificationKind::UserRegistered,
        title: "Welcome!",
        message: "Welcome to our platform!",
        recipient_field: Some("user_id"),
    },
    MappingRule {
        event_type: "product_added",
        kind: NotificationKind::ProductAdded,
        title: "New Product",
        message: "New product available: {product_name}",
        recipient_field: None,
    },
];

pub fn mapping_rules() -> &'static [MappingRule] {
    MAPPING_RULES
}

/// Look up the rule for an event type.
pub fn rule_for(event_type: &str) -> Option<&'static MappingRule> {
    MAPPING_RULES.iter().find(|r| r.event_type == event_type)
}

/// Translate an envelope into a draft.
///
/// Returns `None` for event types without a rule. Missing `data` fields
/// render as empty text and a missing recipient field yields a broadcast.
pub fn map_event(envelope: &EventEnvelope) -> Option<NotificationDraft> {
    let rule = rule_for(&envelope.event_type)?;

    let recipient_id = rule
        .recipient_field
        .and_then(|field| envelope.data.get(field))
        .and_then(scalar_text)
        .filter(|id| !id.is_empty());

    Some(NotificationDraft {
        kind: rule.kind,
        recipient_id,
        title: rule.title.to_string(),
        message: render_template(rule.message, &envelope.data),
        occurred_at: envelope.timestamp,
    })
}

/// Render `{field}` placeholders from `data`.
fn render_template(template: &str, data: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let field = &after[..end];
                if let Some(text) = data.get(field).and_then(scalar_text) {
                    out.push_str(&text);
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Text form of a scalar JSON value; `null`, arrays and objects have none.
fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
