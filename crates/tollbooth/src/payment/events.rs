//! Typed payment events. The provider delivers an opaque envelope
//! `{type, data.object}`; the dispatch below turns the stringly-typed name
//! into a closed variant set so handling is match-exhaustive.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("malformed {event} payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    data: EnvelopeData,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

/// A reference to another provider object, delivered either collapsed to an
/// id string or expanded inline.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Id(String),
    Expanded { id: String },
}

impl ObjectRef {
    pub fn id(&self) -> &str {
        match self {
            ObjectRef::Id(id) => id,
            ObjectRef::Expanded { id } => id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub customer: Option<ObjectRef>,
    #[serde(default)]
    pub customer_details: CustomerDetails,
    /// Service UUID chosen on the pricing page.
    #[serde(default)]
    pub client_reference_id: String,
    pub subscription: Option<ObjectRef>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Plan {
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    #[serde(default)]
    pub plan: Plan,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub id: String,
    /// Unix seconds; the binding's expiration under `updated` events.
    #[serde(default)]
    pub current_period_end: i64,
    #[serde(default)]
    pub items: SubscriptionItems,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSchedule {
    pub subscription: ObjectRef,
}

/// The closed set of events the processor acts on. Anything else becomes
/// [`PaymentEvent::Unknown`] and is acknowledged without state change.
#[derive(Debug)]
pub enum PaymentEvent {
    CustomerCreated(Customer),
    CheckoutCompleted(CheckoutSession),
    SubscriptionUpdated(Subscription),
    SubscriptionDeleted(Subscription),
    ScheduleCanceled(SubscriptionSchedule),
    Unknown(String),
}

impl PaymentEvent {
    pub fn parse(payload: &[u8]) -> Result<Self, EventParseError> {
        let envelope: Envelope =
            serde_json::from_slice(payload).map_err(EventParseError::Envelope)?;

        let object = envelope.data.object;
        let event = match envelope.kind.as_str() {
            "customer.created" => {
                PaymentEvent::CustomerCreated(typed(object, "customer.created")?)
            }
            "checkout.session.completed" => {
                PaymentEvent::CheckoutCompleted(typed(object, "checkout.session.completed")?)
            }
            "customer.subscription.updated" => {
                PaymentEvent::SubscriptionUpdated(typed(object, "customer.subscription.updated")?)
            }
            "customer.subscription.deleted" => {
                PaymentEvent::SubscriptionDeleted(typed(object, "customer.subscription.deleted")?)
            }
            "subscription_schedule.canceled" => {
                PaymentEvent::ScheduleCanceled(typed(object, "subscription_schedule.canceled")?)
            }
            _ => PaymentEvent::Unknown(envelope.kind),
        };
        Ok(event)
    }
}

fn typed<T: serde::de::DeserializeOwned>(
    object: serde_json::Value,
    event: &'static str,
) -> Result<T, EventParseError> {
    serde_json::from_value(object).map_err(|source| EventParseError::Payload { event, source })
}
