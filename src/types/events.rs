//! Typed business events decoded from envelope payloads.
//!
//! Each known `messageType` maps to a strongly-typed payload struct.
//! Unrecognized types are preserved as [`Event::Unknown`] rather than
//! dropped, so the consumer can apply its explicit ack policy to them.

use serde::{Deserialize, Serialize};

use super::envelope::Envelope;
use crate::error::MessageParseError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub street: String,
    pub city: String,
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewCustomer {
    pub customer_id: String,
    pub first_name: String,
    pub last_name: String,
    pub document_number: String,
    pub phone_number: String,
    pub address: Address,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceHeader {
    pub invoice_number: String,
    pub invoice_date: String,
    pub customer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub description: String,
    pub brand: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub line_total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceTotals {
    pub sub_total: f64,
    pub tax: f64,
    pub grand_total: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceCreated {
    pub invoice_header: InvoiceHeader,
    pub line_items: Vec<LineItem>,
    pub totals: InvoiceTotals,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceived {
    pub invoice_number: String,
    pub payment_date: String,
    pub amount: f64,
    pub payment_method: String,
    pub receipt_number: String,
    pub customer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductDelivered {
    pub order_id: String,
    pub product_id: String,
    pub quantity: u32,
    pub delivery_date: String,
    pub delivered_by: String,
    pub carrier: String,
    pub tracking_number: String,
    pub location: String,
}

/// Tagged union of all message types the pipeline understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NewCustomer(NewCustomer),
    InvoiceCreated(InvoiceCreated),
    PaymentReceived(PaymentReceived),
    ProductDelivered(ProductDelivered),
    /// Discriminator not in the known set; raw payload preserved.
    Unknown {
        message_type: String,
        payload: serde_json::Value,
    },
}

impl Event {
    /// Decode the typed payload selected by `header.messageType`.
    ///
    /// A known type with a payload that does not match its schema is a
    /// parse error; an unknown type never fails here.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, MessageParseError> {
        let message_type = envelope.header.message_type.as_str();
        let payload = envelope.payload.clone();

        let decode_err = |source| MessageParseError::Payload {
            message_type: message_type.to_string(),
            source,
        };

        let event = match message_type {
            "NewCustomer" => Event::NewCustomer(serde_json::from_value(payload).map_err(decode_err)?),
            "InvoiceCreated" => Event::InvoiceCreated(serde_json::from_value(payload).map_err(decode_err)?),
            "PaymentReceived" => Event::PaymentReceived(serde_json::from_value(payload).map_err(decode_err)?),
            "ProductDelivered" => Event::ProductDelivered(serde_json::from_value(payload).map_err(decode_err)?),
            _ => Event::Unknown {
                message_type: message_type.to_string(),
                payload,
            },
        };
        Ok(event)
    }

    /// The `messageType` discriminator this event carries on the wire.
    pub fn message_type(&self) -> &str {
        match self {
            Event::NewCustomer(_) => "NewCustomer",
            Event::InvoiceCreated(_) => "InvoiceCreated",
            Event::PaymentReceived(_) => "PaymentReceived",
            Event::ProductDelivered(_) => "ProductDelivered",
            Event::Unknown { message_type, .. } => message_type,
        }
    }

    /// Wrap this event in an envelope ready for publishing.
    pub fn into_envelope(self, source: &str) -> Result<Envelope, serde_json::Error> {
        let message_type = self.message_type().to_string();
        let payload = match self {
            Event::NewCustomer(p) => serde_json::to_value(p)?,
            Event::InvoiceCreated(p) => serde_json::to_value(p)?,
            Event::PaymentReceived(p) => serde_json::to_value(p)?,
            Event::ProductDelivered(p) => serde_json::to_value(p)?,
            Event::Unknown { payload, .. } => payload,
        };
        Ok(Envelope::new(message_type, source, payload))
    }
}
