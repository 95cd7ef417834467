//! Core types for the message pipeline.

mod config;
mod envelope;
mod events;

pub use config::{BrokerConfig, PolicySettings};
pub use envelope::{Envelope, Header};
pub use events::{
    Address, Event, InvoiceCreated, InvoiceHeader, InvoiceTotals, LineItem, NewCustomer,
    PaymentReceived, ProductDelivered,
};
