//! Domain handlers for the known message types.
//!
//! Side effects are simulated: each handler sleeps briefly to model
//! processing time and emits structured log lines in place of real
//! email sends and database writes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::consumer::{EventHandler, HandlerTable};
use crate::types::{Event, Header};

const SIMULATED_PROCESSING: Duration = Duration::from_millis(500);

fn expect_variant(handler: &str, event: &Event) -> anyhow::Error {
    anyhow::anyhow!("{handler} received unexpected event {}", event.message_type())
}

/// Sends the welcome email for a new customer.
pub struct WelcomeEmailHandler;

#[async_trait]
impl EventHandler for WelcomeEmailHandler {
    fn name(&self) -> &'static str {
        "welcome_email"
    }

    async fn handle(&self, header: &Header, event: &Event) -> anyhow::Result<()> {
        let customer = match event {
            Event::NewCustomer(customer) => customer,
            other => return Err(expect_variant(self.name(), other)),
        };

        tokio::time::sleep(SIMULATED_PROCESSING).await;

        let to = format!(
            "{}.{}@example.com",
            customer.first_name.to_lowercase(),
            customer.last_name.to_lowercase()
        );
        info!(
            correlation_id = %header.correlation_id,
            customer_id = %customer.customer_id,
            email = %to,
            subject = %format!("Welcome, {} {}!", customer.first_name, customer.last_name),
            "welcome email sent"
        );
        Ok(())
    }
}

/// Records a newly created invoice.
pub struct InvoiceRecordHandler;

#[async_trait]
impl EventHandler for InvoiceRecordHandler {
    fn name(&self) -> &'static str {
        "invoice_record"
    }

    async fn handle(&self, header: &Header, event: &Event) -> anyhow::Result<()> {
        let invoice = match event {
            Event::InvoiceCreated(invoice) => invoice,
            other => return Err(expect_variant(self.name(), other)),
        };

        tokio::time::sleep(SIMULATED_PROCESSING).await;

        info!(
            correlation_id = %header.correlation_id,
            invoice_number = %invoice.invoice_header.invoice_number,
            customer = %invoice.invoice_header.customer,
            line_items = invoice.line_items.len(),
            grand_total = invoice.totals.grand_total,
            "invoice recorded"
        );
        Ok(())
    }
}

/// Applies a received payment against its invoice.
pub struct PaymentLedgerHandler;

#[async_trait]
impl EventHandler for PaymentLedgerHandler {
    fn name(&self) -> &'static str {
        "payment_ledger"
    }

    async fn handle(&self, header: &Header, event: &Event) -> anyhow::Result<()> {
        let payment = match event {
            Event::PaymentReceived(payment) => payment,
            other => return Err(expect_variant(self.name(), other)),
        };

        tokio::time::sleep(SIMULATED_PROCESSING).await;

        info!(
            correlation_id = %header.correlation_id,
            invoice_number = %payment.invoice_number,
            receipt_number = %payment.receipt_number,
            amount = payment.amount,
            method = %payment.payment_method,
            "payment applied"
        );
        Ok(())
    }
}

/// Confirms a product delivery back to the customer.
pub struct DeliveryConfirmationHandler;

#[async_trait]
impl EventHandler for DeliveryConfirmationHandler {
    fn name(&self) -> &'static str {
        "delivery_confirmation"
    }

    async fn handle(&self, header: &Header, event: &Event) -> anyhow::Result<()> {
        let delivery = match event {
            Event::ProductDelivered(delivery) => delivery,
            other => return Err(expect_variant(self.name(), other)),
        };

        tokio::time::sleep(SIMULATED_PROCESSING).await;

        info!(
            correlation_id = %header.correlation_id,
            order_id = %delivery.order_id,
            product_id = %delivery.product_id,
            carrier = %delivery.carrier,
            tracking_number = %delivery.tracking_number,
            delivered_at = %delivery.delivery_date,
            "delivery confirmation sent"
        );
        Ok(())
    }
}

/// The default dispatch table covering all known message types.
pub fn default_handlers() -> HandlerTable {
    HandlerTable::new()
        .register("NewCustomer", Arc::new(WelcomeEmailHandler))
        .register("InvoiceCreated", Arc::new(InvoiceRecordHandler))
        .register("PaymentReceived", Arc::new(PaymentLedgerHandler))
        .register("ProductDelivered", Arc::new(DeliveryConfirmationHandler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Envelope, NewCustomer};
    use serde_json::json;

    fn header() -> Header {
        Envelope::new("NewCustomer", "test", json!({})).header
    }

    #[tokio::test(start_paused = true)]
    async fn test_welcome_email_handles_new_customer() {
        let event = Event::NewCustomer(NewCustomer {
            customer_id: "C-1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            document_number: "1".into(),
            phone_number: "2".into(),
            address: Address {
                street: "s".into(),
                city: "c".into(),
                country: "x".into(),
            },
        });
        WelcomeEmailHandler.handle(&header(), &event).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_rejects_wrong_variant() {
        let event = Event::Unknown {
            message_type: "FooBar".into(),
            payload: json!({}),
        };
        assert!(WelcomeEmailHandler.handle(&header(), &event).await.is_err());
    }

    #[test]
    fn test_default_table_covers_known_types() {
        let table = default_handlers();
        for message_type in ["NewCustomer", "InvoiceCreated", "PaymentReceived", "ProductDelivered"] {
            assert!(table.get(message_type).is_some(), "missing {message_type}");
        }
        assert_eq!(table.len(), 4);
    }
}
