use crate::{
    auth::Owner,
    config::AppConfig,
    entities::{
        order, payment, payment_method_entry, Order, OrderStatus, Payment, PaymentMethodCatalog,
        PaymentMethodEntry, PaymentModel, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    payment_gateway::{to_minor_units, GatewayOutcome, InitializeRequest, PaymentGateway},
    services::{commerce::ProfileDirectory, orders::find_owned_order},
};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Where to send the customer to complete payment
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InitializedPayment {
    pub order_id: Uuid,
    pub reference: String,
    pub authorization_url: String,
    pub access_code: String,
}

/// Starts gateway checkouts and lists payments. Never changes payment state;
/// completion is the reconciliation service's job.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    profiles: Arc<dyn ProfileDirectory>,
    currency: String,
    callback_url: Option<String>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        profiles: Arc<dyn ProfileDirectory>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            profiles,
            currency: config.commerce.currency.clone(),
            callback_url: config.gateway.callback_url.clone(),
        }
    }

    /// Initializes a gateway transaction for a pending order.
    ///
    /// Safe to call repeatedly: the order's existing payment reference is
    /// reused and nothing is written locally.
    #[instrument(skip(self), fields(owner = %owner, order_id = %order_id))]
    pub async fn initialize(
        &self,
        owner: &Owner,
        order_id: Uuid,
    ) -> Result<InitializedPayment, ServiceError> {
        let order = find_owned_order(&*self.db, order_id, Some(owner)).await?;
        if order.order_status()? != OrderStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Order {} is {} and cannot be paid",
                order.order_number, order.status
            )));
        }

        let payment = Payment::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No payment for order {}", order.order_number))
            })?;
        if payment.payment_status()? != PaymentStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "Payment {} is already {}",
                payment.payment_reference, payment.status
            )));
        }

        let email = self
            .profiles
            .addresses(owner)
            .await?
            .map(|profile| profile.email)
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::MissingProfile("an email address is required for payment".into())
            })?;

        let request = InitializeRequest {
            email,
            amount_minor: to_minor_units(order.total_amount.round_dp(2))?,
            currency: self.currency.clone(),
            reference: payment.payment_reference.clone(),
            callback_url: self.callback_url.clone(),
            metadata: json!({
                "order_id": order.id.to_string(),
                "owner": owner.key(),
                "payment_reference": payment.payment_reference,
            }),
        };

        match self.gateway.initialize(request).await? {
            GatewayOutcome::Approved(transaction) => {
                if transaction.reference != payment.payment_reference {
                    warn!(
                        expected = %payment.payment_reference,
                        returned = %transaction.reference,
                        "Gateway echoed a different reference"
                    );
                }

                info!(reference = %payment.payment_reference, "Payment initialized");
                self.event_sender
                    .send_or_log(Event::PaymentInitialized {
                        order_id: order.id,
                        payment_reference: payment.payment_reference.clone(),
                    })
                    .await;

                Ok(InitializedPayment {
                    order_id: order.id,
                    reference: payment.payment_reference,
                    authorization_url: transaction.authorization_url,
                    access_code: transaction.access_code,
                })
            }
            GatewayOutcome::Declined { message } => {
                warn!(reference = %payment.payment_reference, %message, "Gateway refused to initialize");
                Err(ServiceError::ValidationError(format!(
                    "payment could not be initialized: {}",
                    message
                )))
            }
        }
    }

    /// Lists the owner's payments, newest first
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn list(&self, owner: &Owner) -> Result<Vec<PaymentModel>, ServiceError> {
        let payments = Payment::find()
            .inner_join(Order)
            .filter(order::Column::Owner.eq(owner.key()))
            .order_by_desc(payment::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(payments)
    }

    /// One of the owner's payments. Payments of other owners are not found.
    #[instrument(skip(self), fields(owner = %owner, payment_id = %payment_id))]
    pub async fn get(
        &self,
        owner: &Owner,
        payment_id: Uuid,
    ) -> Result<PaymentModel, ServiceError> {
        Payment::find_by_id(payment_id)
            .inner_join(Order)
            .filter(order::Column::Owner.eq(owner.key()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
    }

    /// Payment methods currently offered, by name
    pub async fn list_methods(&self) -> Result<Vec<PaymentMethodEntry>, ServiceError> {
        let methods = PaymentMethodCatalog::find()
            .filter(payment_method_entry::Column::IsActive.eq(true))
            .order_by_asc(payment_method_entry::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(methods)
    }
}
