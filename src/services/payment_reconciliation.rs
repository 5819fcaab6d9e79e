use crate::{
    auth::Owner,
    config::AppConfig,
    db,
    entities::{
        payment, OrderModel, OrderStatus, Payment, PaymentMethod, PaymentModel, PaymentStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    payment_gateway::{
        from_minor_units, to_minor_units, GatewayOutcome, PaymentGateway, VerifiedTransaction,
    },
    services::{
        order_status::{transition_in, OrderPatch},
        orders::find_owned_order,
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

const MAX_REFERENCE_LEN: usize = 128;

/// Result of a reconciliation. `applied` is true only for the call that
/// actually completed the payment.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ReconciliationOutcome {
    pub order: OrderModel,
    pub payment: PaymentModel,
    pub applied: bool,
}

/// Applies gateway-confirmed payments to local order and payment state.
///
/// Safe to call any number of times, from the customer's return redirect, a
/// manual verify and the provider webhook, including concurrently: the
/// payment is completed with a compare-and-set on `status = 'pending'`, so
/// exactly one caller applies the change and the rest observe it.
#[derive(Clone)]
pub struct PaymentReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn PaymentGateway>,
    verify_deadline: Duration,
    default_currency: String,
}

impl PaymentReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            verify_deadline: config.gateway.verify_deadline(),
            default_currency: config.commerce.currency.clone(),
        }
    }

    /// Verifies `reference` with the gateway and, on success, completes the
    /// payment and moves the order from pending to processing.
    ///
    /// `requester` is the owner asking; `None` is the trusted webhook path.
    #[instrument(skip(self, requester), fields(reference = %reference))]
    pub async fn reconcile(
        &self,
        reference: &str,
        requester: Option<&Owner>,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let reference = reference.trim();
        if reference.is_empty() || reference.len() > MAX_REFERENCE_LEN {
            return Err(ServiceError::ValidationError(
                "a payment reference is required".into(),
            ));
        }
        if !is_reference_safe(reference) {
            return Err(ServiceError::ValidationError(
                "payment references may only contain letters, digits, '-' and '_'".into(),
            ));
        }

        if let Some(outcome) = self.local_fast_path(reference, requester).await? {
            return Ok(outcome);
        }

        let verified = self.verify_with_gateway(reference).await?;

        let txn = self.db.begin().await?;
        let outcome = self
            .apply_verified(&txn, reference, requester, &verified)
            .await?;

        if !outcome.applied {
            // Another reconciler won; our transaction wrote nothing
            txn.rollback().await?;
            info!("Payment already completed by a concurrent reconciliation");
            return Ok(outcome);
        }

        txn.commit().await?;

        counter!("bazaar_payments_reconciled_total", 1);
        info!(
            order_id = %outcome.order.id,
            payment_id = %outcome.payment.id,
            amount = %outcome.payment.amount,
            "Payment reconciled"
        );

        self.event_sender
            .send_or_log(Event::PaymentCompleted {
                payment_id: outcome.payment.id,
                order_id: outcome.order.id,
                payment_reference: outcome.payment.payment_reference.clone(),
                amount: outcome.payment.amount,
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: outcome.order.id,
                old_status: OrderStatus::Pending.to_string(),
                new_status: OrderStatus::Processing.to_string(),
            })
            .await;

        Ok(outcome)
    }

    /// Answers from local state when the gateway does not need to be asked.
    async fn local_fast_path(
        &self,
        reference: &str,
        requester: Option<&Owner>,
    ) -> Result<Option<ReconciliationOutcome>, ServiceError> {
        let db = &*self.db;
        let Some(payment) = find_by_reference(db, reference, false).await? else {
            return Ok(None);
        };

        let order = find_owned_order(db, payment.order_id, requester).await?;

        match payment.payment_status()? {
            PaymentStatus::Completed => Ok(Some(ReconciliationOutcome {
                order,
                payment,
                applied: false,
            })),
            PaymentStatus::Pending => Ok(None),
            PaymentStatus::Failed | PaymentStatus::Refunded => Err(
                ServiceError::invalid_transition(payment.status, PaymentStatus::Completed.to_string()),
            ),
        }
    }

    async fn verify_with_gateway(
        &self,
        reference: &str,
    ) -> Result<VerifiedTransaction, ServiceError> {
        let result = tokio::time::timeout(self.verify_deadline, self.gateway.verify(reference)).await;

        let outcome = match result {
            Err(_) => {
                counter!("bazaar_payment_verification_failures_total", 1, "reason" => "deadline");
                error!(
                    deadline_secs = self.verify_deadline.as_secs(),
                    "Payment verification exceeded its deadline"
                );
                return Err(ServiceError::GatewayTimeout(
                    "verification deadline exceeded".into(),
                ));
            }
            Ok(Err(e)) => {
                counter!("bazaar_payment_verification_failures_total", 1, "reason" => "gateway");
                error!(error = %e, "Payment verification failed at the gateway");
                return Err(e.into());
            }
            Ok(Ok(outcome)) => outcome,
        };

        match outcome {
            GatewayOutcome::Approved(verified) if verified.reference == reference => Ok(verified),
            GatewayOutcome::Approved(verified) => {
                counter!("bazaar_payment_verification_failures_total", 1, "reason" => "reference");
                warn!(returned = %verified.reference, "Gateway verified a different reference");
                Err(ServiceError::PaymentVerification(
                    "gateway returned a different reference".into(),
                ))
            }
            GatewayOutcome::Declined { message } => {
                counter!("bazaar_payment_verification_failures_total", 1, "reason" => "declined");
                info!(%message, "Gateway declined the payment");
                Err(ServiceError::PaymentVerification(message))
            }
        }
    }

    async fn apply_verified(
        &self,
        txn: &DatabaseTransaction,
        reference: &str,
        requester: Option<&Owner>,
        verified: &VerifiedTransaction,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let row_locks = db::supports_row_locks(txn.get_database_backend());

        let (existing, order) = match find_by_reference(txn, reference, row_locks).await? {
            Some(payment) => {
                let order = find_owned_order(txn, payment.order_id, requester).await?;
                (Some(payment), order)
            }
            None => {
                let order_id = verified.metadata_order_id().ok_or_else(|| {
                    warn!("Verified payment has no local row and no order id in metadata");
                    ServiceError::OrphanPayment(format!(
                        "no order could be matched to payment {}",
                        reference
                    ))
                })?;
                let order = find_owned_order(txn, order_id, requester).await?;
                let adopted = Payment::find()
                    .filter(payment::Column::OrderId.eq(order.id))
                    .one(txn)
                    .await?;
                (adopted, order)
            }
        };

        let expected_minor = to_minor_units(order.total_amount.round_dp(2))?;
        if verified.amount_minor != expected_minor {
            counter!("bazaar_payment_verification_failures_total", 1, "reason" => "amount");
            warn!(
                expected_minor,
                received_minor = verified.amount_minor,
                order_id = %order.id,
                "Verified amount does not match order total"
            );
            return Err(ServiceError::PaymentVerification(format!(
                "paid amount {} does not match order total {}",
                from_minor_units(verified.amount_minor),
                order.total_amount.round_dp(2)
            )));
        }

        let payment = match existing {
            Some(payment) if payment.payment_reference == reference => payment,
            Some(payment) => self.adopt(txn, payment, reference).await?,
            None => self.insert_orphan(txn, &order, reference, verified).await?,
        };

        let now = Utc::now();
        let completed = Payment::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentStatus::Completed.to_string()),
            )
            .col_expr(
                payment::Column::TransactionId,
                Expr::value(verified.transaction_id.clone()),
            )
            .col_expr(
                payment::Column::GatewayResponse,
                Expr::value(verified.raw.clone()),
            )
            .col_expr(payment::Column::PaidAt, Expr::value(now))
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::Id.eq(payment.id))
            .filter(payment::Column::Status.eq(PaymentStatus::Pending.to_string()))
            .exec(txn)
            .await?;

        if completed.rows_affected == 0 {
            let current = reload_payment(txn, payment.id).await?;
            return match current.payment_status()? {
                PaymentStatus::Completed => {
                    let order = find_owned_order(txn, current.order_id, None).await?;
                    Ok(ReconciliationOutcome {
                        order,
                        payment: current,
                        applied: false,
                    })
                }
                _ => Err(ServiceError::invalid_transition(
                    current.status,
                    PaymentStatus::Completed.to_string(),
                )),
            };
        }

        let order = transition_in(
            txn,
            order.id,
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderPatch {
                paid: Some((now, reference.to_string())),
            },
        )
        .await?;

        let payment = reload_payment(txn, payment.id).await?;

        Ok(ReconciliationOutcome {
            order,
            payment,
            applied: true,
        })
    }

    /// Re-points an order's pending payment row at the verified reference.
    async fn adopt(
        &self,
        txn: &DatabaseTransaction,
        payment: PaymentModel,
        reference: &str,
    ) -> Result<PaymentModel, ServiceError> {
        if payment.payment_status()? != PaymentStatus::Pending {
            warn!(
                payment_id = %payment.id,
                existing_reference = %payment.payment_reference,
                "Order already has a settled payment under another reference"
            );
            return Err(ServiceError::Conflict(format!(
                "order already has a {} payment {}",
                payment.status, payment.payment_reference
            )));
        }

        info!(
            payment_id = %payment.id,
            previous_reference = %payment.payment_reference,
            "Adopting existing payment row for verified reference"
        );

        let mut active: payment::ActiveModel = payment.into();
        active.payment_reference = Set(reference.to_string());
        active.updated_at = Set(Utc::now());
        Ok(active.update(txn).await?)
    }

    /// Records a payment the gateway confirmed but we never created.
    async fn insert_orphan(
        &self,
        txn: &DatabaseTransaction,
        order: &OrderModel,
        reference: &str,
        verified: &VerifiedTransaction,
    ) -> Result<PaymentModel, ServiceError> {
        info!(order_id = %order.id, "Creating payment row for out-of-band payment");

        let now = Utc::now();
        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            payment_method: Set(PaymentMethod::CreditCard.to_string()),
            amount: Set(from_minor_units(verified.amount_minor)),
            currency: Set(verified
                .currency
                .clone()
                .unwrap_or_else(|| self.default_currency.clone())),
            status: Set(PaymentStatus::Pending.to_string()),
            transaction_id: Set(None),
            payment_reference: Set(reference.to_string()),
            gateway_response: Set(None),
            paid_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(payment.insert(txn).await?)
    }
}

fn is_reference_safe(reference: &str) -> bool {
    reference
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn find_by_reference<C: ConnectionTrait>(
    conn: &C,
    reference: &str,
    lock_row: bool,
) -> Result<Option<PaymentModel>, ServiceError> {
    let mut query = Payment::find().filter(payment::Column::PaymentReference.eq(reference));
    if lock_row {
        query = query.lock_exclusive();
    }
    Ok(query.one(conn).await?)
}

async fn reload_payment<C: ConnectionTrait>(
    conn: &C,
    payment_id: Uuid,
) -> Result<PaymentModel, ServiceError> {
    Payment::find_by_id(payment_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Payment {} not found", payment_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_style_references_are_accepted() {
        assert!(is_reference_safe("PAY-1A2B3C4D-1733740200-1K7QZ"));
        assert!(is_reference_safe("T123_abc"));
    }

    #[test]
    fn path_and_query_characters_are_refused() {
        for reference in ["PAY/1", "../verify", "PAY?x=1", "PAY#1", "PAY 1", "PAY%2F"] {
            assert!(!is_reference_safe(reference), "{reference} should be refused");
        }
    }
}
