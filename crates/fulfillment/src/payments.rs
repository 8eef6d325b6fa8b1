//! Payment lifecycle and its cascades into orders.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use common::{Clock, OrderId, PaymentId, UserId};
use domain::{
    GatewayOutcome, Money, Order, OrderError, OrderStatus, Payment, PaymentError, PaymentMethod,
    PaymentStatus,
};
use serde::Serialize;
use store::{PaymentStore, StockStore, Store, StoreError};

use crate::error::{EngineError, Result};
use crate::orders::OrderService;
use crate::services::{Catalog, PaymentGateway};
use crate::settings::FulfillmentSettings;

const EXPIRED_REASON: &str = "Payment expired";
const GATEWAY_FAILURE_REASON: &str = "Payment failed at gateway";

/// What a webhook delivery did.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    /// The verdict moved the payment.
    Applied(Payment),
    /// The payment already carried this verdict; nothing changed.
    Duplicate(Payment),
}

impl WebhookOutcome {
    pub fn payment(&self) -> &Payment {
        match self {
            WebhookOutcome::Applied(payment) | WebhookOutcome::Duplicate(payment) => payment,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied(_) => "applied",
            WebhookOutcome::Duplicate(_) => "duplicate",
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    /// Completed payments whose order was still open.
    pub retried: u64,
    /// Of those, how many orders are now completed.
    pub completed: u64,
    /// Completed payments whose order had already failed or been cancelled.
    pub needs_refund: Vec<PaymentId>,
}

/// Owns the payment status machine and drives orders from its outcomes.
///
/// ```text
/// PENDING ──► PROCESSING ──► COMPLETED ──► REFUNDED
///    │             │
///    └─────────────┴──► FAILED | CANCELLED
/// ```
///
/// A payment write always commits before its order cascade runs. A cascade
/// that fails after a completed payment is left for
/// [`PaymentCoordinator::reconcile_completed_payments`].
#[derive(Clone)]
pub struct PaymentCoordinator<S, C, G> {
    store: S,
    orders: OrderService<S, C>,
    gateway: G,
    clock: Arc<dyn Clock>,
    settings: FulfillmentSettings,
}

impl<S, C, G> PaymentCoordinator<S, C, G>
where
    S: Store + Clone,
    C: Catalog + Clone,
    G: PaymentGateway,
{
    pub fn new(
        store: S,
        orders: OrderService<S, C>,
        gateway: G,
        clock: Arc<dyn Clock>,
        settings: FulfillmentSettings,
    ) -> Self {
        Self {
            store,
            orders,
            gateway,
            clock,
            settings,
        }
    }

    /// Creates the single active payment for an open order.
    ///
    /// `ttl` defaults to the configured payment lifetime. The payment never
    /// outlives the order's stock holds, so a late success cannot settle
    /// against units already handed to another buyer.
    #[tracing::instrument(skip(self))]
    pub async fn create_payment(
        &self,
        order_id: OrderId,
        method: &str,
        ttl: Option<Duration>,
    ) -> Result<Payment> {
        let method: PaymentMethod = method
            .parse()
            .map_err(|e: domain::UnknownVariant| EngineError::Validation(e.to_string()))?;
        if !self.settings.is_enabled(method) {
            return Err(EngineError::Validation(format!(
                "Payment method {method} is not enabled"
            )));
        }

        let order = self.orders.get_order(order_id).await?;
        if order.is_terminal() {
            return Err(OrderError::InvalidStateTransition {
                current_state: order.status,
                action: "create payment for",
            }
            .into());
        }

        if self.store.find_active_for_order(order_id).await?.is_some() {
            return Err(already_paying(order_id));
        }

        let now = self.clock.now();
        let hold_ends = self
            .hold_deadline(&order)
            .await?
            .filter(|deadline| *deadline > now)
            .ok_or_else(|| {
                EngineError::Validation(format!("stock hold for order {order_id} has lapsed"))
            })?;
        let ttl = ttl
            .unwrap_or_else(|| self.settings.payment_ttl())
            .min(hold_ends - now);
        let payment = Payment::new(order_id, order.total_amount, method, ttl, now)?;
        self.store
            .insert_payment(&payment)
            .await
            .map_err(|e| match e {
                StoreError::Duplicate { .. } => already_paying(order_id),
                other => other.into(),
            })?;

        metrics::counter!("payments_created_total").increment(1);
        tracing::info!(
            payment_id = %payment.id,
            %order_id,
            reference = %payment.reference,
            %method,
            "payment created"
        );
        Ok(payment)
    }

    /// Hands a pending payment to the gateway and moves it to PROCESSING.
    ///
    /// A still-pending order follows it to PROCESSING.
    #[tracing::instrument(skip(self))]
    pub async fn initiate_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        let mut payment = self.get_payment(payment_id).await?;
        if !payment.status.can_start_processing() {
            return Err(PaymentError::InvalidStateTransition {
                current_state: payment.status,
                action: "initiate",
            }
            .into());
        }

        let initiation = self.gateway.initiate(&payment).await?;

        let expected = payment.version;
        payment.start_processing(initiation.transaction_id, self.clock.now())?;
        payment.gateway_response = Some(initiation.response);
        payment.version = self.store.update_payment(&payment, expected).await?;
        tracing::info!(
            %payment_id,
            transaction_id = payment.transaction_id.as_deref().unwrap_or_default(),
            "payment initiated"
        );

        let order = self.orders.get_order(payment.order_id).await?;
        if order.status == OrderStatus::Pending
            && let Err(e) = self.orders.mark_as_processing(order.id).await
        {
            tracing::warn!(order_id = %order.id, error = %e, "order did not follow payment to processing");
        }
        Ok(payment)
    }

    /// Completes the payment, then the order.
    #[tracing::instrument(skip(self, gateway_response))]
    pub async fn mark_as_completed(
        &self,
        payment_id: PaymentId,
        transaction_id: &str,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Payment> {
        let payment = self.get_payment(payment_id).await?;
        self.complete(payment, transaction_id, gateway_response).await
    }

    /// Fails the payment, then the order, releasing its stock.
    #[tracing::instrument(skip(self, gateway_response))]
    pub async fn mark_as_failed(
        &self,
        payment_id: PaymentId,
        reason: &str,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Payment> {
        let payment = self.get_payment(payment_id).await?;
        self.fail(payment, reason, gateway_response).await
    }

    /// Cancels an open payment, then the order, releasing its stock.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_payment(&self, payment_id: PaymentId, reason: &str) -> Result<Payment> {
        let mut payment = self.get_payment(payment_id).await?;
        let expected = payment.version;
        payment.cancel(reason, self.clock.now())?;
        payment.version = self.store.update_payment(&payment, expected).await?;
        metrics::counter!("payments_cancelled_total").increment(1);
        tracing::info!(%payment_id, reason, "payment cancelled");

        let order = self.orders.get_order(payment.order_id).await?;
        if order.status.can_cancel() {
            self.orders.cancel_order(order.id, reason).await?;
        }
        Ok(payment)
    }

    /// Refunds a completed payment, at most once and at most its amount.
    ///
    /// Sold stock stays sold.
    #[tracing::instrument(skip(self))]
    pub async fn process_refund(
        &self,
        payment_id: PaymentId,
        amount: Money,
        reason: &str,
    ) -> Result<Payment> {
        let mut payment = self.get_payment(payment_id).await?;
        let expected = payment.version;
        payment.refund(amount, reason, self.clock.now())?;
        payment.version = self.store.update_payment(&payment, expected).await?;

        metrics::counter!("payments_refunded_total").increment(1);
        tracing::info!(%payment_id, %amount, reason, "payment refunded");
        Ok(payment)
    }

    /// Applies a gateway verdict delivered by webhook.
    ///
    /// Replays of a verdict the payment already carries are reported as
    /// duplicates and only re-drive the order cascade.
    #[tracing::instrument(skip(self, gateway_response))]
    pub async fn process_webhook(
        &self,
        transaction_id: &str,
        raw_status: &str,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<WebhookOutcome> {
        metrics::counter!("payment_webhooks_total").increment(1);

        let outcome: GatewayOutcome = raw_status.parse().map_err(|e: domain::UnknownVariant| {
            tracing::warn!(transaction_id, raw_status, "unmapped gateway status");
            EngineError::WebhookProcessing(e.to_string())
        })?;

        let mut retried = false;
        loop {
            let payment = self
                .store
                .find_by_transaction_id(transaction_id)
                .await?
                .ok_or_else(|| EngineError::not_found("payment transaction", transaction_id))?;

            match self
                .apply_outcome(payment, outcome, transaction_id, gateway_response.clone())
                .await
            {
                Err(e) if e.is_conflict() && !retried => {
                    tracing::debug!(transaction_id, "webhook raced another writer, re-reading");
                    retried = true;
                }
                result => return result,
            }
        }
    }

    async fn apply_outcome(
        &self,
        payment: Payment,
        outcome: GatewayOutcome,
        transaction_id: &str,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<WebhookOutcome> {
        match (outcome, payment.status) {
            (GatewayOutcome::Completed, PaymentStatus::Completed) => {
                metrics::counter!("payment_webhook_replays_total").increment(1);
                if let Err(e) = self.cascade_completion(&payment).await {
                    tracing::warn!(
                        payment_id = %payment.id,
                        error = %e,
                        "replayed completion left for reconciliation"
                    );
                }
                Ok(WebhookOutcome::Duplicate(payment))
            }
            (GatewayOutcome::Completed, PaymentStatus::Refunded) => {
                metrics::counter!("payment_webhook_replays_total").increment(1);
                Ok(WebhookOutcome::Duplicate(payment))
            }
            (GatewayOutcome::Failed, PaymentStatus::Failed) => {
                metrics::counter!("payment_webhook_replays_total").increment(1);
                let reason = payment
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| GATEWAY_FAILURE_REASON.to_string());
                if let Err(e) = self.cascade_failure(&payment, &reason).await {
                    tracing::warn!(
                        payment_id = %payment.id,
                        error = %e,
                        "replayed failure could not close order"
                    );
                }
                Ok(WebhookOutcome::Duplicate(payment))
            }
            (GatewayOutcome::Completed, status) if status.is_open() => self
                .complete(payment, transaction_id, gateway_response)
                .await
                .map(WebhookOutcome::Applied),
            (GatewayOutcome::Failed, status) if status.is_open() => {
                let reason = failure_reason(gateway_response.as_ref());
                self.fail(payment, &reason, gateway_response)
                    .await
                    .map(WebhookOutcome::Applied)
            }
            (outcome, status) => {
                tracing::warn!(
                    payment_id = %payment.id,
                    %outcome,
                    %status,
                    "webhook contradicts settled payment"
                );
                Err(PaymentError::InvalidStateTransition {
                    current_state: status,
                    action: "apply webhook to",
                }
                .into())
            }
        }
    }

    /// Polls the gateway and applies a settled verdict. A pending verdict
    /// leaves the payment unchanged.
    #[tracing::instrument(skip(self))]
    pub async fn verify_payment_with_gateway(&self, payment_id: PaymentId) -> Result<Payment> {
        let payment = self.get_payment(payment_id).await?;
        let transaction_id = payment.transaction_id.clone().ok_or_else(|| {
            EngineError::Validation(format!(
                "payment {payment_id} has not been sent to the gateway"
            ))
        })?;
        if !payment.status.is_open() {
            return Ok(payment);
        }

        match self.gateway.check_status(&transaction_id).await?.outcome() {
            None => Ok(payment),
            Some(GatewayOutcome::Completed) => self.complete(payment, &transaction_id, None).await,
            Some(GatewayOutcome::Failed) => {
                self.fail(payment, GATEWAY_FAILURE_REASON, None).await
            }
        }
    }

    /// Fails every open payment past its expiry, releasing order stock.
    /// Returns how many were expired.
    #[tracing::instrument(skip(self))]
    pub async fn process_expired_payments(&self) -> Result<u64> {
        let expired = PaymentStore::list_expired(&self.store, self.clock.now()).await?;

        let mut count = 0;
        for payment in expired {
            let payment_id = payment.id;
            match self.fail(payment, EXPIRED_REASON, None).await {
                Ok(_) => count += 1,
                Err(e) => tracing::warn!(%payment_id, error = %e, "could not expire payment"),
            }
        }

        if count > 0 {
            metrics::counter!("payments_expired_total").increment(count);
            tracing::info!(count, "expired payments processed");
        }
        Ok(count)
    }

    /// Re-drives order completion for completed payments whose order is
    /// still open, and reports those whose order closed without them.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_completed_payments(&self) -> Result<ReconciliationReport> {
        let mut report = ReconciliationReport::default();

        for payment in self.store.list_by_status(PaymentStatus::Completed).await? {
            let order = match self.orders.get_order(payment.order_id).await {
                Ok(order) => order,
                Err(e) => {
                    tracing::error!(payment_id = %payment.id, error = %e, "payment without order");
                    continue;
                }
            };

            match order.status {
                OrderStatus::Completed => {}
                OrderStatus::Pending | OrderStatus::Processing => {
                    report.retried += 1;
                    match self.orders.mark_as_completed(order.id).await {
                        Ok(_) => report.completed += 1,
                        Err(e) if e.is_stock_conflict() => {
                            tracing::error!(
                                payment_id = %payment.id,
                                order_id = %order.id,
                                error = %e,
                                "order stock was sold elsewhere, refund required"
                            );
                            report.needs_refund.push(payment.id);
                        }
                        Err(e) => tracing::warn!(
                            payment_id = %payment.id,
                            order_id = %order.id,
                            error = %e,
                            "order completion retry failed"
                        ),
                    }
                }
                OrderStatus::Failed | OrderStatus::Cancelled => {
                    tracing::error!(
                        payment_id = %payment.id,
                        order_id = %order.id,
                        order_status = %order.status,
                        "payment completed for a closed order, refund required"
                    );
                    report.needs_refund.push(payment.id);
                }
            }
        }

        metrics::gauge!("payments_requiring_refund").set(report.needs_refund.len() as f64);
        if report.retried > 0 || !report.needs_refund.is_empty() {
            tracing::info!(
                retried = report.retried,
                completed = report.completed,
                needs_refund = report.needs_refund.len(),
                "reconciliation finished"
            );
        }
        Ok(report)
    }

    pub async fn get_payment(&self, payment_id: PaymentId) -> Result<Payment> {
        self.store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| EngineError::not_found("payment", payment_id))
    }

    /// Loads a payment on behalf of the user who placed its order.
    pub async fn get_payment_for_user(
        &self,
        payment_id: PaymentId,
        user_id: UserId,
    ) -> Result<Payment> {
        let payment = self.get_payment(payment_id).await?;
        let order: Order = self.orders.get_order(payment.order_id).await?;
        if !order.is_owned_by(user_id) {
            return Err(EngineError::Unauthorized(format!(
                "payment {payment_id} belongs to another user"
            )));
        }
        Ok(payment)
    }

    /// The order's active payment.
    pub async fn payment_for_order(&self, order_id: OrderId) -> Result<Payment> {
        self.store
            .find_active_for_order(order_id)
            .await?
            .ok_or_else(|| EngineError::not_found("payment for order", order_id))
    }

    /// Earliest hold among the order's units, or `None` once any of them
    /// has lost its hold.
    async fn hold_deadline(&self, order: &Order) -> Result<Option<DateTime<Utc>>> {
        let mut deadline: Option<DateTime<Utc>> = None;
        for unit_id in order.stock_unit_ids() {
            let Some(until) = self
                .store
                .get_unit(unit_id)
                .await?
                .and_then(|unit| unit.reserved_until)
            else {
                return Ok(None);
            };
            deadline = Some(deadline.map_or(until, |d| d.min(until)));
        }
        Ok(deadline)
    }

    async fn complete(
        &self,
        mut payment: Payment,
        transaction_id: &str,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Payment> {
        let expected = payment.version;
        payment.complete(transaction_id, gateway_response, self.clock.now())?;
        payment.version = self.store.update_payment(&payment, expected).await?;
        metrics::counter!("payments_completed_total").increment(1);
        tracing::info!(payment_id = %payment.id, transaction_id, "payment completed");

        self.cascade_completion(&payment).await?;
        Ok(payment)
    }

    async fn fail(
        &self,
        mut payment: Payment,
        reason: &str,
        gateway_response: Option<serde_json::Value>,
    ) -> Result<Payment> {
        let expected = payment.version;
        payment.fail(reason, gateway_response, self.clock.now())?;
        payment.version = self.store.update_payment(&payment, expected).await?;
        metrics::counter!("payments_failed_total").increment(1);
        tracing::info!(payment_id = %payment.id, reason, "payment failed");

        self.cascade_failure(&payment, reason).await?;
        Ok(payment)
    }

    async fn cascade_completion(&self, payment: &Payment) -> Result<()> {
        let order = self.orders.get_order(payment.order_id).await?;
        if order.status == OrderStatus::Completed {
            return Ok(());
        }
        if !order.status.can_complete() {
            // Reported by reconciliation as needing a refund.
            tracing::error!(
                payment_id = %payment.id,
                order_id = %order.id,
                order_status = %order.status,
                "payment completed for a closed order, refund required"
            );
            return Ok(());
        }

        self.orders
            .mark_as_completed(order.id)
            .await
            .map(|_| ())
            .inspect_err(|e| {
                tracing::error!(
                    payment_id = %payment.id,
                    order_id = %order.id,
                    error = %e,
                    "order completion failed after payment completed"
                )
            })
    }

    async fn cascade_failure(&self, payment: &Payment, reason: &str) -> Result<()> {
        let order = self.orders.get_order(payment.order_id).await?;
        if !order.status.can_fail() {
            tracing::debug!(order_id = %order.id, status = %order.status, "order already closed");
            return Ok(());
        }
        self.orders.mark_as_failed(order.id, reason).await.map(|_| ())
    }
}

fn already_paying(order_id: OrderId) -> EngineError {
    EngineError::AlreadyExists(format!("order {order_id} already has an active payment"))
}

/// Failure reason carried by a gateway response, if it names one.
fn failure_reason(gateway_response: Option<&serde_json::Value>) -> String {
    gateway_response
        .and_then(|response| {
            response
                .get("failure_reason")
                .or_else(|| response.get("reason"))
        })
        .and_then(|reason| reason.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| GATEWAY_FAILURE_REASON.to_string())
}
