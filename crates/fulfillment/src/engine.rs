use std::sync::Arc;

use common::Clock;
use store::Store;

use crate::ledger::StockLedger;
use crate::orders::OrderService;
use crate::payments::PaymentCoordinator;
use crate::reservation::ReservationCoordinator;
use crate::services::{Catalog, CredentialVault, PaymentGateway};
use crate::settings::FulfillmentSettings;
use crate::sweeper::ExpirationSweeper;

/// The five fulfillment components wired over one store.
#[derive(Clone)]
pub struct FulfillmentEngine<S, C, G> {
    pub ledger: StockLedger<S, C>,
    pub sweeper: ExpirationSweeper<S>,
    pub reservations: ReservationCoordinator<S, C>,
    pub orders: OrderService<S, C>,
    pub payments: PaymentCoordinator<S, C, G>,
}

impl<S, C, G> FulfillmentEngine<S, C, G>
where
    S: Store + Clone,
    C: Catalog + Clone,
    G: PaymentGateway,
{
    pub fn new(
        store: S,
        catalog: C,
        gateway: G,
        vault: Arc<dyn CredentialVault>,
        clock: Arc<dyn Clock>,
        settings: FulfillmentSettings,
    ) -> Self {
        let ledger = StockLedger::new(store.clone(), catalog.clone(), vault, clock.clone());
        let sweeper = ExpirationSweeper::new(store.clone(), clock.clone());
        let reservations = ReservationCoordinator::new(ledger.clone(), catalog);
        let orders = OrderService::new(
            store.clone(),
            ledger.clone(),
            reservations.clone(),
            clock.clone(),
            settings.reservation_ttl(),
        );
        let payments = PaymentCoordinator::new(store, orders.clone(), gateway, clock, settings);

        Self {
            ledger,
            sweeper,
            reservations,
            orders,
            payments,
        }
    }
}
