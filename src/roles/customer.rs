//! Customer: places, cancels and rates orders.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{action_failed, resolve};
use crate::api::CustomerApi;
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{NewOrder, Order, Rateable, Rating};
use crate::status::{check_transition, Bucket, OrderStatus, Role};
use crate::store::{ReconciliationStore, RoleFeed};

pub struct CustomerFeed {
    api: Arc<dyn CustomerApi>,
}

impl CustomerFeed {
    pub fn new(api: Arc<dyn CustomerApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl RoleFeed for CustomerFeed {
    type Entity = Order;

    fn role(&self) -> Role {
        Role::Customer
    }

    async fn fetch_bucket(&self, bucket: Bucket) -> DeliveryResult<Vec<Order>> {
        self.api.list_orders(bucket).await
    }

    async fn fetch_detail(&self, id: &str) -> DeliveryResult<Order> {
        self.api.get_order(id).await
    }
}

pub type CustomerStore = ReconciliationStore<CustomerFeed>;

pub struct CustomerGateway {
    api: Arc<dyn CustomerApi>,
    store: Arc<CustomerStore>,
}

impl CustomerGateway {
    pub fn new(api: Arc<dyn CustomerApi>, store: Arc<CustomerStore>) -> Self {
        Self { api, store }
    }

    pub fn store(&self) -> &Arc<CustomerStore> {
        &self.store
    }

    pub async fn place_order(&self, order: &NewOrder) -> DeliveryResult<Order> {
        order.validate()?;

        let placed = self
            .api
            .place_order(order)
            .await
            .map_err(|e| action_failed(Role::Customer, "place_order", "-", e))?;
        info!(order_id = %placed.id, status = %placed.status, "Order placed");
        self.store.apply_optimistic(placed.clone());
        Ok(placed)
    }

    /// Cancel while the order has not been picked up yet.
    pub async fn cancel_order(&self, id: &str) -> DeliveryResult<Order> {
        let current = resolve(&self.store, id).await?;
        check_transition(Role::Customer, &current.status, &OrderStatus::Cancelled)?;

        let updated = self
            .api
            .cancel_order(id)
            .await
            .map_err(|e| action_failed(Role::Customer, "cancel_order", id, e))?;
        info!(order_id = id, "Order cancelled by customer");
        self.store.apply_optimistic(updated.clone());
        Ok(updated)
    }

    /// Rate a delivered order. Allowed once per order.
    pub async fn submit_rating(&self, id: &str, rating: Rating) -> DeliveryResult<()> {
        let rating = Rating::new(rating.score, rating.comment)?;
        let current = resolve(&self.store, id).await?;

        if current.status != OrderStatus::Delivered {
            return Err(DeliveryError::IllegalTransition {
                role: Role::Customer,
                from: current.status,
                action: "rate the order".into(),
            });
        }
        if current.rating().is_some() {
            return Err(DeliveryError::IllegalTransition {
                role: Role::Customer,
                from: current.status,
                action: "rate the order again".into(),
            });
        }

        self.api
            .submit_rating(id, &rating)
            .await
            .map_err(|e| action_failed(Role::Customer, "submit_rating", id, e))?;
        info!(order_id = id, score = rating.score, "Rating submitted");
        self.store.update_rating(id, rating)
    }

    /// Open an order's full page: fetch its detail record into the store.
    pub async fn open_order(&self, id: &str) -> DeliveryResult<Order> {
        self.store.load_detail(id).await
    }
}
