//! Restaurant: accepts or rejects incoming orders and hands them to couriers.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use super::{action_failed, resolve};
use crate::api::RestaurantApi;
use crate::error::DeliveryResult;
use crate::models::RestaurantOrder;
use crate::status::{check_transition, Bucket, OrderStatus, Role};
use crate::store::{ReconciliationStore, RoleFeed};

pub struct RestaurantFeed {
    api: Arc<dyn RestaurantApi>,
}

impl RestaurantFeed {
    pub fn new(api: Arc<dyn RestaurantApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl RoleFeed for RestaurantFeed {
    type Entity = RestaurantOrder;

    fn role(&self) -> Role {
        Role::Restaurant
    }

    async fn fetch_bucket(&self, bucket: Bucket) -> DeliveryResult<Vec<RestaurantOrder>> {
        self.api.list_restaurant_orders(bucket).await
    }

    async fn fetch_detail(&self, id: &str) -> DeliveryResult<RestaurantOrder> {
        self.api.get_restaurant_order(id).await
    }
}

pub type RestaurantStore = ReconciliationStore<RestaurantFeed>;

pub struct RestaurantGateway {
    api: Arc<dyn RestaurantApi>,
    store: Arc<RestaurantStore>,
}

impl RestaurantGateway {
    pub fn new(api: Arc<dyn RestaurantApi>, store: Arc<RestaurantStore>) -> Self {
        Self { api, store }
    }

    pub fn store(&self) -> &Arc<RestaurantStore> {
        &self.store
    }

    /// Accept (→ assigned) or reject (→ cancelled) a newly placed order.
    pub async fn accept_or_reject_order(
        &self,
        id: &str,
        accept: bool,
    ) -> DeliveryResult<RestaurantOrder> {
        let target = if accept {
            OrderStatus::Assigned
        } else {
            OrderStatus::Cancelled
        };
        self.move_to(id, target, if accept { "accept_order" } else { "reject_order" })
            .await
    }

    /// Food is ready: the courier is on the way to pick it up.
    pub async fn advance_to_en_route_pickup(&self, id: &str) -> DeliveryResult<RestaurantOrder> {
        self.move_to(id, OrderStatus::EnRouteToPickup, "advance_to_en_route_pickup")
            .await
    }

    async fn move_to(
        &self,
        id: &str,
        target: OrderStatus,
        action: &str,
    ) -> DeliveryResult<RestaurantOrder> {
        let current = resolve(&self.store, id).await?;
        check_transition(Role::Restaurant, &current.status, &target)?;

        let updated = self
            .api
            .update_restaurant_order_status(id, &target)
            .await
            .map_err(|e| action_failed(Role::Restaurant, action, id, e))?;
        info!(order_id = id, from = %current.status, to = %updated.status, action, "Restaurant order updated");
        self.store.apply_optimistic(updated.clone());
        Ok(updated)
    }
}
