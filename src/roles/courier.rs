//! Courier: accepts open tasks and walks them through pickup and delivery.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{action_failed, required_note, resolve};
use crate::api::{CourierApi, TaskList};
use crate::error::{DeliveryError, DeliveryResult};
use crate::models::{DeliveryTask, IncidentReport};
use crate::status::{check_transition, Bucket, OrderStatus, Role};
use crate::store::{ReconciliationStore, RefreshOutcome, RoleFeed};

pub struct CourierFeed {
    api: Arc<dyn CourierApi>,
}

impl CourierFeed {
    pub fn new(api: Arc<dyn CourierApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl RoleFeed for CourierFeed {
    type Entity = DeliveryTask;

    fn role(&self) -> Role {
        Role::Courier
    }

    async fn fetch_bucket(&self, bucket: Bucket) -> DeliveryResult<Vec<DeliveryTask>> {
        self.api.list_tasks(TaskList::from(bucket)).await
    }

    async fn fetch_detail(&self, id: &str) -> DeliveryResult<DeliveryTask> {
        self.api.get_task(id).await
    }

    fn has_offers(&self) -> bool {
        true
    }

    async fn fetch_offers(&self) -> DeliveryResult<Vec<DeliveryTask>> {
        self.api.list_tasks(TaskList::Available).await
    }
}

pub type CourierStore = ReconciliationStore<CourierFeed>;

pub struct CourierGateway {
    api: Arc<dyn CourierApi>,
    store: Arc<CourierStore>,
}

impl CourierGateway {
    pub fn new(api: Arc<dyn CourierApi>, store: Arc<CourierStore>) -> Self {
        Self { api, store }
    }

    pub fn store(&self) -> &Arc<CourierStore> {
        &self.store
    }

    /// Take an open task. The backend arbitrates races between couriers: on
    /// `Conflict` the store is refreshed at once so the task shows its real
    /// owner, and the conflict is returned rather than retried.
    pub async fn accept_task(&self, id: &str) -> DeliveryResult<DeliveryTask> {
        let current = resolve(&self.store, id).await?;
        check_transition(Role::Courier, &current.status, &OrderStatus::Assigned)?;

        match self.api.accept_task(id).await {
            Ok(task) => {
                info!(task_id = id, courier_id = ?task.courier_id, "Task accepted");
                self.store.apply_optimistic(task.clone());
                Ok(task)
            }
            Err(DeliveryError::Conflict(msg)) => {
                warn!(task_id = id, reason = %msg, "Task already taken, refreshing");
                match self.store.refresh().await {
                    Ok(RefreshOutcome::Skipped) => {
                        debug!(task_id = id, "Refresh after conflict skipped, a poll is already in flight");
                    }
                    Ok(RefreshOutcome::Applied { .. }) => {}
                    Err(e) => warn!(task_id = id, error = %e, "Refresh after conflict failed"),
                }
                Err(DeliveryError::Conflict(msg))
            }
            Err(e) => Err(action_failed(Role::Courier, "accept_task", id, e)),
        }
    }

    /// Move a task one step along pickup and delivery. Taking an open task
    /// goes through [`accept_task`](Self::accept_task) instead.
    pub async fn advance_status(&self, id: &str, to: OrderStatus) -> DeliveryResult<DeliveryTask> {
        let current = resolve(&self.store, id).await?;
        if to == OrderStatus::Assigned || current.status.next_in_sequence().as_ref() != Some(&to) {
            return Err(DeliveryError::IllegalTransition {
                role: Role::Courier,
                from: current.status,
                action: format!("move the task to {to}"),
            });
        }
        check_transition(Role::Courier, &current.status, &to)?;

        let task = self
            .api
            .update_task_status(id, &to, None)
            .await
            .map_err(|e| action_failed(Role::Courier, "advance_status", id, e))?;
        info!(task_id = id, from = %current.status, to = %task.status, "Task advanced");
        self.store.apply_optimistic(task.clone());
        Ok(task)
    }

    /// Abandon a task that cannot be completed. Requires a note explaining why.
    pub async fn cancel_task(&self, id: &str, note: &str) -> DeliveryResult<DeliveryTask> {
        let note = required_note(note)?;
        let current = resolve(&self.store, id).await?;
        check_transition(Role::Courier, &current.status, &OrderStatus::Cancelled)?;

        let task = self
            .api
            .update_task_status(id, &OrderStatus::Cancelled, Some(&note))
            .await
            .map_err(|e| action_failed(Role::Courier, "cancel_task", id, e))?;
        info!(task_id = id, from = %current.status, "Task cancelled by courier");
        self.store.apply_optimistic(task.clone());
        Ok(task)
    }

    /// File an incident for support. Does not change the task's status.
    pub async fn report_incident(&self, id: &str, note: &str) -> DeliveryResult<IncidentReport> {
        let note = required_note(note)?;
        resolve(&self.store, id).await?;

        let report = self
            .api
            .report_incident(id, &note)
            .await
            .map_err(|e| action_failed(Role::Courier, "report_incident", id, e))?;
        info!(task_id = id, incident_id = ?report.id, "Incident reported");
        Ok(report)
    }
}
