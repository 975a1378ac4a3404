//! In-process fake of the delivery backend.
//!
//! One order table is shared by all three role surfaces, so an action taken
//! through one role's gateway shows up in the other roles' next refresh.
//! List endpoints return summary-shaped records and detail endpoints return
//! everything, the way the real backend does.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use the_small_delivery_lib::api::{CourierApi, CustomerApi, RestaurantApi, TaskList};
use the_small_delivery_lib::models::{DeliveryLocation, StatusHistoryEntry};
use the_small_delivery_lib::{
    Bucket, ChangeNotifier, CourierFeed, CourierGateway, CourierStore, CustomerFeed,
    CustomerGateway, CustomerStore, DeliveryError, DeliveryResult, DeliveryTask, IncidentReport,
    LineItem, LocalDb, NewOrder, Order, OrderStatus, Rating, RecordingSink, RestaurantFeed,
    RestaurantGateway, RestaurantOrder, RestaurantStore, Role,
};

pub const ME: &str = "courier-7";

#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
    pub restaurant_name: String,
    pub customer_name: String,
    pub items: Vec<LineItem>,
    pub delivery_fee: i64,
    pub delivery_location: DeliveryLocation,
    pub notes: Option<String>,
    pub courier_id: Option<String>,
    pub rider_name: Option<String>,
    pub rider_phone: Option<String>,
    pub rating: Option<Rating>,
    pub history: Vec<StatusHistoryEntry>,
}

impl Record {
    fn total(&self) -> i64 {
        self.items.iter().map(LineItem::line_total).sum::<i64>() + self.delivery_fee
    }
}

#[derive(Default)]
struct FakeState {
    orders: BTreeMap<String, Record>,
    next_id: u32,
    clock: i64,
    offline: bool,
    calls: Vec<String>,
    incidents: Vec<IncidentReport>,
}

impl FakeState {
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + ChronoDuration::seconds(self.clock)
    }

    fn record(&self, id: &str) -> DeliveryResult<&Record> {
        self.orders
            .get(id)
            .ok_or_else(|| DeliveryError::NotFound(id.to_string()))
    }

    fn set_status(&mut self, id: &str, status: OrderStatus) -> DeliveryResult<()> {
        let at = self.tick();
        let record = self
            .orders
            .get_mut(id)
            .ok_or_else(|| DeliveryError::NotFound(id.to_string()))?;
        record.status = status.clone();
        record.history.push(StatusHistoryEntry { status, at });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    stall_offers: AtomicBool,
    offers_stalled: Notify,
    offers_resume: Notify,
}

pub fn sample_items() -> Vec<LineItem> {
    vec![
        LineItem {
            name: "Margherita".into(),
            size: Some("large".into()),
            spice_level: None,
            add_ons: vec!["extra_cheese".into()],
            quantity: 2,
            unit_price: 1150,
        },
        LineItem {
            name: "Lemonade".into(),
            size: None,
            spice_level: None,
            add_ons: Vec::new(),
            quantity: 1,
            unit_price: 300,
        },
    ]
}

pub fn sample_location() -> DeliveryLocation {
    DeliveryLocation {
        name: "12 Harbour Street".into(),
        coordinate: None,
    }
}

pub fn sample_new_order() -> NewOrder {
    NewOrder {
        restaurant_id: "rest-1".into(),
        items: sample_items(),
        delivery_location: sample_location(),
        delivery_fee: Some(250),
        notes: Some("Ring twice".into()),
        requested_time: None,
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert an order directly, as if another client had placed it.
    pub fn seed(&self, id: &str, status: OrderStatus) {
        let mut state = self.state.lock().unwrap();
        let at = state.tick();
        state.orders.insert(
            id.to_string(),
            Record {
                id: id.to_string(),
                status: status.clone(),
                placed_at: at,
                restaurant_name: "Luigi's".into(),
                customer_name: "Dana".into(),
                items: sample_items(),
                delivery_fee: 250,
                delivery_location: sample_location(),
                notes: Some("Ring twice".into()),
                courier_id: None,
                rider_name: None,
                rider_phone: None,
                rating: None,
                history: vec![StatusHistoryEntry { status, at }],
            },
        );
    }

    /// A server-side status change no gateway asked for.
    pub fn force_status(&self, id: &str, status: OrderStatus) {
        self.state.lock().unwrap().set_status(id, status).unwrap();
    }

    /// Bind a task to some other courier, as a competing accept would.
    pub fn bind_courier(&self, id: &str, courier_id: &str) {
        let mut state = self.state.lock().unwrap();
        let record = state.orders.get_mut(id).unwrap();
        record.courier_id = Some(courier_id.to_string());
        record.rider_name = Some(format!("Rider {courier_id}"));
    }

    /// Hold the next `GET /delivery/available` until [`resume_offers`] is
    /// called. [`offers_stalled`] resolves once a request is parked.
    ///
    /// [`resume_offers`]: FakeBackend::resume_offers
    /// [`offers_stalled`]: FakeBackend::offers_stalled
    pub fn stall_offers(&self) {
        self.stall_offers.store(true, Ordering::SeqCst);
    }

    pub async fn offers_stalled(&self) {
        self.offers_stalled.notified().await;
    }

    pub fn resume_offers(&self) {
        self.stall_offers.store(false, Ordering::SeqCst);
        self.offers_resume.notify_one();
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn record(&self, id: &str) -> Record {
        self.state.lock().unwrap().orders[id].clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn incidents(&self) -> Vec<IncidentReport> {
        self.state.lock().unwrap().incidents.clone()
    }

    fn enter(&self, call: String) -> DeliveryResult<std::sync::MutexGuard<'_, FakeState>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.offline {
            return Err(DeliveryError::Network("connection refused".into()));
        }
        Ok(state)
    }

    // -- projections --------------------------------------------------------

    fn order_summary(r: &Record) -> Order {
        let mut order = Order::summary(r.id.clone(), r.status.clone());
        order.placed_at = Some(r.placed_at);
        order.restaurant_name = Some(r.restaurant_name.clone());
        order.total_amount = Some(r.total());
        order.rating = r.rating.clone();
        order
    }

    fn order_detail(r: &Record) -> Order {
        let mut order = Self::order_summary(r);
        order.delivery_fee = Some(r.delivery_fee);
        order.items = r.items.clone();
        order.delivery_location = Some(r.delivery_location.clone());
        order.notes = r.notes.clone();
        order.rider_name = r.rider_name.clone();
        order.rider_phone = r.rider_phone.clone();
        order.status_history = r.history.clone();
        order
    }

    /// Until a courier is bound, couriers see the task as open.
    fn courier_status(r: &Record) -> OrderStatus {
        match (&r.status, &r.courier_id) {
            (OrderStatus::Assigned, None) => OrderStatus::Available,
            (status, _) => status.clone(),
        }
    }

    fn task_summary(r: &Record) -> DeliveryTask {
        let mut task = DeliveryTask::summary(r.id.clone(), Self::courier_status(r));
        task.placed_at = Some(r.placed_at);
        task.restaurant_name = Some(r.restaurant_name.clone());
        task.delivery_fee = Some(r.delivery_fee);
        task.courier_id = r.courier_id.clone();
        task
    }

    fn task_detail(r: &Record) -> DeliveryTask {
        let mut task = Self::task_summary(r);
        task.pickup_location = Some(DeliveryLocation {
            name: r.restaurant_name.clone(),
            coordinate: None,
        });
        task.delivery_location = Some(r.delivery_location.clone());
        task.customer_name = Some(r.customer_name.clone());
        task.customer_phone = Some("+30 210 555 0100".into());
        task.items = r.items.clone();
        task.notes = r.notes.clone();
        task.status_history = r.history.clone();
        task
    }

    fn restaurant_summary(r: &Record) -> RestaurantOrder {
        let mut order = RestaurantOrder::summary(r.id.clone(), r.status.clone());
        order.placed_at = Some(r.placed_at);
        order.total_amount = Some(r.total());
        order.customer_name = Some(r.customer_name.clone());
        order
    }

    fn restaurant_detail(r: &Record) -> RestaurantOrder {
        let mut order = Self::restaurant_summary(r);
        order.items = r.items.clone();
        order.delivery_location = Some(r.delivery_location.clone());
        order.notes = r.notes.clone();
        order.rider_name = r.rider_name.clone();
        order.rider_phone = r.rider_phone.clone();
        order.rating = r.rating.clone();
        order.status_history = r.history.clone();
        order
    }
}

fn in_bucket(status: &OrderStatus, bucket: Bucket) -> bool {
    match bucket {
        Bucket::Active => !status.is_terminal(),
        Bucket::History => status.is_terminal(),
    }
}

#[async_trait]
impl CustomerApi for FakeBackend {
    async fn list_orders(&self, bucket: Bucket) -> DeliveryResult<Vec<Order>> {
        let state = self.enter(format!("GET /orders?status={}", bucket.as_str()))?;
        Ok(state
            .orders
            .values()
            .filter(|r| in_bucket(&r.status, bucket))
            .map(Self::order_summary)
            .collect())
    }

    async fn get_order(&self, id: &str) -> DeliveryResult<Order> {
        let state = self.enter(format!("GET /orders/{id}"))?;
        state.record(id).map(Self::order_detail)
    }

    async fn place_order(&self, order: &NewOrder) -> DeliveryResult<Order> {
        let mut state = self.enter("POST /orders".to_string())?;
        state.next_id += 1;
        let id = format!("ord-{}", state.next_id);
        let at = state.tick();
        let record = Record {
            id: id.clone(),
            status: OrderStatus::Available,
            placed_at: at,
            restaurant_name: "Luigi's".into(),
            customer_name: "Dana".into(),
            items: order.items.clone(),
            delivery_fee: order.delivery_fee.unwrap_or_default(),
            delivery_location: order.delivery_location.clone(),
            notes: order.notes.clone(),
            courier_id: None,
            rider_name: None,
            rider_phone: None,
            rating: None,
            history: vec![StatusHistoryEntry {
                status: OrderStatus::Available,
                at,
            }],
        };
        let detail = Self::order_detail(&record);
        state.orders.insert(id, record);
        Ok(detail)
    }

    async fn cancel_order(&self, id: &str) -> DeliveryResult<Order> {
        let mut state = self.enter(format!("PATCH /orders/{id}/cancel"))?;
        if !state.record(id)?.status.is_pre_pickup() {
            return Err(DeliveryError::Conflict("Order already picked up".into()));
        }
        state.set_status(id, OrderStatus::Cancelled)?;
        state.record(id).map(Self::order_detail)
    }

    async fn submit_rating(&self, id: &str, rating: &Rating) -> DeliveryResult<()> {
        let mut state = self.enter(format!("POST /orders/{id}/rating"))?;
        let record = state
            .orders
            .get_mut(id)
            .ok_or_else(|| DeliveryError::NotFound(id.to_string()))?;
        if record.status != OrderStatus::Delivered {
            return Err(DeliveryError::Validation("Order not delivered yet".into()));
        }
        if record.rating.is_some() {
            return Err(DeliveryError::Conflict("Order already rated".into()));
        }
        record.rating = Some(rating.clone());
        Ok(())
    }
}

#[async_trait]
impl CourierApi for FakeBackend {
    async fn list_tasks(&self, list: TaskList) -> DeliveryResult<Vec<DeliveryTask>> {
        if list == TaskList::Available && self.stall_offers.load(Ordering::SeqCst) {
            self.offers_stalled.notify_one();
            self.offers_resume.notified().await;
        }
        let state = self.enter(format!("GET /delivery/{}", list.as_str()))?;
        Ok(state
            .orders
            .values()
            .filter(|r| match list {
                TaskList::Available => {
                    r.courier_id.is_none()
                        && matches!(r.status, OrderStatus::Available | OrderStatus::Assigned)
                }
                TaskList::Active => {
                    r.courier_id.as_deref() == Some(ME) && !r.status.is_terminal()
                }
                TaskList::History => r.courier_id.as_deref() == Some(ME) && r.status.is_terminal(),
            })
            .map(Self::task_summary)
            .collect())
    }

    async fn get_task(&self, id: &str) -> DeliveryResult<DeliveryTask> {
        let state = self.enter(format!("GET /delivery/{id}"))?;
        state.record(id).map(Self::task_detail)
    }

    async fn accept_task(&self, id: &str) -> DeliveryResult<DeliveryTask> {
        let mut state = self.enter(format!("POST /delivery/{id}/accept"))?;
        let record = state.record(id)?;
        if record.courier_id.is_some() {
            return Err(DeliveryError::Conflict(
                "Task already accepted by another courier (TASK_TAKEN)".into(),
            ));
        }
        if record.status == OrderStatus::Available {
            state.set_status(id, OrderStatus::Assigned)?;
        }
        let record = state.orders.get_mut(id).expect("checked above");
        record.courier_id = Some(ME.to_string());
        record.rider_name = Some("Sam".into());
        record.rider_phone = Some("+30 210 555 0199".into());
        Ok(Self::task_detail(record))
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: &OrderStatus,
        note: Option<&str>,
    ) -> DeliveryResult<DeliveryTask> {
        let mut state = self.enter(format!("PATCH /delivery/{id}/status {status}"))?;
        if state.record(id)?.courier_id.as_deref() != Some(ME) {
            return Err(DeliveryError::Conflict("Task is not assigned to you".into()));
        }
        state.set_status(id, status.clone())?;
        if let Some(note) = note {
            state.orders.get_mut(id).expect("checked above").notes = Some(note.to_string());
        }
        state.record(id).map(Self::task_detail)
    }

    async fn report_incident(&self, id: &str, note: &str) -> DeliveryResult<IncidentReport> {
        let mut state = self.enter(format!("POST /delivery/{id}/incident"))?;
        state.record(id)?;
        let reported_at = state.tick();
        let report = IncidentReport {
            id: Some(format!("inc-{}", state.incidents.len() + 1)),
            task_id: id.to_string(),
            note: note.to_string(),
            reported_at: Some(reported_at),
        };
        state.incidents.push(report.clone());
        Ok(report)
    }
}

#[async_trait]
impl RestaurantApi for FakeBackend {
    async fn list_restaurant_orders(&self, bucket: Bucket) -> DeliveryResult<Vec<RestaurantOrder>> {
        let state = self.enter(format!("GET /restaurant/orders?status={}", bucket.as_str()))?;
        Ok(state
            .orders
            .values()
            .filter(|r| in_bucket(&r.status, bucket))
            .map(Self::restaurant_summary)
            .collect())
    }

    async fn get_restaurant_order(&self, id: &str) -> DeliveryResult<RestaurantOrder> {
        let state = self.enter(format!("GET /restaurant/orders/{id}"))?;
        state.record(id).map(Self::restaurant_detail)
    }

    async fn update_restaurant_order_status(
        &self,
        id: &str,
        status: &OrderStatus,
    ) -> DeliveryResult<RestaurantOrder> {
        let mut state = self.enter(format!("PATCH /restaurant/orders/{id}/status {status}"))?;
        state.set_status(id, status.clone())?;
        state.record(id).map(Self::restaurant_detail)
    }
}

// ---------------------------------------------------------------------------
// Role sessions
// ---------------------------------------------------------------------------

pub struct Session<G> {
    pub gateway: G,
    pub sink: Arc<RecordingSink>,
    pub db: Arc<LocalDb>,
}

fn notifier(role: Role) -> (ChangeNotifier, Arc<RecordingSink>, Arc<LocalDb>) {
    let db = Arc::new(LocalDb::open_in_memory().unwrap());
    let sink = Arc::new(RecordingSink::new());
    (ChangeNotifier::new(role, db.clone(), sink.clone()), sink, db)
}

pub fn customer(backend: &Arc<FakeBackend>) -> Session<CustomerGateway> {
    let (notifier, sink, db) = notifier(Role::Customer);
    let store = Arc::new(CustomerStore::new(CustomerFeed::new(backend.clone()), notifier));
    Session {
        gateway: CustomerGateway::new(backend.clone(), store),
        sink,
        db,
    }
}

pub fn courier(backend: &Arc<FakeBackend>) -> Session<CourierGateway> {
    let (notifier, sink, db) = notifier(Role::Courier);
    let store = Arc::new(CourierStore::new(CourierFeed::new(backend.clone()), notifier));
    Session {
        gateway: CourierGateway::new(backend.clone(), store),
        sink,
        db,
    }
}

pub fn restaurant(backend: &Arc<FakeBackend>) -> Session<RestaurantGateway> {
    let (notifier, sink, db) = notifier(Role::Restaurant);
    let store = Arc::new(RestaurantStore::new(RestaurantFeed::new(backend.clone()), notifier));
    Session {
        gateway: RestaurantGateway::new(backend.clone(), store),
        sink,
        db,
    }
}
