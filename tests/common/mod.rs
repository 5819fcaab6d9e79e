#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use bazaar_api::{
    auth::{issue_token, Owner, SESSION_HEADER},
    config::AppConfig,
    db,
    entities::{
        commerce::{customer_profile, product, shipping_method, CustomerProfile},
        PaymentMethod,
    },
    events::{self, EventSender},
    handlers::AppServices,
    payment_gateway::{
        GatewayError, GatewayOutcome, InitializeRequest, InitializedTransaction, PaymentGateway,
        VerifiedTransaction,
    },
    services::commerce::{BuildOrderInput, BuiltOrder},
    AppState,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_bazaar";

/// What the fake gateway answers to `verify`.
#[derive(Debug, Clone)]
pub enum VerifyScript {
    /// Charge succeeded for this amount; metadata is echoed back
    Approve { amount_minor: i64, metadata: Value },
    Decline(String),
    Fail(GatewayError),
    /// Never answers; the caller's deadline has to cut it off
    Hang,
}

/// Scripted in-process stand-in for the hosted payment gateway.
pub struct FakeGateway {
    verify_script: Mutex<VerifyScript>,
    initialize_decline: Mutex<Option<String>>,
    verify_delay: Mutex<Duration>,
    last_initialize: Mutex<Option<InitializeRequest>>,
    verify_calls: AtomicUsize,
    initialize_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            verify_script: Mutex::new(VerifyScript::Decline("not scripted".into())),
            initialize_decline: Mutex::new(None),
            verify_delay: Mutex::new(Duration::ZERO),
            last_initialize: Mutex::new(None),
            verify_calls: AtomicUsize::new(0),
            initialize_calls: AtomicUsize::new(0),
        }
    }

    pub fn script_verify(&self, script: VerifyScript) {
        *self.verify_script.lock().unwrap() = script;
    }

    /// Approves any reference for `amount` and echoes `order_id` in metadata.
    pub fn approve(&self, amount: Decimal, order_id: Option<Uuid>) {
        let amount_minor = bazaar_api::payment_gateway::to_minor_units(amount.round_dp(2))
            .expect("test amounts have two decimals");
        let metadata = match order_id {
            Some(id) => json!({ "order_id": id.to_string() }),
            None => json!({}),
        };
        self.script_verify(VerifyScript::Approve {
            amount_minor,
            metadata,
        });
    }

    pub fn decline_initialize(&self, message: &str) {
        *self.initialize_decline.lock().unwrap() = Some(message.to_string());
    }

    pub fn set_verify_delay(&self, delay: Duration) {
        *self.verify_delay.lock().unwrap() = delay;
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn last_initialize(&self) -> Option<InitializeRequest> {
        self.last_initialize.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn initialize(
        &self,
        request: InitializeRequest,
    ) -> Result<GatewayOutcome<InitializedTransaction>, GatewayError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_initialize.lock().unwrap() = Some(request.clone());

        if let Some(message) = self.initialize_decline.lock().unwrap().clone() {
            return Ok(GatewayOutcome::Declined { message });
        }

        Ok(GatewayOutcome::Approved(InitializedTransaction {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            access_code: format!("ac_{}", request.reference.len()),
            reference: request.reference,
        }))
    }

    async fn verify(
        &self,
        reference: &str,
    ) -> Result<GatewayOutcome<VerifiedTransaction>, GatewayError> {
        let call = self.verify_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let delay = *self.verify_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let script = self.verify_script.lock().unwrap().clone();
        match script {
            VerifyScript::Approve {
                amount_minor,
                metadata,
            } => Ok(GatewayOutcome::Approved(VerifiedTransaction {
                transaction_id: format!("trx_{}", call),
                reference: reference.to_string(),
                amount_minor,
                currency: Some("NGN".to_string()),
                metadata: metadata.clone(),
                raw: json!({
                    "id": call,
                    "status": "success",
                    "reference": reference,
                    "amount": amount_minor,
                    "metadata": metadata,
                }),
            })),
            VerifyScript::Decline(message) => Ok(GatewayOutcome::Declined { message }),
            VerifyScript::Fail(error) => Err(error),
            VerifyScript::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(GatewayError::Timeout("hung".into()))
            }
        }
    }
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakeGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::for_tests("sqlite::memory:");
        cfg.webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());
        cfg.gateway.verify_deadline_secs = 2;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakeGateway::new());
        let services = AppServices::new(
            db_arc.clone(),
            event_sender.clone(),
            &cfg,
            gateway.clone(),
        );

        let state = AppState {
            db: db_arc,
            config: Arc::new(cfg),
            event_sender,
            services,
        };

        Self {
            router: bazaar_api::build_router(state.clone()),
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn session(name: &str) -> Owner {
        Owner::Session(format!("sess_{}", name))
    }

    pub fn user() -> Owner {
        Owner::User(Uuid::new_v4())
    }

    /// Send a JSON request as `owner` (bearer token for users, session header otherwise).
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        owner: Option<&Owner>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);

        match owner {
            Some(Owner::User(id)) => {
                let token = issue_token(&self.state.config.jwt_secret, *id, 3600)
                    .expect("issue test token");
                builder = builder.header("authorization", format!("Bearer {}", token));
            }
            Some(Owner::Session(token)) => {
                builder = builder.header(SESSION_HEADER, token.as_str());
            }
            None => {}
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        self.seed_product_with(name, price, stock, true).await
    }

    pub async fn seed_product_with(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        is_active: bool,
    ) -> Uuid {
        let now = Utc::now();
        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            stock: Set(stock),
            is_active: Set(is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product");
        model.id
    }

    /// Creates the owner's profile unless one already exists.
    pub async fn seed_profile(&self, owner: &Owner, email: &str, shipping: Option<&str>) {
        let existing = CustomerProfile::find()
            .filter(customer_profile::Column::Owner.eq(owner.key()))
            .one(&*self.state.db)
            .await
            .expect("look up profile");
        if existing.is_some() {
            return;
        }

        let now = Utc::now();
        customer_profile::ActiveModel {
            id: Set(Uuid::new_v4()),
            owner: Set(owner.key()),
            email: Set(email.to_string()),
            shipping_address: Set(shipping.map(str::to_string)),
            billing_address: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed profile");
    }

    pub async fn seed_shipping_method(&self, price: Decimal, is_active: bool) -> Uuid {
        let model = shipping_method::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Express".to_string()),
            description: Set(None),
            price: Set(price),
            estimated_delivery_time: Set(Some("1-2 days".to_string())),
            is_active: Set(is_active),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed shipping method");
        model.id
    }

    /// Seeds a profile, one product and a cart line, then builds the order.
    pub async fn checkout(&self, owner: &Owner, price: Decimal, quantity: i32) -> BuiltOrder {
        self.seed_profile(owner, "buyer@example.com", Some("12 Marina Road, Lagos"))
            .await;
        let product_id = self.seed_product("Widget", price, 100).await;
        self.state
            .services
            .cart
            .add_or_update(owner, product_id, quantity)
            .await
            .expect("add to cart");
        self.state
            .services
            .checkout
            .build(owner, card_input())
            .await
            .expect("build order")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn card_input() -> BuildOrderInput {
    BuildOrderInput {
        payment_method: PaymentMethod::CreditCard,
        shipping_method_id: None,
        notes: None,
    }
}

pub async fn read_json(response: Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&body).expect("response body is json")
}
