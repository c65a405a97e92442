#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mockall::mock;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use tokio::sync::mpsc;

use marketplace_orders::{
    auth::{AuthenticatedUser, Role},
    cache::{CacheBackend, InMemoryCache},
    config::AppConfig,
    db::{self, DbConfig},
    entities::{offer, product, user},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        factory::ServiceFactory,
        payments::{CheckoutSessionRequest, PaymentGateway, PaymentSession},
    },
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

mock! {
    pub Gateway {}

    #[async_trait]
    impl PaymentGateway for Gateway {
        async fn create_checkout_session(
            &self,
            request: &CheckoutSessionRequest,
        ) -> Result<PaymentSession, ServiceError>;
    }
}

/// The session a well-behaved provider hands back for `request`.
pub fn session_for(request: &CheckoutSessionRequest) -> PaymentSession {
    PaymentSession {
        session_id: format!("cs_test_{}", request.order_id),
        url: format!("https://checkout.test/pay/{}", request.order_id),
    }
}

/// Gateway that opens a session for every request.
pub fn accepting_gateway() -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway
        .expect_create_checkout_session()
        .returning(|request| Ok(session_for(request)));
    gateway
}

/// Fresh in-memory SQLite schema plus fully wired services.
pub struct TestContext {
    pub db: Arc<DatabaseConnection>,
    pub cache: Arc<InMemoryCache>,
    pub config: AppConfig,
    pub factory: ServiceFactory,
    events: mpsc::Receiver<Event>,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::build(|_| {}, accepting_gateway()).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(customize, accepting_gateway()).await
    }

    /// Services wired to `gateway`; its expectations are checked when the
    /// context is dropped.
    pub async fn with_gateway(gateway: MockGateway) -> Self {
        Self::build(|_| {}, gateway).await
    }

    pub async fn build(customize: impl FnOnce(&mut AppConfig), gateway: MockGateway) -> Self {
        let mut config = AppConfig::new("sqlite::memory:", WEBHOOK_SECRET);
        // One connection: every pooled connection would otherwise get its own empty database.
        config.db_max_connections = 1;
        config.db_min_connections = 1;
        customize(&mut config);

        let pool = db::establish_connection(&DbConfig::from(&config))
            .await
            .expect("failed to open test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let cache = Arc::new(InMemoryCache::new());
        let (event_sender, events) = EventSender::channel(1024);

        let factory = ServiceFactory::new(
            db.clone(),
            cache.clone() as Arc<dyn CacheBackend>,
            Arc::new(gateway) as Arc<dyn PaymentGateway>,
            event_sender,
            config.clone(),
        );

        Self {
            db,
            cache,
            config,
            factory,
            events,
        }
    }

    /// Events published so far, in order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub async fn seed_user(&self, name: &str, role: Role) -> AuthenticatedUser {
        let created = user::ActiveModel {
            name: Set(name.to_string()),
            email: Set(format!("{}@example.test", name.to_lowercase())),
            role: Set(role),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed user");
        AuthenticatedUser::new(created.id, created.role)
    }

    pub async fn seed_customer(&self, name: &str) -> AuthenticatedUser {
        self.seed_user(name, Role::Customer).await
    }

    pub async fn seed_seller(&self, name: &str) -> AuthenticatedUser {
        self.seed_user(name, Role::Seller).await
    }

    pub async fn seed_product(&self, name: &str) -> product::Model {
        product::ActiveModel {
            name: Set(name.to_string()),
            description: Set(None),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_offer(
        &self,
        seller: &AuthenticatedUser,
        product_id: i64,
        price: Decimal,
        stock: i32,
    ) -> offer::Model {
        offer::ActiveModel {
            product_id: Set(product_id),
            seller_id: Set(seller.user_id),
            price: Set(price),
            stock: Set(stock),
            is_available: Set(true),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed offer")
    }

    /// Seller, product and one offer in a single call.
    pub async fn seed_listing(
        &self,
        seller_name: &str,
        product_name: &str,
        price: Decimal,
        stock: i32,
    ) -> (AuthenticatedUser, offer::Model) {
        let seller = self.seed_seller(seller_name).await;
        let product = self.seed_product(product_name).await;
        let offer = self.seed_offer(&seller, product.id, price, stock).await;
        (seller, offer)
    }
}
