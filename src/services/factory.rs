use std::sync::Arc;

use crate::{
    cache::{CacheBackend, CacheFactory},
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        cart::CartService,
        offers::OfferService,
        order_status::OrderStatusService,
        orders::OrderService,
        payments::{PaymentGateway, StripeCheckoutGateway},
        refunds::RefundService,
    },
    webhooks::{PaymentWebhookHandler, SignatureVerifier},
};

/// Factory for creating service instances with shared dependencies
#[derive(Clone)]
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    cache: Arc<dyn CacheBackend>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: EventSender,
    config: AppConfig,
}

impl ServiceFactory {
    pub fn new(
        db_pool: Arc<DbPool>,
        cache: Arc<dyn CacheBackend>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
        config: AppConfig,
    ) -> Self {
        Self {
            db_pool,
            cache,
            gateway,
            event_sender,
            config,
        }
    }

    /// Wires the production cache backend and Stripe gateway from `config`.
    pub async fn from_config(
        db_pool: Arc<DbPool>,
        event_sender: EventSender,
        config: AppConfig,
    ) -> Result<Self, ServiceError> {
        let cache = CacheFactory::create_cache(&config.cache, &config.redis_url).await;
        let gateway: Arc<dyn PaymentGateway> =
            Arc::new(StripeCheckoutGateway::from_config(&config.payment)?);
        Ok(Self::new(db_pool, cache, gateway, event_sender, config))
    }

    pub fn offer_service(&self) -> OfferService {
        OfferService::new(
            self.db_pool.clone(),
            self.cache.clone(),
            self.config.cache.offer_ttl(),
        )
    }

    pub fn cart_service(&self) -> CartService {
        CartService::new(
            self.db_pool.clone(),
            self.offer_service(),
            self.cache.clone(),
            self.config.cache.cart_ttl(),
            self.config.max_cart_quantity,
        )
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(
            self.db_pool.clone(),
            self.offer_service(),
            self.cart_service(),
            self.gateway.clone(),
            self.event_sender.clone(),
            self.config.payment.clone(),
        )
    }

    pub fn order_status_service(&self) -> OrderStatusService {
        OrderStatusService::new(self.db_pool.clone(), self.event_sender.clone())
    }

    pub fn refund_service(&self) -> RefundService {
        RefundService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.config.refund_window(),
        )
    }

    pub fn payment_webhook_handler(&self) -> PaymentWebhookHandler {
        PaymentWebhookHandler::new(
            self.order_service(),
            SignatureVerifier::new(
                self.config.payment.webhook_secret.clone(),
                self.config.payment.webhook_tolerance(),
            ),
            self.config.max_webhook_body_bytes,
        )
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub cart: CartService,
    pub offers: OfferService,
    pub orders: OrderService,
    pub order_status: OrderStatusService,
    pub refunds: RefundService,
    pub payment_webhooks: PaymentWebhookHandler,
}

impl ServiceContainer {
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            cart: factory.cart_service(),
            offers: factory.offer_service(),
            orders: factory.order_service(),
            order_status: factory.order_status_service(),
            refunds: factory.refund_service(),
            payment_webhooks: factory.payment_webhook_handler(),
        }
    }
}
