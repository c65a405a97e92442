//! Marketplace order lifecycle and payment reconciliation.
//!
//! Customers fill a cart from seller offers, check out into an immutable
//! priced order, pay through a hosted checkout session and may request
//! refunds on delivered lines. Sellers advance their own order lines and
//! decide refunds. Provider webhooks reconcile payment status.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;
pub mod webhooks;

use std::sync::Arc;

use tracing::{error, info};

use crate::{
    config::AppConfig,
    db::{DbConfig, DbPool},
    errors::ServiceError,
    events::{EventSender, DEFAULT_EVENT_CHANNEL_CAPACITY},
    services::factory::{ServiceContainer, ServiceFactory},
};

/// Fully wired application: pool, event bus and services.
#[derive(Clone)]
pub struct App {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub event_sender: EventSender,
    pub services: ServiceContainer,
}

impl App {
    /// Connects to the database, optionally migrates, spawns the event
    /// processor and builds every service from `config`.
    pub async fn bootstrap(config: AppConfig) -> Result<Self, ServiceError> {
        let db_pool = db::establish_connection(&DbConfig::from(&config)).await?;
        if config.auto_migrate {
            db::run_migrations(&db_pool).await.map_err(|e| {
                error!("Failed running migrations: {}", e);
                e
            })?;
        }
        let db = Arc::new(db_pool);

        let (event_sender, event_rx) = EventSender::channel(DEFAULT_EVENT_CHANNEL_CAPACITY);
        tokio::spawn(events::process_events(event_rx));

        let factory = ServiceFactory::from_config(db.clone(), event_sender.clone(), config.clone())
            .await?;
        let services = ServiceContainer::new(&factory);

        info!(environment = %config.environment, "Marketplace services ready");
        Ok(Self {
            db,
            config,
            event_sender,
            services,
        })
    }
}
