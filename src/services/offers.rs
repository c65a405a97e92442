use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};
use tracing::instrument;

use crate::{
    cache::{self, keys, CacheBackend},
    entities::{offer, Offer},
    errors::ServiceError,
};

/// Read side of the offer catalog (price, stock, seller, availability).
///
/// `get_offer` is read-through cached and suitable for add-to-cart checks.
/// Checkout uses [`OfferService::fetch_fresh`] so that stock decisions are
/// always made against the database.
#[derive(Clone)]
pub struct OfferService {
    db: Arc<DatabaseConnection>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl OfferService {
    pub fn new(db: Arc<DatabaseConnection>, cache: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { db, cache, ttl }
    }

    #[instrument(skip(self))]
    pub async fn get_offer(&self, offer_id: i64) -> Result<offer::Model, ServiceError> {
        let db = self.db.clone();
        cache::get_or_load(&*self.cache, &keys::offer(offer_id), self.ttl, || async move {
            Self::fetch_fresh(&*db, offer_id).await
        })
        .await
    }

    /// Uncached read on any connection or open transaction.
    pub async fn fetch_fresh<C>(conn: &C, offer_id: i64) -> Result<offer::Model, ServiceError>
    where
        C: ConnectionTrait,
    {
        Offer::find_by_id(offer_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Offer {} not found", offer_id)))
    }

    pub async fn invalidate(&self, offer_ids: &[i64]) {
        let keys: Vec<String> = offer_ids.iter().map(|id| keys::offer(*id)).collect();
        cache::invalidate(&*self.cache, &keys).await;
    }
}
