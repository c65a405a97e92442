//! Application wiring from configuration alone.

use assert_matches::assert_matches;
use marketplace_orders::{auth::AuthenticatedUser, config::AppConfig, errors::ServiceError, App};

#[tokio::test]
async fn bootstrap_migrates_and_wires_services() {
    let mut config = AppConfig::new("sqlite::memory:", "whsec_boot");
    config.auto_migrate = true;
    config.db_max_connections = 1;
    config.db_min_connections = 1;
    config.cache.cache_type = "disabled".into();

    let app = App::bootstrap(config).await.unwrap();
    let stranger = AuthenticatedUser::customer(1);

    assert!(app.services.cart.get_items(&stranger).await.unwrap().is_empty());
    assert!(app.services.orders.list_orders(&stranger).await.unwrap().is_empty());
    assert_matches!(
        app.services.orders.checkout(&stranger).await,
        Err(ServiceError::EmptyCart)
    );
}
