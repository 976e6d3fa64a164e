use tracing::{error, info};

use crate::codec::Statement;
use crate::store::Store;

/// Probes the store with a trivial query before any real work is attempted.
pub async fn check_store_connection<S: Store>(store: &S, label: &str) -> bool {
    match store.query(&Statement::raw("SELECT 1 AS ok")).await {
        Ok(_) => {
            info!("✅ Successfully connected to {}", label);
            true
        }
        Err(e) => {
            error!("❌ Failed to connect to {}: {}", label, e);
            false
        }
    }
}
