use axum::{extract::State, Json};
use std::sync::Arc;

use super::error::ApiError;
use crate::db::Package;
use crate::seo;
use crate::AppState;

/// schema.org JSON-LD for the landing page
pub async fn structured_data(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let packages = Package::list(&state.db, true).await?;
    Ok(Json(seo::structured_data(
        &state.config.email.from_name,
        &state.config.server.public_url,
        &packages,
    )))
}

/// Active packages for the public pricing page
pub async fn list_packages(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Package>>, ApiError> {
    Ok(Json(Package::list(&state.db, true).await?))
}
