use std::sync::Arc;

use actix_web::{HttpResponse, get, web};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::DashboardService;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    user_id: Option<Uuid>,
}

/// `GET /dashboard/stats`: cache-backed aggregates for the caller's scope.
#[get("/dashboard/stats")]
pub async fn dashboard_stats(
    query: web::Query<StatsQuery>,
    dashboard: web::Data<Arc<DashboardService>>,
) -> Result<HttpResponse, AppError> {
    let stats = dashboard.stats(query.user_id.as_ref()).await?;
    Ok(HttpResponse::Ok().json(stats))
}
