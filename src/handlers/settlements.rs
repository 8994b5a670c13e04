use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{PartyType, Settlement, SettlementItem, SettlementStatus};
use crate::error::AppError;
use crate::ports::{RepositoryError, SettlementFilter};
use crate::AppState;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub party_type: Option<PartyType>,
    pub party_id: Option<String>,
    pub status: Option<SettlementStatus>,
    pub period_start: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListParams {
    fn filter(&self) -> SettlementFilter {
        SettlementFilter {
            party_type: self.party_type,
            party_id: self.party_id.clone(),
            status: self.status,
            period_start: self.period_start,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SettlementDetail {
    #[serde(flatten)]
    pub settlement: Settlement,
    pub items: Vec<SettlementItem>,
}

pub async fn list_settlements(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let offset = params.offset.unwrap_or(0);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    if offset < 0 {
        return Err(AppError::BadRequest("offset must not be negative".to_string()));
    }

    let settlements = state.settlements.list(&params.filter(), limit, offset).await?;
    Ok(Json(settlements))
}

pub async fn get_settlement(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let settlement = state.settlements.get(id).await.map_err(|e| match e {
        RepositoryError::NotFound(_) => AppError::NotFound(format!("Settlement {} not found", id)),
        other => other.into(),
    })?;
    let items = state.settlements.items_for_settlement(id).await?;

    Ok(Json(SettlementDetail { settlement, items }))
}
