//! Trip endpoints under `/api/v1/trips`.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::page::DEFAULT_PAGE_SIZE;
use common::{DriverId, Page, PageRequest, PassengerId, Trip, TripId, TripSortKey};
use domain::{ScoreRequest, TripRequest, parse_status};
use serde::{Deserialize, Serialize};
use store::{Store, TripFilter};

use super::path_id;
use crate::AppState;
use crate::error::ApiError;

/// Query string of `GET /api/v1/trips`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripListQuery {
    pub driver_id: Option<i64>,
    pub passenger_id: Option<i64>,
    pub origin_address: Option<String>,
    pub destination_address: Option<String>,
    pub status: Option<String>,
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sort: Option<String>,
}

impl TripListQuery {
    fn into_parts(self) -> Result<(TripFilter, PageRequest<TripSortKey>), ApiError> {
        let filter = TripFilter {
            driver_id: self.driver_id.map(DriverId::new),
            passenger_id: self.passenger_id.map(PassengerId::new),
            origin_address: self.origin_address,
            destination_address: self.destination_address,
            status: self.status.as_deref().map(parse_status).transpose()?,
        };
        let page = PageRequest::parse(
            self.page.unwrap_or(0),
            self.size.unwrap_or(DEFAULT_PAGE_SIZE),
            self.sort.as_deref().unwrap_or("id"),
        )?;
        Ok((filter, page))
    }
}

/// A page of trips as returned by `GET /api/v1/trips`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripPage {
    pub trips: Vec<Trip>,
    pub current_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl From<Page<Trip>> for TripPage {
    fn from(page: Page<Trip>) -> Self {
        Self {
            trips: page.content,
            current_page: page.current_page,
            total_items: page.total_items,
            total_pages: page.total_pages,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

/// POST /api/v1/trips: create a trip after verifying both parties.
#[tracing::instrument(skip(state, payload))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<TripRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Trip>), ApiError> {
    let Json(request) = payload?;
    let trip = state.trips.create_trip(request).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

/// PUT /api/v1/trips/{id}: replace a trip's fields.
#[tracing::instrument(skip(state, path, payload))]
pub async fn update<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<TripRequest>, JsonRejection>,
) -> Result<Json<Trip>, ApiError> {
    let id = TripId::new(path_id(path)?);
    let Json(request) = payload?;
    Ok(Json(state.trips.update_trip(id, request).await?))
}

/// PATCH /api/v1/trips/{id}/status?status=X
#[tracing::instrument(skip(state, path, query))]
pub async fn update_status<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<StatusQuery>, QueryRejection>,
) -> Result<Json<Trip>, ApiError> {
    let id = TripId::new(path_id(path)?);
    let Query(query) = query?;
    let status = query
        .status
        .ok_or_else(|| ApiError::BadRequest("Query parameter 'status' is required".to_string()))?;
    Ok(Json(state.trips.update_status(id, &status).await?))
}

/// GET /api/v1/trips/{id}
#[tracing::instrument(skip(state, path))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Trip>, ApiError> {
    let id = TripId::new(path_id(path)?);
    Ok(Json(state.trips.get_trip(id).await?))
}

/// GET /api/v1/trips: filter-by-example, paged and sorted.
#[tracing::instrument(skip(state, query))]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    query: Result<Query<TripListQuery>, QueryRejection>,
) -> Result<Json<TripPage>, ApiError> {
    let Query(query) = query?;
    let (filter, page) = query.into_parts()?;
    let page = state.trips.list_trips(filter, page).await?;
    Ok(Json(page.into()))
}

/// DELETE /api/v1/trips/{id}
#[tracing::instrument(skip(state, path))]
pub async fn delete<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let id = TripId::new(path_id(path)?);
    state.trips.delete_trip(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/trips/{id}/close: complete the trip and emit its rating event.
#[tracing::instrument(skip(state, path, payload))]
pub async fn close<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ScoreRequest>, JsonRejection>,
) -> Result<Json<Trip>, ApiError> {
    let id = TripId::new(path_id(path)?);
    let Json(request) = payload?;
    let closure = state.closure.close_and_rate(id, request).await?;
    Ok(Json(closure.trip))
}
