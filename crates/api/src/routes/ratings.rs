//! Rating endpoints under `/api/v1/rating`.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::page::DEFAULT_PAGE_SIZE;
use common::{DriverId, Page, PageRequest, PassengerId, Rating, RatingId};
use domain::RatingRequest;
use serde::{Deserialize, Serialize};
use store::{RatingFilter, Store};

use super::path_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingListQuery {
    pub driver_id: Option<i64>,
    pub passenger_id: Option<i64>,
    pub page: Option<u32>,
    pub size: Option<u32>,
    pub sort: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingPage {
    pub ratings: Vec<Rating>,
    pub current_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl From<Page<Rating>> for RatingPage {
    fn from(page: Page<Rating>) -> Self {
        Self {
            ratings: page.content,
            current_page: page.current_page,
            total_items: page.total_items,
            total_pages: page.total_pages,
        }
    }
}

#[tracing::instrument(skip(state, payload))]
pub async fn create<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<RatingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Rating>), ApiError> {
    let Json(request) = payload?;
    let rating = state.ratings.create_rating(request).await?;
    Ok((StatusCode::CREATED, Json(rating)))
}

#[tracing::instrument(skip(state, path, payload))]
pub async fn update<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<i64>, PathRejection>,
    payload: Result<Json<RatingRequest>, JsonRejection>,
) -> Result<Json<Rating>, ApiError> {
    let id = RatingId::new(path_id(path)?);
    let Json(request) = payload?;
    Ok(Json(state.ratings.update_rating(id, request).await?))
}

#[tracing::instrument(skip(state, path))]
pub async fn get<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Rating>, ApiError> {
    let id = RatingId::new(path_id(path)?);
    Ok(Json(state.ratings.get_rating(id).await?))
}

#[tracing::instrument(skip(state, query))]
pub async fn list<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    query: Result<Query<RatingListQuery>, QueryRejection>,
) -> Result<Json<RatingPage>, ApiError> {
    let Query(query) = query?;
    let filter = RatingFilter {
        driver_id: query.driver_id.map(DriverId::new),
        passenger_id: query.passenger_id.map(PassengerId::new),
    };
    let page = PageRequest::parse(
        query.page.unwrap_or(0),
        query.size.unwrap_or(DEFAULT_PAGE_SIZE),
        query.sort.as_deref().unwrap_or("id"),
    )?;
    let page = state.ratings.list_ratings(filter, page).await?;
    Ok(Json(page.into()))
}

/// GET /api/v1/rating/{driverId}/average: mean score as a bare number.
#[tracing::instrument(skip(state, path))]
pub async fn average<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<f64>, ApiError> {
    let driver_id = DriverId::new(path_id(path)?);
    Ok(Json(state.ratings.average_score(driver_id).await?))
}

#[tracing::instrument(skip(state, path))]
pub async fn delete<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let id = RatingId::new(path_id(path)?);
    state.ratings.delete_rating(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
