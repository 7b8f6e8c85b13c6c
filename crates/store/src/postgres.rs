use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    DriverId, NewRating, NewTrip, Page, PageRequest, PassengerId, Rating, RatingId, RatingSortKey,
    Trip, TripId, TripSortKey, TripStatus, TripUpdate,
};
use sqlx::{
    PgPool, Postgres, Row,
    postgres::{PgArguments, PgRow},
    query::Query,
};
use uuid::Uuid;

use crate::{
    EntryBuilder, OutboxEntry, OutboxId, RatingFilter, Result, StoreError, TripFilter,
    outbox::lease_deadline,
    query::like_pattern,
    repository::{OutboxRepository, RatingRepository, TripRepository},
};

/// Name of the unique constraint on `ratings (driver_id, passenger_id)`.
const RATING_PAIR_CONSTRAINT: &str = "ratings_driver_passenger_key";

const TRIP_COLUMNS: &str = "id, driver_id, passenger_id, origin_address, destination_address, status, order_date_time, price";
const RATING_COLUMNS: &str = "id, driver_id, passenger_id, score, comment";
const OUTBOX_COLUMNS: &str = "id, sequence, topic, key, payload, trip_id, created_at, published_at, attempts, last_error, claimed_until";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

/// A positional parameter of a dynamically built query.
enum Param {
    Int(i64),
    Text(String),
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Param],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Param::Int(value) => query.bind(*value),
            Param::Text(value) => query.bind(value.clone()),
        };
    }
    query
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_trip(row: PgRow) -> Result<Trip> {
        let status: String = row.try_get("status")?;
        Ok(Trip {
            id: TripId::new(row.try_get("id")?),
            driver_id: DriverId::new(row.try_get("driver_id")?),
            passenger_id: PassengerId::new(row.try_get("passenger_id")?),
            origin_address: row.try_get("origin_address")?,
            destination_address: row.try_get("destination_address")?,
            status: status
                .parse::<TripStatus>()
                .map_err(|e| StoreError::CorruptRow(e.to_string()))?,
            order_date_time: row.try_get("order_date_time")?,
            price: row.try_get("price")?,
        })
    }

    fn row_to_rating(row: PgRow) -> Result<Rating> {
        Ok(Rating {
            id: RatingId::new(row.try_get("id")?),
            driver_id: DriverId::new(row.try_get("driver_id")?),
            passenger_id: PassengerId::new(row.try_get("passenger_id")?),
            score: row.try_get("score")?,
            comment: row.try_get("comment")?,
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxEntry> {
        Ok(OutboxEntry {
            id: OutboxId::from_uuid(row.try_get::<Uuid, _>("id")?),
            sequence: row.try_get("sequence")?,
            topic: row.try_get("topic")?,
            key: row.try_get("key")?,
            payload: row.try_get("payload")?,
            trip_id: TripId::new(row.try_get("trip_id")?),
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            claimed_until: row.try_get("claimed_until")?,
        })
    }

    /// Maps a violation of the rating pair constraint to `DuplicateRating`.
    fn map_rating_write_error(e: sqlx::Error, rating: &NewRating) -> StoreError {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.constraint() == Some(RATING_PAIR_CONSTRAINT)
        {
            return StoreError::DuplicateRating {
                driver_id: rating.driver_id,
                passenger_id: rating.passenger_id,
            };
        }
        StoreError::Database(e)
    }

    fn trip_where(filter: &TripFilter) -> (String, Vec<Param>) {
        let mut sql = String::from(" WHERE 1=1");
        let mut params = Vec::new();

        if let Some(id) = filter.driver_id {
            params.push(Param::Int(id.as_i64()));
            sql.push_str(&format!(" AND driver_id = ${}", params.len()));
        }
        if let Some(id) = filter.passenger_id {
            params.push(Param::Int(id.as_i64()));
            sql.push_str(&format!(" AND passenger_id = ${}", params.len()));
        }
        if let Some(ref fragment) = filter.origin_address {
            params.push(Param::Text(like_pattern(fragment)));
            sql.push_str(&format!(" AND origin_address ILIKE ${} ESCAPE '\\'", params.len()));
        }
        if let Some(ref fragment) = filter.destination_address {
            params.push(Param::Text(like_pattern(fragment)));
            sql.push_str(&format!(
                " AND destination_address ILIKE ${} ESCAPE '\\'",
                params.len()
            ));
        }
        if let Some(status) = filter.status {
            params.push(Param::Text(status.as_str().to_string()));
            sql.push_str(&format!(" AND status = ${}", params.len()));
        }

        (sql, params)
    }

    fn rating_where(filter: &RatingFilter) -> (String, Vec<Param>) {
        let mut sql = String::from(" WHERE 1=1");
        let mut params = Vec::new();

        if let Some(id) = filter.driver_id {
            params.push(Param::Int(id.as_i64()));
            sql.push_str(&format!(" AND driver_id = ${}", params.len()));
        }
        if let Some(id) = filter.passenger_id {
            params.push(Param::Int(id.as_i64()));
            sql.push_str(&format!(" AND passenger_id = ${}", params.len()));
        }

        (sql, params)
    }

    async fn count(&self, table: &str, where_sql: &str, params: &[Param]) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {table}{where_sql}");
        let row = bind_params(sqlx::query(&sql), params)
            .fetch_one(&self.pool)
            .await?;
        let total: i64 = row.try_get(0)?;
        Ok(total.max(0) as u64)
    }
}

fn trip_sort_column(key: TripSortKey) -> &'static str {
    match key {
        TripSortKey::Id => "id",
        TripSortKey::DriverId => "driver_id",
        TripSortKey::PassengerId => "passenger_id",
        TripSortKey::OriginAddress => "origin_address",
        TripSortKey::DestinationAddress => "destination_address",
        TripSortKey::Status => "status",
        TripSortKey::OrderDateTime => "order_date_time",
        TripSortKey::Price => "price",
    }
}

fn rating_sort_column(key: RatingSortKey) -> &'static str {
    match key {
        RatingSortKey::Id => "id",
        RatingSortKey::DriverId => "driver_id",
        RatingSortKey::PassengerId => "passenger_id",
        RatingSortKey::Score => "score",
    }
}

#[async_trait]
impl TripRepository for PostgresStore {
    async fn create_trip(&self, trip: NewTrip) -> Result<Trip> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO trips (driver_id, passenger_id, origin_address, destination_address, status, order_date_time, price)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {TRIP_COLUMNS}
            "#
        ))
        .bind(trip.driver_id.as_i64())
        .bind(trip.passenger_id.as_i64())
        .bind(&trip.origin_address)
        .bind(&trip.destination_address)
        .bind(TripStatus::Created.as_str())
        .bind(trip.order_date_time)
        .bind(trip.price)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_trip(row)
    }

    async fn find_trip(&self, id: TripId) -> Result<Option<Trip>> {
        let row = sqlx::query(&format!("SELECT {TRIP_COLUMNS} FROM trips WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_trip).transpose()
    }

    async fn update_trip(&self, id: TripId, update: TripUpdate) -> Result<Trip> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE trips
            SET driver_id = $2, passenger_id = $3, origin_address = $4,
                destination_address = $5, order_date_time = $6, price = $7
            WHERE id = $1
            RETURNING {TRIP_COLUMNS}
            "#
        ))
        .bind(id.as_i64())
        .bind(update.driver_id.as_i64())
        .bind(update.passenger_id.as_i64())
        .bind(&update.origin_address)
        .bind(&update.destination_address)
        .bind(update.order_date_time)
        .bind(update.price)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_trip)
            .transpose()?
            .ok_or(StoreError::TripNotFound(id))
    }

    async fn set_trip_status(&self, id: TripId, status: TripStatus) -> Result<Trip> {
        let row = sqlx::query(&format!(
            "UPDATE trips SET status = $2 WHERE id = $1 RETURNING {TRIP_COLUMNS}"
        ))
        .bind(id.as_i64())
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_trip)
            .transpose()?
            .ok_or(StoreError::TripNotFound(id))
    }

    async fn complete_trip_with_outbox(
        &self,
        id: TripId,
        build_entry: EntryBuilder,
    ) -> Result<(Trip, OutboxEntry)> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "UPDATE trips SET status = $2 WHERE id = $1 RETURNING {TRIP_COLUMNS}"
        ))
        .bind(id.as_i64())
        .bind(TripStatus::Completed.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        // Dropping the transaction without commit rolls the update back
        let trip = match row {
            Some(row) => Self::row_to_trip(row)?,
            None => return Err(StoreError::TripNotFound(id)),
        };

        let mut entry = build_entry(&trip)?;

        let sequence: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO rating_outbox (id, topic, key, payload, trip_id, created_at, claimed_until)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING sequence
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(&entry.topic)
        .bind(&entry.key)
        .bind(&entry.payload)
        .bind(entry.trip_id.as_i64())
        .bind(entry.created_at)
        .bind(entry.claimed_until)
        .fetch_one(&mut *tx)
        .await?;
        entry.sequence = sequence;

        tx.commit().await?;
        tracing::debug!(trip_id = %id, outbox_id = %entry.id, "Trip completed with outbox entry");
        Ok((trip, entry))
    }

    async fn delete_trip(&self, id: TripId) -> Result<()> {
        let result = sqlx::query("DELETE FROM trips WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TripNotFound(id));
        }
        Ok(())
    }

    async fn query_trips(
        &self,
        filter: &TripFilter,
        page: &PageRequest<TripSortKey>,
    ) -> Result<Page<Trip>> {
        let (where_sql, params) = Self::trip_where(filter);
        let total = self.count("trips", &where_sql, &params).await?;

        let sql = format!(
            "SELECT {TRIP_COLUMNS} FROM trips{where_sql} ORDER BY {} {}, id ASC LIMIT ${} OFFSET ${}",
            trip_sort_column(page.sort),
            page.direction.as_sql(),
            params.len() + 1,
            params.len() + 2,
        );
        let rows = bind_params(sqlx::query(&sql), &params)
            .bind(i64::from(page.size))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let content = rows
            .into_iter()
            .map(Self::row_to_trip)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(content, page.page, page.size, total))
    }
}

#[async_trait]
impl RatingRepository for PostgresStore {
    async fn insert_rating(&self, rating: NewRating) -> Result<Rating> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO ratings (driver_id, passenger_id, score, comment)
            VALUES ($1, $2, $3, $4)
            RETURNING {RATING_COLUMNS}
            "#
        ))
        .bind(rating.driver_id.as_i64())
        .bind(rating.passenger_id.as_i64())
        .bind(rating.score)
        .bind(&rating.comment)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Self::map_rating_write_error(e, &rating))?;

        Self::row_to_rating(row)
    }

    async fn find_rating(&self, id: RatingId) -> Result<Option<Rating>> {
        let row = sqlx::query(&format!("SELECT {RATING_COLUMNS} FROM ratings WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_rating).transpose()
    }

    async fn update_rating(&self, id: RatingId, rating: NewRating) -> Result<Rating> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE ratings
            SET driver_id = $2, passenger_id = $3, score = $4, comment = $5
            WHERE id = $1
            RETURNING {RATING_COLUMNS}
            "#
        ))
        .bind(id.as_i64())
        .bind(rating.driver_id.as_i64())
        .bind(rating.passenger_id.as_i64())
        .bind(rating.score)
        .bind(&rating.comment)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Self::map_rating_write_error(e, &rating))?;

        row.map(Self::row_to_rating)
            .transpose()?
            .ok_or(StoreError::RatingNotFound(id))
    }

    async fn delete_rating(&self, id: RatingId) -> Result<()> {
        let result = sqlx::query("DELETE FROM ratings WHERE id = $1")
            .bind(id.as_i64())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::RatingNotFound(id));
        }
        Ok(())
    }

    async fn rating_exists(&self, driver_id: DriverId, passenger_id: PassengerId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM ratings WHERE driver_id = $1 AND passenger_id = $2)",
        )
        .bind(driver_id.as_i64())
        .bind(passenger_id.as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn query_ratings(
        &self,
        filter: &RatingFilter,
        page: &PageRequest<RatingSortKey>,
    ) -> Result<Page<Rating>> {
        let (where_sql, params) = Self::rating_where(filter);
        let total = self.count("ratings", &where_sql, &params).await?;

        let sql = format!(
            "SELECT {RATING_COLUMNS} FROM ratings{where_sql} ORDER BY {} {}, id ASC LIMIT ${} OFFSET ${}",
            rating_sort_column(page.sort),
            page.direction.as_sql(),
            params.len() + 1,
            params.len() + 2,
        );
        let rows = bind_params(sqlx::query(&sql), &params)
            .bind(i64::from(page.size))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        let content = rows
            .into_iter()
            .map(Self::row_to_rating)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page::new(content, page.page, page.size, total))
    }

    async fn average_score_for_driver(&self, driver_id: DriverId) -> Result<Option<f64>> {
        let average: Option<f64> =
            sqlx::query_scalar("SELECT AVG(score) FROM ratings WHERE driver_id = $1")
                .bind(driver_id.as_i64())
                .fetch_one(&self.pool)
                .await?;

        Ok(average)
    }
}

#[async_trait]
impl OutboxRepository for PostgresStore {
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {OUTBOX_COLUMNS}
            FROM rating_outbox
            WHERE published_at IS NULL
            ORDER BY sequence ASC
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn claim_pending(&self, limit: usize, lease: Duration) -> Result<Vec<OutboxEntry>> {
        let now = Utc::now();
        // Rows locked by a concurrent claim are skipped, not waited on
        let rows = sqlx::query(&format!(
            r#"
            UPDATE rating_outbox
            SET claimed_until = $2
            WHERE id IN (
                SELECT id
                FROM rating_outbox
                WHERE published_at IS NULL
                  AND (claimed_until IS NULL OR claimed_until <= $3)
                ORDER BY sequence ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        ))
        .bind(limit as i64)
        .bind(lease_deadline(now, lease))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = rows
            .into_iter()
            .map(Self::row_to_outbox)
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    async fn find_outbox(&self, id: OutboxId) -> Result<Option<OutboxEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM rating_outbox WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_outbox).transpose()
    }

    async fn mark_published(&self, id: OutboxId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rating_outbox
            SET published_at = COALESCE(published_at, NOW()),
                attempts = attempts + 1,
                claimed_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OutboxEntryNotFound(id));
        }
        Ok(())
    }

    async fn record_publish_failure(&self, id: OutboxId, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rating_outbox
            SET attempts = attempts + 1, last_error = $2, claimed_until = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OutboxEntryNotFound(id));
        }
        Ok(())
    }

    async fn release_claim(&self, id: OutboxId) -> Result<()> {
        sqlx::query(
            "UPDATE rating_outbox SET claimed_until = NULL WHERE id = $1 AND published_at IS NULL",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
