//! Broker record operations for the deduplicating record store.
//!
//! This module provides upsert and query operations for the `broker_records`
//! table, which holds every broker listing discovered across scrape jobs,
//! keyed by the portal's listing identifier.

use chrono::{DateTime, Utc};
use propscout_core::ListingId;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use std::collections::BTreeMap;

use crate::error::{DatabaseError, Result};

/// A broker listing record extracted from a search results page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerRecord {
    /// Stable identifier assigned by the portal
    pub listing_id: ListingId,
    /// Broker display name, if present on the listing
    pub name: Option<String>,
    /// Agency or brokerage the broker belongs to
    pub agency: Option<String>,
    /// Contact phone number, normalized to digits and leading `+`
    pub phone: Option<String>,
    /// Contact email address
    pub email: Option<String>,
    /// Professional license number
    pub license_number: Option<String>,
    /// URL of the listing page the record was extracted from
    pub listing_url: String,
    /// When this record was last scraped
    pub scraped_at: DateTime<Utc>,
    /// Portal fields that don't map to a dedicated column
    pub raw_fields: BTreeMap<String, String>,
}

/// Filter criteria for querying stored records.
///
/// String fields match case-insensitively as substrings, except
/// `license_number` which matches exactly. All populated fields must match
/// (logical AND). An empty filter matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterCriteria {
    /// Substring match against the broker name
    pub name: Option<String>,
    /// Substring match against the agency
    pub agency: Option<String>,
    /// Substring match against the phone number
    pub phone: Option<String>,
    /// Substring match against the email address
    pub email: Option<String>,
    /// Exact match against the license number
    pub license_number: Option<String>,
}

impl FilterCriteria {
    /// Whether no criteria are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.agency.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.license_number.is_none()
    }
}

/// Insert a record or overwrite the existing one with the same listing id.
///
/// The newer scrape wins: all columns are replaced, including `scraped_at`.
/// A single `ON CONFLICT` statement handles both cases, so concurrent
/// upserts of the same id cannot race each other.
///
/// # Errors
/// Returns `DatabaseError` if the insert fails or the raw fields cannot be
/// serialized.
pub async fn upsert_record(pool: &Pool<Sqlite>, record: &BrokerRecord) -> Result<()> {
    let raw_json = serde_json::to_string(&record.raw_fields)
        .map_err(|e| DatabaseError::Decode(format!("raw_fields serialization failed: {e}")))?;

    sqlx::query(
        "INSERT INTO broker_records (listing_id, name, agency, phone, email,
                                     license_number, listing_url, scraped_at, raw_fields)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(listing_id) DO UPDATE SET
             name = excluded.name,
             agency = excluded.agency,
             phone = excluded.phone,
             email = excluded.email,
             license_number = excluded.license_number,
             listing_url = excluded.listing_url,
             scraped_at = excluded.scraped_at,
             raw_fields = excluded.raw_fields",
    )
    .bind(record.listing_id.as_str())
    .bind(&record.name)
    .bind(&record.agency)
    .bind(&record.phone)
    .bind(&record.email)
    .bind(&record.license_number)
    .bind(&record.listing_url)
    .bind(record.scraped_at.to_rfc3339())
    .bind(&raw_json)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a single record by its listing id.
///
/// # Errors
/// Returns `DatabaseError::NotFound` if no record with that id exists.
pub async fn get_record(pool: &Pool<Sqlite>, listing_id: &ListingId) -> Result<BrokerRecord> {
    let row = sqlx::query(
        "SELECT listing_id, name, agency, phone, email, license_number,
                listing_url, scraped_at, raw_fields
         FROM broker_records
         WHERE listing_id = ?",
    )
    .bind(listing_id.as_str())
    .fetch_optional(pool)
    .await?
    .ok_or(DatabaseError::NotFound)?;

    parse_record_from_row(&row)
}

/// Query records matching the given filter criteria.
///
/// Results are ordered by most recently scraped first.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row cannot be decoded.
pub async fn query_records(
    pool: &Pool<Sqlite>,
    filter: &FilterCriteria,
) -> Result<Vec<BrokerRecord>> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        "SELECT listing_id, name, agency, phone, email, license_number,
                listing_url, scraped_at, raw_fields
         FROM broker_records WHERE 1 = 1",
    );

    push_filter_clauses(&mut builder, filter);
    builder.push(" ORDER BY scraped_at DESC");

    let rows = builder.build().fetch_all(pool).await?;

    rows.iter().map(parse_record_from_row).collect()
}

/// Count records matching the given filter criteria.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn count_records(pool: &Pool<Sqlite>, filter: &FilterCriteria) -> Result<u64> {
    let mut builder =
        QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM broker_records WHERE 1 = 1");

    push_filter_clauses(&mut builder, filter);

    let count: i64 = builder.build_query_scalar().fetch_one(pool).await?;

    Ok(u64::try_from(count).unwrap_or(0))
}

fn push_filter_clauses(builder: &mut QueryBuilder<'_, Sqlite>, filter: &FilterCriteria) {
    let substring_columns = [
        ("name", &filter.name),
        ("agency", &filter.agency),
        ("phone", &filter.phone),
        ("email", &filter.email),
    ];

    for (column, value) in substring_columns {
        if let Some(value) = value {
            builder.push(format!(" AND LOWER({column}) LIKE "));
            builder.push_bind(format!("%{}%", value.to_lowercase()));
        }
    }

    if let Some(license) = &filter.license_number {
        builder.push(" AND license_number = ");
        builder.push_bind(license.clone());
    }
}

fn parse_record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<BrokerRecord> {
    let listing_id_str: String = row.try_get("listing_id")?;
    let listing_id = ListingId::new(listing_id_str)
        .map_err(|e| DatabaseError::Decode(format!("invalid stored listing id: {e}")))?;

    let scraped_at_str: String = row.try_get("scraped_at")?;
    let scraped_at = DateTime::parse_from_rfc3339(&scraped_at_str)
        .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc));

    let raw_json: String = row.try_get("raw_fields")?;
    let raw_fields: BTreeMap<String, String> =
        serde_json::from_str(&raw_json).unwrap_or_default();

    Ok(BrokerRecord {
        listing_id,
        name: row.try_get("name")?,
        agency: row.try_get("agency")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        license_number: row.try_get("license_number")?,
        listing_url: row.try_get("listing_url")?,
        scraped_at,
        raw_fields,
    })
}
