//! Query planning for image listings.
//!
//! A listing is split into a [`KeyCondition`], which narrows the scan to one
//! owner partition and optionally a `created_at` range, and a list of
//! [`FilterCondition`]s evaluated against the rows inside that range. The
//! plan renders itself onto a `sqlx::QueryBuilder`; rows always come back
//! newest first.

use crate::{models::image::RecordKey, services::pagination::TokenError};
use sqlx::{QueryBuilder, sqlite::Sqlite};

/// Caller intent for a listing, after request parsing.
#[derive(Clone, Debug, Default)]
pub struct ImageQuery {
    pub owner_id: String,
    pub created_from: Option<String>,
    pub created_to: Option<String>,
    pub tag: Option<String>,
    pub content_type: Option<String>,
    pub limit: usize,
    pub exclusive_start: Option<RecordKey>,
}

/// Sort-key constraint; both bounds inclusive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimeRange {
    Unbounded,
    Between(String, String),
    AtOrAfter(String),
    AtOrBefore(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyCondition {
    pub owner_id: String,
    pub created_at: TimeRange,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterCondition {
    /// `tags` contains exactly this entry.
    TagContains(String),
    /// `content_type` equals this value.
    ContentTypeEquals(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryPlan {
    pub key_condition: KeyCondition,
    pub filters: Vec<FilterCondition>,
    pub limit: usize,
    pub exclusive_start: Option<RecordKey>,
}

impl QueryPlan {
    /// Build a plan from caller intent.
    ///
    /// A resume key from another owner's partition is rejected rather than
    /// silently scanning from an unrelated position.
    pub fn new(query: ImageQuery) -> Result<Self, TokenError> {
        if let Some(start) = &query.exclusive_start {
            if start.owner_id != query.owner_id {
                return Err(TokenError::ForeignListing);
            }
        }

        let created_at = match (query.created_from, query.created_to) {
            (Some(from), Some(to)) => TimeRange::Between(from, to),
            (Some(from), None) => TimeRange::AtOrAfter(from),
            (None, Some(to)) => TimeRange::AtOrBefore(to),
            (None, None) => TimeRange::Unbounded,
        };

        let mut filters = Vec::new();
        if let Some(tag) = query.tag {
            filters.push(FilterCondition::TagContains(tag));
        }
        if let Some(content_type) = query.content_type {
            filters.push(FilterCondition::ContentTypeEquals(content_type));
        }

        Ok(Self {
            key_condition: KeyCondition {
                owner_id: query.owner_id,
                created_at,
            },
            filters,
            limit: query.limit.max(1),
            exclusive_start: query.exclusive_start,
        })
    }

    /// Append the WHERE clause, ordering and row limit to `builder`.
    ///
    /// One row beyond `limit` is requested so the caller can tell whether
    /// another page exists.
    pub fn push_sql(&self, builder: &mut QueryBuilder<'_, Sqlite>) {
        builder.push(" WHERE owner_id = ");
        builder.push_bind(self.key_condition.owner_id.clone());

        match &self.key_condition.created_at {
            TimeRange::Unbounded => {}
            TimeRange::Between(from, to) => {
                builder.push(" AND created_at BETWEEN ");
                builder.push_bind(from.clone());
                builder.push(" AND ");
                builder.push_bind(to.clone());
            }
            TimeRange::AtOrAfter(from) => {
                builder.push(" AND created_at >= ");
                builder.push_bind(from.clone());
            }
            TimeRange::AtOrBefore(to) => {
                builder.push(" AND created_at <= ");
                builder.push_bind(to.clone());
            }
        }

        // Descending scan: resuming means strictly older than the last key seen.
        if let Some(start) = &self.exclusive_start {
            builder.push(" AND created_at < ");
            builder.push_bind(start.created_at.clone());
        }

        for filter in &self.filters {
            match filter {
                FilterCondition::TagContains(tag) => {
                    builder.push(" AND EXISTS (SELECT 1 FROM json_each(images.tags)");
                    builder.push(" WHERE json_each.value = ");
                    builder.push_bind(tag.clone());
                    builder.push(")");
                }
                FilterCondition::ContentTypeEquals(content_type) => {
                    builder.push(" AND content_type = ");
                    builder.push_bind(content_type.clone());
                }
            }
        }

        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(self.fetch_limit() as i64);
    }

    pub fn fetch_limit(&self) -> usize {
        self.limit + 1
    }
}
