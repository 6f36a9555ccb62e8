//! Business directory repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sitescout_core::{
    new_v7, BusinessDirectoryEntry, DirectoryRepository, NewBusinessEntry, Result, UpsertAction,
    UpsertOutcome,
};

const ENTRY_COLUMNS: &str = "id, website, company_name, city, state_province, country, \
     categories, active, created_at, updated_at";

/// PostgreSQL implementation of DirectoryRepository.
pub struct PgDirectoryRepository {
    pool: Pool<Postgres>,
}

impl PgDirectoryRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_entry(row: &PgRow) -> Result<BusinessDirectoryEntry> {
        Ok(BusinessDirectoryEntry {
            id: row.try_get("id")?,
            website: row.try_get("website")?,
            company_name: row.try_get("company_name")?,
            city: row.try_get("city")?,
            state_province: row.try_get("state_province")?,
            country: row.try_get("country")?,
            categories: row.try_get("categories")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[async_trait]
impl DirectoryRepository for PgDirectoryRepository {
    async fn upsert(&self, entry: &NewBusinessEntry) -> Result<UpsertOutcome> {
        let now = Utc::now();
        let categories: Option<&Vec<String>> =
            (!entry.categories.is_empty()).then_some(&entry.categories);

        // `xmax = 0` is true only for a freshly inserted tuple.
        let row = sqlx::query(
            "INSERT INTO business_directory
                (id, website, company_name, city, state_province, country, categories,
                 active, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, '{}'::text[]), TRUE, $8, $8)
             ON CONFLICT (website) DO UPDATE SET
                company_name   = COALESCE(EXCLUDED.company_name, business_directory.company_name),
                city           = COALESCE(EXCLUDED.city, business_directory.city),
                state_province = COALESCE(EXCLUDED.state_province, business_directory.state_province),
                country        = COALESCE(EXCLUDED.country, business_directory.country),
                categories     = COALESCE($7, business_directory.categories),
                active         = TRUE,
                updated_at     = EXCLUDED.updated_at
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(new_v7())
        .bind(&entry.website)
        .bind(non_blank(&entry.company_name))
        .bind(non_blank(&entry.city))
        .bind(non_blank(&entry.state_province))
        .bind(non_blank(&entry.country))
        .bind(categories)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        Ok(UpsertOutcome {
            action: if inserted {
                UpsertAction::Created
            } else {
                UpsertAction::Updated
            },
            id: row.try_get("id")?,
            website: entry.website.clone(),
        })
    }

    async fn find_by_website(&self, website: &str) -> Result<Option<BusinessDirectoryEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM business_directory WHERE website = $1"
        ))
        .bind(website)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_entry).transpose()
    }

    async fn get(&self, id: Uuid) -> Result<Option<BusinessDirectoryEntry>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM business_directory WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::parse_entry).transpose()
    }

    async fn list(&self, limit: usize) -> Result<Vec<BusinessDirectoryEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM business_directory
             ORDER BY updated_at DESC
             LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_entry).collect()
    }
}
