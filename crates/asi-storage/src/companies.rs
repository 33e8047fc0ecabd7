use sqlx::PgExecutor;

use crate::{Result, models::CompanyRow};

#[derive(Debug, Clone)]
pub struct NewCompany {
	pub company_code: String,
	pub company_name_full: String,
	pub company_name_short: Option<String>,
	pub exchange: Option<String>,
}

const COMPANY_COLUMNS: &str = "\
company_code, company_name_full, company_name_short, exchange, created_at, updated_at";

/// Idempotent on `company_code`; short name and exchange are only enriched,
/// never cleared.
pub async fn upsert_company<'e, E>(executor: E, company: &NewCompany) -> Result<CompanyRow>
where
	E: PgExecutor<'e>,
{
	let row = sqlx::query_as::<_, CompanyRow>(&format!(
		"\
INSERT INTO companies (company_code, company_name_full, company_name_short, exchange)
VALUES ($1, $2, $3, $4)
ON CONFLICT (company_code) DO UPDATE
SET
	company_name_full = EXCLUDED.company_name_full,
	company_name_short = COALESCE(EXCLUDED.company_name_short, companies.company_name_short),
	exchange = COALESCE(EXCLUDED.exchange, companies.exchange),
	updated_at = now()
RETURNING {COMPANY_COLUMNS}"
	))
	.bind(company.company_code.as_str())
	.bind(company.company_name_full.as_str())
	.bind(company.company_name_short.as_deref())
	.bind(company.exchange.as_deref())
	.fetch_one(executor)
	.await?;

	Ok(row)
}

/// Resolve an identifier to a company: exact stock code first, then exact
/// full name, then exact short name (both case-insensitive on trimmed
/// input). A code match always wins over a name match.
pub async fn get_company<'e, E>(executor: E, identifier: &str) -> Result<Option<CompanyRow>>
where
	E: PgExecutor<'e>,
{
	let trimmed = identifier.trim();

	if trimmed.is_empty() {
		return Ok(None);
	}

	let row = sqlx::query_as::<_, CompanyRow>(&format!(
		"\
SELECT {COMPANY_COLUMNS}
FROM companies
WHERE company_code = $1
	OR lower(company_name_full) = lower($1)
	OR lower(company_name_short) = lower($1)
ORDER BY
	(company_code = $1) DESC,
	(lower(company_name_full) = lower($1)) DESC,
	company_code ASC
LIMIT 1"
	))
	.bind(trimmed)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

pub async fn company_exists<'e, E>(executor: E, company_code: &str) -> Result<bool>
where
	E: PgExecutor<'e>,
{
	let exists: bool =
		sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM companies WHERE company_code = $1)")
			.bind(company_code)
			.fetch_one(executor)
			.await?;

	Ok(exists)
}
