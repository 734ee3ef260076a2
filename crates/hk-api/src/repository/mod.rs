//! Security-filtered, keyset-paginated read access to the replicated tables.
//!
//! Every query definition projects three control columns next to the entity
//! columns: `_pk` (keyset cursor), `_sec_center` and `_sec_department`
//! (security dimensions). They are read for paging and filtering only and
//! never reach the mapped entity.

mod definitions;
mod filter;
mod page;
mod writes;

pub use definitions::*;
pub use filter::{push_security_filter, FilterClause};
pub use page::{PageRequest, SortKey};
pub use writes::NewAttachment;

use hk_core::grant::Grant;
use hk_core::metrics;
use hk_core::model::{Employee, Replicated};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, QueryBuilder};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("integrity violation: {0}")]
    Integrity(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// The authenticated user a query runs on behalf of.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub user_id: i64,
    pub grant: Grant,
}

pub trait QueryDefinition: Send + Sync + 'static {
    type Entity: Replicated;

    const PK: &'static str;
    const SEC_CENTER: Option<&'static str>;
    const SEC_DEPARTMENT: Option<&'static str>;
    /// Entity columns; every name here must be unique after aliasing.
    const PROJECTION: &'static str;
    /// `FROM ... JOIN ...` clause.
    const FROM: &'static str;
    const SORTABLE: &'static [&'static str];

    /// Extra visibility, ORed with the grant filter.
    fn widen_filter(&self, _viewer: &Viewer) -> Option<FilterClause> {
        None
    }

    fn map_row(&self, row: &PgRow) -> Result<Self::Entity, sqlx::Error>;
}

#[derive(Clone)]
pub struct Repository {
    pool: Pool<Postgres>,
    max_page_rows: i64,
}

impl Repository {
    pub fn new(pool: Pool<Postgres>, max_page_rows: i64) -> Self {
        Self {
            pool,
            max_page_rows,
        }
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }

    pub fn page_request<D: QueryDefinition>(
        &self,
        cursor: Option<i64>,
        rows: Option<i64>,
        sort: Option<&str>,
    ) -> Result<PageRequest, RepositoryError> {
        PageRequest::new(cursor, rows, sort, D::SORTABLE, self.max_page_rows)
    }

    pub async fn find_all<D: QueryDefinition>(
        &self,
        definition: &D,
        viewer: &Viewer,
        page: &PageRequest,
    ) -> Result<Vec<D::Entity>, RepositoryError> {
        let mut builder = select_visible(definition, viewer);
        page.push_keyset(&mut builder, push_source::<D>);
        page.push_order_and_limit(&mut builder);

        let rows = builder.build().fetch_all(&self.pool).await?;
        let entities = rows
            .iter()
            .map(|row| definition.map_row(row))
            .collect::<Result<Vec<_>, _>>()?;

        metrics::inc_rows_served(
            crate::SERVICE_NAME,
            D::Entity::TABLE.as_str(),
            entities.len(),
        );
        Ok(entities)
    }

    pub async fn find_by_id<D: QueryDefinition>(
        &self,
        definition: &D,
        viewer: &Viewer,
        id: i64,
    ) -> Result<Option<D::Entity>, RepositoryError> {
        let mut builder = select_visible(definition, viewer);
        builder.push(" AND q._pk = ");
        builder.push_bind(id);
        builder.push(" LIMIT 2");

        let rows = builder.build().fetch_all(&self.pool).await?;
        let row = single_row(rows, D::Entity::TABLE.as_str(), id)?;
        row.as_ref()
            .map(|row| definition.map_row(row))
            .transpose()
            .map_err(Into::into)
    }

    /// Administrative lookup; restricted grants are rejected before any query.
    pub async fn find_employee_by_username(
        &self,
        viewer: &Viewer,
        username: &str,
    ) -> Result<Option<Employee>, RepositoryError> {
        if !viewer.grant.is_unrestricted() {
            return Err(RepositoryError::Forbidden(
                "username lookup requires an unrestricted grant".to_string(),
            ));
        }

        let definition = EmployeeQuery;
        let mut builder = select_visible(&definition, viewer);
        builder.push(" AND q.username = ");
        builder.push_bind(username.to_string());
        builder.push(" LIMIT 2");

        let rows = builder.build().fetch_all(&self.pool).await?;
        if rows.len() > 1 {
            return Err(RepositoryError::Integrity(format!(
                "username {username} matched more than one employee"
            )));
        }
        rows.first()
            .map(|row| definition.map_row(row))
            .transpose()
            .map_err(Into::into)
    }
}

/// `SELECT q.* FROM (<definition>) AS q WHERE (<security filter>)`; callers
/// append further `AND` predicates.
pub(crate) fn select_visible<D: QueryDefinition>(
    definition: &D,
    viewer: &Viewer,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::<Postgres>::new("SELECT q.* FROM (");
    push_source::<D>(&mut builder);
    builder.push(") AS q WHERE ");
    push_security_filter(&mut builder, &viewer.grant, definition.widen_filter(viewer));
    builder
}

/// The definition's select with its control columns, before any filtering.
fn push_source<D: QueryDefinition>(builder: &mut QueryBuilder<'static, Postgres>) {
    builder.push("SELECT ");
    builder.push(D::PK);
    builder.push(" AS _pk, ");
    builder.push(D::SEC_CENTER.unwrap_or("NULL::bigint"));
    builder.push(" AS _sec_center, ");
    builder.push(D::SEC_DEPARTMENT.unwrap_or("NULL::bigint"));
    builder.push(" AS _sec_department, ");
    builder.push(D::PROJECTION);
    builder.push(" ");
    builder.push(D::FROM);
}

fn single_row(rows: Vec<PgRow>, table: &str, id: i64) -> Result<Option<PgRow>, RepositoryError> {
    if rows.len() > 1 {
        return Err(RepositoryError::Integrity(format!(
            "{table} lookup for id {id} returned {} rows",
            rows.len()
        )));
    }
    Ok(rows.into_iter().next())
}
