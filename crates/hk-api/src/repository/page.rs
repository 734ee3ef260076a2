use super::RepositoryError;
use sqlx::{Postgres, QueryBuilder};

const DEFAULT_ROWS: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: &'static str,
    pub descending: bool,
}

/// One keyset page: rows after `cursor` (exclusive), ordered by the sort
/// keys with the primary key as the final tiebreaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: Option<i64>,
    pub rows: i64,
    pub sort: Vec<SortKey>,
}

impl PageRequest {
    pub fn new(
        cursor: Option<i64>,
        rows: Option<i64>,
        sort: Option<&str>,
        sortable: &[&'static str],
        max_rows: i64,
    ) -> Result<Self, RepositoryError> {
        let max_rows = max_rows.max(1);
        let rows = rows.unwrap_or(DEFAULT_ROWS).clamp(1, max_rows);
        let sort = match sort {
            Some(raw) => parse_sort(raw, sortable)?,
            None => Vec::new(),
        };
        Ok(Self { cursor, rows, sort })
    }

    /// Restricts to rows after the cursor row in `(sort keys..., _pk)` order.
    /// With sort keys the cursor row is read back through `source`, the
    /// unfiltered definition; a cursor row that no longer exists ends the walk.
    pub(crate) fn push_keyset(
        &self,
        builder: &mut QueryBuilder<'static, Postgres>,
        source: impl FnOnce(&mut QueryBuilder<'static, Postgres>),
    ) {
        let Some(cursor) = self.cursor else {
            return;
        };
        if self.sort.is_empty() {
            builder.push(" AND q._pk > ");
            builder.push_bind(cursor);
            return;
        }

        builder.push(" AND EXISTS (SELECT 1 FROM (");
        source(builder);
        builder.push(") AS k WHERE k._pk = ");
        builder.push_bind(cursor);
        builder.push(" AND (");
        for (index, key) in self.sort.iter().enumerate() {
            builder.push("(");
            for earlier in &self.sort[..index] {
                push_same(builder, earlier.column);
                builder.push(" AND ");
            }
            push_after(builder, key);
            builder.push(") OR ");
        }
        builder.push("(");
        for key in &self.sort {
            push_same(builder, key.column);
            builder.push(" AND ");
        }
        builder.push("q._pk > k._pk)))");
    }

    pub(crate) fn push_order_and_limit(&self, builder: &mut QueryBuilder<'static, Postgres>) {
        builder.push(" ORDER BY ");
        for key in &self.sort {
            builder.push("q.");
            builder.push(key.column);
            builder.push(if key.descending {
                " DESC NULLS FIRST, "
            } else {
                " ASC NULLS LAST, "
            });
        }
        builder.push("q._pk ASC LIMIT ");
        builder.push_bind(self.rows);
    }
}

fn push_same(builder: &mut QueryBuilder<'static, Postgres>, column: &'static str) {
    builder.push("q.");
    builder.push(column);
    builder.push(" IS NOT DISTINCT FROM k.");
    builder.push(column);
}

// Mirrors the NULLS placement of `push_order_and_limit`.
fn push_after(builder: &mut QueryBuilder<'static, Postgres>, key: &SortKey) {
    let column = key.column;
    let sql = if key.descending {
        format!("q.{column} IS NOT NULL AND (k.{column} IS NULL OR q.{column} < k.{column})")
    } else {
        format!("k.{column} IS NOT NULL AND (q.{column} IS NULL OR q.{column} > k.{column})")
    };
    builder.push(sql);
}

fn parse_sort(raw: &str, sortable: &[&'static str]) -> Result<Vec<SortKey>, RepositoryError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (name, descending) = match part.strip_prefix('-') {
                Some(name) => (name, true),
                None => (part, false),
            };
            sortable
                .iter()
                .copied()
                .find(|column| *column == name)
                .map(|column| SortKey {
                    column,
                    descending,
                })
                .ok_or_else(|| RepositoryError::InvalidInput(format!("cannot sort by {name}")))
        })
        .collect()
}
