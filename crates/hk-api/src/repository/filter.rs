use hk_core::grant::{Grant, Scope};
use sqlx::{Postgres, QueryBuilder};

pub const SEC_CENTER_COLUMN: &str = "q._sec_center";
pub const SEC_DEPARTMENT_COLUMN: &str = "q._sec_department";

/// An entity-specific predicate that grants extra visibility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterClause {
    ColumnEquals { column: &'static str, value: i64 },
}

/// Pushes `((center) AND (department)) [OR (widen)]` with every id bound as a
/// parameter. Wildcard dimensions compile to `TRUE`.
pub fn push_security_filter(
    builder: &mut QueryBuilder<'static, Postgres>,
    grant: &Grant,
    widen: Option<FilterClause>,
) {
    builder.push("((");
    push_scope(builder, SEC_CENTER_COLUMN, &grant.center_ids);
    builder.push(") AND (");
    push_scope(builder, SEC_DEPARTMENT_COLUMN, &grant.department_ids);
    builder.push(")");
    if let Some(clause) = widen {
        builder.push(" OR (");
        push_clause(builder, clause);
        builder.push(")");
    }
    builder.push(")");
}

fn push_scope(builder: &mut QueryBuilder<'static, Postgres>, column: &str, scope: &Scope) {
    match scope {
        Scope::Wildcard => {
            builder.push("TRUE");
        }
        Scope::Ids(ids) => {
            builder.push(column);
            builder.push(" IS NULL OR ");
            builder.push(column);
            builder.push(" = ANY(");
            builder.push_bind(ids.iter().copied().collect::<Vec<i64>>());
            builder.push(")");
        }
    }
}

fn push_clause(builder: &mut QueryBuilder<'static, Postgres>, clause: FilterClause) {
    match clause {
        FilterClause::ColumnEquals { column, value } => {
            builder.push("q.");
            builder.push(column);
            builder.push(" = ");
            builder.push_bind(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(grant: &Grant, widen: Option<FilterClause>) -> String {
        let mut builder = QueryBuilder::<Postgres>::new("WHERE ");
        push_security_filter(&mut builder, grant, widen);
        builder.sql().to_string()
    }

    #[test]
    fn unrestricted_grant_degenerates_to_true() {
        assert_eq!(
            compile(&Grant::unrestricted(), None),
            "WHERE ((TRUE) AND (TRUE))"
        );
    }

    #[test]
    fn explicit_sets_are_bound_not_interpolated() {
        let grant = Grant::new(Scope::ids([1, 2]), Scope::ids([5]));
        assert_eq!(
            compile(&grant, None),
            "WHERE ((q._sec_center IS NULL OR q._sec_center = ANY($1)) AND \
             (q._sec_department IS NULL OR q._sec_department = ANY($2)))"
        );
    }

    #[test]
    fn widen_clause_is_ored_with_the_grant() {
        let grant = Grant::new(Scope::Wildcard, Scope::ids([5]));
        let sql = compile(
            &grant,
            Some(FilterClause::ColumnEquals {
                column: "author_id",
                value: 3,
            }),
        );
        assert_eq!(
            sql,
            "WHERE ((TRUE) AND (q._sec_department IS NULL OR q._sec_department = ANY($1)) \
             OR (q.author_id = $2))"
        );
    }
}
