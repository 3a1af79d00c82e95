//! SQL assembly: the WITH chain plus the final SELECT.
//!
//! CTEs are emitted in creation order, which the builder guarantees is
//! dependency order. Names are `t<N>` and cannot collide with reserved
//! words. The statement carries no trailing terminator.

use crate::dialect::DialectHandler;
use crate::generator::GeneratedQuery;

/// Render the complete statement.
pub fn assemble(query: &GeneratedQuery, dialect: &dyn DialectHandler) -> String {
    let mut sql = String::from("WITH ");
    for (i, cte) in query.ctes.iter().enumerate() {
        if i > 0 {
            sql.push_str(",\n");
        }
        sql.push_str(&cte.name);
        sql.push_str(" AS (\n");
        sql.push_str(&cte.body);
        sql.push_str("\n)");
    }

    sql.push_str("\nSELECT ");
    let columns: Vec<String> = query
        .column_names
        .iter()
        .map(|name| dialect.quote_ident(name))
        .collect();
    sql.push_str(&columns.join(", "));
    sql.push_str(" FROM ");
    sql.push_str(&query.last);
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cte::Cte;
    use crate::dialect::SqlDialect;
    use crate::generator::GeneratedQuery;

    #[test]
    fn chains_ctes_in_order() {
        let query = GeneratedQuery {
            ctes: vec![
                Cte {
                    name: "t1".into(),
                    columns: vec!["v".into()],
                    body: "SELECT 1 AS v".into(),
                    depends_on: vec![],
                },
                Cte {
                    name: "t2".into(),
                    columns: vec!["v".into()],
                    body: "SELECT v FROM t1".into(),
                    depends_on: vec!["t1".into()],
                },
            ],
            last: "t2".into(),
            column_names: vec!["id".into()],
        };
        let sql = assemble(&query, SqlDialect::Sqlite.handler());
        assert!(sql.starts_with("WITH t1 AS ("));
        assert!(sql.contains(",\nt2 AS ("));
        assert!(sql.ends_with("SELECT \"id\" FROM t2"));
        assert!(!sql.ends_with(';'));
    }
}
