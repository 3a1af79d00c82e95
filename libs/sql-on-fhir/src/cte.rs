//! Common table expression bookkeeping.
//!
//! Every intermediate relation becomes one CTE named `t<N>`. The counter is
//! seeded at 1 per compilation, so repeated compilations of the same input
//! yield byte-identical SQL. Names are emitted in creation order, which is
//! also dependency order: a CTE body only ever references earlier names.

/// One common table expression.
#[derive(Debug, Clone)]
pub struct Cte {
    pub name: String,

    /// Output column names, in order.
    pub columns: Vec<String>,

    /// The SELECT body, without the `name AS (...)` wrapper.
    pub body: String,

    /// Names of earlier CTEs referenced by the body.
    pub depends_on: Vec<String>,
}

/// Allocates `t<N>` names and accumulates CTEs in dependency order.
#[derive(Debug, Default)]
pub struct CteBuilder {
    counter: usize,
    ctes: Vec<Cte>,
}

impl CteBuilder {
    pub fn new() -> Self {
        Self {
            counter: 0,
            ctes: Vec::new(),
        }
    }

    /// Add a CTE and return its allocated name.
    pub fn push(
        &mut self,
        body: String,
        columns: Vec<String>,
        depends_on: Vec<String>,
    ) -> String {
        self.counter += 1;
        let name = format!("t{}", self.counter);
        debug_assert!(
            depends_on.iter().all(|d| self.ctes.iter().any(|c| &c.name == d)),
            "CTE {name} depends on an unknown name"
        );
        self.ctes.push(Cte {
            name: name.clone(),
            columns,
            body,
            depends_on,
        });
        name
    }

    pub fn ctes(&self) -> &[Cte] {
        &self.ctes
    }

    pub fn into_ctes(self) -> Vec<Cte> {
        self.ctes
    }

    pub fn last_name(&self) -> Option<&str> {
        self.ctes.last().map(|c| c.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_count_from_one() {
        let mut builder = CteBuilder::new();
        let first = builder.push("SELECT 1".into(), vec!["v".into()], vec![]);
        let second = builder.push("SELECT 2".into(), vec!["v".into()], vec![first.clone()]);
        assert_eq!(first, "t1");
        assert_eq!(second, "t2");
        assert_eq!(builder.ctes().len(), 2);
    }

    #[test]
    fn fresh_builder_restarts_names() {
        let mut a = CteBuilder::new();
        a.push("SELECT 1".into(), vec![], vec![]);
        let mut b = CteBuilder::new();
        let name = b.push("SELECT 1".into(), vec![], vec![]);
        assert_eq!(name, "t1");
    }
}
