//! CTE generation: lowering the relation tree to SQL.
//!
//! Every FHIRPath operation becomes one CTE with the uniform shape
//! `(key columns..., ord, v)`. A collection is the set of rows sharing a
//! key; the empty collection is the absence of rows. `ord` is the 1-based
//! position within the collection. Literal operands fold inline instead of
//! materialising one-row relations.
//!
//! Scopes nest by key extension: the base relation is keyed by `row_id`;
//! each `forEach` (and each `where()` element context) appends one key
//! column `k<N>`. Key joins are null-safe so that `forEachOrNull` rows
//! survive deeper joins.

use quarz_fhirpath::{BinaryOp, Expr, ExprKind, LiteralValue, TypeOperator, UnaryOp};
use quarz_schema::{choice_field_key, choice_types_for, is_choice_field};
use tracing::debug;

use crate::cte::{Cte, CteBuilder};
use crate::dialect::DialectHandler;
use crate::error::{Error, Result};
use crate::relation::{ColumnDef, RelationTree, SelectNode};
use crate::translate::is_null_literal;

/// SQL-level type of a relation's `v` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VKind {
    /// JSON fragment (jsonb in postgres, json text or SQL scalar in sqlite).
    Json,
    Text,
    Num,
    Bool,
}

/// A generated relation: CTE name, key columns, value kind.
#[derive(Debug, Clone)]
struct Rel {
    cte: String,
    keys: Vec<String>,
    vkind: VKind,
}

/// A lowered expression: a relation, an inline scalar, or statically empty.
#[derive(Debug, Clone)]
enum Value {
    Rel(Rel),
    Inline(Scalar),
    Empty,
}

#[derive(Debug, Clone)]
struct Scalar {
    sql: String,
    kind: VKind,
}

/// Everything the assembler needs for the final statement.
#[derive(Debug)]
pub struct GeneratedQuery {
    pub ctes: Vec<Cte>,
    /// Name of the CTE holding the final row set.
    pub last: String,
    /// Output column names, in order.
    pub column_names: Vec<String>,
}

pub struct Generator<'a> {
    d: &'a dyn DialectHandler,
    table: &'a str,
    resource_type: String,
    b: CteBuilder,
    key_counter: usize,
}

impl<'a> Generator<'a> {
    pub fn new(d: &'a dyn DialectHandler, table: &'a str, resource_type: &str) -> Self {
        Self {
            d,
            table,
            resource_type: resource_type.to_string(),
            b: CteBuilder::new(),
            key_counter: 0,
        }
    }

    /// Lower the whole tree: base, filters, select hierarchy, projection.
    pub fn generate(mut self, tree: &RelationTree) -> Result<GeneratedQuery> {
        let mut spine = self.base()?;

        for filter in &tree.filters {
            spine = self.filter(&spine, filter)?;
        }

        let (rowset, column_names) = self.rowset(&tree.root, &spine)?;
        debug!(ctes = self.b.ctes().len(), "generated CTE chain");

        Ok(GeneratedQuery {
            ctes: self.b.into_ctes(),
            last: rowset.cte,
            column_names,
        })
    }

    fn next_key(&mut self) -> String {
        self.key_counter += 1;
        format!("k{}", self.key_counter)
    }

    /// `Base(T)`: one row per resource of the view's type.
    fn base(&mut self) -> Result<Rel> {
        let type_check = self.d.extract_text("resource", "resourceType");
        let body = format!(
            "SELECT id AS row_id, 1 AS ord, resource AS v\nFROM {}\nWHERE {} = {}",
            self.table,
            type_check,
            self.d.quote_string(&self.resource_type),
        );
        let cte = self.b.push(
            body,
            vec!["row_id".into(), "ord".into(), "v".into()],
            vec![],
        );
        Ok(Rel {
            cte,
            keys: vec!["row_id".into()],
            vkind: VKind::Json,
        })
    }

    /// `Filter`: keep spine rows whose condition coerces to true.
    fn filter(&mut self, spine: &Rel, condition: &Expr) -> Result<Rel> {
        let cond = self.lower(condition, spine)?;
        let (body, deps) = match cond {
            Value::Rel(cond) => {
                let on = self.key_join("s", "c", &spine.keys);
                let body = format!(
                    "SELECT {}, s.ord, s.v\nFROM {} s\nJOIN {} c ON {} AND c.ord = 1\nWHERE {}",
                    cols("s", &spine.keys),
                    spine.cte,
                    cond.cte,
                    on,
                    self.bool_of("c.v", cond.vkind),
                );
                (body, vec![spine.cte.clone(), cond.cte])
            }
            Value::Inline(scalar) => {
                let body = format!(
                    "SELECT {}, s.ord, s.v\nFROM {} s\nWHERE {}",
                    cols("s", &spine.keys),
                    spine.cte,
                    self.bool_of(&scalar.sql, scalar.kind),
                );
                (body, vec![spine.cte.clone()])
            }
            // A statically empty condition never holds.
            Value::Empty => (
                format!(
                    "SELECT {}, s.ord, s.v\nFROM {} s\nWHERE 1 = 0",
                    cols("s", &spine.keys),
                    spine.cte
                ),
                vec![spine.cte.clone()],
            ),
        };
        let columns = rel_columns(&spine.keys);
        let cte = self.b.push(body, columns, deps);
        Ok(Rel {
            cte,
            keys: spine.keys.clone(),
            vkind: spine.vkind,
        })
    }

    /// Lower one select scope into a row set carrying its column values.
    /// Returns the row-set relation plus the produced column names in order.
    fn rowset(&mut self, node: &SelectNode, parent: &Rel) -> Result<(Rel, Vec<String>)> {
        let scope = match &node.for_each {
            Some(clause) => self.for_each(parent, &clause.path, clause.keep_null_rows)?,
            None => parent.clone(),
        };

        // Own columns, each as a single-value relation keyed by the scope.
        let mut column_names = Vec::new();
        let mut column_rels = Vec::new();
        for def in &node.columns {
            column_names.push(def.name.clone());
            column_rels.push(self.column_value(def, &scope)?);
        }

        let mut select_items: Vec<String> = scope
            .keys
            .iter()
            .map(|k| format!("r.{k}"))
            .collect();
        let mut from = format!("{} r", scope.cte);
        let mut deps = vec![scope.cte.clone()];
        for (i, (name, rel)) in column_names.iter().zip(&column_rels).enumerate() {
            let alias = format!("c{}", i + 1);
            select_items.push(format!("{alias}.v AS {}", self.d.quote_ident(name)));
            from.push_str(&format!(
                "\nLEFT JOIN {} {alias} ON {}",
                rel.cte,
                self.key_join("r", &alias, &scope.keys)
            ));
            deps.push(rel.cte.clone());
        }

        let mut columns = scope.keys.clone();
        columns.extend(column_names.iter().cloned());
        let body = format!("SELECT {}\nFROM {}", select_items.join(", "), from);
        let own = self.b.push(body, columns, deps);
        let mut result = Rel {
            cte: own,
            keys: scope.keys.clone(),
            vkind: VKind::Json,
        };
        let mut produced = column_names;

        // Nested scopes multiply rows by cross join on the scope keys.
        for child in &node.children {
            let (child_rowset, child_columns) = self.rowset(child, &scope)?;
            result = self.join_rowsets(&result, &produced, &child_rowset, &child_columns, &scope)?;
            produced.extend(child_columns);
        }

        // unionAll: branches concatenated in declared order, then joined in
        // like a nested scope.
        if !node.union.is_empty() {
            let (union_rel, union_columns) = self.union_branches(&node.union, &scope)?;
            result = self.join_rowsets(&result, &produced, &union_rel, &union_columns, &scope)?;
            produced.extend(union_columns);
        }

        Ok((result, produced))
    }

    /// `ForEach`: unnest an iteration path, extending the key vector.
    fn for_each(&mut self, parent: &Rel, path: &Expr, keep_null_rows: bool) -> Result<Rel> {
        let elements = match self.lower(path, parent)? {
            Value::Rel(rel) => rel,
            Value::Inline(scalar) => self.materialize(&scalar, parent),
            Value::Empty => self.empty_rel(parent),
        };

        let key = self.next_key();
        let mut keys = parent.keys.clone();

        let (body, deps) = if keep_null_rows {
            let on = self.key_join("p", "e", &parent.keys);
            (
                format!(
                    "SELECT {}, e.ord AS {key}, 1 AS ord, e.v\nFROM {} p\nLEFT JOIN {} e ON {}",
                    cols("p", &parent.keys),
                    parent.cte,
                    elements.cte,
                    on
                ),
                vec![parent.cte.clone(), elements.cte.clone()],
            )
        } else {
            (
                format!(
                    "SELECT {}, e.ord AS {key}, 1 AS ord, e.v\nFROM {} e",
                    cols("e", &parent.keys),
                    elements.cte
                ),
                vec![elements.cte.clone()],
            )
        };

        keys.push(key);
        let columns = rel_columns(&keys);
        let cte = self.b.push(body, columns, deps);
        Ok(Rel {
            cte,
            keys,
            vkind: elements.vkind,
        })
    }

    /// One projected column as a single-value relation keyed by the scope.
    fn column_value(&mut self, def: &ColumnDef, scope: &Rel) -> Result<Rel> {
        // An explicit `{}` path materialises a JSON null, not an absent value.
        if is_null_literal(&def.expr) {
            let body = format!(
                "SELECT {}, {} AS v\nFROM {} s",
                cols("s", &scope.keys),
                self.d.json_null(),
                scope.cte
            );
            let columns = value_columns(&scope.keys);
            let cte = self.b.push(body, columns, vec![scope.cte.clone()]);
            return Ok(Rel {
                cte,
                keys: scope.keys.clone(),
                vkind: VKind::Json,
            });
        }

        let value = self.lower(&def.expr, scope)?;
        let rel = match value {
            Value::Rel(rel) => rel,
            Value::Inline(scalar) => self.materialize(&scalar, scope),
            Value::Empty => self.empty_rel(scope),
        };

        let (body, columns) = if def.collection {
            // Ordered subquery so input-order aggregates stay stable.
            let agg = self.d.array_agg("o.v", "o.ord");
            (
                format!(
                    "SELECT {}, {agg} AS v\nFROM (SELECT * FROM {} ORDER BY ord) o\nGROUP BY {}",
                    cols("o", &scope.keys),
                    rel.cte,
                    cols("o", &scope.keys)
                ),
                value_columns(&scope.keys),
            )
        } else {
            let typed = self.typed_output(def, "s.v", rel.vkind);
            (
                format!(
                    "SELECT {}, {typed} AS v\nFROM {} s\nWHERE s.ord = 1",
                    cols("s", &scope.keys),
                    rel.cte
                ),
                value_columns(&scope.keys),
            )
        };
        let deps = vec![rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: rel.vkind,
        })
    }

    /// Typed extraction for a scalar output column.
    fn typed_output(&self, def: &ColumnDef, v: &str, vkind: VKind) -> String {
        use quarz_schema::ColumnType;
        match def.type_hint {
            ColumnType::Json => v.to_string(),
            ColumnType::Integer | ColumnType::Decimal => self.num_of(v, vkind),
            ColumnType::Boolean => self.bool_of(v, vkind),
            _ => self.text_of(v, vkind),
        }
    }

    /// Cross join of two row sets on the shared scope keys.
    fn join_rowsets(
        &mut self,
        left: &Rel,
        left_columns: &[String],
        right: &Rel,
        right_columns: &[String],
        scope: &Rel,
    ) -> Result<Rel> {
        let mut select_items: Vec<String> = left
            .keys
            .iter()
            .map(|k| format!("a.{k}"))
            .collect();
        for name in left_columns {
            select_items.push(format!("a.{}", self.d.quote_ident(name)));
        }
        for name in right_columns {
            select_items.push(format!("b.{}", self.d.quote_ident(name)));
        }

        let on = self.key_join("a", "b", &scope.keys);
        let body = format!(
            "SELECT {}\nFROM {} a\nJOIN {} b ON {}",
            select_items.join(", "),
            left.cte,
            right.cte,
            on
        );
        let mut columns = left.keys.clone();
        columns.extend(left_columns.iter().cloned());
        columns.extend(right_columns.iter().cloned());
        let deps = vec![left.cte.clone(), right.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Rel {
            cte,
            keys: left.keys.clone(),
            vkind: VKind::Json,
        })
    }

    /// UNION ALL of branch row sets, schema taken from the first branch.
    fn union_branches(
        &mut self,
        branches: &[SelectNode],
        scope: &Rel,
    ) -> Result<(Rel, Vec<String>)> {
        let mut lowered = Vec::new();
        let mut first_columns: Vec<String> = Vec::new();
        for (i, branch) in branches.iter().enumerate() {
            let (rel, columns) = self.rowset(branch, scope)?;
            if i == 0 {
                first_columns = columns.clone();
            }
            lowered.push(rel);
        }

        let column_list: Vec<String> = scope
            .keys
            .iter()
            .cloned()
            .chain(first_columns.iter().map(|c| self.d.quote_ident(c)))
            .collect();
        let selects: Vec<String> = lowered
            .iter()
            .map(|rel| format!("SELECT {} FROM {}", column_list.join(", "), rel.cte))
            .collect();
        let body = selects.join("\nUNION ALL\n");
        let mut columns = scope.keys.clone();
        columns.extend(first_columns.iter().cloned());
        let deps: Vec<String> = lowered.iter().map(|r| r.cte.clone()).collect();
        let cte = self.b.push(body, columns, deps);
        Ok((
            Rel {
                cte,
                keys: scope.keys.clone(),
                vkind: VKind::Json,
            },
            first_columns,
        ))
    }

    // ------------------------------------------------------------------
    // Expression lowering
    // ------------------------------------------------------------------

    fn lower(&mut self, expr: &Expr, scope: &Rel) -> Result<Value> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(self.literal(literal)),

            ExprKind::Identifier(name) => {
                // Path-root resource assertion: `Patient.name` inside a
                // Patient view is the resource itself.
                if scope.keys.len() == 1 && *name == self.resource_type {
                    return Ok(Value::Rel(scope.clone()));
                }
                let resolved = annotated_type(expr).is_some();
                Ok(Value::Rel(self.member_step(scope, name, resolved)?))
            }

            ExprKind::MemberAccess { expr: inner, name } => {
                let resolved = annotated_type(expr).is_some();
                match self.lower(inner, scope)? {
                    Value::Rel(rel) => Ok(Value::Rel(self.member_step(&rel, name, resolved)?)),
                    // Member access on a literal or empty value is empty.
                    _ => Ok(Value::Empty),
                }
            }

            ExprKind::Indexer { expr: inner, index } => self.indexer(inner, index, scope),

            ExprKind::Unary { op, operand } => self.unary(*op, operand, scope),

            ExprKind::Binary { op, left, right } => self.binary(*op, left, right, scope),

            ExprKind::TypeOp {
                op,
                expr: inner,
                type_name,
            } => self.type_op(*op, inner, type_name, scope),

            ExprKind::Invocation {
                receiver,
                name,
                args,
            } => self.invocation(receiver.as_deref(), name, args, scope),
        }
    }

    fn literal(&self, literal: &LiteralValue) -> Value {
        let scalar = match literal {
            LiteralValue::Null => return Value::Empty,
            LiteralValue::String(s) => Scalar {
                sql: self.d.quote_string(s),
                kind: VKind::Text,
            },
            LiteralValue::Integer(i) => Scalar {
                sql: i.to_string(),
                kind: VKind::Num,
            },
            LiteralValue::Decimal(d) => Scalar {
                sql: d.to_string(),
                kind: VKind::Num,
            },
            LiteralValue::Boolean(b) => Scalar {
                sql: if *b {
                    self.d.bool_true().into()
                } else {
                    self.d.bool_false().into()
                },
                kind: VKind::Bool,
            },
            LiteralValue::Date(s) | LiteralValue::DateTime(s) | LiteralValue::Time(s) => Scalar {
                sql: self.d.quote_string(s),
                kind: VKind::Text,
            },
            // Quantity literals compare by value; units are carried in the
            // expression, not the data.
            LiteralValue::Quantity { value, .. } => Scalar {
                sql: value.to_string(),
                kind: VKind::Num,
            },
        };
        Value::Inline(scalar)
    }

    /// `a.b`: coerce to array, unnest, extract, flatten, re-rank. `resolved`
    /// marks a member the element table answered, which suppresses the
    /// choice-key fallback.
    fn member_step(&mut self, input: &Rel, name: &str, resolved: bool) -> Result<Rel> {
        let extracted = if resolved {
            self.d.extract_json("i.v", name)
        } else {
            self.field_json("i.v", name)
        };
        let listed = self.coerce_list(&extracted);
        let unnest = self.d.unnest_relation(&listed, "u");
        let body = format!(
            "SELECT {}, row_number() OVER (PARTITION BY {} ORDER BY i.ord, {}) AS ord, {} AS v\nFROM {} i, {}",
            cols("i", &input.keys),
            cols("i", &input.keys),
            self.d.unnest_ordinal("u"),
            self.d.unnest_value("u"),
            input.cte,
            unnest
        );
        let columns = rel_columns(&input.keys);
        let cte = self
            .b
            .push(body, columns, vec![input.cte.clone()]);
        Ok(Rel {
            cte,
            keys: input.keys.clone(),
            vkind: VKind::Json,
        })
    }

    /// Extract one field as JSON. A choice-type field name also matches its
    /// concrete expansions: `deceased` reads `deceased`, then
    /// `deceasedBoolean`, then `deceasedDateTime`. The plain name comes
    /// first so that ordinary elements sharing a choice name (ContactPoint's
    /// `value`) resolve without consulting the expansions.
    fn field_json(&self, v: &str, name: &str) -> String {
        let plain = self.d.extract_json(v, name);
        let Some(types) = choice_types_for(name) else {
            return plain;
        };
        let mut branches = vec![plain];
        for ty in types {
            branches.push(self.d.extract_json(v, &choice_field_key(name, ty)));
        }
        format!("COALESCE({})", branches.join(", "))
    }

    /// Missing -> empty array, scalar -> singleton array, array -> itself.
    fn coerce_list(&self, json: &str) -> String {
        format!(
            "(CASE WHEN {json} IS NULL THEN {} WHEN {} = 'array' THEN {json} ELSE {} END)",
            self.d.empty_array(),
            self.d.json_typeof(json),
            self.d.wrap_array(json),
        )
    }

    fn indexer(&mut self, inner: &Expr, index: &Expr, scope: &Rel) -> Result<Value> {
        let rel = match self.lower(inner, scope)? {
            Value::Rel(rel) => rel,
            _ => return Ok(Value::Empty),
        };
        let index = self.lower(index, scope)?;
        let (body, deps) = match index {
            Value::Inline(scalar) => (
                format!(
                    "SELECT {}, 1 AS ord, s.v\nFROM {} s\nWHERE s.ord = ({}) + 1",
                    cols("s", &rel.keys),
                    rel.cte,
                    scalar.sql
                ),
                vec![rel.cte.clone()],
            ),
            Value::Rel(idx) => {
                let on = self.key_join("s", "ix", &rel.keys);
                (
                    format!(
                        "SELECT {}, 1 AS ord, s.v\nFROM {} s\nJOIN {} ix ON {} AND ix.ord = 1\nWHERE s.ord = {} + 1",
                        cols("s", &rel.keys),
                        rel.cte,
                        idx.cte,
                        on,
                        self.num_of("ix.v", idx.vkind)
                    ),
                    vec![rel.cte.clone(), idx.cte.clone()],
                )
            }
            Value::Empty => return Ok(Value::Empty),
        };
        let columns = rel_columns(&rel.keys);
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: rel.keys,
            vkind: VKind::Json,
        }))
    }

    fn unary(&mut self, op: UnaryOp, operand: &Expr, scope: &Rel) -> Result<Value> {
        match op {
            UnaryOp::Plus => self.lower(operand, scope),
            UnaryOp::Minus => match self.lower(operand, scope)? {
                Value::Inline(scalar) => Ok(Value::Inline(Scalar {
                    sql: format!("(-({}))", scalar.sql),
                    kind: VKind::Num,
                })),
                Value::Rel(rel) => {
                    let value = format!("(-({}))", self.num_of("s.v", rel.vkind));
                    Ok(Value::Rel(self.map_rel(&rel, &value, VKind::Num)))
                }
                Value::Empty => Ok(Value::Empty),
            },
            UnaryOp::Not => self.logical_not(operand, scope),
        }
    }

    fn logical_not(&mut self, operand: &Expr, scope: &Rel) -> Result<Value> {
        match self.lower(operand, scope)? {
            Value::Empty => Ok(Value::Empty),
            Value::Inline(scalar) => Ok(Value::Inline(Scalar {
                sql: format!(
                    "(CASE WHEN {b} = {t} THEN {f} WHEN {b} = {f} THEN {t} END)",
                    b = self.bool_of(&scalar.sql, scalar.kind),
                    t = self.d.bool_true(),
                    f = self.d.bool_false(),
                ),
                kind: VKind::Bool,
            })),
            Value::Rel(rel) => {
                let on = self.key_join("s", "o", &scope.keys);
                let b = self.bool_of("o.v", rel.vkind);
                let body = format!(
                    "SELECT x.* FROM (\nSELECT {}, 1 AS ord, CASE WHEN {b} IS NULL THEN NULL WHEN {b} = {t} THEN {f} ELSE {t} END AS v\nFROM {} s\nLEFT JOIN {} o ON {} AND o.ord = 1\n) x WHERE x.v IS NOT NULL",
                    cols("s", &scope.keys),
                    scope.cte,
                    rel.cte,
                    on,
                    t = self.d.bool_true(),
                    f = self.d.bool_false(),
                );
                let columns = rel_columns(&scope.keys);
                let deps = vec![scope.cte.clone(), rel.cte.clone()];
                let cte = self.b.push(body, columns, deps);
                Ok(Value::Rel(Rel {
                    cte,
                    keys: scope.keys.clone(),
                    vkind: VKind::Bool,
                }))
            }
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, scope: &Rel) -> Result<Value> {
        if op.is_boolean() {
            return self.logical(op, left, right, scope);
        }
        match op {
            BinaryOp::Union => self.union_values(left, right, scope),
            BinaryOp::Concat => self.concat(left, right, scope),
            BinaryOp::In | BinaryOp::Contains => self.membership(op, left, right, scope),
            _ => self.scalar_binary(op, left, right, scope),
        }
    }

    /// Comparison and arithmetic: empty operands propagate empty via joins.
    fn scalar_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &Rel,
    ) -> Result<Value> {
        let lv = self.lower(left, scope)?;
        let rv = self.lower(right, scope)?;
        if matches!(lv, Value::Empty) || matches!(rv, Value::Empty) {
            return Ok(Value::Empty);
        }

        let compare_kind = self.operand_kind(left, &lv, right, &rv);
        let result_kind = if op.is_comparison() {
            VKind::Bool
        } else {
            VKind::Num
        };

        match (lv, rv) {
            (Value::Inline(l), Value::Inline(r)) => {
                let sql = self.scalar_op(op, &l.sql, l.kind, &r.sql, r.kind, compare_kind);
                Ok(Value::Inline(Scalar {
                    sql,
                    kind: result_kind,
                }))
            }
            (Value::Rel(l), Value::Inline(r)) => {
                let value = self.scalar_op(op, "l.v", l.vkind, &r.sql, r.kind, compare_kind);
                let body = format!(
                    "SELECT {}, 1 AS ord, {value} AS v\nFROM {} l\nWHERE l.ord = 1",
                    cols("l", &l.keys),
                    l.cte
                );
                let columns = rel_columns(&l.keys);
                let deps = vec![l.cte.clone()];
                let cte = self.b.push(body, columns, deps);
                Ok(Value::Rel(Rel {
                    cte,
                    keys: l.keys,
                    vkind: result_kind,
                }))
            }
            (Value::Inline(l), Value::Rel(r)) => {
                let value = self.scalar_op(op, &l.sql, l.kind, "r.v", r.vkind, compare_kind);
                let body = format!(
                    "SELECT {}, 1 AS ord, {value} AS v\nFROM {} r\nWHERE r.ord = 1",
                    cols("r", &r.keys),
                    r.cte
                );
                let columns = rel_columns(&r.keys);
                let deps = vec![r.cte.clone()];
                let cte = self.b.push(body, columns, deps);
                Ok(Value::Rel(Rel {
                    cte,
                    keys: r.keys,
                    vkind: result_kind,
                }))
            }
            (Value::Rel(l), Value::Rel(r)) => {
                let on = self.key_join("l", "r", &l.keys);
                let value = self.scalar_op(op, "l.v", l.vkind, "r.v", r.vkind, compare_kind);
                let body = format!(
                    "SELECT {}, 1 AS ord, {value} AS v\nFROM {} l\nJOIN {} r ON {} AND r.ord = 1\nWHERE l.ord = 1",
                    cols("l", &l.keys),
                    l.cte,
                    r.cte,
                    on
                );
                let columns = rel_columns(&l.keys);
                let deps = vec![l.cte.clone(), r.cte.clone()];
                let cte = self.b.push(body, columns, deps);
                Ok(Value::Rel(Rel {
                    cte,
                    keys: l.keys,
                    vkind: result_kind,
                }))
            }
            _ => unreachable!("empty handled above"),
        }
    }

    /// Pick the comparison representation: numbers and booleans compare in
    /// their own domain, everything else as text.
    fn operand_kind(&self, left: &Expr, lv: &Value, right: &Expr, rv: &Value) -> VKind {
        fn value_kind(v: &Value) -> Option<VKind> {
            match v {
                Value::Inline(s) => Some(s.kind),
                Value::Rel(r) => Some(r.vkind),
                Value::Empty => None,
            }
        }
        fn meta_kind(e: &Expr) -> Option<VKind> {
            let t = e.meta.as_ref()?.fhir_type.as_deref()?;
            Some(match t {
                "integer" | "positiveInt" | "unsignedInt" | "integer64" | "decimal" => VKind::Num,
                "boolean" => VKind::Bool,
                _ => VKind::Text,
            })
        }

        let kinds = [
            value_kind(lv),
            value_kind(rv),
            meta_kind(left),
            meta_kind(right),
        ];
        if kinds.iter().flatten().any(|k| *k == VKind::Num) {
            VKind::Num
        } else if kinds.iter().flatten().any(|k| *k == VKind::Bool) {
            VKind::Bool
        } else {
            VKind::Text
        }
    }

    fn scalar_op(
        &self,
        op: BinaryOp,
        l: &str,
        lk: VKind,
        r: &str,
        rk: VKind,
        operand_kind: VKind,
    ) -> String {
        let (lv, rv) = match operand_kind {
            VKind::Num => (self.num_of(l, lk), self.num_of(r, rk)),
            VKind::Bool => (self.bool_of(l, lk), self.bool_of(r, rk)),
            _ => (self.text_of(l, lk), self.text_of(r, rk)),
        };
        match op {
            BinaryOp::Equal | BinaryOp::Equivalent => format!("({lv} = {rv})"),
            BinaryOp::NotEqual | BinaryOp::NotEquivalent => format!("({lv} <> {rv})"),
            BinaryOp::LessThan => format!("({lv} < {rv})"),
            BinaryOp::LessThanOrEqual => format!("({lv} <= {rv})"),
            BinaryOp::GreaterThan => format!("({lv} > {rv})"),
            BinaryOp::GreaterThanOrEqual => format!("({lv} >= {rv})"),
            BinaryOp::Add => format!("({lv} + {rv})"),
            BinaryOp::Subtract => format!("({lv} - {rv})"),
            BinaryOp::Multiply => format!("({lv} * {rv})"),
            // 1.0 multiplier forces real division in engines with integer '/'.
            BinaryOp::Divide => format!("({lv} * 1.0 / {rv})"),
            BinaryOp::IntDivide => self.d.trunc_to_int(&format!("({lv} * 1.0 / {rv})")),
            BinaryOp::Modulo => format!("({lv} % {rv})"),
            other => unreachable!("not a scalar operator: {other:?}"),
        }
    }

    /// Three-valued and/or/xor/implies over possibly-empty operands.
    fn logical(&mut self, op: BinaryOp, left: &Expr, right: &Expr, scope: &Rel) -> Result<Value> {
        let lv = self.lower(left, scope)?;
        let rv = self.lower(right, scope)?;

        // Operand rendition inside the CASE: a joined alias or a constant.
        let mut from = format!("{} s", scope.cte);
        let mut deps = vec![scope.cte.clone()];
        let mut operand = |value: Value, alias: &str, this: &Self| -> String {
            match value {
                Value::Empty => "NULL".to_string(),
                Value::Inline(scalar) => this.bool_of(&scalar.sql, scalar.kind),
                Value::Rel(rel) => {
                    let on = this.key_join("s", alias, &scope.keys);
                    from.push_str(&format!(
                        "\nLEFT JOIN {} {alias} ON {} AND {alias}.ord = 1",
                        rel.cte, on
                    ));
                    deps.push(rel.cte.clone());
                    this.bool_of(&format!("{alias}.v"), rel.vkind)
                }
            }
        };
        let lb = operand(lv, "l", self);
        let rb = operand(rv, "r", self);

        let t = self.d.bool_true();
        let f = self.d.bool_false();
        let case = match op {
            BinaryOp::And => format!(
                "CASE WHEN {lb} = {f} OR {rb} = {f} THEN {f} WHEN {lb} IS NULL OR {rb} IS NULL THEN NULL ELSE {t} END"
            ),
            BinaryOp::Or => format!(
                "CASE WHEN {lb} = {t} OR {rb} = {t} THEN {t} WHEN {lb} IS NULL OR {rb} IS NULL THEN NULL ELSE {f} END"
            ),
            BinaryOp::Xor => format!(
                "CASE WHEN {lb} IS NULL OR {rb} IS NULL THEN NULL WHEN {lb} = {rb} THEN {f} ELSE {t} END"
            ),
            BinaryOp::Implies => format!(
                "CASE WHEN {lb} = {f} THEN {t} WHEN {rb} = {t} THEN {t} WHEN {lb} IS NULL OR {rb} IS NULL THEN NULL ELSE {f} END"
            ),
            other => unreachable!("not a logical operator: {other:?}"),
        };

        let body = format!(
            "SELECT x.* FROM (\nSELECT {}, 1 AS ord, {case} AS v\nFROM {from}\n) x WHERE x.v IS NOT NULL",
            cols("s", &scope.keys),
        );
        let columns = rel_columns(&scope.keys);
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: VKind::Bool,
        }))
    }

    /// `l | r`: concatenate collections, left branch first.
    fn union_values(&mut self, left: &Expr, right: &Expr, scope: &Rel) -> Result<Value> {
        let l = self.lower_to_rel(left, scope)?;
        let r = self.lower_to_rel(right, scope)?;
        let keys = scope.keys.clone();
        let body = format!(
            "SELECT {}, row_number() OVER (PARTITION BY {} ORDER BY u.br, u.ord) AS ord, u.v\nFROM (\nSELECT {}, ord, v, 0 AS br FROM {}\nUNION ALL\nSELECT {}, ord, v, 1 AS br FROM {}\n) u",
            cols("u", &keys),
            cols("u", &keys),
            keys.join(", "),
            l.cte,
            keys.join(", "),
            r.cte
        );
        let columns = rel_columns(&keys);
        let deps = vec![l.cte.clone(), r.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys,
            vkind: VKind::Json,
        }))
    }

    /// `&`: string concatenation; empty operands read as ''.
    fn concat(&mut self, left: &Expr, right: &Expr, scope: &Rel) -> Result<Value> {
        let lv = self.lower(left, scope)?;
        let rv = self.lower(right, scope)?;

        let mut from = format!("{} s", scope.cte);
        let mut deps = vec![scope.cte.clone()];
        let mut operand = |value: Value, alias: &str, this: &Self| -> String {
            match value {
                Value::Empty => "''".to_string(),
                Value::Inline(scalar) => format!(
                    "COALESCE({}, '')",
                    this.text_of(&scalar.sql, scalar.kind)
                ),
                Value::Rel(rel) => {
                    let on = this.key_join("s", alias, &scope.keys);
                    from.push_str(&format!(
                        "\nLEFT JOIN {} {alias} ON {} AND {alias}.ord = 1",
                        rel.cte, on
                    ));
                    deps.push(rel.cte.clone());
                    format!(
                        "COALESCE({}, '')",
                        this.text_of(&format!("{alias}.v"), rel.vkind)
                    )
                }
            }
        };
        let lt = operand(lv, "l", self);
        let rt = operand(rv, "r", self);

        let body = format!(
            "SELECT {}, 1 AS ord, ({lt} || {rt}) AS v\nFROM {from}",
            cols("s", &scope.keys),
        );
        let columns = rel_columns(&scope.keys);
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: VKind::Text,
        }))
    }

    /// `l in r` / `l contains r`: element membership by text equality.
    fn membership(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &Rel,
    ) -> Result<Value> {
        // contains is in with the operands swapped.
        let (needle, haystack) = if op == BinaryOp::In {
            (left, right)
        } else {
            (right, left)
        };
        let needle = match self.lower(needle, scope)? {
            Value::Empty => return Ok(Value::Empty),
            v => v,
        };
        let hay = self.lower_to_rel(haystack, scope)?;

        let (body, deps) = match needle {
            Value::Rel(n) => {
                let on = self.key_join("n", "h", &n.keys);
                let eq = format!(
                    "{} = {}",
                    self.text_of("h.v", hay.vkind),
                    self.text_of("n.v", n.vkind)
                );
                (
                    format!(
                        "SELECT {}, 1 AS ord, EXISTS (SELECT 1 FROM {} h WHERE {} AND {eq}) AS v\nFROM {} n\nWHERE n.ord = 1",
                        cols("n", &n.keys),
                        hay.cte,
                        on,
                        n.cte
                    ),
                    vec![n.cte.clone(), hay.cte.clone()],
                )
            }
            Value::Inline(scalar) => {
                let on = self.key_join("s", "h", &scope.keys);
                let eq = format!(
                    "{} = {}",
                    self.text_of("h.v", hay.vkind),
                    self.text_of(&scalar.sql, scalar.kind)
                );
                (
                    format!(
                        "SELECT {}, 1 AS ord, EXISTS (SELECT 1 FROM {} h WHERE {} AND {eq}) AS v\nFROM {} s",
                        cols("s", &scope.keys),
                        hay.cte,
                        on,
                        scope.cte
                    ),
                    vec![scope.cte.clone(), hay.cte.clone()],
                )
            }
            Value::Empty => unreachable!(),
        };
        let columns = rel_columns(&scope.keys);
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: VKind::Bool,
        }))
    }

    /// `is` / `as` / `ofType`, consulting the choice-type map first.
    fn type_op(
        &mut self,
        op: TypeOperator,
        inner: &Expr,
        type_name: &str,
        scope: &Rel,
    ) -> Result<Value> {
        // `value.ofType(Quantity)` on a choice field reads `valueQuantity`.
        // A field that resolved in the element table (ContactPoint.value is a
        // plain string) is not a choice access; its annotation carries a type.
        if let ExprKind::MemberAccess { expr: parent, name } = &inner.kind {
            if is_choice_field(name) && annotated_type(inner).is_none() {
                let Some(types) = choice_types_for(name) else {
                    return Ok(Value::Empty);
                };
                if !types.contains(&type_name) {
                    return Ok(Value::Empty);
                }
                let concrete = choice_field_key(name, type_name);
                let parent_rel = match self.lower(parent, scope)? {
                    Value::Rel(rel) => rel,
                    _ => return Ok(Value::Empty),
                };
                let rel = self.member_step(&parent_rel, &concrete, true)?;
                return match op {
                    TypeOperator::As | TypeOperator::OfType => Ok(Value::Rel(rel)),
                    TypeOperator::Is => self.exists_of(&rel, scope, false),
                };
            }
        }

        let rel = self.lower_to_rel(inner, scope)?;
        match op {
            TypeOperator::Is => self.type_test_rel(&rel, type_name),
            TypeOperator::As | TypeOperator::OfType => self.type_filter_rel(&rel, type_name),
        }
    }

    /// `is T` on a relation: a per-value boolean from the JSON type test.
    fn type_test_rel(&mut self, rel: &Rel, type_name: &str) -> Result<Value> {
        let test = self.d.type_test("s.v", type_name);
        let body = format!(
            "SELECT {}, 1 AS ord, {test} AS v\nFROM {} s\nWHERE s.ord = 1",
            cols("s", &rel.keys),
            rel.cte
        );
        let columns = rel_columns(&rel.keys);
        let deps = vec![rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: rel.keys.clone(),
            vkind: VKind::Bool,
        }))
    }

    /// `as T` / `ofType(T)` on a relation: keep values passing the type
    /// test, re-ranked.
    fn type_filter_rel(&mut self, rel: &Rel, type_name: &str) -> Result<Value> {
        let test = self.d.type_test("s.v", type_name);
        let body = format!(
            "SELECT {}, row_number() OVER (PARTITION BY {} ORDER BY s.ord) AS ord, s.v\nFROM {} s\nWHERE {test}",
            cols("s", &rel.keys),
            cols("s", &rel.keys),
            rel.cte
        );
        let columns = rel_columns(&rel.keys);
        let deps = vec![rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: rel.keys.clone(),
            vkind: rel.vkind,
        }))
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn invocation(
        &mut self,
        receiver: Option<&Expr>,
        name: &str,
        args: &[Expr],
        scope: &Rel,
    ) -> Result<Value> {
        let input = match receiver {
            Some(expr) => self.lower(expr, scope)?,
            None => Value::Rel(scope.clone()),
        };

        match name {
            "first" | "single" => self.ordinal_slice(input, scope, "s.ord = 1", false),
            "tail" => self.ordinal_slice(input, scope, "s.ord > 1", true),
            "skip" => {
                let n = self.integer_arg(args, 0, name)?;
                self.ordinal_slice(input, scope, &format!("s.ord > {n}"), true)
            }
            "take" => {
                let n = self.integer_arg(args, 0, name)?;
                self.ordinal_slice(input, scope, &format!("s.ord <= {n}"), false)
            }
            "last" => self.last(input, scope),
            "exists" => {
                let input = if let Some(cond) = args.first() {
                    self.where_filter(input, cond, scope)?
                } else {
                    input
                };
                let rel = self.force_rel(input, scope);
                self.exists_of(&rel, scope, false)
            }
            "empty" => {
                let rel = self.force_rel(input, scope);
                self.exists_of(&rel, scope, true)
            }
            "count" => {
                let rel = self.force_rel(input, scope);
                self.count_of(&rel, scope)
            }
            "where" => self.where_filter(input, required_arg(args, 0, name)?, scope),
            "extension" => self.extension(input, args, scope),
            "join" => self.join_strings(input, args, scope),
            "sum" | "avg" | "min" | "max" => self.numeric_aggregate(input, name, scope),
            "not" => match receiver {
                Some(expr) => self.logical_not(expr, scope),
                None => Ok(Value::Empty),
            },
            "getResourceKey" => self.resource_key(scope),
            "getReferenceKey" => self.reference_key(input, args, scope),
            "lowBoundary" => self.boundary(receiver, input, scope, true),
            "highBoundary" => self.boundary(receiver, input, scope, false),
            "toString" => {
                let rel = self.force_rel(input, scope);
                let value = self.text_of("s.v", rel.vkind);
                Ok(Value::Rel(self.map_rel(&rel, &value, VKind::Text)))
            }
            "toInteger" | "toDecimal" => {
                let rel = self.force_rel(input, scope);
                let value = self.num_of("s.v", rel.vkind);
                Ok(Value::Rel(self.map_rel(&rel, &value, VKind::Num)))
            }
            // Receiverless type functions apply to the focus; with a
            // receiver these lower to TypeOp at parse time.
            "ofType" | "as" | "is" => {
                let type_name = type_name_arg(args, name)?;
                let rel = self.force_rel(input, scope);
                if name == "is" {
                    self.type_test_rel(&rel, &type_name)
                } else {
                    self.type_filter_rel(&rel, &type_name)
                }
            }
            other => Err(Error::Generation(format!(
                "function '{other}' is not supported in SQL generation"
            ))),
        }
    }

    /// Slice a collection by ordinal predicate, optionally re-ranking.
    fn ordinal_slice(
        &mut self,
        input: Value,
        scope: &Rel,
        predicate: &str,
        renumber: bool,
    ) -> Result<Value> {
        let rel = match input {
            Value::Rel(rel) => rel,
            Value::Inline(s) => return Ok(Value::Inline(s)),
            Value::Empty => return Ok(Value::Empty),
        };
        let _ = scope;
        let ord = if renumber {
            format!(
                "row_number() OVER (PARTITION BY {} ORDER BY s.ord)",
                cols("s", &rel.keys)
            )
        } else {
            "s.ord".to_string()
        };
        let body = format!(
            "SELECT {}, {ord} AS ord, s.v\nFROM {} s\nWHERE {predicate}",
            cols("s", &rel.keys),
            rel.cte
        );
        let columns = rel_columns(&rel.keys);
        let deps = vec![rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: rel.keys,
            vkind: rel.vkind,
        }))
    }

    fn last(&mut self, input: Value, scope: &Rel) -> Result<Value> {
        let rel = match input {
            Value::Rel(rel) => rel,
            Value::Inline(s) => return Ok(Value::Inline(s)),
            Value::Empty => return Ok(Value::Empty),
        };
        let _ = scope;
        let body = format!(
            "SELECT {}, 1 AS ord, x.v\nFROM (\nSELECT {}, v, row_number() OVER (PARTITION BY {} ORDER BY ord DESC) AS rn\nFROM {}\n) x WHERE x.rn = 1",
            cols("x", &rel.keys),
            rel.keys.join(", "),
            rel.keys.join(", "),
            rel.cte
        );
        let columns = rel_columns(&rel.keys);
        let deps = vec![rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: rel.keys,
            vkind: rel.vkind,
        }))
    }

    /// `where(cond)`: evaluate the condition per element and keep matches.
    fn where_filter(&mut self, input: Value, condition: &Expr, scope: &Rel) -> Result<Value> {
        let rel = match input {
            Value::Rel(rel) => rel,
            Value::Inline(s) => self.materialize(&s, scope),
            Value::Empty => return Ok(Value::Empty),
        };

        // Element context: the collection's ordinal joins the key vector.
        let key = self.next_key();
        let mut element_keys = rel.keys.clone();
        element_keys.push(key.clone());
        let body = format!(
            "SELECT {}, ord AS {key}, 1 AS ord, v\nFROM {}",
            rel.keys.join(", "),
            rel.cte
        );
        let columns = rel_columns(&element_keys);
        let snapshot = self.b.push(body, columns, vec![rel.cte.clone()]);
        let element_scope = Rel {
            cte: snapshot.clone(),
            keys: element_keys.clone(),
            vkind: rel.vkind,
        };

        let cond = self.lower(condition, &element_scope)?;
        let (body, deps) = match cond {
            Value::Rel(cond) => {
                let on = self.key_join("i", "c", &element_keys);
                (
                    format!(
                        "SELECT {}, row_number() OVER (PARTITION BY {} ORDER BY i.{key}) AS ord, i.v\nFROM {} i\nJOIN {} c ON {} AND c.ord = 1\nWHERE {}",
                        cols("i", &rel.keys),
                        cols("i", &rel.keys),
                        snapshot,
                        cond.cte,
                        on,
                        self.bool_of("c.v", cond.vkind)
                    ),
                    vec![snapshot.clone(), cond.cte.clone()],
                )
            }
            Value::Inline(scalar) => (
                format!(
                    "SELECT {}, row_number() OVER (PARTITION BY {} ORDER BY i.{key}) AS ord, i.v\nFROM {} i\nWHERE {}",
                    cols("i", &rel.keys),
                    cols("i", &rel.keys),
                    snapshot,
                    self.bool_of(&scalar.sql, scalar.kind)
                ),
                vec![snapshot.clone()],
            ),
            Value::Empty => (
                format!(
                    "SELECT {}, i.{key} AS ord, i.v\nFROM {} i\nWHERE 1 = 0",
                    cols("i", &rel.keys),
                    snapshot
                ),
                vec![snapshot.clone()],
            ),
        };
        let columns = rel_columns(&rel.keys);
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: rel.keys,
            vkind: rel.vkind,
        }))
    }

    /// `extension(url)`: extension.where(url = <url>).
    fn extension(&mut self, input: Value, args: &[Expr], scope: &Rel) -> Result<Value> {
        let url = string_arg(args, 0, "extension")?;
        let base = self.force_rel(input, scope);
        let extensions = self.member_step(&base, "extension", true)?;
        let url_of = self.d.extract_text("s.v", "url");
        let body = format!(
            "SELECT {}, row_number() OVER (PARTITION BY {} ORDER BY s.ord) AS ord, s.v\nFROM {} s\nWHERE {url_of} = {}",
            cols("s", &extensions.keys),
            cols("s", &extensions.keys),
            extensions.cte,
            self.d.quote_string(&url)
        );
        let columns = rel_columns(&extensions.keys);
        let deps = vec![extensions.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: extensions.keys,
            vkind: VKind::Json,
        }))
    }

    /// exists()/empty(): boolean over cardinality, joined from the spine so
    /// empty input still yields a row.
    fn exists_of(&mut self, rel: &Rel, scope: &Rel, negate: bool) -> Result<Value> {
        let on = self.key_join("s", "c", &scope.keys);
        let comparison = if negate { "= 0" } else { "> 0" };
        let body = format!(
            "SELECT {}, 1 AS ord, CASE WHEN COALESCE(c.n, 0) {comparison} THEN {} ELSE {} END AS v\nFROM {} s\nLEFT JOIN (SELECT {}, COUNT(*) AS n FROM {} GROUP BY {}) c ON {}",
            cols("s", &scope.keys),
            self.d.bool_true(),
            self.d.bool_false(),
            scope.cte,
            scope.keys.join(", "),
            rel.cte,
            scope.keys.join(", "),
            on
        );
        let columns = rel_columns(&scope.keys);
        let deps = vec![scope.cte.clone(), rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: VKind::Bool,
        }))
    }

    fn count_of(&mut self, rel: &Rel, scope: &Rel) -> Result<Value> {
        let on = self.key_join("s", "c", &scope.keys);
        let body = format!(
            "SELECT {}, 1 AS ord, COALESCE(c.n, 0) AS v\nFROM {} s\nLEFT JOIN (SELECT {}, COUNT(*) AS n FROM {} GROUP BY {}) c ON {}",
            cols("s", &scope.keys),
            scope.cte,
            scope.keys.join(", "),
            rel.cte,
            scope.keys.join(", "),
            on
        );
        let columns = rel_columns(&scope.keys);
        let deps = vec![scope.cte.clone(), rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: VKind::Num,
        }))
    }

    /// `join(sep?)`: string aggregation; empty input yields ''.
    fn join_strings(&mut self, input: Value, args: &[Expr], scope: &Rel) -> Result<Value> {
        let separator = if args.is_empty() {
            String::new()
        } else {
            string_arg(args, 0, "join")?
        };
        let rel = self.force_rel(input, scope);
        let text = self.text_of("o.v", rel.vkind);
        let agg = self
            .d
            .string_agg(&text, &self.d.quote_string(&separator), "o.ord");
        let on = self.key_join("s", "j", &scope.keys);
        let body = format!(
            "SELECT {}, 1 AS ord, COALESCE(j.txt, '') AS v\nFROM {} s\nLEFT JOIN (\nSELECT {}, {agg} AS txt\nFROM (SELECT * FROM {} ORDER BY ord) o\nGROUP BY {}\n) j ON {}",
            cols("s", &scope.keys),
            scope.cte,
            cols("o", &scope.keys),
            rel.cte,
            cols("o", &scope.keys),
            on
        );
        let columns = rel_columns(&scope.keys);
        let deps = vec![scope.cte.clone(), rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: VKind::Text,
        }))
    }

    /// sum/avg/min/max: numeric aggregation; empty stays empty.
    fn numeric_aggregate(&mut self, input: Value, func: &str, scope: &Rel) -> Result<Value> {
        let rel = self.force_rel(input, scope);
        let agg = match func {
            "sum" => "SUM",
            "avg" => "AVG",
            "min" => "MIN",
            _ => "MAX",
        };
        let value = self.num_of("v", rel.vkind);
        let body = format!(
            "SELECT {}, 1 AS ord, {agg}({value}) AS v\nFROM {}\nGROUP BY {}",
            rel.keys.join(", "),
            rel.cte,
            rel.keys.join(", ")
        );
        let columns = rel_columns(&rel.keys);
        let deps = vec![rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: rel.keys,
            vkind: VKind::Num,
        }))
    }

    /// `getResourceKey()`: the base relation's id.
    fn resource_key(&mut self, scope: &Rel) -> Result<Value> {
        let body = format!(
            "SELECT {}, 1 AS ord, s.row_id AS v\nFROM {} s",
            cols("s", &scope.keys),
            scope.cte
        );
        let columns = rel_columns(&scope.keys);
        let deps = vec![scope.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: VKind::Text,
        }))
    }

    /// `getReferenceKey(Type?)`: the id tail of a relative reference.
    fn reference_key(&mut self, input: Value, args: &[Expr], scope: &Rel) -> Result<Value> {
        let type_filter = match args.first() {
            None => None,
            Some(arg) => Some(match &arg.kind {
                ExprKind::Identifier(name) => name.clone(),
                ExprKind::Literal(LiteralValue::String(s)) => s.clone(),
                _ => {
                    return Err(Error::Generation(
                        "getReferenceKey expects a type name argument".into(),
                    ))
                }
            }),
        };

        let rel = self.force_rel(input, scope);
        let reference = self.d.extract_text("r.v", "reference");
        let key = match &type_filter {
            Some(ty) => {
                let prefix = format!("{ty}/");
                format!(
                    "CASE WHEN {reference} LIKE {} THEN substr({reference}, {}) END",
                    self.d.quote_string(&format!("{prefix}%")),
                    prefix.len() + 1
                )
            }
            None => {
                // Only relative `Type/id` references carry a key; absolute
                // URLs and urn forms yield empty.
                let slash = self.d.strpos(&reference, "'/'");
                let scheme = self.d.strpos(&reference, "'://'");
                format!(
                    "CASE WHEN {scheme} = 0 AND {reference} NOT LIKE 'urn:%' AND {slash} > 0 THEN substr({reference}, {slash} + 1) END"
                )
            }
        };
        let body = format!(
            "SELECT x.* FROM (\nSELECT {}, 1 AS ord, {key} AS v\nFROM {} r\nWHERE r.ord = 1\n) x WHERE x.v IS NOT NULL",
            cols("r", &rel.keys),
            rel.cte
        );
        let columns = rel_columns(&rel.keys);
        let deps = vec![rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: rel.keys,
            vkind: VKind::Text,
        }))
    }

    /// lowBoundary()/highBoundary() for partial dates, times and decimals.
    fn boundary(
        &mut self,
        receiver: Option<&Expr>,
        input: Value,
        scope: &Rel,
        low: bool,
    ) -> Result<Value> {
        let rel = self.force_rel(input, scope);
        let fhir_type = receiver
            .and_then(|r| r.meta.as_ref())
            .and_then(|m| m.fhir_type.clone())
            .unwrap_or_else(|| "date".into());

        let t = self.text_of("s.v", rel.vkind);
        let (value, kind) = match fhir_type.as_str() {
            "decimal" | "integer" => (self.decimal_boundary(&t, low), VKind::Num),
            "time" => (time_boundary(&t, low), VKind::Text),
            "dateTime" | "instant" => (self.datetime_boundary(&t, low), VKind::Text),
            _ => (self.date_boundary(&t, low), VKind::Text),
        };

        let body = format!(
            "SELECT {}, 1 AS ord, {value} AS v\nFROM {} s\nWHERE s.ord = 1",
            cols("s", &rel.keys),
            rel.cte
        );
        let columns = rel_columns(&rel.keys);
        let deps = vec![rel.cte.clone()];
        let cte = self.b.push(body, columns, deps);
        Ok(Value::Rel(Rel {
            cte,
            keys: rel.keys,
            vkind: kind,
        }))
    }

    fn date_boundary(&self, t: &str, low: bool) -> String {
        if low {
            format!(
                "CASE WHEN length({t}) = 4 THEN {t} || '-01-01' WHEN length({t}) = 7 THEN {t} || '-01' ELSE {t} END"
            )
        } else {
            format!(
                "CASE WHEN length({t}) = 4 THEN {t} || '-12-31' WHEN length({t}) = 7 THEN {} ELSE {t} END",
                self.d.last_day_of_month(t)
            )
        }
    }

    fn datetime_boundary(&self, t: &str, low: bool) -> String {
        if low {
            format!(
                "CASE WHEN length({t}) = 4 THEN {t} || '-01-01T00:00:00' WHEN length({t}) = 7 THEN {t} || '-01T00:00:00' WHEN length({t}) = 10 THEN {t} || 'T00:00:00' ELSE {t} END"
            )
        } else {
            format!(
                "CASE WHEN length({t}) = 4 THEN {t} || '-12-31T23:59:59.999' WHEN length({t}) = 7 THEN {} || 'T23:59:59.999' WHEN length({t}) = 10 THEN {t} || 'T23:59:59.999' ELSE {t} END",
                self.d.last_day_of_month(t)
            )
        }
    }

    fn decimal_boundary(&self, t: &str, low: bool) -> String {
        let sign = if low { "-" } else { "+" };
        let number = self.d.cast_to_number(t);
        let dot = self.d.strpos(t, "'.'");
        format!(
            "CASE WHEN {dot} = 0 THEN {number} {sign} 0.5 ELSE {number} {sign} 0.5 * power(10, -(length({t}) - {dot})) END"
        )
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn lower_to_rel(&mut self, expr: &Expr, scope: &Rel) -> Result<Rel> {
        let value = self.lower(expr, scope)?;
        Ok(self.force_rel(value, scope))
    }

    fn force_rel(&mut self, value: Value, scope: &Rel) -> Rel {
        match value {
            Value::Rel(rel) => rel,
            Value::Inline(scalar) => self.materialize(&scalar, scope),
            Value::Empty => self.empty_rel(scope),
        }
    }

    /// Materialise an inline scalar as a one-row-per-key relation.
    fn materialize(&mut self, scalar: &Scalar, scope: &Rel) -> Rel {
        let body = format!(
            "SELECT {}, 1 AS ord, {} AS v\nFROM {} s",
            cols("s", &scope.keys),
            scalar.sql,
            scope.cte
        );
        let columns = rel_columns(&scope.keys);
        let cte = self.b.push(body, columns, vec![scope.cte.clone()]);
        Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: scalar.kind,
        }
    }

    fn empty_rel(&mut self, scope: &Rel) -> Rel {
        let body = format!(
            "SELECT {}, 1 AS ord, NULL AS v\nFROM {} s\nWHERE 1 = 0",
            cols("s", &scope.keys),
            scope.cte
        );
        let columns = rel_columns(&scope.keys);
        let cte = self.b.push(body, columns, vec![scope.cte.clone()]);
        Rel {
            cte,
            keys: scope.keys.clone(),
            vkind: VKind::Json,
        }
    }

    /// Map a relation's value through an expression, keeping keys and ords.
    fn map_rel(&mut self, rel: &Rel, value: &str, kind: VKind) -> Rel {
        let body = format!(
            "SELECT {}, s.ord, {value} AS v\nFROM {} s",
            cols("s", &rel.keys),
            rel.cte
        );
        let columns = rel_columns(&rel.keys);
        let cte = self.b.push(body, columns, vec![rel.cte.clone()]);
        Rel {
            cte,
            keys: rel.keys.clone(),
            vkind: kind,
        }
    }

    /// Null-safe equality join over the key vector.
    fn key_join(&self, left: &str, right: &str, keys: &[String]) -> String {
        keys.iter()
            .map(|k| {
                self.d
                    .null_safe_eq(&format!("{left}.{k}"), &format!("{right}.{k}"))
            })
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn integer_arg(&mut self, args: &[Expr], index: usize, func: &str) -> Result<i64> {
        match &required_arg(args, index, func)?.kind {
            ExprKind::Literal(LiteralValue::Integer(n)) => Ok(*n),
            _ => Err(Error::Generation(format!(
                "{func}() expects an integer literal argument"
            ))),
        }
    }

    fn text_of(&self, v: &str, kind: VKind) -> String {
        match kind {
            VKind::Json => self.d.scalar_text(v),
            _ => v.to_string(),
        }
    }

    fn num_of(&self, v: &str, kind: VKind) -> String {
        match kind {
            VKind::Num => v.to_string(),
            VKind::Json => self.d.cast_to_number(&self.d.scalar_text(v)),
            _ => self.d.cast_to_number(v),
        }
    }

    fn bool_of(&self, v: &str, kind: VKind) -> String {
        match kind {
            VKind::Bool => v.to_string(),
            VKind::Num => format!("({v} <> 0)"),
            VKind::Json => self.d.cast_to_boolean(&self.d.scalar_text(v)),
            VKind::Text => self.d.cast_to_boolean(v),
        }
    }
}

/// The FHIR type the analyzer attached to a node, when the element table
/// could answer.
fn annotated_type(expr: &Expr) -> Option<&str> {
    expr.meta.as_ref().and_then(|m| m.fhir_type.as_deref())
}

fn required_arg<'e>(args: &'e [Expr], index: usize, func: &str) -> Result<&'e Expr> {
    args.get(index)
        .ok_or_else(|| Error::Generation(format!("{func}() is missing argument {index}")))
}

fn string_arg(args: &[Expr], index: usize, func: &str) -> Result<String> {
    match &required_arg(args, index, func)?.kind {
        ExprKind::Literal(LiteralValue::String(s)) => Ok(s.clone()),
        _ => Err(Error::Generation(format!(
            "{func}() expects a string literal argument"
        ))),
    }
}

/// A type-specifier argument: a bare identifier or a dotted qualified name.
fn type_name_arg(args: &[Expr], func: &str) -> Result<String> {
    fn flatten(expr: &Expr) -> Option<String> {
        match &expr.kind {
            ExprKind::Identifier(name) => Some(name.clone()),
            ExprKind::MemberAccess { expr, name } => Some(format!("{}.{}", flatten(expr)?, name)),
            _ => None,
        }
    }
    flatten(required_arg(args, 0, func)?).ok_or_else(|| {
        Error::Generation(format!("{func}() expects a type name argument"))
    })
}

fn time_boundary(t: &str, low: bool) -> String {
    if low {
        format!(
            "CASE WHEN length({t}) = 2 THEN {t} || ':00:00' WHEN length({t}) = 5 THEN {t} || ':00' ELSE {t} END"
        )
    } else {
        format!(
            "CASE WHEN length({t}) = 2 THEN {t} || ':59:59.999' WHEN length({t}) = 5 THEN {t} || ':59.999' ELSE {t} END"
        )
    }
}

/// `alias.key` column list.
fn cols(alias: &str, keys: &[String]) -> String {
    keys.iter()
        .map(|k| format!("{alias}.{k}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Standard column vector of a value relation.
fn rel_columns(keys: &[String]) -> Vec<String> {
    let mut columns = keys.to_vec();
    columns.push("ord".into());
    columns.push("v".into());
    columns
}

/// Column vector of a single-value (per key) relation.
fn value_columns(keys: &[String]) -> Vec<String> {
    let mut columns = keys.to_vec();
    columns.push("v".into());
    columns
}
