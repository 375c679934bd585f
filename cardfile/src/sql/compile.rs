//! The predicate compiler
//!
//! Reduction is a single bottom-up fold over the tree. Each `Where` field
//! compiles its conditions in two groups: equality conditions OR-join (the
//! field may match any of several values), all other operators AND-join
//! (ordering conditions intersect into range tests). Leaf templates are
//! chosen by the value's family:
//!
//! - generic equality/ordering guards on key existence, so rows missing the
//!   key are excluded;
//! - generic not-equal wraps in `coalesce(..., true)`, so rows missing the
//!   key count as "not equal";
//! - temporal values compare through a timestamp cast for every operator,
//!   equality included — jsonb equality on the raw text would compare
//!   representations, not instants;
//! - explicit null accepts both SQL NULL (key absent) and a stored JSON
//!   null.
//!
//! Empty containers cannot reduce and are reported back as
//! [`CompileResult::Residual`] rather than being replaced with a boolean
//! identity.

use crate::predicate::{CompareOp, FieldCondition, Predicate, ValueFamily};

use super::{CompileResult, SqlParams};

/// Template for reading a payload key's text through the timestamp cast.
const TIMESTAMP_FORMAT: &str = r#"YYYY-MM-DD"T"HH24:MI:SSTZH:TZM"#;

/// Compiles predicate trees against one pair of columns.
///
/// The compiler is a pure function of its input: no state survives a
/// [`compile`](Self::compile) call, and structurally equal trees always
/// produce byte-identical output.
pub struct SqlCompiler<'a> {
    type_column: &'a str,
    data_column: &'a str,
}

impl<'a> SqlCompiler<'a> {
    pub fn new(type_column: &'a str, data_column: &'a str) -> Self {
        Self {
            type_column,
            data_column,
        }
    }

    /// Reduce a predicate tree to SQL, or hand it back as residual.
    ///
    /// Total over the predicate domain: every node kind has a defined
    /// outcome and nothing here panics or allocates shared state.
    pub fn compile(&self, predicate: &Predicate) -> CompileResult {
        let mut params = SqlParams::default();
        match self.reduce(predicate, &mut params) {
            Some(sql) => CompileResult::Reduced { sql, params },
            None => CompileResult::Residual {
                predicate: predicate.clone(),
            },
        }
    }

    /// Fold one node. `None` means the node could not produce a clause; a
    /// `None` child never contributes parameters.
    ///
    /// An `And`/`Or` with a mix of reducible and irreducible children keeps
    /// the reducible ones; only a node with no reducible children at all is
    /// irreducible itself. Storage backends re-check loaded rows in memory,
    /// which keeps that partial pushdown sound for conjunctions.
    fn reduce(&self, predicate: &Predicate, params: &mut SqlParams) -> Option<String> {
        match predicate {
            Predicate::Is { types } => {
                if types.is_empty() {
                    return None;
                }
                let placeholders: Vec<String> =
                    types.iter().map(|t| params.push(t.clone())).collect();
                Some(format!(
                    "{} IN ({})",
                    self.type_column,
                    placeholders.join(", ")
                ))
            }
            Predicate::Where { fields } => {
                let clauses: Vec<String> = fields
                    .iter()
                    .filter_map(|(name, conds)| self.field_clause(name, conds, params))
                    .collect();
                wrap_joined(clauses, " AND ")
            }
            Predicate::And { preds } => {
                let clauses: Vec<String> = preds
                    .iter()
                    .filter_map(|p| self.reduce(p, params))
                    .collect();
                wrap_joined(clauses, " AND ")
            }
            Predicate::Or { alts } => {
                let clauses: Vec<String> = alts
                    .iter()
                    .filter_map(|p| self.reduce(p, params))
                    .collect();
                wrap_joined(clauses, " OR ")
            }
        }
    }

    /// Compile all conditions on one field into a single clause.
    ///
    /// Parameters land in placeholder emission order: the whole equality
    /// group first, then the other group.
    fn field_clause(
        &self,
        field: &str,
        conds: &[FieldCondition],
        params: &mut SqlParams,
    ) -> Option<String> {
        let (eq_conds, other_conds): (Vec<&FieldCondition>, Vec<&FieldCondition>) =
            conds.iter().partition(|c| c.op == CompareOp::Eq);

        let eq_leaves: Vec<String> = eq_conds
            .into_iter()
            .map(|c| self.leaf_clause(field, c, params))
            .collect();
        let other_leaves: Vec<String> = other_conds
            .into_iter()
            .map(|c| self.leaf_clause(field, c, params))
            .collect();

        let mut groups = Vec::with_capacity(2);
        if let Some(clause) = join_group(eq_leaves, " OR ") {
            groups.push(clause);
        }
        if let Some(clause) = join_group(other_leaves, " AND ") {
            groups.push(clause);
        }
        match groups.len() {
            0 => None,
            1 => groups.pop(),
            _ => Some(groups.join(" AND ")),
        }
    }

    fn leaf_clause(
        &self,
        field: &str,
        cond: &FieldCondition,
        params: &mut SqlParams,
    ) -> String {
        match cond.value.family() {
            ValueFamily::ExplicitNull => self.null_leaf(field, cond, params),
            ValueFamily::Temporal => self.temporal_leaf(field, cond, params),
            ValueFamily::Generic => self.generic_leaf(field, cond, params),
        }
    }

    fn generic_leaf(
        &self,
        field: &str,
        cond: &FieldCondition,
        params: &mut SqlParams,
    ) -> String {
        let data = self.data_column;
        if cond.op == CompareOp::Ne {
            let key = params.push(field);
            let value = params.push(cond.value.as_json().to_string());
            // Rows without the key must still count as "not equal".
            format!("coalesce({data}->{key} <> {value}::jsonb, true)")
        } else {
            let exists_key = params.push(field);
            let access_key = params.push(field);
            let value = params.push(cond.value.as_json().to_string());
            format!(
                "({data} ? {exists_key} AND {data}->{access_key} {op} {value}::jsonb)",
                op = cond.op.as_sql()
            )
        }
    }

    fn temporal_leaf(
        &self,
        field: &str,
        cond: &FieldCondition,
        params: &mut SqlParams,
    ) -> String {
        use crate::predicate::FilterValue;

        let FilterValue::Timestamp(ts) = &cond.value else {
            // family() said Temporal, so this arm never runs; keep it total.
            return self.generic_leaf(field, cond, params);
        };
        let data = self.data_column;
        let key = params.push(field);
        let value = params.push(ts.to_rfc3339());
        format!(
            "to_timestamp({data}->>{key}, '{TIMESTAMP_FORMAT}') {op} {value}::timestamp",
            op = cond.op.as_sql()
        )
    }

    fn null_leaf(
        &self,
        field: &str,
        cond: &FieldCondition,
        params: &mut SqlParams,
    ) -> String {
        let data = self.data_column;
        match cond.op {
            CompareOp::Eq => {
                let null_key = params.push(field);
                let access_key = params.push(field);
                // TODO: parenthesize this template; joined with sibling
                // clauses the AND binds tighter than this OR.
                format!("{data}->{null_key} IS NULL OR {data}->{access_key} = 'null'")
            }
            CompareOp::Ne => {
                let exists_key = params.push(field);
                let access_key = params.push(field);
                format!("({data} ? {exists_key} AND {data}->{access_key} != 'null')")
            }
            // Ordering against explicit null is rejected upstream at
            // construction; stay total by comparing against the jsonb null
            // literal.
            _ => self.generic_leaf(field, cond, params),
        }
    }
}

/// Join already-parenthesized sibling clauses; a single clause passes
/// through, an empty list reduces to nothing.
fn wrap_joined(clauses: Vec<String>, sep: &str) -> Option<String> {
    if clauses.is_empty() {
        None
    } else {
        Some(format!("({})", clauses.join(sep)))
    }
}

/// Join the leaves of one condition group. A single leaf is used unwrapped.
fn join_group(mut leaves: Vec<String>, sep: &str) -> Option<String> {
    match leaves.len() {
        0 => None,
        1 => leaves.pop(),
        _ => Some(format!("({})", leaves.join(sep))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::{FieldCondition as F, FilterValue};
    use chrono::{TimeZone, Utc};

    fn compiler() -> SqlCompiler<'static> {
        SqlCompiler::new("record_type", "record_data")
    }

    fn reduced(pred: &Predicate) -> (String, Vec<String>) {
        match compiler().compile(pred) {
            CompileResult::Reduced { sql, params } => (sql, params.values),
            CompileResult::Residual { predicate } => {
                panic!("expected a reduced clause, got residual {predicate}")
            }
        }
    }

    /// All `$n` placeholder indices in the order they appear in the SQL.
    fn placeholders(sql: &str) -> Vec<usize> {
        let bytes = sql.as_bytes();
        let mut out = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let mut j = i + 1;
                let mut n = 0usize;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    n = n * 10 + usize::from(bytes[j] - b'0');
                    j += 1;
                }
                if j > i + 1 {
                    out.push(n);
                }
                i = j;
            } else {
                i += 1;
            }
        }
        out
    }

    #[test]
    fn is_compiles_to_in_list_in_order() {
        let (sql, params) = reduced(&Predicate::is(["str", "int", "float"]));
        assert_eq!(sql, "record_type IN ($1, $2, $3)");
        assert_eq!(params, ["str", "int", "float"]);
    }

    #[test]
    fn generic_equality_leaf() {
        let (sql, params) = reduced(&Predicate::field("a", vec![F::eq(1i64)]));
        assert_eq!(
            sql,
            "((record_data ? $1 AND record_data->$2 = $3::jsonb))"
        );
        assert_eq!(params, ["a", "a", "1"]);
    }

    #[test]
    fn generic_not_equal_defaults_to_true_on_absent_key() {
        let (sql, params) = reduced(&Predicate::field("b", vec![F::ne(2i64)]));
        assert_eq!(sql, "(coalesce(record_data->$1 <> $2::jsonb, true))");
        assert_eq!(params, ["b", "2"]);
    }

    #[test]
    fn generic_ordering_excludes_absent_keys() {
        let (sql, params) = reduced(&Predicate::field("c", vec![F::lt("x")]));
        assert_eq!(
            sql,
            "((record_data ? $1 AND record_data->$2 < $3::jsonb))"
        );
        // String values are bound in their JSON encoding.
        assert_eq!(params, ["c", "c", "\"x\""]);
    }

    #[test]
    fn equality_group_joins_with_or() {
        let (sql, params) = reduced(&Predicate::field("a", vec![F::eq(7i64), F::eq(8i64)]));
        assert_eq!(
            sql,
            "(((record_data ? $1 AND record_data->$2 = $3::jsonb) \
              OR (record_data ? $4 AND record_data->$5 = $6::jsonb)))"
        );
        assert_eq!(params, ["a", "a", "7", "a", "a", "8"]);
    }

    #[test]
    fn range_group_joins_with_and() {
        let (sql, params) = reduced(&Predicate::field("n", vec![F::ge(7i64), F::le(8i64)]));
        assert_eq!(
            sql,
            "(((record_data ? $1 AND record_data->$2 >= $3::jsonb) \
              AND (record_data ? $4 AND record_data->$5 <= $6::jsonb)))"
        );
        assert_eq!(params, ["n", "n", "7", "n", "n", "8"]);
    }

    #[test]
    fn equality_group_precedes_other_group() {
        let (sql, params) = reduced(&Predicate::field(
            "n",
            vec![F::ge(1i64), F::eq(5i64), F::eq(6i64), F::lt(9i64)],
        ));
        assert_eq!(
            sql,
            "(((record_data ? $1 AND record_data->$2 = $3::jsonb) \
              OR (record_data ? $4 AND record_data->$5 = $6::jsonb)) \
              AND ((record_data ? $7 AND record_data->$8 >= $9::jsonb) \
              AND (record_data ? $10 AND record_data->$11 < $12::jsonb)))"
        );
        // Equality parameters first, then the others, relative order kept.
        assert_eq!(
            params,
            ["n", "n", "5", "n", "n", "6", "n", "n", "1", "n", "n", "9"]
        );
    }

    #[test]
    fn temporal_equality_routes_through_timestamp_cast() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let (sql, params) = reduced(&Predicate::field("at", vec![F::eq(ts)]));
        assert_eq!(
            sql,
            "(to_timestamp(record_data->>$1, 'YYYY-MM-DD\"T\"HH24:MI:SSTZH:TZM') \
              = $2::timestamp)"
        );
        assert_eq!(params, ["at", "2024-03-01T12:00:00+00:00"]);
    }

    #[test]
    fn temporal_ordering_uses_the_same_cast_path() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let (sql, params) = reduced(&Predicate::field("at", vec![F::lt(ts)]));
        assert_eq!(
            sql,
            "(to_timestamp(record_data->>$1, 'YYYY-MM-DD\"T\"HH24:MI:SSTZH:TZM') \
              < $2::timestamp)"
        );
        assert_eq!(params, ["at", "2024-03-01T12:00:00+00:00"]);
    }

    #[test]
    fn null_equality_accepts_missing_key_and_stored_null() {
        let (sql, params) = reduced(&Predicate::field("a", vec![F::eq(FilterValue::Null)]));
        assert_eq!(sql, "(record_data->$1 IS NULL OR record_data->$2 = 'null')");
        assert_eq!(params, ["a", "a"]);
        // Structurally different from the generic equality template.
        let (generic_sql, _) = reduced(&Predicate::field("a", vec![F::eq("x")]));
        assert_ne!(sql, generic_sql);
    }

    #[test]
    fn null_inequality_requires_the_key() {
        let (sql, params) = reduced(&Predicate::field("a", vec![F::ne(FilterValue::Null)]));
        assert_eq!(sql, "((record_data ? $1 AND record_data->$2 != 'null'))");
        assert_eq!(params, ["a", "a"]);
    }

    #[test]
    fn null_equality_joins_siblings_without_grouping() {
        // The null-equality leaf carries no parentheses of its own, so the
        // OR it contains binds looser than the AND joining the two field
        // clauses. Kept as-is; see the TODO at the template.
        let (sql, params) = reduced(&Predicate::where_([
            ("a", vec![F::eq(FilterValue::Null)]),
            ("b", vec![F::ne(2i64)]),
        ]));
        assert_eq!(
            sql,
            "(record_data->$1 IS NULL OR record_data->$2 = 'null' \
              AND coalesce(record_data->$3 <> $4::jsonb, true))"
        );
        assert_eq!(params, ["a", "a", "b", "2"]);
    }

    #[test]
    fn where_joins_fields_with_and_in_insertion_order() {
        let (sql, params) = reduced(&Predicate::where_([
            ("a", vec![F::eq(1i64)]),
            ("b", vec![F::eq(2i64)]),
        ]));
        assert_eq!(
            sql,
            "((record_data ? $1 AND record_data->$2 = $3::jsonb) \
              AND (record_data ? $4 AND record_data->$5 = $6::jsonb))"
        );
        assert_eq!(params, ["a", "a", "1", "b", "b", "2"]);
    }

    #[test]
    fn and_preserves_child_order() {
        let (sql, params) = reduced(&Predicate::and([
            Predicate::field("a", vec![F::eq(1i64)]),
            Predicate::field("b", vec![F::eq(2i64)]),
        ]));
        assert_eq!(
            sql,
            "(((record_data ? $1 AND record_data->$2 = $3::jsonb)) \
              AND ((record_data ? $4 AND record_data->$5 = $6::jsonb)))"
        );
        assert_eq!(params, ["a", "a", "1", "b", "b", "2"]);
    }

    #[test]
    fn or_preserves_child_order() {
        let (sql, params) = reduced(&Predicate::or([
            Predicate::is(["Deposit"]),
            Predicate::field("b", vec![F::eq(2i64)]),
        ]));
        assert_eq!(
            sql,
            "(record_type IN ($1) \
              OR ((record_data ? $2 AND record_data->$3 = $4::jsonb)))"
        );
        assert_eq!(params, ["Deposit", "b", "b", "2"]);
    }

    #[test]
    fn eight_fields_compile_in_insertion_order() {
        let names = ["f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8"];
        let pred = Predicate::where_(
            names
                .iter()
                .enumerate()
                .map(|(i, name)| (*name, vec![F::eq(i as i64)])),
        );
        let (sql, params) = reduced(&pred);
        assert_eq!(params.len(), 3 * names.len());
        for (i, name) in names.iter().enumerate() {
            // One (key, key, value) parameter group per field, in order.
            assert_eq!(params[3 * i], *name);
            assert_eq!(params[3 * i + 1], *name);
            assert_eq!(params[3 * i + 2], i.to_string());
        }
        assert_eq!(placeholders(&sql).len(), params.len());
    }

    #[test]
    fn empty_containers_are_residual_not_boolean_literals() {
        for pred in [
            Predicate::and([]),
            Predicate::or([]),
            Predicate::is(Vec::<String>::new()),
            Predicate::where_(Vec::<(String, Vec<F>)>::new()),
        ] {
            match compiler().compile(&pred) {
                CompileResult::Residual { predicate } => assert_eq!(predicate, pred),
                CompileResult::Reduced { sql, .. } => {
                    panic!("{pred} should not reduce, got {sql}")
                }
            }
        }
    }

    #[test]
    fn residual_propagates_through_nested_empties() {
        let pred = Predicate::and([Predicate::or([Predicate::where_(Vec::<(String, Vec<F>)>::new())])]);
        assert!(matches!(
            compiler().compile(&pred),
            CompileResult::Residual { .. }
        ));
    }

    #[test]
    fn mixed_children_keep_the_reducible_part() {
        let pred = Predicate::and([
            Predicate::is(["Deposit"]),
            Predicate::or([]),
            Predicate::field("a", vec![F::eq(1i64)]),
        ]);
        let (sql, params) = reduced(&pred);
        assert_eq!(
            sql,
            "(record_type IN ($1) \
              AND ((record_data ? $2 AND record_data->$3 = $4::jsonb)))"
        );
        assert_eq!(params, ["Deposit", "a", "a", "1"]);
        // A skipped child leaves no parameters behind.
        assert_eq!(placeholders(&sql), vec![1, 2, 3, 4]);
    }

    #[test]
    fn placeholder_parameter_parity_holds_across_shapes() {
        let ts = Utc.with_ymd_and_hms(2022, 1, 27, 13, 6, 47).unwrap();
        let samples = [
            Predicate::is(["A", "B"]),
            Predicate::field("x", vec![F::eq("v")]),
            Predicate::field("x", vec![F::ne(false)]),
            Predicate::field("x", vec![F::eq(FilterValue::Null)]),
            Predicate::field("x", vec![F::ne(FilterValue::Null)]),
            Predicate::field("at", vec![F::ge(ts), F::le(ts)]),
            Predicate::or([
                Predicate::is(["A"]),
                Predicate::and([
                    Predicate::field("a", vec![F::eq(1i64), F::eq(2i64)]),
                    Predicate::field("b", vec![F::gt(0i64), F::lt(10i64)]),
                ]),
            ]),
        ];
        for pred in samples {
            let (sql, params) = reduced(&pred);
            let found = placeholders(&sql);
            assert_eq!(found.len(), params.len(), "parity for {pred}");
            // Numbered 1..=n, left to right.
            let expected: Vec<usize> = (1..=params.len()).collect();
            assert_eq!(found, expected, "ordering for {pred}");
        }
    }

    #[test]
    fn compilation_is_deterministic() {
        let pred = Predicate::or([
            Predicate::is(["A", "B"]),
            Predicate::field("x", vec![F::eq(1i64), F::ge(0i64)]),
        ]);
        let first = compiler().compile(&pred);
        let second = compiler().compile(&pred);
        assert_eq!(first, second);
        // Structural equality implies identical output.
        let rebuilt = Predicate::or([
            Predicate::is(["A", "B"]),
            Predicate::field("x", vec![F::eq(1i64), F::ge(0i64)]),
        ]);
        assert_eq!(compiler().compile(&rebuilt), first);
    }

    #[test]
    fn column_names_are_configuration() {
        let compiler = SqlCompiler::new("snapshot_type", "snapshot_data");
        match compiler.compile(&Predicate::is(["Account"])) {
            CompileResult::Reduced { sql, .. } => {
                assert_eq!(sql, "snapshot_type IN ($1)");
            }
            CompileResult::Residual { .. } => panic!("expected reduced"),
        }
    }
}
