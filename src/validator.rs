//! Deterministic safety gate for candidate statements.
//!
//! The validator never calls the network and never proves a query correct —
//! it only establishes safety and shape: read-only, a single statement,
//! identifiers that exist in the schema, and a bounded result size. A
//! non-aggregate query with no LIMIT is not rejected; the default row limit
//! is injected into the AST instead.

use sqlparser::ast as sp;
use sqlparser::dialect::SQLiteDialect;
use sqlparser::parser::Parser as SqlParser;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::db::SchemaDescriptor;

const FORBIDDEN_KEYWORDS: [&str; 7] = [
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE",
];

const AGGREGATE_FUNCTIONS: [&str; 7] = [
    "COUNT", "SUM", "AVG", "MIN", "MAX", "TOTAL", "GROUP_CONCAT",
];

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    WriteOperationForbidden(String),
    UnknownIdentifier(String),
    MultiStatementForbidden,
    StatementTooLong { len: usize, max: usize },
    InvalidSyntax(String),
}

impl RejectReason {
    /// Stable reason code for logs and retry feedback.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::WriteOperationForbidden(_) => "WriteOperationForbidden",
            RejectReason::UnknownIdentifier(_) => "UnknownIdentifier",
            RejectReason::MultiStatementForbidden => "MultiStatementForbidden",
            RejectReason::StatementTooLong { .. } => "StatementTooLong",
            RejectReason::InvalidSyntax(_) => "InvalidSyntax",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::WriteOperationForbidden(kw) => {
                write!(f, "the statement contains the forbidden keyword {}", kw)
            }
            RejectReason::UnknownIdentifier(name) => {
                write!(f, "the identifier \"{}\" does not exist in the schema", name)
            }
            RejectReason::MultiStatementForbidden => {
                write!(f, "only a single statement is allowed")
            }
            RejectReason::StatementTooLong { len, max } => {
                write!(f, "the statement is {} characters, the maximum is {}", len, max)
            }
            RejectReason::InvalidSyntax(detail) => {
                write!(f, "the statement is not valid SQL: {}", detail)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Verdict {
    /// The statement may be executed. The SQL carried here is the statement
    /// to run — identical to the candidate, except when a default LIMIT was
    /// injected.
    Accepted { sql: String },
    Rejected { reason: RejectReason },
}

pub struct QueryValidator {
    schema: Arc<SchemaDescriptor>,
    max_statement_len: usize,
    default_row_limit: usize,
}

impl QueryValidator {
    pub fn new(
        schema: Arc<SchemaDescriptor>,
        max_statement_len: usize,
        default_row_limit: usize,
    ) -> Self {
        Self {
            schema,
            max_statement_len,
            default_row_limit,
        }
    }

    /// Pure function of the candidate and the schema descriptor.
    pub fn check(&self, sql: &str) -> Verdict {
        let sql = sql.trim();

        if sql.len() > self.max_statement_len {
            return Verdict::Rejected {
                reason: RejectReason::StatementTooLong {
                    len: sql.len(),
                    max: self.max_statement_len,
                },
            };
        }

        // Keyword scan over the raw text, case-insensitive, any position.
        // Deliberately blunt: a forbidden word even inside a string literal
        // rejects the candidate, because regeneration is cheap and execution
        // of a misjudged statement is not.
        if let Some(keyword) = find_forbidden_keyword(sql) {
            return Verdict::Rejected {
                reason: RejectReason::WriteOperationForbidden(keyword),
            };
        }

        let dialect = SQLiteDialect {};
        let mut statements = match SqlParser::parse_sql(&dialect, sql) {
            Ok(statements) => statements,
            Err(e) => {
                return Verdict::Rejected {
                    reason: RejectReason::InvalidSyntax(e.to_string()),
                }
            }
        };

        if statements.len() != 1 {
            return Verdict::Rejected {
                reason: RejectReason::MultiStatementForbidden,
            };
        }

        let mut query = match statements.remove(0) {
            sp::Statement::Query(query) => query,
            other => {
                return Verdict::Rejected {
                    reason: RejectReason::WriteOperationForbidden(
                        statement_label(&other).to_string(),
                    ),
                }
            }
        };

        let mut walker = IdentifierWalker::new(&self.schema);
        if let Err(reason) = walker.check_query(&query) {
            return Verdict::Rejected { reason };
        }

        if query.limit.is_none() && !query_is_aggregate(&query) {
            query.limit = Some(sp::Expr::Value(sp::Value::Number(
                self.default_row_limit.to_string(),
                false,
            )));
            return Verdict::Accepted {
                sql: query.to_string(),
            };
        }

        Verdict::Accepted {
            sql: sql.to_string(),
        }
    }
}

/// Case-insensitive word-boundary scan for mutating keywords.
fn find_forbidden_keyword(sql: &str) -> Option<String> {
    for word in sql.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
        if word.is_empty() {
            continue;
        }
        let upper = word.to_ascii_uppercase();
        if FORBIDDEN_KEYWORDS.contains(&upper.as_str()) {
            return Some(upper);
        }
    }
    None
}

fn statement_label(stmt: &sp::Statement) -> &'static str {
    match stmt {
        sp::Statement::Insert(_) => "INSERT",
        sp::Statement::Update { .. } => "UPDATE",
        sp::Statement::Delete(_) => "DELETE",
        sp::Statement::Drop { .. } => "DROP",
        sp::Statement::Truncate { .. } => "TRUNCATE",
        _ => "NON-SELECT",
    }
}

/// True when the query's top-level projection aggregates (or groups), in
/// which case the result is already small and no LIMIT is injected.
fn query_is_aggregate(query: &sp::Query) -> bool {
    set_expr_is_aggregate(&query.body)
}

fn set_expr_is_aggregate(body: &sp::SetExpr) -> bool {
    match body {
        sp::SetExpr::Select(select) => {
            if let sp::GroupByExpr::Expressions(exprs, _) = &select.group_by {
                if !exprs.is_empty() {
                    return true;
                }
            }
            select.projection.iter().any(|item| match item {
                sp::SelectItem::UnnamedExpr(expr)
                | sp::SelectItem::ExprWithAlias { expr, .. } => expr_has_aggregate(expr),
                _ => false,
            })
        }
        sp::SetExpr::Query(query) => query_is_aggregate(query),
        _ => false,
    }
}

fn expr_has_aggregate(expr: &sp::Expr) -> bool {
    match expr {
        sp::Expr::Function(func) => {
            let name = func
                .name
                .0
                .last()
                .map(|ident| ident.value.to_ascii_uppercase())
                .unwrap_or_default();
            AGGREGATE_FUNCTIONS.contains(&name.as_str())
        }
        sp::Expr::BinaryOp { left, right, .. } => {
            expr_has_aggregate(left) || expr_has_aggregate(right)
        }
        sp::Expr::UnaryOp { expr, .. } | sp::Expr::Nested(expr) | sp::Expr::Cast { expr, .. } => {
            expr_has_aggregate(expr)
        }
        _ => false,
    }
}

/// Match-based AST walk checking every referenced table and column against
/// the schema descriptor. CTE names, table aliases, and projection aliases
/// count as known identifiers once declared.
struct IdentifierWalker<'a> {
    schema: &'a SchemaDescriptor,
    known: HashSet<String>,
}

impl<'a> IdentifierWalker<'a> {
    fn new(schema: &'a SchemaDescriptor) -> Self {
        Self {
            schema,
            known: HashSet::new(),
        }
    }

    fn declare(&mut self, name: &str) {
        self.known.insert(name.to_ascii_lowercase());
    }

    fn is_known(&self, name: &str) -> bool {
        self.known.contains(&name.to_ascii_lowercase())
    }

    fn check_query(&mut self, query: &sp::Query) -> Result<(), RejectReason> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.declare(&cte.alias.name.value);
                self.check_query(&cte.query)?;
            }
        }
        self.check_set_expr(&query.body)?;
        if let Some(order_by) = &query.order_by {
            for item in &order_by.exprs {
                self.check_expr(&item.expr)?;
            }
        }
        if let Some(limit) = &query.limit {
            self.check_expr(limit)?;
        }
        if let Some(offset) = &query.offset {
            self.check_expr(&offset.value)?;
        }
        Ok(())
    }

    fn check_set_expr(&mut self, body: &sp::SetExpr) -> Result<(), RejectReason> {
        match body {
            sp::SetExpr::Select(select) => self.check_select(select),
            sp::SetExpr::Query(query) => self.check_query(query),
            sp::SetExpr::SetOperation { left, right, .. } => {
                self.check_set_expr(left)?;
                self.check_set_expr(right)
            }
            _ => Ok(()),
        }
    }

    fn check_select(&mut self, select: &sp::Select) -> Result<(), RejectReason> {
        // Register every table and alias first so join constraints and
        // qualified references resolve regardless of clause order.
        for table in &select.from {
            self.register_table_factor(&table.relation)?;
            for join in &table.joins {
                self.register_table_factor(&join.relation)?;
            }
        }
        for item in &select.projection {
            if let sp::SelectItem::ExprWithAlias { alias, .. } = item {
                self.declare(&alias.value);
            }
        }

        for table in &select.from {
            for join in &table.joins {
                if let Some(constraint) = join_constraint(&join.join_operator) {
                    self.check_join_constraint(constraint)?;
                }
            }
        }
        for item in &select.projection {
            match item {
                sp::SelectItem::UnnamedExpr(expr)
                | sp::SelectItem::ExprWithAlias { expr, .. } => self.check_expr(expr)?,
                sp::SelectItem::QualifiedWildcard(name, _) => {
                    self.check_table_reference(name)?;
                }
                sp::SelectItem::Wildcard(_) => {}
            }
        }
        if let Some(selection) = &select.selection {
            self.check_expr(selection)?;
        }
        if let sp::GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                self.check_expr(expr)?;
            }
        }
        if let Some(having) = &select.having {
            self.check_expr(having)?;
        }
        Ok(())
    }

    fn register_table_factor(&mut self, factor: &sp::TableFactor) -> Result<(), RejectReason> {
        match factor {
            sp::TableFactor::Table { name, alias, .. } => {
                self.check_table_reference(name)?;
                if let Some(alias) = alias {
                    self.declare(&alias.name.value);
                }
                Ok(())
            }
            sp::TableFactor::Derived {
                subquery, alias, ..
            } => {
                self.check_query(subquery)?;
                if let Some(alias) = alias {
                    self.declare(&alias.name.value);
                }
                Ok(())
            }
            sp::TableFactor::NestedJoin {
                table_with_joins, ..
            } => {
                self.register_table_factor(&table_with_joins.relation)?;
                for join in &table_with_joins.joins {
                    self.register_table_factor(&join.relation)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_table_reference(&mut self, name: &sp::ObjectName) -> Result<(), RejectReason> {
        let table = name
            .0
            .last()
            .map(|ident| ident.value.as_str())
            .unwrap_or_default();
        if self.schema.has_table(table) || self.is_known(table) {
            self.declare(table);
            Ok(())
        } else {
            Err(RejectReason::UnknownIdentifier(table.to_string()))
        }
    }

    fn check_join_constraint(
        &mut self,
        constraint: &sp::JoinConstraint,
    ) -> Result<(), RejectReason> {
        match constraint {
            sp::JoinConstraint::On(expr) => self.check_expr(expr),
            sp::JoinConstraint::Using(columns) => {
                for column in columns {
                    self.check_column(&column.value)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn check_column(&self, name: &str) -> Result<(), RejectReason> {
        if self.schema.has_column(name) || self.is_known(name) {
            Ok(())
        } else {
            Err(RejectReason::UnknownIdentifier(name.to_string()))
        }
    }

    fn check_expr(&mut self, expr: &sp::Expr) -> Result<(), RejectReason> {
        match expr {
            sp::Expr::Identifier(ident) => self.check_column(&ident.value),
            sp::Expr::CompoundIdentifier(parts) => {
                if let [qualifier, column] = parts.as_slice() {
                    if !self.is_known(&qualifier.value) && !self.schema.has_table(&qualifier.value)
                    {
                        return Err(RejectReason::UnknownIdentifier(qualifier.value.clone()));
                    }
                    self.check_column(&column.value)
                } else {
                    // Longer paths (db.table.column) are not used against a
                    // single-file dataset; check the final segment only.
                    match parts.last() {
                        Some(ident) => self.check_column(&ident.value),
                        None => Ok(()),
                    }
                }
            }
            sp::Expr::BinaryOp { left, right, .. } => {
                self.check_expr(left)?;
                self.check_expr(right)
            }
            sp::Expr::UnaryOp { expr, .. }
            | sp::Expr::Nested(expr)
            | sp::Expr::Cast { expr, .. }
            | sp::Expr::IsNull(expr)
            | sp::Expr::IsNotNull(expr) => self.check_expr(expr),
            sp::Expr::Between {
                expr, low, high, ..
            } => {
                self.check_expr(expr)?;
                self.check_expr(low)?;
                self.check_expr(high)
            }
            sp::Expr::InList { expr, list, .. } => {
                self.check_expr(expr)?;
                for item in list {
                    self.check_expr(item)?;
                }
                Ok(())
            }
            sp::Expr::InSubquery { expr, subquery, .. } => {
                self.check_expr(expr)?;
                self.check_query(subquery)
            }
            sp::Expr::Subquery(query) | sp::Expr::Exists { subquery: query, .. } => {
                self.check_query(query)
            }
            sp::Expr::Like { expr, pattern, .. } | sp::Expr::ILike { expr, pattern, .. } => {
                self.check_expr(expr)?;
                self.check_expr(pattern)
            }
            sp::Expr::Function(func) => self.check_function(func),
            sp::Expr::Case {
                operand,
                conditions,
                results,
                else_result,
            } => {
                if let Some(operand) = operand {
                    self.check_expr(operand)?;
                }
                for condition in conditions {
                    self.check_expr(condition)?;
                }
                for result in results {
                    self.check_expr(result)?;
                }
                if let Some(else_result) = else_result {
                    self.check_expr(else_result)?;
                }
                Ok(())
            }
            sp::Expr::Tuple(items) => {
                for item in items {
                    self.check_expr(item)?;
                }
                Ok(())
            }
            // Literals and anything exotic carry no schema identifiers we
            // can usefully resolve.
            _ => Ok(()),
        }
    }

    fn check_function(&mut self, func: &sp::Function) -> Result<(), RejectReason> {
        if let sp::FunctionArguments::List(list) = &func.args {
            for arg in &list.args {
                match arg {
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(expr))
                    | sp::FunctionArg::Named {
                        arg: sp::FunctionArgExpr::Expr(expr),
                        ..
                    } => self.check_expr(expr)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn join_constraint(operator: &sp::JoinOperator) -> Option<&sp::JoinConstraint> {
    match operator {
        sp::JoinOperator::Inner(constraint)
        | sp::JoinOperator::LeftOuter(constraint)
        | sp::JoinOperator::RightOuter(constraint)
        | sp::JoinOperator::FullOuter(constraint) => Some(constraint),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::{ColumnDescriptor, TableDescriptor};

    fn test_schema() -> Arc<SchemaDescriptor> {
        let column = |name: &str, data_type: &str| ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_primary_key: false,
            not_null: false,
        };
        Arc::new(SchemaDescriptor {
            tables: vec![
                TableDescriptor {
                    name: "transactions".into(),
                    columns: vec![
                        column("id", "INTEGER"),
                        column("amount", "REAL"),
                        column("category", "TEXT"),
                        column("date", "TEXT"),
                        column("customer_id", "INTEGER"),
                    ],
                    row_count: 100,
                },
                TableDescriptor {
                    name: "customers".into(),
                    columns: vec![column("id", "INTEGER"), column("name", "TEXT")],
                    row_count: 10,
                },
            ],
        })
    }

    fn validator() -> QueryValidator {
        QueryValidator::new(test_schema(), 8192, 1000)
    }

    fn reject_code(verdict: Verdict) -> &'static str {
        match verdict {
            Verdict::Rejected { reason } => reason.code(),
            Verdict::Accepted { sql } => panic!("expected rejection, accepted: {}", sql),
        }
    }

    fn accepted_sql(verdict: Verdict) -> String {
        match verdict {
            Verdict::Accepted { sql } => sql,
            Verdict::Rejected { reason } => panic!("expected acceptance, rejected: {}", reason),
        }
    }

    // --- forbidden keywords ---

    #[test]
    fn test_delete_rejected() {
        let verdict = validator().check("DELETE FROM transactions");
        assert_eq!(reject_code(verdict), "WriteOperationForbidden");
    }

    #[test]
    fn test_forbidden_keyword_any_case() {
        for sql in [
            "drop table transactions",
            "Insert INTO transactions VALUES (1)",
            "uPdAtE transactions SET amount = 0",
            "TRUNCATE TABLE transactions",
        ] {
            let verdict = validator().check(sql);
            assert_eq!(reject_code(verdict), "WriteOperationForbidden", "{}", sql);
        }
    }

    #[test]
    fn test_forbidden_keyword_any_position() {
        // Even buried mid-statement (here inside a literal) the scan rejects.
        let verdict =
            validator().check("SELECT category FROM transactions WHERE category = 'drop'");
        assert_eq!(reject_code(verdict), "WriteOperationForbidden");
    }

    #[test]
    fn test_keyword_not_matched_inside_identifier() {
        // "update" as a substring of a longer word must not trip the scan;
        // the unknown column is what gets this one rejected.
        let verdict = validator().check("SELECT last_updated FROM transactions");
        assert_eq!(reject_code(verdict), "UnknownIdentifier");
    }

    // --- identifiers ---

    #[test]
    fn test_unknown_table_rejected() {
        let verdict = validator().check("SELECT amount FROM refunds LIMIT 5");
        assert_eq!(reject_code(verdict), "UnknownIdentifier");
    }

    #[test]
    fn test_unknown_column_rejected() {
        let verdict = validator().check("SELECT salary FROM transactions LIMIT 5");
        assert_eq!(reject_code(verdict), "UnknownIdentifier");
    }

    #[test]
    fn test_known_identifiers_accepted() {
        let verdict = validator()
            .check("SELECT category, amount FROM transactions WHERE amount > 10 LIMIT 20");
        accepted_sql(verdict);
    }

    #[test]
    fn test_table_alias_and_qualified_columns() {
        let verdict = validator().check(
            "SELECT t.category, c.name FROM transactions AS t \
             JOIN customers AS c ON t.customer_id = c.id LIMIT 10",
        );
        accepted_sql(verdict);
    }

    #[test]
    fn test_unknown_qualifier_rejected() {
        let verdict = validator().check("SELECT x.amount FROM transactions LIMIT 5");
        assert_eq!(reject_code(verdict), "UnknownIdentifier");
    }

    #[test]
    fn test_projection_alias_usable_in_order_by() {
        let verdict = validator().check(
            "SELECT category, SUM(amount) AS total FROM transactions \
             GROUP BY category ORDER BY total DESC",
        );
        accepted_sql(verdict);
    }

    #[test]
    fn test_cte_name_is_known() {
        let verdict = validator().check(
            "WITH recent AS (SELECT amount FROM transactions LIMIT 50) \
             SELECT SUM(amount) FROM recent",
        );
        accepted_sql(verdict);
    }

    #[test]
    fn test_subquery_identifiers_checked() {
        let verdict = validator().check(
            "SELECT category FROM transactions WHERE customer_id IN \
             (SELECT id FROM ghosts) LIMIT 5",
        );
        assert_eq!(reject_code(verdict), "UnknownIdentifier");
    }

    // --- statement shape ---

    #[test]
    fn test_multi_statement_rejected() {
        let verdict = validator().check("SELECT 1; SELECT 2");
        assert_eq!(reject_code(verdict), "MultiStatementForbidden");
    }

    #[test]
    fn test_trailing_semicolon_is_fine() {
        let verdict = validator().check("SELECT amount FROM transactions LIMIT 5;");
        accepted_sql(verdict);
    }

    #[test]
    fn test_gibberish_rejected_as_invalid_syntax() {
        let verdict = validator().check("the answer is probably forty-two");
        assert_eq!(reject_code(verdict), "InvalidSyntax");
    }

    #[test]
    fn test_pragma_rejected() {
        let verdict = validator().check("PRAGMA table_info(transactions)");
        assert_eq!(reject_code(verdict), "WriteOperationForbidden");
    }

    #[test]
    fn test_too_long_rejected() {
        let validator = QueryValidator::new(test_schema(), 64, 1000);
        let sql = format!(
            "SELECT amount FROM transactions WHERE category IN ({})",
            vec!["'x'"; 50].join(", ")
        );
        let verdict = validator.check(&sql);
        assert_eq!(reject_code(verdict), "StatementTooLong");
    }

    // --- limit policy ---

    #[test]
    fn test_limit_injected_into_plain_select() {
        let verdict = validator().check("SELECT category FROM transactions");
        let sql = accepted_sql(verdict);
        assert!(sql.ends_with("LIMIT 1000"), "got: {}", sql);
    }

    #[test]
    fn test_existing_limit_preserved() {
        let verdict = validator().check("SELECT category FROM transactions LIMIT 7");
        let sql = accepted_sql(verdict);
        assert!(sql.contains("LIMIT 7"));
        assert!(!sql.contains("1000"));
    }

    #[test]
    fn test_aggregate_query_needs_no_limit() {
        let verdict = validator().check("SELECT SUM(amount) FROM transactions");
        let sql = accepted_sql(verdict);
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_grouped_query_needs_no_limit() {
        let verdict =
            validator().check("SELECT category, COUNT(*) FROM transactions GROUP BY category");
        let sql = accepted_sql(verdict);
        assert!(!sql.contains("LIMIT"));
    }

    // --- determinism ---

    #[test]
    fn test_check_is_deterministic() {
        let validator = validator();
        let sql = "SELECT category FROM transactions";
        let first = accepted_sql(validator.check(sql));
        let second = accepted_sql(validator.check(sql));
        assert_eq!(first, second);
    }
}
