//! Generic filter, ordering, and field-selection query builder.
//!
//! Translates caller-supplied strings into a parameterized query descriptor
//! for a single table and renders it to SQL with a fixed clause order:
//! `SELECT <fields> FROM <table> [<joins>] [WHERE ...] [ORDER BY ...]
//! [LIMIT n OFFSET m]`.
//!
//! Invalid clauses are ignored, not rejected — malformed filters, unknown
//! fields, and unrecognized directions are dropped. Every drop is reported
//! on a diagnostics list so callers can observe what was discarded. Field
//! names are validated against an allow-list; values are rendered as quoted
//! literals with embedded quotes doubled.

use std::{collections::BTreeMap, fmt::Write};

/// A table reference with its alias.
#[derive(Debug, Clone)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Alias used to qualify fields.
    pub alias: String,
}

impl Table {
    /// Creates a table reference.
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self { name: name.into(), alias: alias.into() }
    }
}

/// A projected or referenced field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Column name.
    pub name: String,
    /// Table alias prefix; empty means unqualified.
    pub prefix: String,
    /// Output alias; empty means none.
    pub alias: String,
}

impl Field {
    /// Creates a field qualified by a table alias.
    pub fn qualified(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self { name: name.into(), prefix: prefix.into(), alias: String::new() }
    }

    fn render(&self) -> String {
        let qualified = if self.prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.prefix, self.name)
        };
        if self.alias.is_empty() {
            qualified
        } else {
            format!("{qualified} {}", self.alias)
        }
    }
}

/// One predicate in the WHERE clause.
#[derive(Debug, Clone)]
pub struct Condition {
    /// Field the predicate applies to.
    pub field: Field,
    /// SQL comparison operator.
    pub operator: &'static str,
    /// Right-hand value, rendered as a quoted literal.
    pub value: String,
}

/// A JOIN in the query.
#[derive(Debug, Clone)]
pub struct Join {
    /// Join kind, e.g. `LEFT OUTER`.
    pub kind: String,
    /// Joined table.
    pub table: Table,
    /// Join predicate.
    pub on: String,
}

/// Sort direction accepted by the order parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

/// One entry in the ORDER BY clause.
#[derive(Debug, Clone)]
pub struct Order {
    /// Field to sort by.
    pub field: Field,
    /// Sort direction.
    pub direction: Direction,
}

/// Descriptor for "select some fields from one table, optionally filtered,
/// ordered, and paged".
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    /// Target table.
    pub table: Table,
    /// Projected fields.
    pub fields: Vec<Field>,
    /// Joined tables.
    pub joins: Vec<Join>,
    /// WHERE predicates, joined with AND.
    pub conditions: Vec<Condition>,
    /// ORDER BY entries.
    pub order_by: Vec<Order>,
    /// Page size, used as LIMIT when paging.
    pub limit: i64,
    /// Row offset, used when paging.
    pub offset: i64,
}

impl QueryBuilder {
    /// Creates an empty builder over `table`.
    pub fn new(table: Table) -> Self {
        Self {
            table,
            fields: Vec::new(),
            joins: Vec::new(),
            conditions: Vec::new(),
            order_by: Vec::new(),
            limit: 0,
            offset: 0,
        }
    }

    /// Renders the descriptor to SQL.
    ///
    /// Clause order is fixed; WHERE is emitted only when at least one
    /// condition exists, ORDER BY only when at least one order entry exists,
    /// and LIMIT/OFFSET only when `paging` is true. An empty projection
    /// renders to an empty string.
    pub fn to_sql(&self, paging: bool) -> String {
        if self.fields.is_empty() {
            return String::new();
        }

        let mut sql = format!(
            "SELECT {} FROM {} {}",
            render_fields(&self.fields),
            self.table.name,
            self.table.alias
        );
        for join in &self.joins {
            let _ = write!(sql, " {} JOIN {} {} ON ({})", join.kind, join.table.name, join.table.alias, join.on);
        }
        if !self.conditions.is_empty() {
            let _ = write!(sql, " WHERE {}", render_conditions(&self.conditions));
        }
        if !self.order_by.is_empty() {
            let _ = write!(sql, " ORDER BY {}", render_order_by(&self.order_by));
        }
        if paging {
            let _ = write!(sql, " LIMIT {} OFFSET {}", self.limit, self.offset);
        }
        sql
    }
}

/// Renders the projection list.
fn render_fields(fields: &[Field]) -> String {
    fields.iter().map(Field::render).collect::<Vec<_>>().join(", ")
}

/// Renders WHERE predicates joined with AND.
///
/// Values become quoted literals with embedded single quotes doubled, so a
/// value can never terminate the literal; structural injection is already
/// impossible because field names pass the allow-list.
pub fn render_conditions(conditions: &[Condition]) -> String {
    conditions
        .iter()
        .map(|c| {
            let field = if c.field.prefix.is_empty() {
                c.field.name.clone()
            } else {
                format!("{}.{}", c.field.prefix, c.field.name)
            };
            format!("{field} {} '{}'", c.operator, quote_value(&c.value))
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn render_order_by(orders: &[Order]) -> String {
    orders
        .iter()
        .map(|o| {
            let field = if o.field.prefix.is_empty() {
                o.field.name.clone()
            } else {
                format!("{}.{}", o.field.prefix, o.field.name)
            };
            format!("{field} {}", o.direction.as_sql())
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote_value(value: &str) -> String {
    value.replace('\'', "''")
}

/// Parses `field:OP:value` filter strings into conditions.
///
/// OP is one of EQ, GT, LT, GE, LE (case-insensitive); anything unrecognized
/// falls back to equality. Entries that do not split into exactly three
/// parts are dropped and reported on the returned diagnostics list.
pub fn filters_to_conditions(filters: &[String], alias: &str) -> (Vec<Condition>, Vec<String>) {
    let mut conditions = Vec::new();
    let mut dropped = Vec::new();

    for raw in filters {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 3 {
            dropped.push(format!("filter '{raw}' ignored: expected field:OP:value"));
            continue;
        }
        let operator = match parts[1].to_ascii_uppercase().as_str() {
            "EQ" => "=",
            "GT" => ">",
            "LT" => "<",
            "GE" => ">=",
            "LE" => "<=",
            _ => "=",
        };
        conditions.push(Condition {
            field: Field::qualified(parts[0], alias),
            operator,
            value: parts[2].to_string(),
        });
    }

    (conditions, dropped)
}

/// Parses `field:asc|desc` strings into ORDER BY entries.
///
/// Entries naming a field outside the allow-list or an unrecognized
/// direction are dropped and reported on the diagnostics list.
pub fn orders_to_order_by(
    orders: &[String],
    allowed_fields: &[&str],
    alias: &str,
) -> (Vec<Order>, Vec<String>) {
    let mut order_by = Vec::new();
    let mut dropped = Vec::new();

    for raw in orders {
        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() != 2 {
            dropped.push(format!("order '{raw}' ignored: expected field:asc|desc"));
            continue;
        }
        if !allowed_fields.contains(&parts[0]) {
            dropped.push(format!("order '{raw}' ignored: unknown field '{}'", parts[0]));
            continue;
        }
        let direction = match parts[1].to_ascii_lowercase().as_str() {
            "asc" => Direction::Asc,
            "desc" => Direction::Desc,
            other => {
                dropped.push(format!("order '{raw}' ignored: unknown direction '{other}'"));
                continue;
            },
        };
        order_by.push(Order { field: Field::qualified(parts[0], alias), direction });
    }

    (order_by, dropped)
}

/// Result of parsing a field-projection string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    /// Validated flat field names, input order preserved.
    pub fields: Vec<String>,
    /// Relationship name to requested sub-fields. An empty list means
    /// "include relationship with its default fields".
    pub relationships: BTreeMap<String, Vec<String>>,
    /// Diagnostics for every dropped token.
    pub dropped: Vec<String>,
}

/// Parses a comma-separated projection with bracketed relationship
/// sub-lists, e.g. `uid,source,rel[x,y]`.
///
/// Flat tokens are kept only when present in `allowed_fields`. A bracketed
/// relationship keeps its sub-field list verbatim; a relationship with an
/// empty sub-list whose name is itself a valid column folds back into the
/// flat field list, and one whose name is unknown is dropped.
pub fn fields_and_relationships(allowed_fields: &[&str], input: &str) -> FieldSelection {
    let mut selection = FieldSelection::default();

    for token in split_projection(input) {
        match token {
            ProjectionToken::Field(name) => {
                if name.is_empty() {
                    continue;
                }
                if allowed_fields.contains(&name.as_str()) {
                    selection.fields.push(name);
                } else {
                    selection.dropped.push(format!("field '{name}' ignored: not a known column"));
                }
            },
            ProjectionToken::Relationship { name, fields } => {
                if fields.is_empty() {
                    if allowed_fields.contains(&name.as_str()) {
                        selection.fields.push(name);
                    } else {
                        selection
                            .dropped
                            .push(format!("relationship '{name}' ignored: empty field list"));
                    }
                } else {
                    selection.relationships.insert(name, fields);
                }
            },
        }
    }

    selection
}

enum ProjectionToken {
    Field(String),
    Relationship { name: String, fields: Vec<String> },
}

/// Splits the projection string into flat fields and `name[a,b]` groups.
fn split_projection(input: &str) -> Vec<ProjectionToken> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ',' => {
                let name = current.trim().to_string();
                if !name.is_empty() {
                    tokens.push(ProjectionToken::Field(name));
                }
                current.clear();
            },
            '[' => {
                let name = current.trim().to_string();
                current.clear();
                let mut sub = String::new();
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    sub.push(inner);
                }
                // Swallow the separator after a closing bracket.
                if chars.peek() == Some(&',') {
                    chars.next();
                }
                if !name.is_empty() {
                    let fields = sub
                        .split(',')
                        .map(str::trim)
                        .filter(|f| !f.is_empty())
                        .map(str::to_string)
                        .collect();
                    tokens.push(ProjectionToken::Relationship { name, fields });
                }
            },
            _ => current.push(c),
        }
    }
    let name = current.trim().to_string();
    if !name.is_empty() {
        tokens.push(ProjectionToken::Field(name));
    }

    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALLOWED: &[&str] = &["uid", "source", "destination", "status", "body", "rel", "*"];

    #[test]
    fn eq_filter_renders_equality_condition() {
        let (conditions, dropped) =
            filters_to_conditions(&["status:EQ:ready".to_string()], "r");
        assert!(dropped.is_empty());
        assert_eq!(conditions.len(), 1);
        assert_eq!(render_conditions(&conditions), "r.status = 'ready'");
    }

    #[test]
    fn malformed_filter_is_dropped_without_error() {
        let (conditions, dropped) = filters_to_conditions(&["status:ready".to_string()], "r");
        assert!(conditions.is_empty());
        assert_eq!(dropped.len(), 1);
    }

    #[test]
    fn unknown_operator_defaults_to_equality() {
        let (conditions, _) = filters_to_conditions(&["retries:LIKE:3".to_string()], "r");
        assert_eq!(conditions[0].operator, "=");
    }

    #[test]
    fn comparison_operators_map_to_sql() {
        let filters: Vec<String> = ["retries:GT:1", "retries:LT:5", "retries:GE:0", "retries:le:9"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let (conditions, dropped) = filters_to_conditions(&filters, "r");
        assert!(dropped.is_empty());
        let ops: Vec<&str> = conditions.iter().map(|c| c.operator).collect();
        assert_eq!(ops, vec![">", "<", ">=", "<="]);
    }

    #[test]
    fn embedded_quotes_cannot_terminate_the_literal() {
        let (conditions, _) =
            filters_to_conditions(&["status:EQ:it's".to_string()], "r");
        assert_eq!(render_conditions(&conditions), "r.status = 'it''s'");
    }

    #[test]
    fn orders_skip_unknown_fields_and_directions() {
        let orders: Vec<String> =
            ["uid:asc", "nope:desc", "status:upward", "status:DESC"].iter().map(ToString::to_string).collect();
        let (order_by, dropped) = orders_to_order_by(&orders, ALLOWED, "r");
        assert_eq!(order_by.len(), 2);
        assert_eq!(dropped.len(), 2);
        assert_eq!(order_by[0].direction, Direction::Asc);
        assert_eq!(order_by[1].direction, Direction::Desc);
    }

    #[test]
    fn field_selection_splits_fields_and_relationships() {
        let selection = fields_and_relationships(ALLOWED, "uid,source,rel[x,y]");
        assert_eq!(selection.fields, vec!["uid", "source"]);
        assert_eq!(
            selection.relationships.get("rel"),
            Some(&vec!["x".to_string(), "y".to_string()])
        );
    }

    #[test]
    fn unknown_flat_fields_are_dropped_with_diagnostics() {
        let selection = fields_and_relationships(ALLOWED, "uid,bogus,status");
        assert_eq!(selection.fields, vec!["uid", "status"]);
        assert_eq!(selection.dropped.len(), 1);
    }

    #[test]
    fn empty_relationship_with_known_name_folds_into_fields() {
        let selection = fields_and_relationships(ALLOWED, "uid,rel[]");
        assert_eq!(selection.fields, vec!["uid", "rel"]);
        assert!(selection.relationships.is_empty());
    }

    #[test]
    fn empty_relationship_with_unknown_name_is_dropped() {
        let selection = fields_and_relationships(ALLOWED, "uid,mystery[]");
        assert_eq!(selection.fields, vec!["uid"]);
        assert!(selection.relationships.is_empty());
        assert_eq!(selection.dropped.len(), 1);
    }

    #[test]
    fn sql_renders_with_fixed_clause_order() {
        let mut builder = QueryBuilder::new(Table::new("requests", "r"));
        builder.fields = vec![Field::qualified("uid", "r"), Field::qualified("status", "r")];
        let (conditions, _) = filters_to_conditions(&["status:EQ:ready".to_string()], "r");
        builder.conditions = conditions;
        let (order_by, _) =
            orders_to_order_by(&["uid:asc".to_string()], ALLOWED, "r");
        builder.order_by = order_by;
        builder.limit = 10;
        builder.offset = 20;

        assert_eq!(
            builder.to_sql(true),
            "SELECT r.uid, r.status FROM requests r WHERE r.status = 'ready' \
             ORDER BY r.uid asc LIMIT 10 OFFSET 20"
        );
    }

    #[test]
    fn clauses_are_omitted_when_empty_or_unpaged() {
        let mut builder = QueryBuilder::new(Table::new("requests", "r"));
        builder.fields = vec![Field::qualified("uid", "r")];

        assert_eq!(builder.to_sql(false), "SELECT r.uid FROM requests r");

        builder.limit = 5;
        assert_eq!(builder.to_sql(true), "SELECT r.uid FROM requests r LIMIT 5 OFFSET 0");
    }

    #[test]
    fn empty_projection_renders_nothing() {
        let builder = QueryBuilder::new(Table::new("requests", "r"));
        assert_eq!(builder.to_sql(true), "");
    }
}
