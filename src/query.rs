//! Query model: predicates, expressions, sorts and projections
//!
//! A [`Query`] is built by trusted calling code and compiled into SQL by
//! [`crate::sql::select`]. Predicates and expressions are plain enums so the
//! compiler can walk them structurally.

use std::collections::BTreeMap;

use crate::types::{Location, Value};

/// Binary operators usable in [`Predicate::Compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// Pattern in the backend's `LIKE` syntax
    Like,
    /// Case-insensitive `Like`
    ILike,
    /// Membership: key path in a literal list, or literal in a JSON array field
    In,
}

impl CompareOp {
    /// SQL operator for the scalar comparison operators
    pub(crate) fn sql_operator(&self) -> &'static str {
        match self {
            CompareOp::Equal => "=",
            CompareOp::NotEqual => "<>",
            CompareOp::LessThan => "<",
            CompareOp::LessThanOrEqual => "<=",
            CompareOp::GreaterThan => ">",
            CompareOp::GreaterThanOrEqual => ">=",
            CompareOp::Like => "LIKE",
            CompareOp::ILike => "ILIKE",
            CompareOp::In => "IN",
        }
    }
}

/// Backend-evaluated functions
#[derive(Debug, Clone, PartialEq)]
pub enum Function {
    /// Distance in meters between a location field and a fixed point
    Distance { field: String, origin: Location },
}

/// Leaf of a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A field or metadata column (`_id`, `_owner_id`, `_created_at`, ...)
    KeyPath(String),
    Literal(Value),
    /// Right-hand side of `KeyPath In [...]`
    LiteralList(Vec<Value>),
    Function(Function),
}

impl Expression {
    pub fn key_path(name: impl Into<String>) -> Self {
        Expression::KeyPath(name.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn list<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Expression::LiteralList(values.into_iter().map(Into::into).collect())
    }

    pub fn distance(field: impl Into<String>, origin: Location) -> Self {
        Expression::Function(Function::Distance {
            field: field.into(),
            origin,
        })
    }
}

/// Filter tree
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        op: CompareOp,
        left: Expression,
        right: Expression,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Predicate::Compare { op, left, right }
    }

    /// `key = value`
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(
            CompareOp::Equal,
            Expression::key_path(key),
            Expression::literal(value),
        )
    }

    /// `key LIKE pattern`
    pub fn like(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(
            CompareOp::Like,
            Expression::key_path(key),
            Expression::Literal(Value::String(pattern.into())),
        )
    }

    /// `key IN (values...)`
    pub fn is_in<V: Into<Value>>(key: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::compare(CompareOp::In, Expression::key_path(key), Expression::list(values))
    }

    /// JSON array field `key` contains `value`
    pub fn contains(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(CompareOp::In, Expression::literal(value), Expression::key_path(key))
    }

    pub fn and(predicates: Vec<Predicate>) -> Self {
        Predicate::And(predicates)
    }

    pub fn or(predicates: Vec<Predicate>) -> Self {
        Predicate::Or(predicates)
    }

    pub fn not(predicate: Predicate) -> Self {
        Predicate::Not(Box::new(predicate))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// What a sort orders by
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    KeyPath(String),
    Function(Function),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub key: SortKey,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(key: impl Into<String>) -> Self {
        Self {
            key: SortKey::KeyPath(key.into()),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self {
            key: SortKey::KeyPath(key.into()),
            order: SortOrder::Descending,
        }
    }

    pub fn by_function(function: Function, order: SortOrder) -> Self {
        Self {
            key: SortKey::Function(function),
            order,
        }
    }
}

impl Expression {
    fn collect_key_paths<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expression::KeyPath(name) => names.push(name),
            Expression::Function(Function::Distance { field, .. }) => names.push(field),
            Expression::Literal(_) | Expression::LiteralList(_) => {}
        }
    }
}

impl Predicate {
    fn collect_key_paths<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare { left, right, .. } => {
                left.collect_key_paths(names);
                right.collect_key_paths(names);
            }
            Predicate::And(children) | Predicate::Or(children) => {
                for child in children {
                    child.collect_key_paths(names);
                }
            }
            Predicate::Not(child) => child.collect_key_paths(names),
        }
    }
}

/// A record query against one record type
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub record_type: String,
    pub predicate: Option<Predicate>,
    pub sorts: Vec<Sort>,
    pub limit: Option<u64>,
    pub offset: u64,
    /// `None` fetches every field; `Some(vec![])` fetches metadata only
    pub desired_keys: Option<Vec<String>>,
    /// Expressions evaluated per row and returned in `Record::transient`
    pub computed_keys: BTreeMap<String, Expression>,
    /// Also count every match, ignoring limit and offset
    pub get_count: bool,
}

impl Query {
    pub fn new(record_type: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            predicate: None,
            sorts: Vec::new(),
            limit: None,
            offset: 0,
            desired_keys: None,
            computed_keys: BTreeMap::new(),
            get_count: false,
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_pagination(mut self, limit: u64, offset: u64) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }

    pub fn with_desired_keys<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.desired_keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_computed_key(mut self, name: impl Into<String>, expression: Expression) -> Self {
        self.computed_keys.insert(name.into(), expression);
        self
    }

    pub fn with_count(mut self) -> Self {
        self.get_count = true;
        self
    }

    /// Every field name the query refers to, metadata key paths included
    pub fn key_paths(&self) -> Vec<&str> {
        let mut names = Vec::new();
        if let Some(predicate) = &self.predicate {
            predicate.collect_key_paths(&mut names);
        }
        for sort in &self.sorts {
            match &sort.key {
                SortKey::KeyPath(name) => names.push(name.as_str()),
                SortKey::Function(Function::Distance { field, .. }) => names.push(field.as_str()),
            }
        }
        if let Some(keys) = &self.desired_keys {
            names.extend(keys.iter().map(String::as_str));
        }
        for expression in self.computed_keys.values() {
            expression.collect_key_paths(&mut names);
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_builder() {
        let query = Query::new("note")
            .with_predicate(Predicate::eq("noteOrder", 1))
            .with_sort(Sort::desc("noteOrder"))
            .with_pagination(10, 5)
            .with_desired_keys(["content"])
            .with_count();

        assert_eq!(query.record_type, "note");
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, 5);
        assert_eq!(query.desired_keys, Some(vec!["content".to_string()]));
        assert!(query.get_count);
        assert_eq!(query.sorts[0].order, SortOrder::Descending);
    }

    #[test]
    fn test_contains_puts_literal_on_the_left() {
        let predicate = Predicate::contains("tags", "yellow");
        let Predicate::Compare { op, left, right } = predicate else {
            panic!("expected comparison");
        };
        assert_eq!(op, CompareOp::In);
        assert_eq!(left, Expression::Literal(Value::String("yellow".into())));
        assert_eq!(right, Expression::KeyPath("tags".into()));
    }

    #[test]
    fn test_key_paths_cover_every_clause() {
        let origin = Location::new(0.0, 0.0);
        let query = Query::new("note")
            .with_predicate(Predicate::and(vec![
                Predicate::eq("content", "x"),
                Predicate::not(Predicate::contains("tags", "yellow")),
            ]))
            .with_sort(Sort::desc("noteOrder"))
            .with_desired_keys(["title"])
            .with_computed_key("distance", Expression::distance("location", origin));

        assert_eq!(
            query.key_paths(),
            vec!["content", "tags", "noteOrder", "title", "location"]
        );
        assert!(Query::new("note").key_paths().is_empty());
    }

    #[test]
    fn test_list_converts_values() {
        assert_eq!(
            Expression::list(["a", "b"]),
            Expression::LiteralList(vec![Value::from("a"), Value::from("b")])
        );
    }
}
