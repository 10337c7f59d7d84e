//! Backend-neutral predicate tree produced by the compiler.

use indexmap::IndexMap;

use crate::schema::FieldDescriptor;
use crate::sort::SortSpec;
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    /// `%value%`
    Contains,
    /// `value%`
    StartsWith,
    /// `%value`
    EndsWith,
    Gt,
    Ge,
    Lt,
    Le,
    In,
    NotIn,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PredicateNode {
    /// For pattern operators `value` is the trimmed raw text; for `In` /
    /// `NotIn` it is a `Value::List`.
    Compare {
        field: FieldDescriptor,
        op: CompareOp,
        value: Value,
    },
    /// `IS NULL` when `is_null`, otherwise `IS NOT NULL`.
    NullCheck { field: FieldDescriptor, is_null: bool },
    /// Logical OR of single-field predicates.
    Or(Vec<PredicateNode>),
}

impl PredicateNode {
    pub fn compare(field: FieldDescriptor, op: CompareOp, value: impl Into<Value>) -> Self {
        PredicateNode::Compare {
            field,
            op,
            value: value.into(),
        }
    }

    /// Every field referenced by this node, depth first.
    pub fn fields(&self) -> Vec<&FieldDescriptor> {
        match self {
            PredicateNode::Compare { field, .. } | PredicateNode::NullCheck { field, .. } => {
                vec![field]
            }
            PredicateNode::Or(children) => children.iter().flat_map(|c| c.fields()).collect(),
        }
    }
}

/// A left join registered for the first segment of a nested path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JoinAlias {
    /// Relation field name on the root entity.
    pub relation: String,
    /// Alias used to qualify the joined columns.
    pub alias: String,
    /// Entity reached through the relation.
    pub target: String,
}

/// Join aliases for one compiled request, in registration order.
/// A relation is registered at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AliasTable {
    entries: IndexMap<String, JoinAlias>,
}

impl AliasTable {
    /// Register the join for a nested field and return its alias. Repeated
    /// registrations of the same relation reuse the first one.
    pub fn register(&mut self, field: &FieldDescriptor) -> Option<&str> {
        if !field.path.is_nested() {
            return None;
        }
        let relation = field.path.first();
        let entry = self
            .entries
            .entry(relation.to_owned())
            .or_insert_with(|| JoinAlias {
                relation: relation.to_owned(),
                alias: relation.to_owned(),
                target: field.entity.clone(),
            });
        Some(entry.alias.as_str())
    }

    pub fn get(&self, relation: &str) -> Option<&JoinAlias> {
        self.entries.get(relation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JoinAlias> {
        self.entries.values()
    }
}

/// A resolved sort key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub field: FieldDescriptor,
    pub ascending: bool,
}

/// The output of compiling a [`QueryRequest`](crate::QueryRequest).
///
/// `nodes` are conjoined; each node is a single-field predicate or a
/// disjunction of them.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub entity: String,
    pub nodes: Vec<PredicateNode>,
    pub aliases: AliasTable,
    pub sort: SortSpec,
    pub order: Vec<OrderKey>,
    pub offset: u64,
    pub limit: u64,
}

impl CompiledQuery {
    pub fn is_unfiltered(&self) -> bool {
        self.nodes.is_empty()
    }
}
