//! Compiled predicate → sea_orm `Select` lowering.
//!
//! Nested fields are qualified by the join alias registered for their first
//! path segment; each alias becomes one `LEFT JOIN ... AS alias` over the
//! relation the caller mapped to it in a [`JoinMap`].

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use query_core::{CompareOp, CompiledQuery, FieldDescriptor, Page, PredicateNode, Value};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::{Alias, ColumnRef, Expr, IntoColumnRef, JoinType, LikeExpr, Order, SimpleExpr},
    Condition, ConnectionTrait, DbErr, EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, RelationDef, Select,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CriteriaError {
    #[error("no relation mapped for join alias '{0}'")]
    MissingRelation(String),

    #[error("field '{0}' cannot be compared with a list")]
    NonScalarValue(String),

    #[error("'{value}' is not an exact decimal for field '{field}'")]
    Decimal { field: String, value: String },

    #[error(transparent)]
    Db(#[from] DbErr),
}
pub type CriteriaResult<T> = Result<T, CriteriaError>;

/// Relation field name → sea_orm relation from the root entity.
#[derive(Clone)]
pub struct JoinMap<E: EntityTrait> {
    map: HashMap<String, fn() -> RelationDef>,
    _root: std::marker::PhantomData<E>,
}

impl<E: EntityTrait> Default for JoinMap<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EntityTrait> JoinMap<E> {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
            _root: std::marker::PhantomData,
        }
    }

    pub fn insert(mut self, relation: impl Into<String>, def: fn() -> RelationDef) -> Self {
        self.map.insert(relation.into(), def);
        self
    }

    pub fn get(&self, relation: &str) -> Option<RelationDef> {
        self.map.get(relation).map(|f| f())
    }
}

/* ---------- value conversion ---------- */

fn bigdecimal_to_decimal(field: &str, bd: &BigDecimal) -> CriteriaResult<Decimal> {
    let s = bd.normalized().to_string();
    Decimal::from_str_exact(&s).map_err(|_| CriteriaError::Decimal {
        field: field.to_owned(),
        value: s,
    })
}

fn to_sea_value(field: &str, v: &Value) -> CriteriaResult<sea_orm::Value> {
    Ok(match v {
        Value::Null => sea_orm::Value::String(None),
        Value::Bool(b) => sea_orm::Value::Bool(Some(*b)),
        Value::Int(i) => sea_orm::Value::BigInt(Some(*i)),
        Value::Float(f) => sea_orm::Value::Double(Some(*f)),
        Value::Decimal(d) => {
            sea_orm::Value::Decimal(Some(Box::new(bigdecimal_to_decimal(field, d)?)))
        }
        Value::Char(c) => sea_orm::Value::Char(Some(*c)),
        Value::String(s) => sea_orm::Value::String(Some(Box::new(s.clone()))),
        Value::Uuid(u) => sea_orm::Value::Uuid(Some(Box::new(*u))),
        Value::Date(d) => sea_orm::Value::ChronoDate(Some(Box::new(*d))),
        Value::Time(t) => sea_orm::Value::ChronoTime(Some(Box::new(*t))),
        Value::DateTime(dt) => sea_orm::Value::ChronoDateTime(Some(Box::new(*dt))),
        Value::DateTimeUtc(dt) => sea_orm::Value::ChronoDateTimeUtc(Some(Box::new(*dt))),
        Value::Json(j) => sea_orm::Value::Json(Some(Box::new(j.clone()))),
        Value::List(_) => return Err(CriteriaError::NonScalarValue(field.to_owned())),
    })
}

fn to_sea_values(field: &str, v: &Value) -> CriteriaResult<Vec<sea_orm::Value>> {
    match v {
        Value::List(items) => items.iter().map(|i| to_sea_value(field, i)).collect(),
        single => Ok(vec![to_sea_value(field, single)?]),
    }
}

/* ---------- LIKE helpers ---------- */

fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn like(pattern: String) -> LikeExpr {
    LikeExpr::new(pattern).escape('\\')
}

/* ---------- columns ---------- */

fn column_ref<E: EntityTrait>(q: &CompiledQuery, field: &FieldDescriptor) -> CriteriaResult<ColumnRef> {
    let column = Alias::new(field.column.as_str());
    if !field.path.is_nested() {
        return Ok((E::default(), column).into_column_ref());
    }
    let relation = field.path.first();
    let alias = q
        .aliases
        .get(relation)
        .ok_or_else(|| CriteriaError::MissingRelation(relation.to_owned()))?;
    Ok((Alias::new(alias.alias.as_str()), column).into_column_ref())
}

/// Add `node` to `cond`: leaves as plain expressions, disjunctions as one
/// nested `OR` group.
fn add_node<E: EntityTrait>(
    cond: Condition,
    q: &CompiledQuery,
    node: &PredicateNode,
) -> CriteriaResult<Condition> {
    match node {
        PredicateNode::Or(children) => {
            let any = children
                .iter()
                .try_fold(Condition::any(), |acc, c| add_node::<E>(acc, q, c))?;
            Ok(cond.add(any))
        }
        PredicateNode::NullCheck { field, is_null } => {
            let col = Expr::col(column_ref::<E>(q, field)?);
            Ok(cond.add(if *is_null { col.is_null() } else { col.is_not_null() }))
        }
        PredicateNode::Compare { field, op, value } => {
            let name = field.path.to_string();
            let col = Expr::col(column_ref::<E>(q, field)?);
            // Pattern operators carry raw text; wildcards in it are literal.
            let text = || value.to_string();
            let expr = match op {
                CompareOp::Eq => col.eq(to_sea_value(&name, value)?),
                CompareOp::NotEq => col.ne(to_sea_value(&name, value)?),
                CompareOp::Gt => col.gt(to_sea_value(&name, value)?),
                CompareOp::Ge => col.gte(to_sea_value(&name, value)?),
                CompareOp::Lt => col.lt(to_sea_value(&name, value)?),
                CompareOp::Le => col.lte(to_sea_value(&name, value)?),
                CompareOp::In => col.is_in(to_sea_values(&name, value)?),
                CompareOp::NotIn => col.is_not_in(to_sea_values(&name, value)?),
                CompareOp::Contains => col.like(like(format!("%{}%", like_escape(&text())))),
                CompareOp::StartsWith => col.like(like(format!("{}%", like_escape(&text())))),
                CompareOp::EndsWith => col.like(like(format!("%{}", like_escape(&text())))),
            };
            Ok(cond.add(expr))
        }
    }
}

/// One predicate node as a sea_orm condition.
pub fn node_to_condition<E: EntityTrait>(
    q: &CompiledQuery,
    node: &PredicateNode,
) -> CriteriaResult<Condition> {
    add_node::<E>(Condition::all(), q, node)
}

/// Conjunction of every node of `q`.
pub fn to_condition<E: EntityTrait>(q: &CompiledQuery) -> CriteriaResult<Condition> {
    q.nodes
        .iter()
        .try_fold(Condition::all(), |acc, n| add_node::<E>(acc, q, n))
}

/// Apply a [`CompiledQuery`] to a sea_orm select: joins, filter and order.
/// Paging is left to the caller.
pub trait CompiledQueryExt<E: EntityTrait>: Sized {
    fn apply_compiled(self, q: &CompiledQuery, joins: &JoinMap<E>) -> CriteriaResult<Self>;
}

impl<E: EntityTrait> CompiledQueryExt<E> for Select<E> {
    fn apply_compiled(self, q: &CompiledQuery, joins: &JoinMap<E>) -> CriteriaResult<Self> {
        let mut select = self;
        for alias in q.aliases.iter() {
            let rel = joins
                .get(&alias.relation)
                .ok_or_else(|| CriteriaError::MissingRelation(alias.relation.clone()))?;
            select = select.join_as(JoinType::LeftJoin, rel, Alias::new(alias.alias.as_str()));
        }
        if !q.nodes.is_empty() {
            select = select.filter(to_condition::<E>(q)?);
        }
        for key in &q.order {
            let ord = if key.ascending { Order::Asc } else { Order::Desc };
            select = select.order_by(SimpleExpr::Column(column_ref::<E>(q, &key.field)?), ord);
        }
        tracing::debug!(
            entity = %q.entity,
            joins = q.aliases.len(),
            nodes = q.nodes.len(),
            order = q.order.len(),
            "compiled query applied"
        );
        Ok(select)
    }
}

/// Run `select` filtered by `q` twice: once bounded by its offset/limit and
/// once as a count.
pub async fn find_page<E, C>(
    db: &C,
    select: Select<E>,
    q: &CompiledQuery,
    joins: &JoinMap<E>,
) -> CriteriaResult<Page<E::Model>>
where
    E: EntityTrait,
    E::Model: FromQueryResult + Send + Sync,
    C: ConnectionTrait,
{
    let select = select.apply_compiled(q, joins)?;
    let total = select.clone().count(db).await?;
    let content = if q.offset >= total {
        Vec::new()
    } else {
        select.offset(q.offset).limit(q.limit).all(db).await?
    };
    Ok(Page::new(content, q.offset, q.limit, total))
}
