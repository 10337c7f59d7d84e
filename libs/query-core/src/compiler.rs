//! Condition map → [`CompiledQuery`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{QueryError, Result};
use crate::grammar::{self, ElementaryKey, FieldPath, Operand, SEPARATOR};
use crate::operator::Operator;
use crate::predicate::{AliasTable, CompareOp, CompiledQuery, OrderKey, PredicateNode};
use crate::request::QueryRequest;
use crate::schema::{FieldDescriptor, FieldTypeResolver};
use crate::sort::SortSpec;
use crate::value::Value;

/// What a custom handler can see while interpreting a raw value.
pub struct HandlerContext<'a> {
    resolver: &'a dyn FieldTypeResolver,
    key: &'a str,
}

impl HandlerContext<'_> {
    /// The condition key that selected the handler.
    pub fn key(&self) -> &str {
        self.key
    }

    pub fn field(&self, path: &str) -> Result<FieldDescriptor> {
        self.resolver.resolve(&FieldPath::parse(path)?)
    }

    pub fn coerce(&self, field: &FieldDescriptor, raw: &str) -> Result<Value> {
        self.resolver.coerce(field, raw)
    }
}

/// Interprets the raw value of a condition in place of the grammar.
pub trait ConditionHandler: Send + Sync {
    fn handle(&self, ctx: &HandlerContext<'_>, raw: &str) -> Result<Vec<PredicateNode>>;
}

impl<F> ConditionHandler for F
where
    F: Fn(&HandlerContext<'_>, &str) -> Result<Vec<PredicateNode>> + Send + Sync,
{
    fn handle(&self, ctx: &HandlerContext<'_>, raw: &str) -> Result<Vec<PredicateNode>> {
        self(ctx, raw)
    }
}

/// Compiles query requests; holds the custom handlers.
///
/// A handler registered under `k` is used for a condition whose full key is
/// `k`, or whose path (the key without its operator, dotted) is `k`.
#[derive(Clone, Default)]
pub struct PredicateCompiler {
    handlers: HashMap<String, Arc<dyn ConditionHandler>>,
}

impl std::fmt::Debug for PredicateCompiler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateCompiler")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PredicateCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, key: impl Into<String>, handler: impl ConditionHandler + 'static) -> Self {
        self.handlers.insert(key.into(), Arc::new(handler));
        self
    }

    fn handler_for(&self, key: &str) -> Option<&Arc<dyn ConditionHandler>> {
        if let Some(h) = self.handlers.get(key) {
            return Some(h);
        }
        let (path, _op) = key.rsplit_once(SEPARATOR)?;
        self.handlers.get(&path.replace(SEPARATOR, "."))
    }

    pub fn compile(
        &self,
        request: &QueryRequest,
        resolver: &dyn FieldTypeResolver,
    ) -> Result<CompiledQuery> {
        request.validate()?;
        if request.entity != resolver.entity_name() {
            return Err(QueryError::InvalidRequest(format!(
                "request targets '{}' but the resolver describes '{}'",
                request.entity,
                resolver.entity_name()
            )));
        }

        let mut aliases = AliasTable::default();
        let mut nodes = Vec::with_capacity(request.conditions.len());

        for (key, raw) in &request.conditions {
            if raw.trim().is_empty() {
                tracing::trace!(key = %key, "blank condition value ignored");
                continue;
            }

            let produced = match self.handler_for(key) {
                Some(handler) => {
                    let ctx = HandlerContext { resolver, key };
                    handler.handle(&ctx, raw)?
                }
                None => self.compile_condition(key, raw, resolver)?.into_iter().collect(),
            };

            for node in produced {
                for field in node.fields() {
                    aliases.register(field);
                }
                nodes.push(node);
            }
        }

        let sort = SortSpec::parse(&request.sort)?;
        let mut order = Vec::with_capacity(sort.0.len());
        for key in sort.iter() {
            let field = resolver.resolve(&key.path)?;
            aliases.register(&field);
            order.push(OrderKey {
                field,
                ascending: key.ascending,
            });
        }

        tracing::debug!(
            entity = %request.entity,
            nodes = nodes.len(),
            joins = aliases.len(),
            "compiled query request"
        );

        Ok(CompiledQuery {
            entity: request.entity.clone(),
            nodes,
            aliases,
            sort,
            order,
            offset: request.offset,
            limit: request.limit,
        })
    }

    /// One condition entry. `None` when it contributes no predicate.
    fn compile_condition(
        &self,
        key: &str,
        raw: &str,
        resolver: &dyn FieldTypeResolver,
    ) -> Result<Option<PredicateNode>> {
        let parsed = grammar::parse_condition_key(key)?;
        if !parsed.is_disjunction() {
            return build_node(&parsed.alternatives[0], raw, resolver);
        }

        let mut alternatives = Vec::with_capacity(parsed.alternatives.len());
        for alt in &parsed.alternatives {
            match build_node(alt, raw, resolver) {
                Ok(Some(node)) => alternatives.push(node),
                Ok(None) => {}
                Err(e) if e.is_resolution_failure() => {
                    tracing::warn!(key = %key, alternative = %alt.path, error = %e, "alternative skipped");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(match alternatives.len() {
            0 => None,
            1 => alternatives.pop(),
            _ => Some(PredicateNode::Or(alternatives)),
        })
    }
}

fn build_node(
    key: &ElementaryKey,
    raw: &str,
    resolver: &dyn FieldTypeResolver,
) -> Result<Option<PredicateNode>> {
    let field = resolver.resolve(&key.path)?;

    let single = |op: CompareOp, text: &str| -> Result<Option<PredicateNode>> {
        let value = if matches!(op, CompareOp::Contains | CompareOp::StartsWith | CompareOp::EndsWith) {
            Value::String(text.to_owned())
        } else {
            resolver.coerce(&field, text)?
        };
        Ok(Some(PredicateNode::compare(field.clone(), op, value)))
    };
    let list = |op: CompareOp, items: &[&str]| -> Result<Option<PredicateNode>> {
        let values = items
            .iter()
            .map(|s| resolver.coerce(&field, s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(PredicateNode::compare(field.clone(), op, Value::List(values))))
    };
    let flag = |want: Option<bool>, is_null: bool| -> Result<Option<PredicateNode>> {
        let want = want.ok_or_else(|| QueryError::Coercion {
            entity: field.entity.clone(),
            field: field.path.to_string(),
            declared: "bool".into(),
            raw: raw.to_owned(),
        })?;
        // `isNull=false` is a no-op, not `notNull`
        Ok(want.then(|| PredicateNode::NullCheck {
            field: field.clone(),
            is_null,
        }))
    };

    match (key.op, grammar::split_operand(key.op, raw)) {
        (Operator::Eq, Operand::Single(s)) => single(CompareOp::Eq, s),
        (Operator::NotEq, Operand::Single(s)) => single(CompareOp::NotEq, s),
        (Operator::Like, Operand::Single(s)) => single(CompareOp::Contains, s),
        (Operator::StartWith, Operand::Single(s)) => single(CompareOp::StartsWith, s),
        (Operator::EndWith, Operand::Single(s)) => single(CompareOp::EndsWith, s),
        (Operator::Gt, Operand::Single(s)) => single(CompareOp::Gt, s),
        (Operator::Ge, Operand::Single(s)) => single(CompareOp::Ge, s),
        (Operator::Lt, Operand::Single(s)) => single(CompareOp::Lt, s),
        (Operator::Le, Operand::Single(s)) => single(CompareOp::Le, s),
        (Operator::In, Operand::List(items)) => list(CompareOp::In, &items),
        (Operator::NotIn, Operand::List(items)) => list(CompareOp::NotIn, &items),
        (Operator::IsNull, Operand::Flag(want)) => flag(want, true),
        (Operator::NotNull, Operand::Flag(want)) => flag(want, false),
        // split_operand shapes the operand from the operator
        (op, _) => Err(QueryError::MalformedKey {
            key: format!("{}{SEPARATOR}{op}", key.path),
            reason: "operand shape does not match operator",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityDescriptor, FieldKind, Schema};

    fn schema() -> Schema {
        Schema::new()
            .with(
                EntityDescriptor::new("employee")
                    .field("id", FieldKind::I64)
                    .field("name", FieldKind::String)
                    .field("nickname", FieldKind::String)
                    .field("age", FieldKind::I32)
                    .field("manager_id", FieldKind::I64)
                    .relation("dept", "department"),
            )
            .with(
                EntityDescriptor::new("department")
                    .field("name", FieldKind::String)
                    .field("city", FieldKind::String),
            )
    }

    fn compile(req: &QueryRequest) -> Result<CompiledQuery> {
        let s = schema();
        let r = s.resolver("employee")?;
        PredicateCompiler::new().compile(req, &r)
    }

    #[test]
    fn reference_scenario() {
        let req = QueryRequest::new("employee")
            .filter("name__like", "Smith")
            .filter("dept__city__eq", "Reno")
            .desc("id")
            .with_offset(0, 20);
        let q = compile(&req).unwrap();

        assert_eq!(q.nodes.len(), 2);
        match &q.nodes[0] {
            PredicateNode::Compare { field, op, value } => {
                assert_eq!(field.column, "name");
                assert_eq!(*op, CompareOp::Contains);
                assert_eq!(*value, Value::from("Smith"));
            }
            other => panic!("unexpected {other:?}"),
        }
        match &q.nodes[1] {
            PredicateNode::Compare { field, op, .. } => {
                assert_eq!(field.path.to_string(), "dept.city");
                assert_eq!(*op, CompareOp::Eq);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(q.aliases.len(), 1);
        assert_eq!(q.aliases.get("dept").unwrap().target, "department");
        assert_eq!(q.order.len(), 1);
        assert!(!q.order[0].ascending);
        assert_eq!(q.order[0].field.column, "id");
    }

    #[test]
    fn alias_registered_once_regardless_of_order() {
        let req = QueryRequest::new("employee")
            .filter("dept__city__eq", "Reno")
            .filter("name__eq", "x")
            .filter("dept.name__like", "Ops")
            .filter("dept__city__notEq", "Vegas")
            .asc("dept.name");
        let q = compile(&req).unwrap();
        assert_eq!(q.aliases.len(), 1);
        assert_eq!(q.nodes.len(), 4);
    }

    #[test]
    fn relation_spelling_does_not_split_the_alias() {
        let req = QueryRequest::new("employee")
            .filter("dept__city__eq", "Reno")
            .filter("DEPT__name__eq", "Ops")
            .desc("Dept.city");
        let q = compile(&req).unwrap();
        assert_eq!(q.aliases.len(), 1);
        assert!(q.aliases.get("dept").is_some());
        assert!(q.aliases.get("DEPT").is_none());
        for node in &q.nodes {
            let PredicateNode::Compare { field, .. } = node else {
                panic!("unexpected {node:?}");
            };
            assert_eq!(field.path.first(), "dept");
        }
        assert_eq!(q.order[0].field.path.to_string(), "dept.city");
    }

    #[test]
    fn in_list_coerces_each_element_in_order() {
        let req = QueryRequest::new("employee").filter("age__in", "20,30,40");
        let q = compile(&req).unwrap();
        match &q.nodes[0] {
            PredicateNode::Compare { op, value, .. } => {
                assert_eq!(*op, CompareOp::In);
                assert_eq!(*value, Value::from(vec![20i64, 30, 40]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blank_values_are_ignored() {
        let req = QueryRequest::new("employee")
            .filter("name__eq", "   ")
            .filter("age__gt", "");
        assert!(compile(&req).unwrap().is_unfiltered());
    }

    #[test]
    fn blank_null_checks_are_ignored() {
        let req = QueryRequest::new("employee")
            .filter("manager_id__isNull", "")
            .filter("nickname__notNull", "  ");
        let q = compile(&req).unwrap();
        assert!(q.nodes.is_empty());
        assert!(q.is_unfiltered());
    }

    #[test]
    fn null_checks_only_when_true() {
        let req = QueryRequest::new("employee")
            .filter("manager_id__isNull", "true")
            .filter("nickname__notNull", "false");
        let q = compile(&req).unwrap();
        assert_eq!(q.nodes.len(), 1);
        assert!(matches!(
            q.nodes[0],
            PredicateNode::NullCheck { is_null: true, .. }
        ));
    }

    #[test]
    fn unreadable_null_flag_is_a_coercion_error() {
        let req = QueryRequest::new("employee").filter("manager_id__isNull", "perhaps");
        assert!(matches!(compile(&req), Err(QueryError::Coercion { .. })));
    }

    #[test]
    fn disjunction_drops_unusable_alternatives() {
        // "Smith" is not an i32, so only the name alternative survives
        let req = QueryRequest::new("employee").filter("name__eq|age__eq", "Smith");
        let q = compile(&req).unwrap();
        let plain = compile(&QueryRequest::new("employee").filter("name__eq", "Smith")).unwrap();
        assert_eq!(q.nodes, plain.nodes);
    }

    #[test]
    fn disjunction_with_several_alternatives() {
        let req = QueryRequest::new("employee").filter("name__like|nickname__like|dept__name__like", "ann");
        let q = compile(&req).unwrap();
        match &q.nodes[0] {
            PredicateNode::Or(children) => assert_eq!(children.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(q.aliases.len(), 1);
    }

    #[test]
    fn empty_disjunction_is_dropped() {
        let req = QueryRequest::new("employee").filter("age__eq|id__eq", "abc");
        assert!(compile(&req).unwrap().is_unfiltered());
    }

    #[test]
    fn disjunction_still_rejects_malformed_alternatives() {
        let req = QueryRequest::new("employee").filter("name__eq|age__between", "1");
        assert!(matches!(compile(&req), Err(QueryError::UnknownOperator { .. })));
    }

    #[test]
    fn hard_errors_for_single_keys() {
        let cases = [
            ("a__b__c__eq", "x"),
            ("salary__eq", "1"),
            ("age__eq", "old"),
            ("age__foo", "1"),
        ];
        for (k, v) in cases {
            assert!(compile(&QueryRequest::new("employee").filter(k, v)).is_err(), "{k}");
        }
        assert!(matches!(
            compile(&QueryRequest::new("employee").filter("a__b__c__eq", "x")),
            Err(QueryError::PathTooDeep { .. })
        ));
    }

    #[test]
    fn custom_handler_by_path_bypasses_grammar() {
        let compiler = PredicateCompiler::new().with_handler(
            "dept.city",
            |ctx: &HandlerContext<'_>, raw: &str| -> Result<Vec<PredicateNode>> {
                let field = ctx.field("dept.city")?;
                let cities = raw.split('/').map(Value::from).collect::<Vec<_>>();
                Ok(vec![PredicateNode::compare(field, CompareOp::In, cities)])
            },
        );
        let s = schema();
        let r = s.resolver("employee").unwrap();
        let req = QueryRequest::new("employee").filter("dept__city__whatever", "Reno/Vegas");
        let q = compiler.compile(&req, &r).unwrap();
        assert_eq!(q.aliases.len(), 1);
        match &q.nodes[0] {
            PredicateNode::Compare { value, .. } => {
                assert_eq!(*value, Value::from(vec!["Reno", "Vegas"]))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn custom_handler_by_full_key_may_emit_nothing() {
        let compiler = PredicateCompiler::new().with_handler(
            "special",
            |_: &HandlerContext<'_>, _: &str| -> Result<Vec<PredicateNode>> { Ok(vec![]) },
        );
        let s = schema();
        let r = s.resolver("employee").unwrap();
        let req = QueryRequest::new("employee").filter("special", "anything");
        assert!(compiler.compile(&req, &r).unwrap().is_unfiltered());
    }

    #[test]
    fn request_must_target_resolver_entity() {
        let s = schema();
        let r = s.resolver("department").unwrap();
        let req = QueryRequest::new("employee");
        assert!(matches!(
            PredicateCompiler::new().compile(&req, &r),
            Err(QueryError::InvalidRequest(_))
        ));
    }

    #[test]
    fn unknown_sort_field_is_reported() {
        let req = QueryRequest::new("employee").desc("salary");
        assert!(matches!(compile(&req), Err(QueryError::FieldNotFound { .. })));
    }
}
