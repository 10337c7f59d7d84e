//! Transport-friendly query predicates.
//!
//! A [`QueryRequest`] carries filtering as a flat map of string-encoded
//! condition keys (`name__like`, `dept__city__eq`, `age__in`, ...), a sort
//! string and offset/limit paging. This crate parses and type-checks such a
//! request against an entity [`Schema`] and produces a backend-neutral
//! [`CompiledQuery`]; lowering it to SQL or ORM criteria lives elsewhere.
//!
//! ```
//! use query_core::{EntityDescriptor, FieldKind, PredicateCompiler, QueryRequest, Schema};
//!
//! let schema = Schema::new()
//!     .with(EntityDescriptor::new("employee")
//!         .field("id", FieldKind::I64)
//!         .field("name", FieldKind::String)
//!         .relation("dept", "department"))
//!     .with(EntityDescriptor::new("department").field("city", FieldKind::String));
//!
//! let req = QueryRequest::new("employee")
//!     .filter("name__like", "Smith")
//!     .filter("dept__city__eq", "Reno")
//!     .desc("id");
//!
//! let resolver = schema.resolver("employee").unwrap();
//! let compiled = PredicateCompiler::new().compile(&req, &resolver).unwrap();
//! assert_eq!(compiled.aliases.len(), 1);
//! ```

pub mod compiler;
pub mod datetime;
pub mod error;
pub mod grammar;
pub mod operator;
pub mod page;
pub mod predicate;
pub mod request;
pub mod schema;
pub mod signature;
pub mod sort;
pub mod value;

pub use compiler::{ConditionHandler, HandlerContext, PredicateCompiler};
pub use error::{QueryError, Result};
pub use grammar::{parse_condition_key, ConditionKey, ElementaryKey, FieldPath};
pub use operator::Operator;
pub use page::Page;
pub use predicate::{AliasTable, CompareOp, CompiledQuery, JoinAlias, OrderKey, PredicateNode};
pub use request::{QueryRequest, DEFAULT_LIMIT};
pub use schema::{
    EntityDescriptor, EnumDef, EnumStorage, FieldDef, FieldDescriptor, FieldKind,
    FieldTypeResolver, Schema, SchemaResolver,
};
pub use signature::{SignatureGuard, DEFAULT_SALT};
pub use sort::{SortKey, SortSpec};
pub use value::Value;
