//! Entity descriptors and the [`FieldTypeResolver`] capability.
//!
//! A [`Schema`] is a registry of entities. Each entity maps API field names
//! to either a scalar column with a declared [`FieldKind`] or a relation to
//! another entity. Paths are resolved one segment at a time, following
//! relations, and raw condition strings are coerced to the leaf field's kind.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::datetime;
use crate::error::{QueryError, Result};
use crate::grammar::FieldPath;
use crate::value::Value;

/// How an enum column is stored.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumStorage {
    /// Zero-based position of the constant.
    #[default]
    Ordinal,
    /// The constant's name.
    Name,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumDef {
    pub variants: Vec<String>,
    #[serde(default)]
    pub storage: EnumStorage,
}

/// Declared type of a scalar field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Bool,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Decimal,
    Char,
    Uuid,
    Date,
    Time,
    DateTime,
    DateTimeUtc,
    Enum(EnumDef),
    /// Anything else: the raw value is decoded as a small JSON document.
    Json,
}

impl FieldKind {
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldKind::String | FieldKind::Char)
            || matches!(self, FieldKind::Enum(def) if def.storage == EnumStorage::Name)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKind::String => "string",
            FieldKind::Bool => "bool",
            FieldKind::I8 => "i8",
            FieldKind::I16 => "i16",
            FieldKind::I32 => "i32",
            FieldKind::I64 => "i64",
            FieldKind::F32 => "f32",
            FieldKind::F64 => "f64",
            FieldKind::Decimal => "decimal",
            FieldKind::Char => "char",
            FieldKind::Uuid => "uuid",
            FieldKind::Date => "date",
            FieldKind::Time => "time",
            FieldKind::DateTime => "datetime",
            FieldKind::DateTimeUtc => "datetime_utc",
            FieldKind::Enum(_) => "enum",
            FieldKind::Json => "json",
        };
        f.write_str(s)
    }
}

/// One entry of an entity: a scalar column or a relation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldDef {
    Relation {
        relation: String,
    },
    Scalar {
        /// Column name; defaults to the field name.
        #[serde(default)]
        column: Option<String>,
        kind: FieldKind,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    #[serde(skip)]
    name: String,
    #[serde(default)]
    table: Option<String>,
    #[serde(default)]
    fields: IndexMap<String, FieldDef>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            fields: IndexMap::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Add a scalar field whose column has the same name.
    pub fn field(self, api_name: impl Into<String>, kind: FieldKind) -> Self {
        let api_name = api_name.into();
        let column = api_name.clone();
        self.column(api_name, column, kind)
    }

    pub fn column(
        mut self,
        api_name: impl Into<String>,
        column: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        self.fields.insert(
            api_name.into(),
            FieldDef::Scalar {
                column: Some(column.into()),
                kind,
            },
        );
        self
    }

    pub fn relation(mut self, api_name: impl Into<String>, target: impl Into<String>) -> Self {
        self.fields.insert(
            api_name.into(),
            FieldDef::Relation {
                relation: target.into(),
            },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name; defaults to the entity name.
    pub fn table(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// Exact match first, then ASCII case-insensitive.
    pub fn get(&self, api_name: &str) -> Option<(&str, &FieldDef)> {
        self.fields
            .get_key_value(api_name)
            .or_else(|| {
                self.fields
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(api_name))
            })
            .map(|(k, v)| (k.as_str(), v))
    }
}

/// A fully resolved leaf field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Entity owning the leaf column.
    pub entity: String,
    pub path: FieldPath,
    pub column: String,
    pub kind: FieldKind,
}

/// Path resolution and value coercion against one target entity.
pub trait FieldTypeResolver {
    fn entity_name(&self) -> &str;

    fn resolve(&self, path: &FieldPath) -> Result<FieldDescriptor>;

    fn coerce(&self, field: &FieldDescriptor, raw: &str) -> Result<Value> {
        coerce(field, raw)
    }
}

#[derive(Deserialize)]
struct SchemaSpec {
    #[serde(default)]
    entities: IndexMap<String, EntityDescriptor>,
}

impl From<SchemaSpec> for Schema {
    fn from(spec: SchemaSpec) -> Self {
        let mut schema = Schema::default();
        for (name, mut entity) in spec.entities {
            entity.name = name;
            schema.register(entity);
        }
        schema
    }
}

/// Registry of entity descriptors, addressed by entity name.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(from = "SchemaSpec")]
pub struct Schema {
    entities: IndexMap<String, EntityDescriptor>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, entity: EntityDescriptor) -> Self {
        self.register(entity);
        self
    }

    pub fn register(&mut self, entity: EntityDescriptor) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entities.get(name)
    }

    /// A resolver rooted at `entity`.
    pub fn resolver(&self, entity: &str) -> Result<SchemaResolver<'_>> {
        let root = self
            .entity(entity)
            .ok_or_else(|| QueryError::InvalidRequest(format!("unknown entity '{entity}'")))?;
        Ok(SchemaResolver { schema: self, root })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SchemaResolver<'a> {
    schema: &'a Schema,
    root: &'a EntityDescriptor,
}

impl SchemaResolver<'_> {
    pub fn root(&self) -> &EntityDescriptor {
        self.root
    }
}

fn not_found(entity: &str, field: &str) -> QueryError {
    QueryError::FieldNotFound {
        entity: entity.to_owned(),
        field: field.to_owned(),
    }
}

impl FieldTypeResolver for SchemaResolver<'_> {
    fn entity_name(&self) -> &str {
        self.root.name()
    }

    fn resolve(&self, path: &FieldPath) -> Result<FieldDescriptor> {
        let segments = path.segments();
        let mut owner = self.root;
        let (mut key, mut def) = owner
            .get(&segments[0])
            .ok_or_else(|| not_found(owner.name(), &segments[0]))?;
        let mut canonical = vec![key];

        for seg in &segments[1..] {
            // Only relations can be traversed.
            let FieldDef::Relation { relation } = def else {
                return Err(not_found(owner.name(), &path.to_string()));
            };
            owner = self
                .schema
                .entity(relation)
                .ok_or_else(|| not_found(owner.name(), &segments[0]))?;
            (key, def) = owner.get(seg).ok_or_else(|| not_found(owner.name(), seg))?;
            canonical.push(key);
        }

        match def {
            FieldDef::Scalar { column, kind } => Ok(FieldDescriptor {
                entity: owner.name().to_owned(),
                // Spelled as declared, so `DEPT.city` and `dept.city` are one path.
                path: FieldPath::from_parts(&path.to_string(), canonical)?,
                column: column.clone().unwrap_or_else(|| key.to_owned()),
                kind: kind.clone(),
            }),
            // A relation is not a comparable value.
            FieldDef::Relation { .. } => Err(not_found(owner.name(), path.leaf())),
        }
    }
}

/* ---------- coercion ---------- */

/// Coerce a raw string to the declared kind of `field`.
pub fn coerce(field: &FieldDescriptor, raw: &str) -> Result<Value> {
    let fail = || QueryError::Coercion {
        entity: field.entity.clone(),
        field: field.path.to_string(),
        declared: field.kind.to_string(),
        raw: raw.to_owned(),
    };

    Ok(match &field.kind {
        FieldKind::String => Value::String(raw.to_owned()),
        FieldKind::Bool => Value::Bool(parse_bool(raw).ok_or_else(fail)?),
        FieldKind::I8 => Value::Int(raw.parse::<i8>().map_err(|_| fail())?.into()),
        FieldKind::I16 => Value::Int(raw.parse::<i16>().map_err(|_| fail())?.into()),
        FieldKind::I32 => Value::Int(raw.parse::<i32>().map_err(|_| fail())?.into()),
        FieldKind::I64 => Value::Int(raw.parse::<i64>().map_err(|_| fail())?),
        FieldKind::F32 => Value::Float(raw.parse::<f32>().map_err(|_| fail())?.into()),
        FieldKind::F64 => Value::Float(raw.parse::<f64>().map_err(|_| fail())?),
        FieldKind::Decimal => Value::Decimal(BigDecimal::from_str(raw).map_err(|_| fail())?),
        FieldKind::Char => {
            let mut chars = raw.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Value::Char(c),
                _ => return Err(fail()),
            }
        }
        FieldKind::Uuid => Value::Uuid(Uuid::parse_str(raw).map_err(|_| fail())?),
        FieldKind::Date => Value::Date(datetime::parse_date(raw).ok_or_else(fail)?),
        FieldKind::Time => Value::Time(datetime::parse_time(raw).ok_or_else(fail)?),
        FieldKind::DateTime => Value::DateTime(datetime::parse_datetime(raw).ok_or_else(fail)?),
        FieldKind::DateTimeUtc => {
            Value::DateTimeUtc(datetime::parse_datetime_utc(raw).ok_or_else(fail)?)
        }
        FieldKind::Enum(def) => coerce_enum(def, raw).ok_or_else(fail)?,
        FieldKind::Json => Value::Json(serde_json::from_str(raw).map_err(|_| fail())?),
    })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// A numeric value selects the N-th constant; a constant name is accepted too.
fn coerce_enum(def: &EnumDef, raw: &str) -> Option<Value> {
    let ordinal = match raw.parse::<usize>() {
        Ok(n) if n < def.variants.len() => n,
        Ok(_) => return None,
        Err(_) => def
            .variants
            .iter()
            .position(|v| v == raw)
            .or_else(|| def.variants.iter().position(|v| v.eq_ignore_ascii_case(raw)))?,
    };
    Some(match def.storage {
        EnumStorage::Ordinal => Value::Int(ordinal as i64),
        EnumStorage::Name => Value::String(def.variants[ordinal].clone()),
    })
}
