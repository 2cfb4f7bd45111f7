//! Core traits and types shared by the guard and its record store.

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single stored record of some resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  /// Unique identifier within its type
  pub id: String,
  /// The full record payload, including the id field
  pub data: Value,
}

impl Record {
  pub fn new(id: impl Into<String>, data: Value) -> Self {
    Self {
      id: id.into(),
      data,
    }
  }

  /// Build a record from a JSON object carrying an `id` field.
  ///
  /// String and numeric ids are accepted; numbers are stored in their
  /// decimal form.
  pub fn from_value(value: Value) -> Result<Self> {
    let id = match value.get("id") {
      Some(Value::String(s)) if !s.is_empty() => s.clone(),
      Some(Value::Number(n)) => n.to_string(),
      Some(other) => return Err(eyre!("Record id must be a string or number, got {}", other)),
      None => return Err(eyre!("Record is missing an 'id' field: {}", value)),
    };
    Ok(Self { id, data: value })
  }
}

/// All records of one type, in store order.
pub type Collection = Vec<Record>;

/// Canonical description of a resource type as the store knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
  /// Canonical type name; aliases resolve to the same name
  pub name: String,
}

impl TypeDescriptor {
  pub fn new(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }
}

/// The shape of a request against a resource type.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
  /// Every record of the type
  All,
  /// A single record by id
  Id(String),
  /// Records matching the given fields
  Filter(Map<String, Value>),
}

/// The record store the guard decorates.
///
/// Implementations fetch, hold and evict typed records. `fetch_all` returns
/// a `'static` future so the guard can share it between callers.
pub trait ResourceStore: Send + Sync + 'static {
  /// Map a caller-supplied type key to the store's canonical type.
  fn resolve_type(&self, type_key: &str) -> Result<TypeDescriptor>;

  /// Fetch every record of a type from the remote source.
  fn fetch_all(&self, type_key: &str) -> BoxFuture<'static, Result<Collection>>;

  /// Read the locally held records of a type without touching the network.
  fn peek_all(&self, type_key: &str) -> Result<Collection>;

  /// Evict every locally held record of a type.
  fn unload_all(&self, type_key: &str) -> Result<()>;
}
