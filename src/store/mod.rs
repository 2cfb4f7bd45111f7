//! The concrete record store: a remote [`Source`] feeding local [`RecordStorage`].

mod remote;
mod storage;

pub use remote::{parse_collection, HttpSource, Source};
pub use storage::{MemoryStorage, RecordStorage, SqliteStorage};

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::cache::{Collection, ResourceStore, TypeDescriptor};

/// Record store that fetches from a remote source and holds records locally.
pub struct RecordStore<R: RecordStorage, S: Source> {
  storage: Arc<R>,
  source: Arc<S>,
  /// alias -> canonical type name, both lowercase
  aliases: HashMap<String, String>,
}

impl<R: RecordStorage, S: Source> RecordStore<R, S> {
  pub fn new(storage: R, source: S) -> Self {
    Self {
      storage: Arc::new(storage),
      source: Arc::new(source),
      aliases: HashMap::new(),
    }
  }

  /// Resolve `alias` to the canonical type `name`.
  pub fn with_alias(mut self, alias: &str, name: &str) -> Self {
    self.aliases.insert(normalize(alias), normalize(name));
    self
  }

  /// Register every alias in `aliases`.
  pub fn with_aliases<'a>(mut self, aliases: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
    for (alias, name) in aliases {
      self = self.with_alias(alias, name);
    }
    self
  }
}

impl<R: RecordStorage, S: Source> ResourceStore for RecordStore<R, S> {
  fn resolve_type(&self, type_key: &str) -> Result<TypeDescriptor> {
    let key = normalize(type_key);
    if key.is_empty() {
      return Err(eyre!("Resource type key is empty"));
    }
    if key.contains(|c: char| matches!(c, '/' | '?' | '#')) {
      return Err(eyre!("Resource type key '{}' contains reserved characters", type_key));
    }

    let name = self.aliases.get(&key).cloned().unwrap_or(key);
    Ok(TypeDescriptor::new(name))
  }

  fn fetch_all(&self, type_key: &str) -> BoxFuture<'static, Result<Collection>> {
    let descriptor = match self.resolve_type(type_key) {
      Ok(descriptor) => descriptor,
      Err(e) => return futures::future::ready(Err(e)).boxed(),
    };
    let storage = Arc::clone(&self.storage);
    let request = self.source.fetch(&descriptor.name);

    async move {
      let records = request.await?;
      debug!(type_name = %descriptor.name, count = records.len(), "fetched records");
      storage.merge(&descriptor.name, &records)?;
      storage.peek(&descriptor.name)
    }
    .boxed()
  }

  fn peek_all(&self, type_key: &str) -> Result<Collection> {
    let descriptor = self.resolve_type(type_key)?;
    self.storage.peek(&descriptor.name)
  }

  fn unload_all(&self, type_key: &str) -> Result<()> {
    let descriptor = self.resolve_type(type_key)?;
    debug!(type_name = %descriptor.name, "unloading records");
    self.storage.unload(&descriptor.name)
  }
}

fn normalize(type_key: &str) -> String {
  type_key.trim().to_lowercase()
}
