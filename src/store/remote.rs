//! Remote sources that records are fetched from.

use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::cache::{Collection, Record};

/// Anything that can fetch the full collection of a resource type.
pub trait Source: Send + Sync + 'static {
  fn fetch(&self, type_name: &str) -> BoxFuture<'static, Result<Collection>>;
}

/// HTTP source that reads `GET {base_url}/{type}`.
#[derive(Clone)]
pub struct HttpSource {
  client: reqwest::Client,
  base_url: Url,
  token: Option<String>,
}

impl HttpSource {
  pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self> {
    let base_url =
      Url::parse(base_url).map_err(|e| eyre!("Invalid remote URL '{}': {}", base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("Remote URL '{}' cannot be used as a base", base_url));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      base_url,
      token,
    })
  }

  /// URL of the collection endpoint for a type.
  pub fn collection_url(&self, type_name: &str) -> Result<Url> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| eyre!("Remote URL '{}' cannot be used as a base", self.base_url))?
      .pop_if_empty()
      .push(type_name);
    Ok(url)
  }
}

impl Source for HttpSource {
  fn fetch(&self, type_name: &str) -> BoxFuture<'static, Result<Collection>> {
    let client = self.client.clone();
    let token = self.token.clone();
    let type_name = type_name.to_string();
    let url = self.collection_url(&type_name);

    async move {
      let url = url?;
      let mut request = client.get(url.clone()).header("Accept", "application/json");
      if let Some(token) = token {
        request = request.bearer_auth(token);
      }

      let response = request
        .send()
        .await
        .map_err(|e| eyre!("Request to {} failed: {}", url, e))?;

      let status = response.status();
      if !status.is_success() {
        return Err(eyre!("{} returned {}", url, status));
      }

      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read response from {}: {}", url, e))?;

      parse_collection(&type_name, &body)
    }
    .boxed()
  }
}

/// Parse a collection payload.
///
/// Accepts a bare JSON array of records, or an object holding that array
/// under the type name or under `data`.
pub fn parse_collection(type_name: &str, body: &[u8]) -> Result<Collection> {
  let payload: Value = serde_json::from_slice(body)
    .map_err(|e| eyre!("Failed to parse {} payload: {}", type_name, e))?;

  let items = match payload {
    Value::Array(items) => items,
    Value::Object(mut envelope) => match envelope
      .remove(type_name)
      .or_else(|| envelope.remove("data"))
    {
      Some(Value::Array(items)) => items,
      _ => {
        return Err(eyre!(
          "{} payload has no '{}' or 'data' array",
          type_name,
          type_name
        ))
      }
    },
    other => return Err(eyre!("Unexpected {} payload: {}", type_name, other)),
  };

  items.into_iter().map(Record::from_value).collect()
}
