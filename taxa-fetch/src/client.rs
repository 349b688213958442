//! Artdatabanken taxon service client (blocking, ureq).

use std::time::Duration;

use serde_json::{json, Value};

use taxa_core::config::SUBSCRIPTION_KEY_ENV;
use taxa_core::{Settings, TaxonId};

use crate::error::{unexpected, FetchError};
use crate::source::{extract_child_ids, pick_root, TaxonSource};

const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Child-id listings and bulk POSTs are slow; they never get less than this.
const MIN_BULK_TIMEOUT: Duration = Duration::from_secs(60);

pub struct ArtdatabankenClient {
    agent: ureq::Agent,
    base_url: String,
    key: String,
    timeout: Duration,
}

impl ArtdatabankenClient {
    pub fn new(base_url: impl Into<String>, key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: key.into(),
            timeout,
        }
    }

    /// Client for `settings`, with the key taken from the environment.
    pub fn from_settings(settings: &Settings) -> Result<Self, FetchError> {
        let key = std::env::var(SUBSCRIPTION_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(FetchError::MissingKey(SUBSCRIPTION_KEY_ENV))?;
        Ok(Self::new(
            settings.api_base_url.clone(),
            key,
            settings.http_timeout(),
        ))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let mut request = self
            .agent
            .get(url)
            .set(KEY_HEADER, &self.key)
            .timeout(timeout);
        for (name, value) in query {
            request = request.query(name, value);
        }
        tracing::debug!(url, "GET");
        let response = request.call().map_err(|err| http_error(url, err))?;
        response
            .into_json::<Value>()
            .map_err(|e| unexpected(url, format!("body is not JSON: {e}")))
    }
}

impl TaxonSource for ArtdatabankenClient {
    fn find_root(&self, name: &str, culture: &str) -> Result<TaxonId, FetchError> {
        let url = self.url("/taxa/names");
        let search = self.get_json(
            &url,
            &[
                ("searchString", name),
                ("searchFields", "Both"),
                ("isRecommended", "NotSet"),
                ("isOkForObservationSystems", "NotSet"),
                ("culture", culture),
                ("page", "1"),
                ("pageSize", "100"),
            ],
            self.timeout,
        )?;
        pick_root(&search, name).ok_or_else(|| FetchError::RootNotFound(name.to_string()))
    }

    fn child_ids(&self, root: TaxonId) -> Result<Vec<TaxonId>, FetchError> {
        let url = self.url(&format!("/taxa/{}/childids", root.0));
        let payload = self.get_json(
            &url,
            &[("useMainChildren", "false")],
            self.timeout.max(MIN_BULK_TIMEOUT),
        )?;
        extract_child_ids(&payload)
            .ok_or_else(|| unexpected(&url, "no child id list in response"))
    }

    fn fetch_taxa(&self, ids: &[TaxonId], culture: &str) -> Result<Vec<Value>, FetchError> {
        let url = self.url("/taxa");
        let body = json!({ "taxonIds": ids.iter().map(|id| id.0).collect::<Vec<_>>() });
        tracing::debug!(url = %url, count = ids.len(), "POST");
        let response = self
            .agent
            .post(&url)
            .set(KEY_HEADER, &self.key)
            .set("Content-Type", "application/json-patch+json")
            .query("culture", culture)
            .timeout(self.timeout.max(MIN_BULK_TIMEOUT))
            .send_json(body)
            .map_err(|err| http_error(&url, err))?;
        match response.into_json::<Value>() {
            Ok(Value::Array(items)) => Ok(items),
            Ok(other) => Err(unexpected(
                &url,
                format!("expected an array, got {}", json_kind(&other)),
            )),
            Err(e) => Err(unexpected(&url, format!("body is not JSON: {e}"))),
        }
    }
}

fn http_error(url: &str, err: ureq::Error) -> FetchError {
    match err {
        ureq::Error::Status(404, _) => FetchError::NotFound {
            url: url.to_string(),
        },
        other => FetchError::Http {
            url: url.to_string(),
            source: Box::new(other),
        },
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_ignored() {
        let client = ArtdatabankenClient::new("https://example.test/v1/", "k", Duration::from_secs(5));
        assert_eq!(client.url("/taxa"), "https://example.test/v1/taxa");
    }

    #[test]
    fn json_kinds_are_readable() {
        assert_eq!(json_kind(&json!({})), "an object");
        assert_eq!(json_kind(&json!(null)), "null");
    }
}
