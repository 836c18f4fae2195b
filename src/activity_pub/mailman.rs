//! Outgoing HTTP: remote object fetching and inbox delivery.
//!
//! Signing the requests is the transport collaborator's concern, not part
//! of this engine.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{self, HeaderValue};
use reqwest::{Client, StatusCode};
use serde_json::Value;

use crate::error::{Error, Result};

static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const APPLICATION_LD_JSON: HeaderValue = HeaderValue::from_static(
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"",
);

/// Result of resolving a remote IRI. `Gone` covers 404/410, the states that
/// count as a verified tombstone.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteObject {
    Found(Value),
    Gone,
}

impl RemoteObject {
    /// Whether this fetch result proves deletion: absent, or an explicit
    /// Tombstone document. A live object or a transport error proves
    /// nothing.
    pub fn is_tombstone(&self) -> bool {
        match self {
            RemoteObject::Gone => true,
            RemoteObject::Found(value) => {
                value.get("type").and_then(Value::as_str) == Some("Tombstone")
            }
        }
    }
}

/// HTTP fetch port. Production uses [`Mailman`]; tests use a canned stub.
pub trait Fetcher: Clone + Send + Sync + 'static {
    fn get_remote_object(&self, iri: &str) -> impl Future<Output = Result<RemoteObject>> + Send;
}

#[derive(Clone)]
pub struct Mailman {
    client: Client,
}

impl Default for Mailman {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailman {
    pub fn new() -> Mailman {
        Mailman {
            client: Client::builder()
                .http1_only()
                .user_agent(APP_USER_AGENT)
                .gzip(true)
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
        }
    }

    pub async fn fetch(&self, iri: &str) -> Result<RemoteObject> {
        let response = self
            .client
            .get(iri)
            .header(header::ACCEPT, APPLICATION_LD_JSON)
            .send()
            .await
            .map_err(|e| Error::remote_fetch(iri, e))?;
        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::GONE
        ) {
            return Ok(RemoteObject::Gone);
        }
        let response = response
            .error_for_status()
            .map_err(|e| Error::remote_fetch(iri, e))?;
        let value = response
            .json()
            .await
            .map_err(|e| Error::remote_fetch(iri, e))?;
        Ok(RemoteObject::Found(value))
    }

    pub async fn post(&self, inbox: &str, payload: &Value) -> Result<()> {
        let response = self
            .client
            .post(inbox)
            .header(header::CONTENT_TYPE, APPLICATION_LD_JSON)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::remote_fetch(inbox, e))?;
        if let Err(error) = response.error_for_status_ref() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::remote_fetch(inbox, format!("{error}: {body}")));
        }
        Ok(())
    }
}

impl Fetcher for Mailman {
    async fn get_remote_object(&self, iri: &str) -> Result<RemoteObject> {
        self.fetch(iri).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::RemoteObject;

    #[test]
    fn tombstone_detection() {
        assert!(RemoteObject::Gone.is_tombstone());
        assert!(
            RemoteObject::Found(json!({"type": "Tombstone", "formerType": "Person"}))
                .is_tombstone()
        );
        assert!(!RemoteObject::Found(json!({"type": "Person"})).is_tombstone());
    }
}
