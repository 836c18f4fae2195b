//! Shared fixtures for the engine tests: canned ports and a small config.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::{BlogConfig, Config, UserConfig};
use crate::error::{Error, Result};

use super::delivery::{Job, JobToken, Scheduler};
use super::inbox::{Notification, Notifier};
use super::mailman::{Fetcher, RemoteObject};
use super::repo::uuidgen;

pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.federation.base_url = "https://blog.example".to_owned();
    config.federation.dual_mode = true;
    config.users = vec![
        UserConfig {
            id: 5,
            username: "alice".to_owned(),
            name: "Alice".to_owned(),
            summary: None,
            icon: None,
        },
        UserConfig {
            id: 1,
            username: "bob".to_owned(),
            name: "Bob".to_owned(),
            summary: None,
            icon: None,
        },
        UserConfig {
            id: 2,
            username: "carol".to_owned(),
            name: "Carol".to_owned(),
            summary: None,
            icon: None,
        },
    ];
    config.blog = Some(BlogConfig {
        username: "blog".to_owned(),
        name: "Example Blog".to_owned(),
        summary: None,
        icon: None,
    });
    config
}

pub(crate) fn remote_actor_payload(iri: &str) -> Value {
    let username = iri.rsplit('/').next().unwrap_or("someone");
    json!({
        "id": iri,
        "type": "Person",
        "preferredUsername": username,
        "inbox": format!("{iri}/inbox"),
    })
}

enum StubResponse {
    Found(Value),
    Gone,
    Fail,
}

/// Canned [`Fetcher`]: responses keyed by IRI, unknown IRIs fail.
#[derive(Clone, Default)]
pub(crate) struct StubFetcher {
    responses: Arc<Mutex<HashMap<String, StubResponse>>>,
    calls: Arc<AtomicUsize>,
}

impl StubFetcher {
    pub(crate) fn new() -> StubFetcher {
        StubFetcher::default()
    }

    pub(crate) fn insert(&self, iri: &str, value: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(iri.to_owned(), StubResponse::Found(value));
    }

    pub(crate) fn gone(&self, iri: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(iri.to_owned(), StubResponse::Gone);
    }

    pub(crate) fn fail(&self, iri: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(iri.to_owned(), StubResponse::Fail);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetcher for StubFetcher {
    async fn get_remote_object(&self, iri: &str) -> Result<RemoteObject> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().get(iri) {
            Some(StubResponse::Found(value)) => Ok(RemoteObject::Found(value.clone())),
            Some(StubResponse::Gone) => Ok(RemoteObject::Gone),
            Some(StubResponse::Fail) => Err(Error::remote_fetch(iri, "stubbed failure")),
            None => Err(Error::remote_fetch(iri, "no stub response")),
        }
    }
}

/// Records schedule/cancel calls without ever firing a job.
#[derive(Clone, Default)]
pub(crate) struct RecordingScheduler {
    scheduled: Arc<Mutex<Vec<(JobToken, Job, Duration)>>>,
    cancelled: Arc<Mutex<Vec<JobToken>>>,
}

impl RecordingScheduler {
    pub(crate) fn scheduled(&self) -> Vec<(Job, Duration)> {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .map(|(_, job, delay)| (job.clone(), *delay))
            .collect()
    }

    pub(crate) fn cancelled(&self) -> usize {
        self.cancelled.lock().unwrap().len()
    }
}

impl Scheduler for RecordingScheduler {
    fn schedule(&self, job: Job, delay: Duration) -> JobToken {
        let token = JobToken(uuidgen());
        self.scheduled.lock().unwrap().push((token, job, delay));
        token
    }

    fn cancel(&self, token: &JobToken) {
        self.cancelled.lock().unwrap().push(*token);
    }
}

#[derive(Clone, Default)]
pub(crate) struct RecordingNotifier {
    events: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub(crate) fn events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: Notification) {
        self.events.lock().unwrap().push(event);
    }
}
