//! In-crate fakes shared by unit tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use url::Url;

use crate::fetch::{FetchError, HttpFetcher};

/// Fetcher answering from a URL → response table, counting calls per URL
///
/// Each URL holds a queue of responses; the last one repeats once the queue
/// is down to a single element.
#[derive(Debug, Default)]
pub(crate) struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Vec<Result<serde_json::Value, FetchError>>>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, url: &str, response: Result<serde_json::Value, FetchError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(response);
    }

    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpFetcher for ScriptedFetcher {
    async fn get_json(&self, url: &Url) -> Result<serde_json::Value, FetchError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;

        let mut responses = self.responses.lock().unwrap();
        match responses.get_mut(url.as_str()) {
            Some(queue) if queue.len() > 1 => queue.remove(0),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => Err(FetchError::Status(404)),
        }
    }
}
