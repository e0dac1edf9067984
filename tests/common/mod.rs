#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use page_monitor::{
    monitor::{Clock, FetchError, PageFetcher},
    notify::Notifier,
    settings::Target,
};

/// Serves queued responses per URL and repeats the last one once drained.
#[derive(Default)]
pub struct ScriptedFetcher {
    pages: Mutex<HashMap<String, VecDeque<Result<String, FetchError>>>>,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn serve(&self, url: &str, response: Result<&str, FetchError>) {
        self.pages
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response.map(str::to_string));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        let mut pages = self.pages.lock().unwrap();
        let queue = pages
            .get_mut(url)
            .ok_or_else(|| FetchError::Network(format!("no script for {url}")))?;
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, target: &Target, content: &str) -> Result<()> {
        if self.fail {
            return Err(anyhow!("SMTP unavailable"));
        }
        self.sent
            .lock()
            .unwrap()
            .push((target.url.clone(), content.to_string()));
        Ok(())
    }
}

/// Starts at a fixed instant and moves forward one minute per reading.
pub struct StepClock {
    next: Mutex<DateTime<Utc>>,
}

impl StepClock {
    pub fn new() -> Self {
        Self {
            next: Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()),
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap();
        let now = *next;
        *next = now + Duration::minutes(1);
        now
    }
}
