//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use devserver::app::options::ClientOptions;
use devserver::http::markup::strip_markup;
use devserver::http::{RpcCall, RpcTransport};
use devserver::net::StaticResolver;
use devserver::telemetry::MemoryMetrics;
use devserver::{Context, DevServerError};

pub const HEALTHY_LOAD: &str = r#"{"free_disk": 120.5, "apache_client_count": 4, "cpu_percent": 12.0, "network_total_bytes_per_second": 1024.0, "disk_total_bytes_per_second": 2048.0}"#;

/// One scripted devserver answer
#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 with this body
    Text(String),
    /// Non-2xx with this (HTML) body
    Http(String),
    /// Transport timeout
    Timeout,
    /// Connection refused
    Refused,
}

impl Reply {
    pub fn text(body: impl Into<String>) -> Self {
        Reply::Text(body.into())
    }
}

/// Transport answering from per-method reply queues.
///
/// Replies scripted for `host/method` take precedence over replies for
/// `method`. An empty queue falls back to the default for the key.
#[derive(Default)]
pub struct ScriptedTransport {
    queues: Mutex<HashMap<String, VecDeque<Reply>>>,
    defaults: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<RpcCall>>,
}

impl ScriptedTransport {
    /// Every devserver reports a healthy load
    pub fn new() -> Self {
        let transport = Self::default();
        transport.default_reply("check_health", Reply::text(HEALTHY_LOAD));
        transport
    }

    /// Queue replies for `key` (`method` or `host/method`)
    pub fn script(&self, key: &str, replies: impl IntoIterator<Item = Reply>) {
        self.queues
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .extend(replies);
    }

    /// Reply for `key` once its queue is drained
    pub fn default_reply(&self, key: &str, reply: Reply) {
        self.defaults.lock().unwrap().insert(key.to_string(), reply);
    }

    /// Calls made so far, oldest first
    pub fn calls(&self) -> Vec<RpcCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls of one method
    pub fn calls_to(&self, method: &str) -> Vec<RpcCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method() == method)
            .collect()
    }

    fn next_reply(&self, call: &RpcCall) -> Option<Reply> {
        let keys = [format!("{}/{}", call.hostname(), call.method()), call.method().to_string()];
        let mut queues = self.queues.lock().unwrap();
        for key in &keys {
            if let Some(reply) = queues.get_mut(key).and_then(|q| q.pop_front()) {
                return Some(reply);
            }
        }
        let defaults = self.defaults.lock().unwrap();
        keys.iter().find_map(|key| defaults.get(key).cloned())
    }

    fn answer(&self, call: &RpcCall) -> Result<String, DevServerError> {
        self.calls.lock().unwrap().push(call.clone());
        match self.next_reply(call) {
            Some(Reply::Text(body)) => Ok(body),
            Some(Reply::Http(body)) => Err(DevServerError::Devserver(strip_markup(&body))),
            Some(Reply::Timeout) => Err(DevServerError::Timeout {
                method: call.method().to_string(),
                host: call.hostname(),
            }),
            Some(Reply::Refused) => Err(DevServerError::Connection("Connection refused".into())),
            None => Err(DevServerError::Devserver(format!(
                "no scripted reply for {}",
                call
            ))),
        }
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    async fn get(&self, call: &RpcCall, _timeout: Option<Duration>) -> Result<String, DevServerError> {
        self.answer(call)
    }

    async fn post_file(
        &self,
        call: &RpcCall,
        _field: &str,
        _path: &Path,
    ) -> Result<String, DevServerError> {
        self.answer(call)
    }
}

/// A test client and the fakes behind it
pub struct Harness {
    pub ctx: Context,
    pub transport: Arc<ScriptedTransport>,
    pub metrics: Arc<MemoryMetrics>,
}

pub fn options(dev_servers: &[&str]) -> ClientOptions {
    ClientOptions {
        dev_servers: dev_servers.iter().map(|s| s.to_string()).collect(),
        ..ClientOptions::default()
    }
}

pub fn harness(options: ClientOptions, hosts: &[(&str, Ipv4Addr)]) -> Harness {
    let transport = Arc::new(ScriptedTransport::new());
    let metrics = Arc::new(MemoryMetrics::new());
    let resolver = hosts
        .iter()
        .fold(StaticResolver::new(), |r, (host, ip)| r.with(host, *ip));
    let ctx = Context::new(options, transport.clone(), Arc::new(resolver), metrics.clone());
    Harness {
        ctx,
        transport,
        metrics,
    }
}
