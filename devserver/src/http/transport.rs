//! RPC transports

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client, Response};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::app::options::ClientOptions;
use crate::app::state::Context;
use crate::errors::DevServerError;
use crate::http::call::RpcCall;
use crate::http::markup::strip_markup;
use crate::net::{restricted_subnet_for, NameResolver};

/// Marker of a devserver whose service is temporarily down, e.g. during a push
pub const SERVICE_UNAVAILABLE: &str = "Service Unavailable";

/// Executes built RPC calls against a devserver
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// GET the call URL and return the body verbatim
    async fn get(&self, call: &RpcCall, timeout: Option<Duration>) -> Result<String, DevServerError>;

    /// POST a local file as a multipart form field
    async fn post_file(
        &self,
        call: &RpcCall,
        field: &str,
        path: &Path,
    ) -> Result<String, DevServerError>;
}

/// Direct HTTP transport
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a new HTTP transport. Timeouts are set per call.
    pub fn new() -> Result<Self, DevServerError> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }

    fn map_error(call: &RpcCall, err: reqwest::Error) -> DevServerError {
        if err.is_timeout() {
            DevServerError::Timeout {
                method: call.method().to_string(),
                host: call.hostname(),
            }
        } else {
            DevServerError::from(err)
        }
    }

    async fn read_body(call: &RpcCall, response: Response) -> Result<String, DevServerError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Self::map_error(call, e))?;

        if !status.is_success() {
            error!("Devserver call {} failed: {}", call.method(), status);
            return Err(DevServerError::Devserver(strip_markup(&body)));
        }
        Ok(body)
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn get(&self, call: &RpcCall, timeout: Option<Duration>) -> Result<String, DevServerError> {
        debug!("GET {}", call);

        let mut request = self.client.get(call.url());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Self::map_error(call, e))?;
        Self::read_body(call, response).await
    }

    async fn post_file(
        &self,
        call: &RpcCall,
        field: &str,
        path: &Path,
    ) -> Result<String, DevServerError> {
        debug!("POST {} ({})", call, path.display());

        let contents = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| field.to_string());
        let form = multipart::Form::new()
            .part(field.to_string(), multipart::Part::bytes(contents).file_name(file_name));

        let response = self
            .client
            .post(call.url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::map_error(call, e))?;
        Self::read_body(call, response).await
    }
}

/// Picks ssh for devservers in a restricted subnet when ssh is enabled,
/// plain HTTP otherwise
pub struct RoutedTransport {
    http: Arc<dyn RpcTransport>,
    ssh: Arc<dyn RpcTransport>,
    options: Arc<ClientOptions>,
    resolver: Arc<dyn NameResolver>,
}

impl RoutedTransport {
    pub fn new(
        http: Arc<dyn RpcTransport>,
        ssh: Arc<dyn RpcTransport>,
        options: Arc<ClientOptions>,
        resolver: Arc<dyn NameResolver>,
    ) -> Self {
        Self {
            http,
            ssh,
            options,
            resolver,
        }
    }

    async fn use_ssh(&self, call: &RpcCall) -> bool {
        if !self.options.enable_ssh || self.options.restricted_subnets.is_empty() {
            return false;
        }
        match self.resolver.lookup(&call.hostname()).await {
            Some(ip) => restricted_subnet_for(ip, &self.options.restricted_subnets).is_some(),
            None => false,
        }
    }
}

#[async_trait]
impl RpcTransport for RoutedTransport {
    async fn get(&self, call: &RpcCall, timeout: Option<Duration>) -> Result<String, DevServerError> {
        if self.use_ssh(call).await {
            self.ssh.get(call, timeout).await
        } else {
            self.http.get(call, timeout).await
        }
    }

    async fn post_file(
        &self,
        call: &RpcCall,
        field: &str,
        path: &Path,
    ) -> Result<String, DevServerError> {
        self.http.post_file(call, field, path).await
    }
}

/// Run a call, re-polling while the devserver answers "Service Unavailable".
///
/// When the devserver is still unavailable after the configured window the
/// marker text itself is returned, so callers comparing against an expected
/// response fail with a readable message. Empty bodies are valid responses.
pub async fn run_call(
    ctx: &Context,
    call: &RpcCall,
    timeout: Option<Duration>,
) -> Result<String, DevServerError> {
    let rpc = &ctx.options.rpc;
    let started = Instant::now();
    loop {
        let response = ctx.transport.get(call, timeout).await?;
        if !response.contains(SERVICE_UNAVAILABLE) {
            return Ok(response);
        }
        if started.elapsed() >= rpc.unavailable_window {
            warn!("Devserver {} still unavailable for {}", call.hostname(), call.method());
            return Ok(SERVICE_UNAVAILABLE.to_string());
        }
        debug!("Devserver {} is unavailable, polling again", call.hostname());
        tokio::time::sleep(rpc.unavailable_interval).await;
    }
}
