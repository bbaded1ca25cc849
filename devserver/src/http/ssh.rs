//! ssh + curl transport for devservers in restricted subnets

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::errors::DevServerError;
use crate::http::call::RpcCall;
use crate::http::markup::strip_markup;
use crate::http::transport::RpcTransport;
use crate::telemetry::{Metric, MetricsSink, DEVSERVER_PATH};

/// Runs `curl` on the devserver itself over ssh
pub struct SshTransport {
    default_timeout: Duration,
    metrics: Arc<dyn MetricsSink>,
}

impl SshTransport {
    pub fn new(default_timeout: Duration, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            default_timeout,
            metrics,
        }
    }

    fn record_failure(&self, hostname: &str) {
        self.metrics.record(
            Metric::counter(format!("{}/ssh_failure", DEVSERVER_PATH)).field("dev_server", hostname),
        );
    }
}

/// Escape text for use inside a double-quoted shell string
pub fn sh_escape(command: &str) -> String {
    let mut escaped = String::with_capacity(command.len());
    for c in command.chars() {
        if matches!(c, '\\' | '$' | '"' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Remote command run on the devserver
pub fn remote_command(call: &RpcCall) -> String {
    format!("curl \"{}\"", sh_escape(call.url()))
}

#[async_trait]
impl RpcTransport for SshTransport {
    async fn get(&self, call: &RpcCall, timeout: Option<Duration>) -> Result<String, DevServerError> {
        let hostname = call.hostname();
        let timeout = timeout.unwrap_or(self.default_timeout);
        debug!("ssh {} curl {}", hostname, call);

        let child = Command::new("ssh")
            .arg(&hostname)
            .arg(remote_command(call))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                self.record_failure(&hostname);
                return Err(DevServerError::Timeout {
                    method: call.method().to_string(),
                    host: hostname,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            debug!(
                "Error occurred with exit code {:?} when executing the ssh call: {}",
                output.status.code(),
                stderr
            );
            self.record_failure(&hostname);
            return Err(DevServerError::Ssh(stderr));
        }

        let response = String::from_utf8_lossy(&output.stdout).into_owned();
        if response.contains("DownloaderException") {
            return Err(DevServerError::Devserver(strip_markup(&response)));
        }
        Ok(response)
    }

    async fn post_file(
        &self,
        call: &RpcCall,
        _field: &str,
        _path: &Path,
    ) -> Result<String, DevServerError> {
        Err(DevServerError::Config(format!(
            "File upload is not supported over ssh: {}",
            call.method()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::call::build_call;

    #[test]
    fn test_remote_command_escapes_url() {
        let call = build_call("http://10.0.0.1:8082", "stage", [("files", "a\"b$c")]);
        let command = remote_command(&call);
        assert!(command.starts_with("curl \"http://10.0.0.1:8082/stage?"));
        assert!(!command.contains("$c"));
        assert_eq!(sh_escape("a\"b$c`d"), "a\\\"b\\$c\\`d");
    }
}
