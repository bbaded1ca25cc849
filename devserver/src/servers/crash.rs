//! Crash server: minidump symbolication

use std::ops::Deref;
use std::path::Path;

use tokio::time::Instant;
use tracing::info;

use crate::app::state::Context;
use crate::errors::DevServerError;
use crate::http::call_with_policy;
use crate::servers::stage::arg;
use crate::servers::{resolver, DevServer, ServerKind};
use crate::telemetry::{Metric, CRASHSERVER_PATH};

/// Devserver that symbolicates crash dumps.
///
/// Crash servers are picked without regard to the DUT's location.
#[derive(Debug, Clone)]
pub struct CrashServer(DevServer);

impl Deref for CrashServer {
    type Target = DevServer;

    fn deref(&self) -> &DevServer {
        &self.0
    }
}

/// Records the symbolication duration when dropped
struct SymbolicateTimer {
    ctx: Context,
    dev_server: String,
    started: Instant,
}

impl Drop for SymbolicateTimer {
    fn drop(&mut self) {
        self.ctx.metrics.record(
            Metric::seconds(
                format!("{}/symbolicate_dump_duration", CRASHSERVER_PATH),
                self.started.elapsed().as_secs_f64(),
            )
            .field("dev_server", &self.dev_server),
        );
    }
}

impl CrashServer {
    pub fn new(ctx: &Context, url: impl Into<String>) -> Self {
        Self(DevServer::new(ctx.clone(), url))
    }

    pub async fn resolve(
        ctx: &Context,
        build: &str,
        hostname: Option<&str>,
        ban_list: &[String],
    ) -> Result<Self, DevServerError> {
        resolver(ctx, ServerKind::Crash)
            .resolve(build, hostname, ban_list)
            .await
            .map(Self)
    }

    /// Stage the debug symbols of `build` and symbolicate the minidump at
    /// `minidump_path`. Returns the stack trace.
    pub async fn symbolicate_dump(
        &self,
        minidump_path: &Path,
        build: &str,
    ) -> Result<String, DevServerError> {
        let dev_server = self.resolved_hostname();
        self.context().metrics.record(
            Metric::counter(format!("{}/symbolicate_dump", CRASHSERVER_PATH))
                .field("dev_server", &dev_server),
        );
        let _timer = SymbolicateTimer {
            ctx: self.context().clone(),
            dev_server,
            started: Instant::now(),
        };

        let archive_url = format!("{}{}", self.options().image_storage_server, build);
        let call = self.build_call("symbolicate_dump", [arg("archive_url", archive_url)]);
        info!("Symbolicating {} on {}", minidump_path.display(), self.url());

        let ctx = self.context();
        let call = &call;
        call_with_policy(
            ctx,
            "symbolicate_dump",
            &self.hostname(),
            ctx.options.rpc.call_timeout,
            move || async move { ctx.transport.post_file(call, "minidump", minidump_path).await },
        )
        .await
    }
}
