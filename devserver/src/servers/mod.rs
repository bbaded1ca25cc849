//! Devserver kinds and the shared devserver handle

use std::fmt;
use std::time::Duration;

use devserver_api::HealthReport;

use crate::app::options::ClientOptions;
use crate::app::state::Context;
use crate::build_name::is_launch_control_build;
use crate::errors::DevServerError;
use crate::health::{devserver_healthy, get_devserver_load};
use crate::host::Host;
use crate::http::{build_call, call_with_policy, run_call, split_lines, RpcCall};
use crate::resolver::Resolver;

mod android;
mod base;
mod crash;
mod image;
mod stage;

pub use android::AndroidBuildServer;
pub use base::BuildServer;
pub use crash::CrashServer;
pub use image::ImageServer;
pub use stage::{ARTIFACTS_FOR_IMAGE, ARTIFACTS_FOR_IMAGE_WITH_AUTOTEST, ARTIFACTS_FOR_LAUNCH_CONTROL};

/// Which pool a devserver is picked from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerKind {
    /// CrOS image staging and auto-update
    Image,
    /// Launch Control builds, served by the same pool as CrOS images
    Android,
    /// Crash dump symbolication
    Crash,
}

impl ServerKind {
    /// Configured servers of this kind
    pub fn servers<'a>(&self, options: &'a ClientOptions) -> &'a [String] {
        match self {
            ServerKind::Image | ServerKind::Android => &options.dev_servers,
            ServerKind::Crash => &options.crash_servers,
        }
    }

    /// Whether selection honors the location of the requesting DUT
    pub fn is_location_bound(&self) -> bool {
        !matches!(self, ServerKind::Crash)
    }
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerKind::Image => "ImageServer",
            ServerKind::Android => "AndroidBuildServer",
            ServerKind::Crash => "CrashServer",
        };
        f.write_str(s)
    }
}

/// One devserver, bound to the client context.
///
/// Owns no connection; every RPC opens its own.
#[derive(Clone)]
pub struct DevServer {
    ctx: Context,
    host: Host,
}

impl DevServer {
    pub fn new(ctx: Context, url: impl Into<String>) -> Self {
        Self {
            ctx,
            host: Host::new(url),
        }
    }

    pub fn url(&self) -> &str {
        self.host.url()
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn hostname(&self) -> String {
        self.host.hostname()
    }

    /// Hostname used in metric fields
    pub fn resolved_hostname(&self) -> String {
        self.host.resolved_hostname(&self.ctx.options.hostname_addr_map)
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn options(&self) -> &ClientOptions {
        &self.ctx.options
    }

    /// Build an RPC against this devserver
    pub fn build_call<I, K, V>(&self, method: &str, args: I) -> RpcCall
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        build_call(self.url(), method, args)
    }

    /// Run a call and return the body
    pub async fn run_call(
        &self,
        call: &RpcCall,
        timeout: Option<Duration>,
    ) -> Result<String, DevServerError> {
        run_call(&self.ctx, call, timeout).await
    }

    /// Run a call and return the body as trimmed lines
    pub async fn run_call_lines(
        &self,
        call: &RpcCall,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>, DevServerError> {
        Ok(split_lines(&self.run_call(call, timeout).await?))
    }

    /// Run `method` under the call policy, retrying transport failures
    /// until `budget` is spent
    pub async fn call_rpc(
        &self,
        method: &str,
        args: &[(String, String)],
        budget: Duration,
    ) -> Result<String, DevServerError> {
        let call = self.build_call(method, args.iter().cloned());
        let call = &call;
        call_with_policy(&self.ctx, method, &self.hostname(), budget, move || async move {
            self.run_call(call, None).await
        })
        .await
    }

    /// Current load report, `None` when it cannot be fetched
    pub async fn load(&self, timeout: Duration) -> Option<HealthReport> {
        get_devserver_load(&self.ctx, self.url(), timeout).await
    }

    /// Whether this devserver can take new work
    pub async fn healthy(&self) -> bool {
        devserver_healthy(&self.ctx, self.url()).await
    }
}

impl fmt::Debug for DevServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevServer").field("url", &self.url()).finish()
    }
}

impl fmt::Display for DevServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url())
    }
}

/// A devserver picked for a build, typed by the kind of build
#[derive(Debug, Clone)]
pub enum ResolvedServer {
    Image(ImageServer),
    Android(AndroidBuildServer),
}

impl ResolvedServer {
    pub fn devserver(&self) -> &DevServer {
        match self {
            ResolvedServer::Image(server) => &**server,
            ResolvedServer::Android(server) => &**server,
        }
    }

    pub fn url(&self) -> &str {
        self.devserver().url()
    }

    /// Stage `artifacts` and `files` of `build`
    pub async fn stage_artifacts(
        &self,
        build: &str,
        artifacts: &[&str],
        files: &[&str],
        archive_url: Option<&str>,
    ) -> Result<(), DevServerError> {
        match self {
            ResolvedServer::Image(server) => {
                server
                    .stage_artifacts(build, artifacts, files, archive_url)
                    .await
            }
            ResolvedServer::Android(server) => {
                server
                    .stage_artifacts(None, Some(build), artifacts, files, archive_url)
                    .await
            }
        }
    }
}

/// Pick a devserver for `build`.
///
/// Launch Control builds (`branch/target-type/build_id`) go to an
/// [`AndroidBuildServer`], everything else to an [`ImageServer`].
pub async fn resolve(
    ctx: &Context,
    build: &str,
    hostname: Option<&str>,
    ban_list: &[String],
) -> Result<ResolvedServer, DevServerError> {
    if is_launch_control_build(build) {
        let server = AndroidBuildServer::resolve(ctx, build, hostname, ban_list).await?;
        Ok(ResolvedServer::Android(server))
    } else {
        let server = ImageServer::resolve(ctx, build, hostname, ban_list).await?;
        Ok(ResolvedServer::Image(server))
    }
}

/// Resolver for one server kind
pub fn resolver(ctx: &Context, kind: ServerKind) -> Resolver {
    Resolver::new(ctx.clone(), kind)
}
