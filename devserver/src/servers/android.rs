//! Launch Control (Android) build devserver

use std::ops::Deref;

use async_trait::async_trait;
use tracing::debug;

use crate::app::state::Context;
use crate::build_name::LaunchControlBuild;
use crate::errors::DevServerError;
use crate::servers::base::BuildServer;
use crate::servers::stage::{arg, ARTIFACTS_FOR_LAUNCH_CONTROL};
use crate::servers::{resolver, DevServer, ServerKind};

/// Devserver staging Launch Control builds.
///
/// Builds are identified by branch, target and build id; calls carry
/// `os_type=android`.
#[derive(Debug, Clone)]
pub struct AndroidBuildServer(DevServer);

impl Deref for AndroidBuildServer {
    type Target = DevServer;

    fn deref(&self) -> &DevServer {
        &self.0
    }
}

impl From<DevServer> for AndroidBuildServer {
    fn from(devserver: DevServer) -> Self {
        Self(devserver)
    }
}

impl AndroidBuildServer {
    pub fn new(ctx: &Context, url: impl Into<String>) -> Self {
        Self(DevServer::new(ctx.clone(), url))
    }

    pub async fn resolve(
        ctx: &Context,
        build: &str,
        hostname: Option<&str>,
        ban_list: &[String],
    ) -> Result<Self, DevServerError> {
        resolver(ctx, ServerKind::Android)
            .resolve(build, hostname, ban_list)
            .await
            .map(Self)
    }

    fn build_name(&self, info: &LaunchControlBuild) -> String {
        info.format(&self.options().android_build_name_pattern)
    }

    /// Stage artifacts of a Launch Control build.
    ///
    /// The build is given either as `build_info` or as an `image` name in
    /// `branch/target/build_id` form.
    pub async fn stage_artifacts(
        &self,
        build_info: Option<&LaunchControlBuild>,
        image: Option<&str>,
        artifacts: &[&str],
        files: &[&str],
        archive_url: Option<&str>,
    ) -> Result<(), DevServerError> {
        let info = match (build_info, image) {
            (Some(info), _) => Some(info.clone()),
            (None, Some(image)) => LaunchControlBuild::parse(image),
            (None, None) => None,
        };
        let info = info
            .filter(|i| !i.target.is_empty() && !i.build_id.is_empty() && !i.branch.is_empty())
            .ok_or_else(|| {
                DevServerError::Devserver(
                    "Must specify all build info (target, build_id and branch) to stage."
                        .to_string(),
                )
            })?;
        if artifacts.is_empty() && files.is_empty() {
            return Err(DevServerError::Devserver(
                "Must specify something to stage.".to_string(),
            ));
        }

        let build = self.build_name(&info);
        let mut extra = info.args();
        extra.push(arg("os_type", "android"));
        self.stage_build(&build, artifacts, files, archive_url, extra)
            .await
    }

    /// URL to pull files of a build from
    pub fn get_pull_url(&self, info: &LaunchControlBuild) -> String {
        format!(
            "{}/static/{}/{}/{}",
            self.url(),
            info.branch,
            info.target,
            info.build_id
        )
    }

    /// Stage what is needed to reimage a device from `info`. Without explicit
    /// `artifacts` the reimage set is used.
    pub async fn trigger_download(
        &self,
        info: &LaunchControlBuild,
        artifacts: Option<&str>,
        synchronous: bool,
    ) -> Result<(), DevServerError> {
        let build = self.build_name(info);
        let artifacts = artifacts
            .filter(|a| !a.is_empty())
            .unwrap_or(ARTIFACTS_FOR_LAUNCH_CONTROL);
        self.trigger_build_download(&build, artifacts, synchronous, Some(info))
            .await
    }

    /// Block until the reimage artifacts of `info` are staged
    pub async fn finish_download(&self, info: &LaunchControlBuild) -> Result<(), DevServerError> {
        let build = self.build_name(info);
        self.finish_build_download(&build, ARTIFACTS_FOR_LAUNCH_CONTROL, Some(info))
            .await
    }

    /// URL of a staged file of a build
    pub async fn get_staged_file_url(
        &self,
        filename: &str,
        info: &LaunchControlBuild,
    ) -> Result<String, DevServerError> {
        let build = self.build_name(info);
        Ok(format!("{}/{}", self.image_url(&build).await?, filename))
    }
}

#[async_trait]
impl BuildServer for AndroidBuildServer {
    fn devserver(&self) -> &DevServer {
        &self.0
    }

    /// A `LATEST` build id is replaced by the newest build of the branch and
    /// target
    async fn translate(&self, build_name: &str) -> Result<String, DevServerError> {
        let info = LaunchControlBuild::parse(build_name).ok_or_else(|| {
            DevServerError::Devserver(format!(
                "Invalid Launch Control build name: {}",
                build_name
            ))
        })?;
        if info.build_id.to_uppercase() != "LATEST" {
            return Ok(build_name.to_string());
        }

        let args = [
            arg("branch", info.branch.clone()),
            arg("target", info.target.clone()),
            arg("os_type", "android"),
        ];
        let build_id = self
            .call_rpc("latestbuild", &args, self.options().rpc.call_timeout)
            .await?;
        let translated = self.build_name(&LaunchControlBuild::new(&info.branch, &info.target, &build_id));
        debug!("Translated relative build {} to {}", build_name, translated);
        Ok(translated)
    }
}
