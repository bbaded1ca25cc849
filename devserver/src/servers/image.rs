//! CrOS image devserver

use std::ops::Deref;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::{debug, info};

use crate::app::state::Context;
use crate::build_name::latest_alias_board;
use crate::errors::DevServerError;
use crate::filesys::file::File;
use crate::http::{run_call, split_lines, RpcCall};
use crate::servers::base::{BuildServer, DEPENDENCIES_FILE};
use crate::servers::stage::{arg, ARTIFACTS_FOR_IMAGE, ARTIFACTS_FOR_IMAGE_WITH_AUTOTEST};
use crate::servers::{resolver, DevServer, ServerKind};
use crate::utils::compare_loose_versions;

/// Devserver for CrOS images: staging, URLs and auto-update
#[derive(Debug, Clone)]
pub struct ImageServer(DevServer);

impl Deref for ImageServer {
    type Target = DevServer;

    fn deref(&self) -> &DevServer {
        &self.0
    }
}

impl From<DevServer> for ImageServer {
    fn from(devserver: DevServer) -> Self {
        Self(devserver)
    }
}

impl ImageServer {
    pub fn new(ctx: &Context, url: impl Into<String>) -> Self {
        Self(DevServer::new(ctx.clone(), url))
    }

    /// Resolve `build` to a healthy image server near `hostname`
    pub async fn resolve(
        ctx: &Context,
        build: &str,
        hostname: Option<&str>,
        ban_list: &[String],
    ) -> Result<Self, DevServerError> {
        resolver(ctx, ServerKind::Image)
            .resolve(build, hostname, ban_list)
            .await
            .map(Self)
    }

    /// Any healthy image server
    pub async fn random(ctx: &Context) -> Result<Self, DevServerError> {
        resolver(ctx, ServerKind::Image).random().await.map(Self)
    }

    /// Stage `artifacts` and `files` of `image` and wait until they are
    /// served
    pub async fn stage_artifacts(
        &self,
        image: &str,
        artifacts: &[&str],
        files: &[&str],
        archive_url: Option<&str>,
    ) -> Result<(), DevServerError> {
        if artifacts.is_empty() && files.is_empty() {
            return Err(DevServerError::Devserver(
                "Must specify something to stage.".to_string(),
            ));
        }
        let image = self.translate(image).await?;
        self.stage_build(&image, artifacts, files, archive_url, Vec::new())
            .await
    }

    /// Stage what is needed to start installing `image`. Unless
    /// `synchronous`, [`ImageServer::finish_download`] completes the rest.
    pub async fn trigger_download(&self, image: &str, synchronous: bool) -> Result<(), DevServerError> {
        let image = self.translate(image).await?;
        self.trigger_build_download(&image, ARTIFACTS_FOR_IMAGE, synchronous, None)
            .await
    }

    /// Block until every artifact of `image`, autotest included, is staged
    pub async fn finish_download(&self, image: &str) -> Result<(), DevServerError> {
        let image = self.translate(image).await?;
        self.finish_build_download(&image, ARTIFACTS_FOR_IMAGE_WITH_AUTOTEST, None)
            .await
    }

    /// Log and return the contents of the staged directory of `image`
    pub async fn list_image_dir(&self, image: &str) -> Result<Vec<String>, DevServerError> {
        let image = self.translate(image).await?;
        info!(
            "Requesting contents from devserver {} for image {}",
            self.url(),
            image
        );
        let archive_url = format!("{}{}", self.options().storage_server_for(&[]), image);
        let response = self
            .call_rpc(
                "list_image_dir",
                &[arg("archive_url", archive_url)],
                self.options().rpc.ssh_timeout,
            )
            .await?;
        let lines = split_lines(&response);
        for line in &lines {
            info!("{}", line);
        }
        Ok(lines)
    }

    /// Have the devserver set up telemetry for `build`. Returns the install
    /// path on the devserver.
    pub async fn setup_telemetry(&self, build: &str) -> Result<String, DevServerError> {
        let build = self.translate(build).await?;
        let archive_url = format!("{}{}", self.options().image_storage_server, build);
        self.call_rpc(
            "setup_telemetry",
            &[arg("archive_url", archive_url)],
            self.options().rpc.call_timeout,
        )
        .await
    }

    /// Contents of the suite dependencies file of `build`
    pub async fn get_dependencies_file(&self, build: &str) -> Result<String, DevServerError> {
        self.get_control_file(build, DEPENDENCIES_FILE).await
    }

    /// Latest official build of `board` in image storage, e.g.
    /// `rambi-release/R37-5868.0.0`
    pub async fn get_latest_build_in_gs(&self, board: &str) -> Result<String, DevServerError> {
        let method = format!("xbuddy_translate/remote/{}/latest-official", board);
        let image_name = self
            .call_rpc(
                &method,
                &[arg("image_dir", self.options().image_storage_server.clone())],
                self.options().rpc.call_timeout,
            )
            .await?;
        Ok(image_name
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default())
    }

    /// URL the updater on a DUT fetches `image` from
    pub async fn get_update_url(&self, image: &str) -> Result<String, DevServerError> {
        let image = self.translate(image).await?;
        Ok(self
            .options()
            .image_url_pattern
            .replace("{devserver}", self.url())
            .replace("{image}", &image))
    }

    /// URL of a staged file of `image`
    pub async fn get_staged_file_url(&self, filename: &str, image: &str) -> Result<String, DevServerError> {
        Ok(format!("{}/{}", self.image_url(image).await?, filename))
    }

    /// URL of the staged full payload of `image`
    pub async fn get_full_payload_url(&self, image: &str) -> Result<String, DevServerError> {
        Ok(format!("{}/update.gz", self.image_url(image).await?))
    }

    /// URL of the staged test image of `image`
    pub async fn get_test_image_url(&self, image: &str) -> Result<String, DevServerError> {
        Ok(format!("{}/chromiumos_test_image.bin", self.image_url(image).await?))
    }

    /// Ask every healthy devserver for the latest build of `target` and
    /// return the newest answer, e.g. `R20-2226.0.0`.
    ///
    /// An empty `milestone` asks for the latest build of any milestone.
    pub async fn get_latest_build(
        ctx: &Context,
        target: &str,
        milestone: &str,
    ) -> Result<String, DevServerError> {
        let calls = resolver(ctx, ServerKind::Image)
            .build_all_calls("latestbuild", &[("target", target), ("milestone", milestone)])
            .await;
        let timeout = Some(ctx.options.rpc.call_timeout);
        let builds = try_join_all(
            calls
                .iter()
                .map(|call| run_call(ctx, call, timeout)),
        )
        .await?;

        builds
            .into_iter()
            .max_by(|a, b| compare_loose_versions(a, b))
            .ok_or_else(|| {
                DevServerError::Devserver(format!(
                    "No healthy devserver to ask for the latest build of {}",
                    target
                ))
            })
    }

    /// Download a file served by a devserver into `local_path`
    pub async fn download_file(
        ctx: &Context,
        remote_url: &str,
        local_path: &Path,
        timeout: Option<Duration>,
    ) -> Result<(), DevServerError> {
        let call = RpcCall::from_url(remote_url);
        let response = run_call(ctx, &call, timeout).await?;
        File::new(local_path).write_string(&response).await
    }
}

#[async_trait]
impl BuildServer for ImageServer {
    fn devserver(&self) -> &DevServer {
        &self.0
    }

    /// `<board>-<type>/LATEST` becomes the latest official build of the
    /// board; other names are returned as they are
    async fn translate(&self, build_name: &str) -> Result<String, DevServerError> {
        let Some(board) = latest_alias_board(build_name) else {
            return Ok(build_name.to_string());
        };
        let translated = self.get_latest_build_in_gs(&board).await?;
        debug!("Translated relative build {} to {}", build_name, translated);
        Ok(translated)
    }
}
