//! RPCs shared by every build-staging devserver

use async_trait::async_trait;
use devserver_api::SuiteControls;
use tracing::debug;

use crate::build_name::LaunchControlBuild;
use crate::errors::DevServerError;
use crate::http::{bool_arg, split_lines};
use crate::servers::stage::arg;
use crate::servers::DevServer;

/// Pseudo control path of the pre-processed suite dependencies file
pub const DEPENDENCIES_FILE: &str = "test_suites/dependency_info";

/// A devserver that stages builds of one flavor.
///
/// Implementors say how a build name is translated; everything else is
/// shared.
#[async_trait]
pub trait BuildServer: Send + Sync {
    /// The underlying devserver
    fn devserver(&self) -> &DevServer;

    /// Turn a relative build name (e.g. a `LATEST` alias) into a concrete one
    async fn translate(&self, build_name: &str) -> Result<String, DevServerError>;

    /// Static URL of a staged build directory
    async fn image_url(&self, image: &str) -> Result<String, DevServerError> {
        let image = self.translate(image).await?;
        let ds = self.devserver();
        Ok(ds
            .options()
            .image_url_pattern
            .replace("{devserver}", ds.url())
            .replace("{image}", &image)
            .replace("update", "static"))
    }

    /// Control file paths of `build`, optionally limited to one suite
    async fn list_control_files(
        &self,
        build: &str,
        suite_name: &str,
    ) -> Result<Vec<String>, DevServerError> {
        let build = self.translate(build).await?;
        let ds = self.devserver();
        let args = [arg("build", build), arg("suite_name", suite_name)];
        let response = ds
            .call_rpc("controlfiles", &args, ds.options().rpc.call_timeout)
            .await?;
        Ok(split_lines(&response))
    }

    /// Contents of one control file of `build`
    async fn get_control_file(
        &self,
        build: &str,
        control_path: &str,
    ) -> Result<String, DevServerError> {
        let build = self.translate(build).await?;
        let ds = self.devserver();
        let args = [arg("build", build), arg("control_path", control_path)];
        ds.call_rpc("controlfiles", &args, ds.options().rpc.call_timeout)
            .await
    }

    /// Contents of every control file of `build`, keyed by path
    async fn list_suite_controls(
        &self,
        build: &str,
        suite_name: &str,
    ) -> Result<SuiteControls, DevServerError> {
        let build = self.translate(build).await?;
        let ds = self.devserver();
        let args = [arg("build", build), arg("suite_name", suite_name)];
        let response = ds
            .call_rpc("list_suite_controls", &args, ds.options().rpc.call_timeout)
            .await?;
        Ok(serde_json::from_str(&response)?)
    }

    /// Devserver URL of `file_name` inside the given artifacts.
    ///
    /// CrOS builds are named by `build`, Launch Control builds by
    /// `build_info`; one of them is required.
    async fn locate_file(
        &self,
        file_name: &str,
        artifacts: &[&str],
        build: Option<&str>,
        build_info: Option<&LaunchControlBuild>,
    ) -> Result<String, DevServerError> {
        let mut args = vec![arg("file_name", file_name), arg("artifacts", artifacts.join(","))];
        let build_path = match (build_info, build) {
            (Some(info), _) => {
                args.extend(info.args());
                args.push(arg("os_type", "android"));
                info.format("{branch}/{target}/{build_id}")
            }
            (None, Some(build)) if !build.is_empty() => {
                args.push(arg("build", build));
                build.to_string()
            }
            _ => {
                return Err(DevServerError::Devserver(format!(
                    "You must specify build information to look for file {} in artifacts {:?}.",
                    file_name, artifacts
                )))
            }
        };
        args.push(arg("async", bool_arg(false)));

        let ds = self.devserver();
        let file_path = ds
            .call_rpc("locate_file", &args, ds.options().rpc.call_timeout)
            .await?;
        debug!("Located {} at {}", file_name, file_path);
        Ok(format!("{}/static/{}/{}", ds.url(), build_path, file_path))
    }
}
