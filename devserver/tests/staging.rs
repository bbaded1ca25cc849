//! Staging and server RPC tests

mod common;

use common::{harness, options, Reply};
use devserver::servers::BuildServer;
use devserver::{AndroidBuildServer, CrashServer, DevServerError, ImageServer};
use tokio_test::assert_ok;

const DEVSERVER: &str = "http://100.115.1.1:8082";
const BUILD: &str = "lumpy-release/R60-9500.0.0";

fn without_async(args: Vec<(String, String)>) -> Vec<(String, String)> {
    args.into_iter().filter(|(k, _)| k != "async").collect()
}

#[tokio::test(start_paused = true)]
async fn test_stage_artifacts_polls_with_identical_args() {
    let h = harness(options(&[DEVSERVER]), &[]);
    h.transport.script("stage", [Reply::text("Success")]);
    h.transport.script(
        "is_staged",
        [Reply::text("False"), Reply::text("False"), Reply::text("True")],
    );

    let server = ImageServer::new(&h.ctx, DEVSERVER);
    assert_ok!(server.stage_artifacts(BUILD, &["full_payload", "stateful"], &[], None).await);

    let stage = h.transport.calls_to("stage");
    assert_eq!(stage.len(), 1);
    assert_eq!(stage[0].arg("async").as_deref(), Some("True"));
    assert_eq!(
        stage[0].arg("archive_url").as_deref(),
        Some("gs://chromeos-image-archive/lumpy-release/R60-9500.0.0")
    );
    assert_eq!(stage[0].arg("artifacts").as_deref(), Some("full_payload,stateful"));

    let polls = h.transport.calls_to("is_staged");
    assert_eq!(polls.len(), 3);
    for poll in &polls {
        assert_eq!(poll.args(), without_async(stage[0].args()));
    }

    let events = h.metrics.named("chromeos/autotest/devserver/stage_artifact");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].get_field("success"), Some("true"));
    assert_eq!(events[0].get_field("artifacts"), Some("full_payload,stateful"));
}

#[tokio::test(start_paused = true)]
async fn test_stage_retries_after_proxy_error() {
    let h = harness(options(&[DEVSERVER]), &[]);
    h.transport.script(
        "stage",
        [Reply::text("<h1>502 Proxy Error</h1>"), Reply::text("Success")],
    );
    h.transport.script("is_staged", [Reply::text("True")]);

    let server = ImageServer::new(&h.ctx, DEVSERVER);
    assert_ok!(server.stage_artifacts(BUILD, &["full_payload"], &[], None).await);
    assert_eq!(h.transport.calls_to("stage").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stage_unexpected_answer_fails() {
    let h = harness(options(&[DEVSERVER]), &[]);
    h.transport.script("stage", [Reply::text("Failure")]);

    let server = ImageServer::new(&h.ctx, DEVSERVER);
    let err = server
        .stage_artifacts(BUILD, &["full_payload"], &[], None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("HTTP OK not accompanied by 'Success'"));
    assert!(h.transport.calls_to("is_staged").is_empty());

    let events = h.metrics.named("chromeos/autotest/devserver/stage_artifact");
    assert_eq!(events[0].get_field("success"), Some("false"));
}

#[tokio::test(start_paused = true)]
async fn test_is_staged_error_ends_the_poll() {
    let h = harness(options(&[DEVSERVER]), &[]);
    h.transport.script("stage", [Reply::text("Success")]);
    h.transport.script(
        "is_staged",
        [
            Reply::Refused,
            Reply::Http("<html><body>DownloaderException: gs:// not found</body></html>".into()),
        ],
    );

    let server = ImageServer::new(&h.ctx, DEVSERVER);
    let err = server
        .stage_artifacts(BUILD, &["full_payload"], &[], None)
        .await
        .unwrap_err();
    assert!(matches!(err, DevServerError::Devserver(_)));
    assert_eq!(err.to_string(), "DownloaderException: gs:// not found");
    assert_eq!(h.transport.calls_to("is_staged").len(), 2);
}

#[tokio::test]
async fn test_stage_requires_something_to_stage() {
    let h = harness(options(&[DEVSERVER]), &[]);
    let server = ImageServer::new(&h.ctx, DEVSERVER);
    let err = server.stage_artifacts(BUILD, &[], &[], None).await.unwrap_err();
    assert_eq!(err.to_string(), "Must specify something to stage.");
    assert!(h.transport.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_local_archive_url_is_moved_not_copied() {
    let h = harness(options(&[DEVSERVER]), &[]);
    h.transport.script("stage", [Reply::text("Success")]);
    h.transport.script("is_staged", [Reply::text("True")]);

    let server = ImageServer::new(&h.ctx, DEVSERVER);
    assert_ok!(
        server
            .stage_artifacts(BUILD, &[], &["update.gz"], Some("/tmp/payloads"))
            .await
    );

    let stage = &h.transport.calls_to("stage")[0];
    assert_eq!(stage.arg("archive_url"), None);
    assert_eq!(stage.arg("local_path").as_deref(), Some("/tmp/payloads"));
    assert_eq!(stage.arg("delete_source").as_deref(), Some("True"));
}

#[tokio::test(start_paused = true)]
async fn test_synchronous_trigger_download_finishes() {
    let h = harness(options(&[DEVSERVER]), &[]);
    h.transport.default_reply("stage", Reply::text("Success"));
    h.transport.default_reply("is_staged", Reply::text("True"));

    let server = ImageServer::new(&h.ctx, DEVSERVER);
    assert_ok!(server.trigger_download(BUILD, true).await);

    let stage = h.transport.calls_to("stage");
    assert_eq!(stage.len(), 2);
    for call in &stage {
        assert_eq!(
            call.arg("artifacts").as_deref(),
            Some("full_payload,test_suites,stateful")
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_android_stage_carries_build_info() {
    let h = harness(options(&[DEVSERVER]), &[]);
    h.transport.script("stage", [Reply::text("Success")]);
    h.transport.script("is_staged", [Reply::text("True")]);

    let server = AndroidBuildServer::new(&h.ctx, DEVSERVER);
    assert_ok!(
        server
            .stage_artifacts(None, Some("git_mnc_release/shamu-eng/1234"), &["zip_images"], &[], None)
            .await
    );

    let stage = &h.transport.calls_to("stage")[0];
    assert_eq!(stage.arg("os_type").as_deref(), Some("android"));
    assert_eq!(stage.arg("branch").as_deref(), Some("git_mnc_release"));
    assert_eq!(stage.arg("target").as_deref(), Some("shamu-eng"));
    assert_eq!(stage.arg("build_id").as_deref(), Some("1234"));
}

#[tokio::test]
async fn test_android_stage_requires_build_info() {
    let h = harness(options(&[DEVSERVER]), &[]);
    let server = AndroidBuildServer::new(&h.ctx, DEVSERVER);
    let err = server
        .stage_artifacts(None, Some("shamu-eng"), &["zip_images"], &[], None)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Must specify all build info"));
}

#[tokio::test]
async fn test_latest_alias_is_translated() {
    let h = harness(options(&[DEVSERVER]), &[]);
    h.transport.script(
        "xbuddy_translate/remote/lumpy/latest-official",
        [Reply::text("lumpy-release/R61-9700.0.0/test")],
    );

    let server = ImageServer::new(&h.ctx, DEVSERVER);
    let url = server.get_update_url("lumpy-release/LATEST").await.unwrap();
    assert_eq!(url, "http://100.115.1.1:8082/update/lumpy-release/R61-9700.0.0");
}

#[tokio::test]
async fn test_control_file_rpcs() {
    let h = harness(options(&[DEVSERVER]), &[]);
    h.transport.script(
        "controlfiles",
        [Reply::text("a/control\nb/control.bvt  \n"), Reply::text("DEPS")],
    );
    h.transport.script(
        "list_suite_controls",
        [Reply::text(r#"{"a/control": "NAME = 'a'"}"#)],
    );

    let server = ImageServer::new(&h.ctx, DEVSERVER);
    let files = server.list_control_files(BUILD, "bvt").await.unwrap();
    assert_eq!(files, vec!["a/control", "b/control.bvt"]);

    assert_eq!(server.get_dependencies_file(BUILD).await.unwrap(), "DEPS");
    let deps_call = &h.transport.calls_to("controlfiles")[1];
    assert_eq!(
        deps_call.arg("control_path").as_deref(),
        Some("test_suites/dependency_info")
    );

    let controls = server.list_suite_controls(BUILD, "bvt").await.unwrap();
    assert_eq!(controls["a/control"], "NAME = 'a'");
}

#[tokio::test]
async fn test_latest_build_across_devservers() {
    let h = harness(
        options(&["http://100.115.1.1:8082", "http://100.115.1.2:8082"]),
        &[],
    );
    h.transport
        .script("100.115.1.1/latestbuild", [Reply::text("R60-9500.0.0")]);
    h.transport
        .script("100.115.1.2/latestbuild", [Reply::text("R60-9592.10.0")]);

    let latest = ImageServer::get_latest_build(&h.ctx, "lumpy-release", "60")
        .await
        .unwrap();
    assert_eq!(latest, "R60-9592.10.0");
}

#[tokio::test]
async fn test_symbolicate_dump_records_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let dump = dir.path().join("crash.dmp");
    std::fs::write(&dump, b"MDMP").unwrap();

    let h = harness(options(&[]), &[]);
    h.transport.script("symbolicate_dump", [Reply::text("Thread 0 (crashed)")]);

    let server = CrashServer::new(&h.ctx, "http://100.115.3.1:8082");
    let trace = server.symbolicate_dump(&dump, BUILD).await.unwrap();
    assert_eq!(trace, "Thread 0 (crashed)");

    let call = &h.transport.calls_to("symbolicate_dump")[0];
    assert_eq!(
        call.arg("archive_url").as_deref(),
        Some("gs://chromeos-image-archive/lumpy-release/R60-9500.0.0")
    );
    assert_eq!(
        h.metrics
            .named("chromeos/autotest/crashserver/symbolicate_dump")
            .len(),
        1
    );
    assert_eq!(
        h.metrics
            .named("chromeos/autotest/crashserver/symbolicate_dump_duration")
            .len(),
        1
    );
}
