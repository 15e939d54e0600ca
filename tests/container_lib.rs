mod common;

use std::fs;

use common::{engine, settings, ScriptedRunner};
use container_ci_suite::container_lib::{TestCase, TestOutcome};
use container_ci_suite::{CiError, ContainerTestLib, HttpResponseCheck};

fn lib(runner: &std::sync::Arc<ScriptedRunner>) -> ContainerTestLib {
    ContainerTestLib::with_engine("quay.io/sclorg/postgresql-16-c9s", engine(runner), settings())
        .expect("scratch dirs")
}

#[test]
fn test_create_container_records_cid() {
    let runner = ScriptedRunner::new();
    let mut ct = lib(&runner);
    ct.set_container_args("-e POSTGRESQL_USER=user");
    fs::write(ct.cid_file_dir().join("test_db"), "4f2a9c\n").expect("cid file");

    assert!(ct.create_container("test_db", "run-postgresql").expect("create"));
    assert_eq!(ct.get_cid("test_db").expect("cid"), "4f2a9c");

    let run = runner
        .calls()
        .into_iter()
        .find(|c| c.starts_with("podman run --cidfile="))
        .expect("run issued");
    assert!(run.contains("test_db -d -e POSTGRESQL_USER=user quay.io/sclorg/postgresql-16-c9s run-postgresql"));
}

#[test]
fn test_create_container_engine_failure_is_false() {
    let runner = ScriptedRunner::new();
    runner.on("podman run --cidfile=", 125, "Error: invalid reference format");
    let ct = lib(&runner);
    assert!(!ct.create_container("broken", "bash").expect("process failure is not an error"));
}

#[test]
fn test_assert_container_creation_fails_when_run_fails() {
    let runner = ScriptedRunner::new();
    runner.on("podman run --cidfile=", 1, "");
    let mut ct = lib(&runner);
    ct.set_container_args("-e KEEP=1");
    assert!(ct
        .assert_container_creation_fails("-e POSTGRESQL_PASSWORD=")
        .expect("assert"));
    assert!(runner.called("-e POSTGRESQL_PASSWORD="));
    // original args are restored afterwards
    assert!(!ct.create_container("next", "true").expect("create"));
    assert!(runner.calls().last().is_some_and(|c| c.contains("-e KEEP=1")));
}

#[test]
fn test_assert_container_creation_fails_on_non_zero_exit() {
    let runner = ScriptedRunner::new();
    runner
        .on("{{.State.Running}}", 0, "false")
        .on("{{.State.ExitCode}}", 0, "1");
    let mut ct = lib(&runner);
    fs::write(ct.cid_file_dir().join("assert"), "dead01").expect("cid file");
    assert!(ct.assert_container_creation_fails("-e BAD=1").expect("assert"));
    assert!(runner.called("podman rm -v dead01"));
    assert!(!ct.cid_file_dir().join("assert").exists());
}

#[test]
fn test_build_image_and_parse_id_takes_last_line() {
    let runner = ScriptedRunner::new();
    runner.on("build --no-cache", 0, "STEP 1/2: FROM x\nCOMMIT\n3c1e1f0a9b\n\n");
    let mut ct = lib(&runner);
    assert!(ct.build_image_and_parse_id(Some("/tmp/Dockerfile"), "-t 'app' ."));
    assert_eq!(ct.app_image_id(), Some("3c1e1f0a9b"));
    assert!(runner.called("podman build --no-cache -f /tmp/Dockerfile -t app ."));
}

#[test]
fn test_build_image_and_parse_id_failure() {
    let runner = ScriptedRunner::new();
    runner.on("build --no-cache", 1, "Error: no such file");
    let mut ct = lib(&runner);
    assert!(!ct.build_image_and_parse_id(None, "."));
    assert_eq!(ct.app_image_id(), None);
}

#[test]
fn test_cleanup_removes_recorded_containers_and_images() {
    let runner = ScriptedRunner::new();
    runner
        .on("ps -q -a -f 'id=c0ffee'", 0, "c0ffee\n")
        .on("inspect -f '{{.State.Running}}' c0ffee", 0, "true")
        .on("inspect -f '{{.State.ExitCode}}' c0ffee", 0, "137")
        .on("ps -q -a -f ancestor=sha256:beef", 0, "aa\nbb\n");
    let mut ct = lib(&runner);
    fs::write(ct.cid_file_dir().join("server"), "c0ffee").expect("cid");
    fs::write(ct.app_id_file_dir().join("app"), "sha256:beef").expect("app id");
    let (cid_dir, app_dir) = (ct.cid_file_dir().to_path_buf(), ct.app_id_file_dir().to_path_buf());

    ct.cleanup();

    assert!(runner.called("podman stop c0ffee"));
    assert!(runner.called("podman logs c0ffee"));
    assert!(runner.called("podman rm -v c0ffee"));
    assert!(runner.called("podman rm -f aa bb"));
    assert!(runner.called("podman rmi -f sha256:beef"));
    assert!(runner.called("podman inspect -f '{{.Id}}' sha256:beef"));
    assert!(!cid_dir.exists());
    assert!(!app_dir.exists());
}

#[test]
fn test_clean_app_images_skips_unknown_image() {
    let runner = ScriptedRunner::new();
    runner.on("inspect -f '{{.Id}}' sha256:gone", 125, "Error: no such image");
    let ct = lib(&runner);
    fs::write(ct.app_id_file_dir().join("old"), "sha256:gone\n").expect("app id");
    ct.clean_app_images();
    assert!(!runner.called("rmi"));
    assert!(!runner.called("ancestor="));
    assert!(!ct.app_id_file_dir().exists());
}

#[test]
fn test_cleanup_skips_logs_for_expected_exit_code() {
    let runner = ScriptedRunner::new();
    runner
        .on("ps -q -a -f 'id=c1'", 0, "c1")
        .on("{{.State.Running}}", 0, "false")
        .on("{{.State.ExitCode}}", 0, "0");
    let mut ct = lib(&runner);
    fs::write(ct.cid_file_dir().join("one"), "c1").expect("cid");
    ct.cleanup();
    assert!(!runner.called("podman stop c1"));
    assert!(!runner.called("podman logs c1"));
    assert!(runner.called("podman rm -v c1"));
}

#[test]
fn test_run_tests_from_testset_summary() {
    let runner = ScriptedRunner::new();
    let mut ct = lib(&runner);
    let cases = vec![
        TestCase::new("test_ok", |_| Ok(true)),
        TestCase::new("test_bad", |_| Ok(false)),
        TestCase::new("test_err", |_| Err(CiError::message("boom"))),
        TestCase::new("test_no_helm", |_| {
            Err(CiError::Process {
                command: "helm version".into(),
                code: 127,
                output: "sh: helm: command not found".into(),
            })
        }),
    ];
    ct.run_tests_from_testset("postgresql", cases);

    let summary = ct.summary();
    assert_eq!(summary.suite_result, 1);
    assert!(summary.text.contains("[PASSED] for 'postgresql' test_ok ("));
    assert!(summary.text.contains("[FAILED] for 'postgresql' test_bad ("));
    assert!(summary.text.contains("[FAILED] for 'postgresql' test_err ("));
    assert!(summary
        .text
        .lines()
        .filter(|l| l.contains("test_err"))
        .all(|l| !l.contains("exit code")));
    let no_helm = summary
        .text
        .lines()
        .find(|l| l.contains("test_no_helm"))
        .expect("line recorded");
    assert!(no_helm.starts_with("[FAILED] for 'postgresql' test_no_helm ("));
    assert!(no_helm.ends_with(", exit code 127)"));
}

#[test]
fn test_unstable_failures_are_ignored() {
    let runner = ScriptedRunner::new();
    let mut cfg = settings();
    cfg.unstable_tests = vec!["test_flaky".to_string()];
    cfg.ignore_unstable_tests = true;
    let mut ct = ContainerTestLib::with_engine("img", engine(&runner), cfg).expect("lib");
    ct.run_tests_from_testset("app", vec![TestCase::new("test_flaky", |_| Ok(false))]);
    assert_eq!(ct.summary().suite_result, 0);
    assert!(ct.summary().text.contains(TestOutcome::FailedUnstableIgnored.label()));
}

#[test]
fn test_check_testcase_result() {
    let runner = ScriptedRunner::new();
    let mut ct = lib(&runner);
    assert_eq!(ct.check_testcase_result(0), 0);
    assert_eq!(ct.summary().suite_result, 0);
    assert_eq!(ct.check_testcase_result(3), 3);
    assert_eq!(ct.summary().suite_result, 1);
}

#[test]
fn test_test_response_matches_code_and_body() {
    let runner = ScriptedRunner::new();
    runner
        .once("curl", 7, "")
        .once("curl", 0, "starting503")
        .on("curl", 0, "<h1>Welcome to nginx</h1>200");
    let ct = lib(&runner);
    let check = HttpResponseCheck {
        body_regexp: "Welcome",
        max_attempts: 5,
        ignore_error_attempts: 2,
        ..HttpResponseCheck::default()
    };
    assert!(ct.test_response("http://10.88.0.5", &check).expect("regex"));
    assert_eq!(runner.count("curl --connect-timeout 10 -s -w '%{http_code}' 'http://10.88.0.5:8080'"), 3);
}

#[test]
fn test_test_response_https_port_and_page() {
    let runner = ScriptedRunner::new();
    runner.on("curl", 0, "<p>ok</p>200");
    let ct = lib(&runner);
    let check = HttpResponseCheck {
        port: Some(8443),
        page: "/page",
        max_attempts: 2,
        ..HttpResponseCheck::default()
    };
    assert!(ct.test_response("https://10.88.0.5", &check).expect("regex"));
    assert!(runner.called("curl --connect-timeout 10 --insecure -s -w '%{http_code}' 'https://10.88.0.5:8443/page'"));

    let plain = HttpResponseCheck {
        page: "/page",
        max_attempts: 1,
        ..HttpResponseCheck::default()
    };
    assert!(ct.test_response("http://10.88.0.5", &plain).expect("regex"));
    let last = runner.calls().last().cloned().unwrap_or_default();
    assert!(last.contains("'http://10.88.0.5:8080/page'"));
    assert!(!last.contains("--insecure"));
}

#[test]
fn test_test_response_gives_up() {
    let runner = ScriptedRunner::new();
    runner.on("curl", 0, "Forbidden403");
    let ct = lib(&runner);
    let check = HttpResponseCheck {
        port: None,
        max_attempts: 3,
        ignore_error_attempts: 0,
        ..HttpResponseCheck::default()
    };
    assert!(!ct.test_response("http://10.88.0.5:8080", &check).expect("regex"));
    assert_eq!(runner.count("curl"), 3);
}

#[test]
fn test_assert_cmd_success_and_failure() {
    let runner = ScriptedRunner::new();
    runner.on("false", 1, "");
    let ct = lib(&runner);
    assert!(ct.assert_cmd_success(&["podman", "images"]));
    assert!(ct.assert_cmd_failure(&["false"]));
    assert!(!ct.assert_cmd_failure(&["true"]));
}

#[test]
fn test_get_cip_and_logs() {
    let runner = ScriptedRunner::new();
    runner
        .on("{{.NetworkSettings.IPAddress}}", 0, "10.88.0.12\n")
        .on("podman logs", 0, "database system is ready");
    let ct = lib(&runner);
    fs::write(ct.cid_file_dir().join("db"), "c2").expect("cid");
    assert_eq!(ct.get_cip("db").expect("cip"), "10.88.0.12");
    assert_eq!(ct.get_logs("db").expect("logs"), "database system is ready");
    assert!(ct.get_cid("missing").is_err());
}

#[test]
fn test_obtain_input_copies_local_file_and_dir() {
    let runner = ScriptedRunner::new();
    let ct = lib(&runner);
    let dest = tempfile::tempdir().expect("dest");

    let file = ct
        .obtain_input_in(common::data_dir().join("svc.json").to_str().expect("utf8"), dest.path())
        .expect("file input");
    assert!(file.file_name().is_some_and(|n| n.to_string_lossy().starts_with("test-input-")));
    assert_eq!(file.extension().and_then(|e| e.to_str()), Some("json"));

    let dir = ct
        .obtain_input_in(common::data_dir().join("test-app").to_str().expect("utf8"), dest.path())
        .expect("dir input");
    assert!(dir.join("index.js").is_file());

    assert!(ct.obtain_input_in("no-such-input", dest.path()).is_err());
}

#[test]
fn test_build_test_container_rewrites_from() {
    let runner = ScriptedRunner::new();
    runner.on("build --no-cache", 0, "abcdef012345");
    let mut ct = lib(&runner);
    let tmp = tempfile::tempdir().expect("tmp");
    let df = tmp.path().join("Dockerfile");
    fs::write(&df, "FROM registry.access.redhat.com/ubi9/nodejs-20\nCOPY app-src /opt/app-root/src\n").expect("df");

    let app = common::data_dir().join("test-app");
    assert!(ct
        .build_test_container(&df, app.to_str().expect("utf8"), "app-src", "")
        .expect("build"));
    assert_eq!(ct.app_image_id(), Some("abcdef012345"));
    assert!(runner.called("build --no-cache -f "));
    assert!(runner.called("-t app_dockerfile "));
    let recorded = fs::read_to_string(ct.app_id_file_dir().join("app_dockerfile")).expect("recorded id");
    assert_eq!(recorded, "abcdef012345");
}

#[test]
fn test_build_test_container_requires_app_dir() {
    let runner = ScriptedRunner::new();
    let mut ct = lib(&runner);
    let tmp = tempfile::tempdir().expect("tmp");
    let df = tmp.path().join("Dockerfile");
    fs::write(&df, "FROM x\n").expect("df");
    assert!(!ct.build_test_container(&df, "/tmp", "", "").expect("no error"));
    assert!(!ct
        .build_test_container(&tmp.path().join("missing"), "/tmp", "app", "")
        .expect("no error"));
    assert!(runner.calls().is_empty());
}

#[test]
fn test_pull_image_skips_present_image() {
    let runner = ScriptedRunner::new();
    runner.on("images -q", 0, "9b1e\n");
    let ct = lib(&runner);
    assert!(ct.pull_image("quay.io/fedora/fedora:40", 3));
    assert!(!runner.called("podman pull"));
}

#[test]
fn test_pull_image_retries_then_gives_up() {
    let runner = ScriptedRunner::new();
    runner.on("podman pull", 125, "manifest unknown");
    let ct = lib(&runner);
    assert!(!ct.pull_image("quay.io/nope:1", 3));
    assert_eq!(runner.count("podman pull quay.io/nope:1"), 3);
}

#[test]
fn test_run_app_dockerfile_and_cip() {
    let runner = ScriptedRunner::new();
    runner
        .write_cidfiles("a99")
        .on("build --no-cache", 0, "d0ck3r")
        .on(
            "podman inspect a99",
            0,
            r#"[{"Id": "a99", "NetworkSettings": {"IPAddress": "10.88.0.40"}}]"#,
        );
    let mut ct = lib(&runner);
    let tmp = tempfile::tempdir().expect("tmp");
    let df = tmp.path().join("Dockerfile");
    fs::write(&df, "FROM scratch\n").expect("df");
    let app = common::data_dir().join("test-app");
    assert!(ct
        .build_test_container(&df, app.to_str().expect("utf8"), "src", "--pull=never")
        .expect("build"));
    assert!(ct.test_run_app_dockerfile().expect("run"));
    let cid_file = ct.cid_file_dir().join("app_dockerfile");
    assert!(runner.called(&format!("podman run -d --cidfile={} --rm app_dockerfile", cid_file.display())));
    assert_eq!(ct.get_cid("app_dockerfile").expect("cid"), "a99");
    assert_eq!(ct.get_app_cip().expect("cip").as_deref(), Some("10.88.0.40"));
}

#[test]
fn test_run_app_dockerfile_requires_build() {
    let runner = ScriptedRunner::new();
    let ct = lib(&runner);
    assert!(ct.test_run_app_dockerfile().is_err());
    assert_eq!(ct.get_app_cip().expect("cip"), None);
}

#[test]
fn test_drop_after_init_cleans_up() {
    let runner = ScriptedRunner::new();
    runner.on("ps -q -a -f 'id=f00'", 0, "f00");
    let (cid_dir, app_dir) = {
        let mut ct = lib(&runner);
        ct.init().expect("init");
        fs::write(ct.cid_file_dir().join("x"), "f00").expect("cid");
        (ct.cid_file_dir().to_path_buf(), ct.app_id_file_dir().to_path_buf())
    };
    assert!(runner.called("podman rm -v f00"));
    assert!(runner.called("free -h"));
    assert!(!cid_dir.exists());
    assert!(!app_dir.exists());
}

#[test]
fn test_explicit_cleanup_disarms_drop() {
    let runner = ScriptedRunner::new();
    {
        let mut ct = lib(&runner);
        ct.init().expect("init");
        ct.cleanup();
    }
    assert!(!runner.called("free -h"));
}

#[test]
fn test_drop_without_init_removes_scratch_dirs() {
    let runner = ScriptedRunner::new();
    let ct = lib(&runner);
    let (cid_dir, app_dir) = (ct.cid_file_dir().to_path_buf(), ct.app_id_file_dir().to_path_buf());
    assert!(cid_dir.is_dir());
    assert!(app_dir.is_dir());
    drop(ct);
    assert!(!cid_dir.exists());
    assert!(!app_dir.exists());
    assert!(runner.calls().is_empty());
}

#[test]
fn test_build_as_df_result_cleans_its_dirs() {
    let runner = ScriptedRunner::new();
    runner
        .on("images -q", 0, "present\n")
        .on("{{.Config.User}}", 0, "1001")
        .on("build --no-cache", 0, "STEP 9/9\nfeed01");
    let mut ct = lib(&runner);
    let app = common::data_dir().join("test-app");
    let built = ct
        .build_as_df(app.to_str().expect("utf8"), "quay.io/sclorg/nodejs-22-c9s", "nodejs-testapp", "--pull-policy=never")
        .expect("build");
    assert_eq!(built.image_name(), "nodejs-testapp");
    let cid_dir = built.cid_file_dir().to_path_buf();
    drop(built);
    assert!(!cid_dir.exists());
    assert!(ct.cid_file_dir().is_dir());
}
