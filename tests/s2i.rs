mod common;

use std::fs;
use std::sync::{Arc, Mutex};

use common::{data_dir, settings, ScriptedRunner};
use container_ci_suite::errors::Result;
use container_ci_suite::s2i::{S2iBuilder, S2iDockerfile};
use container_ci_suite::util::exec::{CommandRunner, ExecOutput, ExecRequest};
use container_ci_suite::{CiError, ContainerEngine, ContainerTestLib};

const SRC_IMAGE: &str = "quay.io/fedora/nodejs-16";
const S2I_ARGS: &str = "--pull-policy=never -e NODE_ENV=development";

/// Scripted runner that also keeps the Dockerfile handed to `build -f`.
#[derive(Debug)]
struct CaptureDockerfile {
    inner: Arc<ScriptedRunner>,
    dockerfile: Mutex<Option<String>>,
}

impl CommandRunner for CaptureDockerfile {
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutput> {
        let command = request.command();
        if let Some(rest) = command.split(" build --no-cache -f ").nth(1) {
            if let Some(path) = rest.split_whitespace().next() {
                *self.dockerfile.lock().expect("lock") = fs::read_to_string(path).ok();
            }
        }
        self.inner.execute(request)
    }
}

fn capture(inner: &Arc<ScriptedRunner>) -> Arc<CaptureDockerfile> {
    Arc::new(CaptureDockerfile {
        inner: inner.clone(),
        dockerfile: Mutex::new(None),
    })
}

fn app_url() -> String {
    format!("file://{}", data_dir().join("test-app").display())
}

#[test]
fn test_s2i_dockerfile_for_plain_app() {
    let app = app_url();
    let df = S2iDockerfile::new(SRC_IMAGE, &app, S2I_ARGS, "1001");
    let expected = vec![
        format!("FROM {SRC_IMAGE}"),
        format!(
            "LABEL io.openshift.s2i.build.image={SRC_IMAGE} io.openshift.s2i.build.source-location={app}"
        ),
        "USER root".to_string(),
        "COPY upload/src/ /tmp/src".to_string(),
        "RUN chown -R 1001:0 /tmp/src".to_string(),
        "ENV NODE_ENV=development".to_string(),
        "USER 1001".to_string(),
        "RUN /usr/libexec/s2i/assemble".to_string(),
        "CMD /usr/libexec/s2i/run".to_string(),
    ];
    assert_eq!(df.lines(), expected);
    assert!(!df.incremental());
}

#[test]
fn test_build_as_df_end_to_end() {
    let runner = ScriptedRunner::new();
    runner
        .on("{{.Config.User}}", 0, "1001\n")
        .on("build --no-cache", 0, "STEP 9/9: CMD /usr/libexec/s2i/run\nCOMMIT\nfe12ab34cd56\n");
    let cap = capture(&runner);
    let engine = ContainerEngine::new("podman", cap.clone());
    let mut ct = ContainerTestLib::with_engine(SRC_IMAGE, engine, settings()).expect("lib");

    let app = ct
        .build_as_df(&app_url(), SRC_IMAGE, "nodejs-test-app", S2I_ARGS)
        .expect("build");

    assert_eq!(app.image_name(), "nodejs-test-app");
    assert_eq!(ct.app_image_id(), Some("fe12ab34cd56"));
    assert!(!runner.called("podman pull"));
    assert!(runner.called("-t nodejs-test-app ."));
    let recorded = fs::read_to_string(ct.app_id_file_dir().join("nodejs-test-app")).expect("recorded id");
    assert_eq!(recorded, "fe12ab34cd56");

    let dockerfile = cap.dockerfile.lock().expect("lock").clone().expect("dockerfile captured");
    assert_eq!(dockerfile.lines().count(), 9);
    assert!(dockerfile.starts_with("FROM quay.io/fedora/nodejs-16\n"));
    assert!(dockerfile.contains("\nENV NODE_ENV=development\n"));
}

#[test]
fn test_build_as_df_resolves_named_user() {
    let runner = ScriptedRunner::new();
    runner
        .on("{{.Config.User}}", 0, "default")
        .on("id -u default", 0, "1001\n")
        .on("build --no-cache", 0, "0a1b2c");
    let engine = ContainerEngine::new("podman", runner.clone());
    let cfg = settings();
    let built = S2iBuilder::new(&engine, &cfg)
        .build_as_df(&app_url(), SRC_IMAGE, "app", "--pull-policy=never")
        .expect("build");
    assert_eq!(built.image_id, "0a1b2c");
    assert!(runner.called("podman run --rm quay.io/fedora/nodejs-16 bash -c 'id -u default'"));
}

#[test]
fn test_build_as_df_fails_without_uid() {
    let runner = ScriptedRunner::new();
    runner
        .on("{{.Config.User}}", 0, "ghost")
        .on("id -u ghost", 1, "id: 'ghost': no such user");
    let engine = ContainerEngine::new("podman", runner.clone());
    let cfg = settings();
    let err = S2iBuilder::new(&engine, &cfg)
        .build_as_df(&app_url(), SRC_IMAGE, "app", "--pull-policy=never")
        .expect_err("missing user");
    assert!(matches!(err, CiError::NotFound(_)));
    assert!(!runner.called("build --no-cache"));
}

#[test]
fn test_build_as_df_pulls_missing_source_image() {
    let runner = ScriptedRunner::new();
    runner
        .on("{{.Config.User}}", 0, "1001")
        .on("build --no-cache", 0, "abc");
    let engine = ContainerEngine::new("podman", runner.clone());
    let cfg = settings();
    S2iBuilder::new(&engine, &cfg)
        .build_as_df(&app_url(), SRC_IMAGE, "app", "-e A=1")
        .expect("build");
    assert!(runner.called("podman pull quay.io/fedora/nodejs-16"));
}

#[test]
fn test_multistage_build_with_local_app() {
    let runner = ScriptedRunner::new();
    runner
        .on("{{.Config.User}}", 0, "1001")
        .on("build --no-cache", 0, "77aa");
    let cap = capture(&runner);
    let engine = ContainerEngine::new("podman", cap.clone());
    let cfg = settings();
    let built = S2iBuilder::new(&engine, &cfg)
        .multistage_build(
            &data_dir().join("test-app").display().to_string(),
            SRC_IMAGE,
            "quay.io/fedora/nodejs-16-minimal",
            "app-minimal",
            "-e NODE_ENV=production",
        )
        .expect("build");
    assert_eq!(built.image, "app-minimal");
    assert!(!runner.called("git clone"));
    let dockerfile = cap.dockerfile.lock().expect("lock").clone().expect("dockerfile captured");
    assert!(dockerfile.contains("FROM quay.io/fedora/nodejs-16 as builder"));
    assert!(dockerfile.contains("FROM quay.io/fedora/nodejs-16-minimal"));
    assert!(dockerfile.contains("ENV NODE_ENV=production"));
}
