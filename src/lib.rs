/*!
container-ci-suite: helpers for testing container images in CI.

Architecture
- Every operation formats a CLI string (podman/docker, oc, helm, git, curl, openssl), runs it
  through a `CommandRunner`, then parses text or JSON output. Nothing talks to an API socket.
- `ContainerTestLib` is the entry point for image test suites; `OpenShiftApi` and
  `HelmChartsApi` cover cluster deployments.
- Retry loops go through `poll`; their intervals come from `config::Timing`.

Key modules
- util::exec: the `CommandRunner` trait and the `sh -c` runner.
- engine: container engine command construction (images, containers, runtime discovery).
- s2i: S2I Dockerfile synthesis and the build flow.
- container_lib: container lifecycle, env/doc/npm checks, test-set runner and summary.
- openshift / helm: `oc` and `helm` wrappers.
- database / http / imagestreams / git / images: probes and small helpers.

Environment
- CONTAINER_ENGINE, CT_SKIP_ENGINE: engine selection.
- NPM_REGISTRY, CA_FILE_PATH: npm mirror and CA mount for builds.
- DEBUG, UNSTABLE_TESTS, IGNORE_UNSTABLE_TESTS: reporting behavior.
- IMAGE_NAME, VERSION, OS: image under test.
- CT_LOG: tracing filter directive.
*/

pub mod config;
pub mod container_lib;
pub mod database;
pub mod engine;
pub mod errors;
pub mod git;
pub mod helm;
pub mod http;
pub mod images;
pub mod imagestreams;
pub mod logging;
pub mod openshift;
pub mod poll;
pub mod s2i;
pub mod signals;
pub mod util;

pub use config::{Settings, Timing};
pub use container_lib::{ContainerTestLib, HttpResponseCheck, TestCase, TestOutcome, TestSummary};
pub use database::{Credentials, DatabaseType, DatabaseWrapper};
pub use engine::ContainerEngine;
pub use errors::{CiError, Result};
pub use git::GitRepo;
pub use helm::HelmChartsApi;
pub use imagestreams::ImageStreamEngine;
pub use openshift::{OcClient, OpenShiftApi, OpenShiftOperations};
pub use poll::Backoff;
pub use util::exec::{CommandRunner, ExecOutput, ExecRequest, OutputMode, ShellRunner};
