//! Source-to-image helpers.

pub mod build;
pub mod dockerfile;

pub use build::{BuiltImage, S2iBuilder};
pub use dockerfile::{
    env_commands_from_s2i_args, mount_options_from_s2i_args, validate_dockerfile_syntax,
    DockerfileProcessor, S2iDockerfile,
};
