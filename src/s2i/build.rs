//! S2I build flow: prepare the build context, synthesize the Dockerfile, build, record the image id.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use super::dockerfile::{
    mount_options_from_s2i_args, multistage_dockerfile_lines, S2iDockerfile, LOCAL_APP_DIR,
    LOCAL_SCRIPTS_DIR, MULTISTAGE_APP_DIR,
};
use crate::config::Settings;
use crate::engine::images::image_id_from_build_log;
use crate::engine::ContainerEngine;
use crate::errors::{CiError, Result};
use crate::util::fs::{copy_tree, move_path, unique_path};
use crate::util::join_nonempty;

/// Result of a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltImage {
    pub image: String,
    pub image_id: String,
}

#[derive(Debug, Clone)]
pub struct S2iBuilder<'a> {
    engine: &'a ContainerEngine,
    settings: &'a Settings,
    app_id_dir: Option<&'a Path>,
}

fn strip_file_scheme(app_path: &str) -> &str {
    app_path.strip_prefix("file://").unwrap_or(app_path)
}

/// File name used to record the image id of `image` in the app-id directory.
pub fn app_id_file_name(image: &str) -> String {
    image
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

impl<'a> S2iBuilder<'a> {
    pub fn new(engine: &'a ContainerEngine, settings: &'a Settings) -> Self {
        Self {
            engine,
            settings,
            app_id_dir: None,
        }
    }

    /// Record built image ids in `dir` so cleanup can remove them.
    pub fn record_ids_in(mut self, dir: &'a Path) -> Self {
        self.app_id_dir = Some(dir);
        self
    }

    fn resolve_user_id(&self, src_image: &str) -> Result<String> {
        let user = self
            .engine
            .image_user(src_image)
            .unwrap_or_else(|_| "0".to_string());
        info!("User name from container {src_image} is {user}");
        self.engine.uid_from_image(&user, src_image).ok_or_else(|| {
            error!("id of user {user} not found inside image {src_image}. Terminating s2i build.");
            CiError::NotFound(format!("user {user} in image {src_image}"))
        })
    }

    fn ensure_source_image(&self, src_image: &str, s2i_args: &str) -> Result<()> {
        if self.engine.image_exists(src_image) || s2i_args.contains("pull-policy=never") {
            return Ok(());
        }
        self.engine.check(&format!("pull {src_image}"))
    }

    /// Extract artifacts of a previous build of `dst_image` into `context/artifacts.tar`.
    fn save_artifacts(&self, context: &Path, dst_image: &str, user_id: &str) -> Result<()> {
        let inc_tmp = tempfile::Builder::new().prefix("incremental.").tempdir()?;
        let inc = inc_tmp.path().display().to_string();
        self.engine
            .runner()
            .check(&format!("setfacl -m 'u:{user_id}:rwx' {inc}"))?;
        if !self.engine.image_exists(dst_image) {
            return Err(CiError::NotFound(format!("image {dst_image}")));
        }
        let script = format!(
            "if [ -s /usr/libexec/s2i/save-artifacts ]; then /usr/libexec/s2i/save-artifacts > '{inc}/artifacts.tar'; else touch '{inc}/artifacts.tar'; fi"
        );
        self.engine.check(&format!(
            "run --rm -v {inc}:{inc}:Z {dst_image} bash -c \"{script}\""
        ))?;
        move_path(&inc_tmp.path().join("artifacts.tar"), &context.join("artifacts.tar"))?;
        Ok(())
    }

    fn build_and_record(
        &self,
        context: &Path,
        dockerfile: &Path,
        params: &str,
        dst_image: &str,
    ) -> Result<BuiltImage> {
        let df = dockerfile.display().to_string();
        let log = self
            .engine
            .build_no_cache(Some(&df), params, Some(context))
            .inspect_err(|_| error!("Failed to build {df}"))?;
        println!("{log}");
        let image_id = image_id_from_build_log(&log)?;
        if let Some(dir) = self.app_id_dir {
            fs::write(dir.join(app_id_file_name(dst_image)), &image_id)?;
        }
        Ok(BuiltImage {
            image: dst_image.to_string(),
            image_id,
        })
    }

    pub fn build_as_df(&self, app_path: &str, src_image: &str, dst_image: &str, s2i_args: &str) -> Result<BuiltImage> {
        self.build_as_df_build_args(app_path, src_image, dst_image, "", s2i_args)
    }

    /// Single-stage S2I build of `app_path` on top of `src_image`, tagged `dst_image`.
    pub fn build_as_df_build_args(
        &self,
        app_path: &str,
        src_image: &str,
        dst_image: &str,
        build_args: &str,
        s2i_args: &str,
    ) -> Result<BuiltImage> {
        let context = tempfile::tempdir()?;
        let dockerfile = unique_path(context.path(), "Dockerfile.", "")?;
        self.ensure_source_image(src_image, s2i_args)?;
        let user_id = self.resolve_user_id(src_image)?;

        let mut df = S2iDockerfile::new(src_image, app_path, s2i_args, &user_id);
        if df.incremental() {
            self.save_artifacts(context.path(), dst_image, &user_id)?;
        }

        let source = Path::new(strip_file_scheme(app_path));
        if !source.exists() {
            return Err(CiError::NotFound(format!("source path {}", source.display())));
        }
        let local_app = context.path().join(LOCAL_APP_DIR);
        let local_scripts = context.path().join(LOCAL_SCRIPTS_DIR);
        copy_tree(source, &local_app)?;
        let s2i_bin = local_app.join(".s2i").join("bin");
        if s2i_bin.exists() {
            if let Some(parent) = local_scripts.parent() {
                fs::create_dir_all(parent)?;
            }
            move_path(&s2i_bin, &local_scripts)?;
        }
        df.has_scripts = local_scripts.exists();
        df.has_assemble = local_scripts.join("assemble").exists();
        df.has_run = local_scripts.join("run").exists();
        let env_file = local_app.join(".s2i").join("environment");
        if env_file.exists() {
            match fs::read_to_string(&env_file) {
                Ok(body) => df.environment_file = Some(body),
                Err(e) => warn!("Could not read environment file: {e}"),
            }
        }
        df.ca_file_present = self.settings.ca_file().exists();
        fs::write(&dockerfile, df.render())?;

        let mount = mount_options_from_s2i_args(s2i_args);
        let params = join_nonempty(&[&mount, "-t", dst_image, ".", build_args]);
        self.build_and_record(context.path(), &dockerfile, &params, dst_image)
    }

    /// Two-stage build: assemble in `src_image`, copy `$HOME` onto `sec_image`.
    ///
    /// A non-local `app_path` is cloned with git.
    pub fn multistage_build(
        &self,
        app_path: &str,
        src_image: &str,
        sec_image: &str,
        dst_image: &str,
        s2i_args: &str,
    ) -> Result<BuiltImage> {
        let context = tempfile::tempdir()?;
        let dockerfile = unique_path(context.path(), "Dockerfile.", "")?;
        let user_id = self.resolve_user_id(src_image)?;

        let local_app: PathBuf = context.path().join(MULTISTAGE_APP_DIR);
        let source = Path::new(strip_file_scheme(app_path));
        if source.exists() {
            copy_tree(source, &local_app)?;
        } else {
            self.engine
                .runner()
                .check(&format!("git clone {app_path} {}", local_app.display()))
                .inspect_err(|_| error!("Failed to clone git repository: {app_path}"))?;
        }

        let lines = multistage_dockerfile_lines(
            src_image,
            sec_image,
            s2i_args,
            &user_id,
            self.settings.ca_file().exists(),
        );
        fs::write(&dockerfile, lines.join("\n"))?;

        let mount = mount_options_from_s2i_args(s2i_args);
        let params = join_nonempty(&[&mount, "-t", dst_image, "."]);
        self.build_and_record(context.path(), &dockerfile, &params, dst_image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_id_file_name_is_path_safe() {
        assert_eq!(app_id_file_name("quay.io/x/app:1.0"), "quay_io_x_app_1_0");
    }

    #[test]
    fn test_strip_file_scheme() {
        assert_eq!(strip_file_scheme("file:///tmp/app"), "/tmp/app");
        assert_eq!(strip_file_scheme("/tmp/app"), "/tmp/app");
    }
}
