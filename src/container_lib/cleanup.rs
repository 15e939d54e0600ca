//! Removal of containers and images recorded in cid-file / app-id-file directories.

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::engine::ContainerEngine;
use crate::util::fs::read_id_file;

fn recorded_ids(dir: &Path) -> Vec<(std::path::PathBuf, String)> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter_map(|p| match read_id_file(&p) {
            Ok(id) => Some((p, id)),
            Err(e) => {
                warn!("Error reading {}: {e}", p.display());
                None
            }
        })
        .collect()
}

/// Remove every image whose id is recorded in `dir` (and containers created from it), then the dir.
pub fn clean_app_images(engine: &ContainerEngine, dir: &Path) {
    if !dir.exists() {
        println!(
            "The APP_ID_FILE_DIR={} is not created. App cleaning is to be skipped.",
            dir.display()
        );
        return;
    }
    println!("Examining image ID files in APP_ID_FILE_DIR={}", dir.display());
    for (_, image_id) in recorded_ids(dir) {
        if image_id.is_empty() || !engine.image_id_known(&image_id) {
            continue;
        }
        if let Ok(containers) = engine.containers_from_image(&image_id) {
            if !containers.is_empty() {
                engine.remove_force(&containers);
            }
        }
        engine.rmi_force(&image_id);
    }
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!("could not remove {}: {e}", dir.display());
    }
}

/// Stop and remove every container recorded in `dir`, dumping logs of those that exited
/// with a code other than `expected_exit_code`; then remove the dir.
pub fn clean_containers(engine: &ContainerEngine, dir: &Path, expected_exit_code: i32) {
    if !dir.exists() {
        println!("The CID_FILE_DIR is not set. Container cleaning is to be skipped.");
        return;
    }
    println!("Examining CID files in CID_FILE_DIR={}", dir.display());
    for (cid_file, cid) in recorded_ids(dir) {
        if cid.is_empty() || !engine.container_exists(&cid) {
            continue;
        }
        println!("Stopping and removing container {cid}...");
        if engine.container_running(&cid) {
            engine.stop(&cid);
        }
        if let Ok(code) = engine.container_exit_code(&cid) {
            if code != expected_exit_code.to_string() {
                println!("Dumping logs for {cid}");
                if let Ok(logs) = engine.logs(&cid) {
                    println!("{logs}");
                }
            }
        }
        engine.remove_with_volumes(&cid);
        let _ = fs::remove_file(&cid_file);
    }
    if let Err(e) = fs::remove_dir_all(dir) {
        warn!("could not remove {}: {e}", dir.display());
    }
}
