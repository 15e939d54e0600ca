//! Best-effort cleanup when the test process is interrupted.
//!
//! Rules
//! - Handlers only flip atomics; a watcher thread does the actual work.
//! - On SIGINT/SIGTERM every registered directory set is cleaned, then the process exits with 130/143.
//! - Registration is explicit: `ContainerTestLib::init` registers, `cleanup` unregisters.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use once_cell::sync::{Lazy, OnceCell};
use tracing::{info, warn};

use crate::container_lib::cleanup::{clean_app_images, clean_containers};
use crate::engine::ContainerEngine;

static GOT_INT: AtomicBool = AtomicBool::new(false);
static GOT_TERM: AtomicBool = AtomicBool::new(false);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static INSTALLED: OnceCell<()> = OnceCell::new();

#[derive(Debug)]
struct Registration {
    id: u64,
    engine: ContainerEngine,
    cid_dir: PathBuf,
    app_id_dir: PathBuf,
    expected_exit_code: i32,
}

static REGISTRY: Lazy<Mutex<Vec<Registration>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Token returned by `register`; pass it to `unregister` once cleanup ran normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupHandle(u64);

pub fn register(
    engine: ContainerEngine,
    cid_dir: PathBuf,
    app_id_dir: PathBuf,
    expected_exit_code: i32,
) -> CleanupHandle {
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    if let Ok(mut reg) = REGISTRY.lock() {
        reg.push(Registration {
            id,
            engine,
            cid_dir,
            app_id_dir,
            expected_exit_code,
        });
    }
    CleanupHandle(id)
}

pub fn unregister(handle: CleanupHandle) {
    if let Ok(mut reg) = REGISTRY.lock() {
        reg.retain(|r| r.id != handle.0);
    }
}

pub fn is_registered(handle: CleanupHandle) -> bool {
    REGISTRY
        .lock()
        .map(|r| r.iter().any(|e| e.id == handle.0))
        .unwrap_or(false)
}

/// Clean every registered directory set and clear the registry.
pub fn run_registered_cleanup() {
    let drained: Vec<Registration> = match REGISTRY.lock() {
        Ok(mut reg) => reg.drain(..).collect(),
        Err(_) => return,
    };
    for r in drained {
        info!("cleaning up after interrupt: {}", r.cid_dir.display());
        clean_app_images(&r.engine, &r.app_id_dir);
        clean_containers(&r.engine, &r.cid_dir, r.expected_exit_code);
    }
}

#[cfg(unix)]
extern "C" fn handle_int(_sig: i32) {
    GOT_INT.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
extern "C" fn handle_term(_sig: i32) {
    GOT_TERM.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_handlers() {
    use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let act_int = SigAction::new(
        SigHandler::Handler(handle_int),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let act_term = SigAction::new(
        SigHandler::Handler(handle_term),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        if signal::sigaction(Signal::SIGINT, &act_int).is_err() {
            warn!("could not install SIGINT handler");
        }
        if signal::sigaction(Signal::SIGTERM, &act_term).is_err() {
            warn!("could not install SIGTERM handler");
        }
    }
}

#[cfg(not(unix))]
fn install_handlers() {}

fn watch() {
    loop {
        let code = if GOT_INT.load(Ordering::SeqCst) {
            println!("Tests were stopped by SIGINT signal");
            Some(130)
        } else if GOT_TERM.load(Ordering::SeqCst) {
            println!("Tests were stopped by SIGTERM signal");
            Some(143)
        } else {
            None
        };
        if let Some(code) = code {
            run_registered_cleanup();
            std::process::exit(code);
        }
        thread::sleep(Duration::from_millis(100));
    }
}

/// Install handlers and the watcher thread once per process.
pub fn install() {
    INSTALLED.get_or_init(|| {
        install_handlers();
        let spawned = thread::Builder::new()
            .name("ct-signal-watch".into())
            .spawn(watch);
        if let Err(e) = spawned {
            warn!("could not start signal watcher: {e}");
        }
    });
}
