use anyhow::{bail, Result};
use std::{
    env,
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    sync::OnceLock,
};

/// Ensure a Docker API socket is reachable for testcontainers, pointing
/// `DOCKER_HOST` at a Podman socket when that is all there is.
///
/// # Errors
/// Returns an error if no Docker/Podman socket accepts connections.
pub fn ensure_container_runtime() -> Result<()> {
    static INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match INIT.get_or_init(init_container_runtime) {
        Ok(()) => Ok(()),
        Err(message) => bail!("{message}"),
    }
}

fn init_container_runtime() -> Result<(), String> {
    if let Ok(docker_host) = env::var("DOCKER_HOST") {
        return match docker_host.strip_prefix("unix://") {
            Some(path) if !socket_accepts(Path::new(path)) => Err(format!(
                "`DOCKER_HOST` is `{docker_host}`, but the socket is not accepting connections."
            )),
            _ => Ok(()),
        };
    }

    if socket_accepts(Path::new("/var/run/docker.sock")) {
        return Ok(());
    }

    if let Some(path) = podman_sockets().into_iter().find(|path| socket_accepts(path)) {
        env::set_var("DOCKER_HOST", format!("unix://{}", path.display()));
        return Ok(());
    }

    Err("No container runtime socket found. Start Docker or `podman.socket`, or set `DOCKER_HOST`.".to_string())
}

fn podman_sockets() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(dir) = env::var("XDG_RUNTIME_DIR") {
        candidates.push(Path::new(&dir).join("podman/podman.sock"));
    }
    candidates.push(PathBuf::from("/run/podman/podman.sock"));
    candidates
}

fn socket_accepts(path: &Path) -> bool {
    path.exists() && UnixStream::connect(path).is_ok()
}
