//! Process-level plumbing: titles and privilege drop.

use tracing::debug;

use crate::error::{CorsairError, Result};

/// Best-effort process title, visible in `ps`/`top`. Linux truncates to the
/// kernel's comm length; other platforms are a no-op.
pub fn set_title(title: &str) {
    #[cfg(target_os = "linux")]
    {
        match std::ffi::CString::new(title) {
            Ok(name) => {
                if let Err(e) = nix::sys::prctl::set_name(&name) {
                    debug!(error = %e, title, "failed to set process title");
                }
            }
            Err(_) => debug!(title, "process title contains a NUL byte"),
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = title;
    }
}

/// Drop to the configured user/group. Group first, then user: once the uid
/// goes, setgid is no longer permitted.
pub fn drop_privileges(user: Option<&str>, group: Option<&str>) -> Result<()> {
    if let Some(name) = group {
        let group = nix::unistd::Group::from_name(name)
            .map_err(|e| CorsairError::privilege(format!("group lookup failed: {e}")))?
            .ok_or_else(|| CorsairError::privilege(format!("no such group: {name}")))?;
        nix::unistd::setgid(group.gid)
            .map_err(|e| CorsairError::privilege(format!("setgid({}) failed: {e}", group.gid)))?;
        debug!(group = name, gid = %group.gid, "dropped group");
    }
    if let Some(name) = user {
        let user = nix::unistd::User::from_name(name)
            .map_err(|e| CorsairError::privilege(format!("user lookup failed: {e}")))?
            .ok_or_else(|| CorsairError::privilege(format!("no such user: {name}")))?;
        nix::unistd::setuid(user.uid)
            .map_err(|e| CorsairError::privilege(format!("setuid({}) failed: {e}", user.uid)))?;
        debug!(user = name, uid = %user.uid, "dropped user");
    }
    Ok(())
}

/// On Linux, arrange for the kernel to kill this worker if the supervisor
/// dies without reaping it. Safety net only; orderly shutdown goes through
/// signals.
pub fn die_with_parent() {
    #[cfg(target_os = "linux")]
    {
        if let Err(e) = nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL) {
            tracing::warn!(error = %e, "failed to set parent-death signal");
        }
    }
}
