use std::io;
use std::os::unix::io::RawFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus};

use libc::{FD_CLOEXEC, F_GETFD, F_SETFD, SIGKILL};
use tracing::warn;

/// Put the child in its own process group, so that the whole tree can be
/// killed on timeout, and clear close-on-exec on the descriptors the child
/// should inherit.
pub(super) fn configure_command(cmd: &mut Command, inherited_fds: &[RawFd]) {
    cmd.process_group(0);
    if inherited_fds.is_empty() {
        return;
    }

    let fds = inherited_fds.to_vec();
    // SAFETY: only async-signal-safe functions (`fcntl`) are called between
    // `fork` and `exec`.
    unsafe {
        cmd.pre_exec(move || {
            for fd in &fds {
                let flags = libc::fcntl(*fd, F_GETFD);
                if flags < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::fcntl(*fd, F_SETFD, flags & !FD_CLOEXEC) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}

/// Whether the child has exited, without reaping it. While the child is a
/// zombie its PID, and so its process group ID, cannot be reused, which keeps
/// a later [`kill_process_tree`] from hitting an unrelated group.
pub(super) fn has_exited(child: &mut Child) -> io::Result<bool> {
    let pid: libc::id_t = child.id();
    // SAFETY: `siginfo_t` is plain data, and `waitid` only writes into it.
    let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
    let result = unsafe {
        libc::waitid(
            libc::P_PID,
            pid,
            &mut info,
            libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
        )
    };
    if result < 0 {
        let err = io::Error::last_os_error();
        return match err.kind() {
            io::ErrorKind::Interrupted => Ok(false),
            _ => Err(err),
        };
    }
    // With `WNOHANG`, `si_pid` stays zero while the child is still running.
    Ok(unsafe { info.si_pid() } != 0)
}

/// Kill the child's entire process group.
pub(super) fn kill_process_tree(child: &mut Child) {
    match i32::try_from(child.id()) {
        Ok(pid) => {
            // The child is the leader of its own process group, so `-pid`
            // addresses every process it spawned as well.
            unsafe { libc::kill(-pid, SIGKILL) };
        }
        Err(err) => {
            warn!(?err, "Child PID out of range, killing only the child");
            let _ = child.kill();
        }
    }
}

/// Shell convention: a process killed by signal `N` reports `128 + N`.
pub(super) fn exit_code_from_status(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}
