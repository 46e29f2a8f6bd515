use std::io;
use std::process::{Child, Command, ExitStatus};

use tracing::warn;

pub(super) fn configure_command(_cmd: &mut Command, inherited_fds: &[i32]) {
    if !inherited_fds.is_empty() {
        warn!(
            ?inherited_fds,
            "Inheriting file descriptors is not supported on this platform"
        );
    }
}

pub(super) fn has_exited(child: &mut Child) -> io::Result<bool> {
    Ok(child.try_wait()?.is_some())
}

pub(super) fn kill_process_tree(child: &mut Child) {
    let _ = child.kill();
}

pub(super) fn exit_code_from_status(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}
