//! Invokes the external notify/script hook on state transitions, exposing
//! the negotiated DHCP fields as environment variables the way the
//! original tool's `udhcpc` scripts expect.

use std::path::Path;
use std::process::{Command, ExitStatus};

use log::{debug, warn};

/// Runs `script <event>` with `interface` and each of `vars` set in the
/// child's environment. Missing fields are simply omitted by the caller,
/// not passed as empty strings.
pub fn run_hook(
    script: &Path,
    event: &str,
    interface: &str,
    vars: &[(&str, String)],
) -> std::io::Result<ExitStatus> {
    debug!("running hook {} {event}", script.display());

    let mut cmd = Command::new(script);
    cmd.arg(event).env("interface", interface);

    for (key, value) in vars {
        cmd.env(key, value);
    }

    let status = cmd.status()?;
    if !status.success() {
        warn!("hook {} {event} exited with {status}", script.display());
    }

    Ok(status)
}
