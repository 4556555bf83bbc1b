use crate::perf::Capabilities;
use log::{debug, info};
use std::collections::BTreeSet;
use std::process::{Command, Output};

/// Sysfs files naming the socket each logical CPU sits on.
const PACKAGE_ID_GLOB: &str = "/sys/devices/system/cpu/cpu[0-9]*/topology/physical_package_id";

/// Capabilities of the live system, probed through the userspace `perf` tool and sysfs.
#[derive(Debug)]
pub struct PerfTool {
    /// Cached output of `perf list`.
    listing: String,
}

impl PerfTool {
    /// Probe the local machine by running `perf list`.
    pub fn probe() -> crate::Result<Self> {
        PerfTool::from_output(Command::new("perf").arg("list").output()?)
    }

    /// Capabilities from the captured output of `perf list`.
    fn from_output(output: Output) -> crate::Result<Self> {
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(crate::Error::ToolFailed(format!(
                "perf list exited with {} -- {}",
                output.status,
                stderr.trim()
            )));
        }
        let listing = std::str::from_utf8(output.stdout.as_slice())?.to_string();
        debug!("perf list reported {} lines", listing.lines().count());
        Ok(PerfTool { listing })
    }
}

impl Capabilities for PerfTool {
    fn event_listing(&self) -> &str {
        &self.listing
    }

    fn socket_count(&self) -> crate::Result<usize> {
        let mut packages = BTreeSet::new();
        for entry in glob::glob(PACKAGE_ID_GLOB)? {
            let id = std::fs::read_to_string(entry?)?.trim().parse::<u32>()?;
            packages.insert(id);
        }
        info!("Number of sockets: {}", packages.len());
        Ok(packages.len())
    }
}

/// Capabilities fixed up front, for replaying a capture on another machine and for tests.
#[derive(Debug, Clone, Default)]
pub struct FixedCapabilities {
    /// Recorded output of `perf list`.
    pub listing: String,
    /// Number of sockets on the recorded machine.
    pub sockets: usize,
}

impl FixedCapabilities {
    /// Create capabilities from a recorded `perf list` output and socket count.
    pub fn new(listing: &str, sockets: usize) -> Self {
        FixedCapabilities {
            listing: listing.to_string(),
            sockets,
        }
    }
}

impl Capabilities for FixedCapabilities {
    fn event_listing(&self) -> &str {
        &self.listing
    }

    fn socket_count(&self) -> crate::Result<usize> {
        Ok(self.sockets)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;

    fn output(code: i32, stdout: &str) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: b"perf: command not permitted\n".to_vec(),
        }
    }

    #[test]
    fn test_perf_list_output() {
        let tool = PerfTool::from_output(output(0, "  cycles  [Hardware event]\n")).unwrap();
        assert!(tool.supports_event("cycles"));

        match PerfTool::from_output(output(1, "")) {
            Err(crate::Error::ToolFailed(ref msg)) => assert!(msg.contains("not permitted")),
            x => panic!("unexpected result {:?}", x),
        }
    }
}
