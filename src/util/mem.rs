//! Process-memory probing for the performance recorder.

use std::sync::Mutex;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use super::lock::mutex_lock;

/// Reports the resident memory of the current process.
pub trait MemoryProbe: Send + Sync {
    /// Resident set size in bytes, or `None` when the platform gives no
    /// answer.
    fn resident_bytes(&self) -> Option<u64>;
}

/// Probe backed by `sysinfo`, refreshing only this process.
pub struct ProcessMemoryProbe {
    pid: Pid,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Option<Self> {
        match sysinfo::get_current_pid() {
            Ok(pid) => Some(Self {
                pid,
                system: Mutex::new(System::new()),
            }),
            Err(reason) => {
                debug!(reason, "current pid unavailable, memory probing disabled");
                None
            }
        }
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let mut system = mutex_lock(&self.system, "util::mem", "resident_bytes");
        system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        system.process(self.pid).map(|process| process.memory())
    }
}

/// Probe returning a settable value, for tests and embedders that feed their
/// own readings.
#[derive(Debug)]
pub struct FixedMemoryProbe {
    bytes: Mutex<u64>,
}

impl FixedMemoryProbe {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: Mutex::new(bytes),
        }
    }

    pub fn set(&self, bytes: u64) {
        *mutex_lock(&self.bytes, "util::mem", "set") = bytes;
    }
}

impl MemoryProbe for FixedMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        Some(*mutex_lock(&self.bytes, "util::mem", "resident_bytes"))
    }
}

/// Probe that reports nothing; memory figures degrade to zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMemoryProbe;

impl MemoryProbe for NullMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}
