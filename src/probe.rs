//! Resident memory probes.
//!
//! The threshold trigger asks a [`MemoryProbe`] for the resident set size
//! of the process before each decision and again after each reclamation
//! pass. Reads are synchronous and cheap enough for the request path.
//!
//! # Sources
//!
//! | Platform | Primary | Fallback |
//! |----------|---------|----------|
//! | Linux | `procfs` process status (`VmRSS`) | `ps -o rss= -p <pid>` |
//! | Other unix | `ps -o rss= -p <pid>` | none |

use crate::{Error, Result};
use std::collections::VecDeque;
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Source of the current process' resident memory, in bytes.
pub trait MemoryProbe: Send + Sync {
    /// Reads resident memory in bytes.
    fn resident_bytes(&self) -> Result<u64>;
}

impl<P: MemoryProbe + ?Sized> MemoryProbe for Arc<P> {
    fn resident_bytes(&self) -> Result<u64> {
        (**self).resident_bytes()
    }
}

impl<P: MemoryProbe + ?Sized> MemoryProbe for Box<P> {
    fn resident_bytes(&self) -> Result<u64> {
        (**self).resident_bytes()
    }
}

/// Probe backed by OS process accounting.
#[derive(Debug, Clone, Copy)]
pub struct ProcessMemoryProbe {
    pid: u32,
}

impl ProcessMemoryProbe {
    /// Probe for the current process.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pid: std::process::id(),
        }
    }

    /// Probe for an arbitrary process id.
    #[must_use]
    pub const fn for_pid(pid: u32) -> Self {
        Self { pid }
    }

    /// Process id this probe reads.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    #[cfg(target_os = "linux")]
    fn read_proc_status(&self) -> Result<u64> {
        let proc_failed = |e: procfs::ProcError| Error::OperationFailed {
            operation: "read_proc_status".to_string(),
            cause: format!("pid {}: {e}", self.pid),
        };

        let pid = i32::try_from(self.pid)
            .map_err(|_| Error::InvalidInput(format!("pid out of range: {}", self.pid)))?;
        let status = procfs::process::Process::new(pid)
            .and_then(|process| process.status())
            .map_err(proc_failed)?;

        status
            .vmrss
            .map(|kb| kb.saturating_mul(1024))
            .ok_or_else(|| Error::OperationFailed {
                operation: "read_proc_status".to_string(),
                cause: format!("pid {} reports no VmRSS", self.pid),
            })
    }

    fn read_ps(&self) -> Result<u64> {
        let output = Command::new("ps")
            .args(["-o", "rss=", "-p", &self.pid.to_string()])
            .output()
            .map_err(|e| Error::OperationFailed {
                operation: "spawn_ps".to_string(),
                cause: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::OperationFailed {
                operation: "spawn_ps".to_string(),
                cause: format!("ps exited with {}", output.status),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_ps_rss(&stdout).ok_or_else(|| Error::OperationFailed {
            operation: "parse_ps_output".to_string(),
            cause: format!("unexpected ps output: {:?}", stdout.trim()),
        })
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn resident_bytes(&self) -> Result<u64> {
        #[cfg(target_os = "linux")]
        {
            match self.read_proc_status() {
                Ok(bytes) => return Ok(bytes),
                Err(e) => debug!(pid = self.pid, error = %e, "proc status unavailable, trying ps"),
            }
        }

        self.read_ps()
    }
}

/// Parses the output of `ps -o rss=`, which reports kilobytes.
#[must_use]
pub fn parse_ps_rss(output: &str) -> Option<u64> {
    output
        .split_whitespace()
        .next()
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb.saturating_mul(1024))
}

/// One queued reading of a [`ScriptedProbe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reading {
    Bytes(u64),
    Unavailable,
}

/// Probe that replays a queue of readings.
///
/// Once the queue drains, the last reading repeats. Used by the simulator
/// and by hosts that test their policy configuration without touching the
/// real process accounting.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    state: Mutex<ScriptState>,
}

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<Reading>,
    last: Option<Reading>,
}

impl ScriptedProbe {
    /// Creates an empty probe. Reads fail until a reading is queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a probe that always reports `bytes`.
    #[must_use]
    pub fn constant(bytes: u64) -> Self {
        let probe = Self::new();
        probe.push(bytes);
        probe
    }

    /// Creates a probe replaying `readings` in order.
    #[must_use]
    pub fn from_readings(readings: impl IntoIterator<Item = u64>) -> Self {
        let probe = Self::new();
        for bytes in readings {
            probe.push(bytes);
        }
        probe
    }

    /// Queues a reading.
    pub fn push(&self, bytes: u64) {
        self.lock().queue.push_back(Reading::Bytes(bytes));
    }

    /// Queues a failed read.
    pub fn push_failure(&self) {
        self.lock().queue.push_back(Reading::Unavailable);
    }

    /// Number of readings not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MemoryProbe for ScriptedProbe {
    fn resident_bytes(&self) -> Result<u64> {
        let mut state = self.lock();
        let reading = match state.queue.pop_front() {
            Some(reading) => {
                state.last = Some(reading);
                reading
            },
            None => state.last.unwrap_or(Reading::Unavailable),
        };

        match reading {
            Reading::Bytes(bytes) => Ok(bytes),
            Reading::Unavailable => Err(Error::OperationFailed {
                operation: "scripted_probe".to_string(),
                cause: "no reading available".to_string(),
            }),
        }
    }
}
