//! Target process discovery.
//!
//! The sync loop only needs three facts about a candidate: its id, how long
//! it has been running, and whether it is still alive. The trait keeps the
//! loop testable against scripted process tables.

use std::sync::RwLock;
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// A live process that matches the target name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Process id.
    pub pid: u32,
    /// Time since the process started.
    pub uptime: Duration,
}

/// Enumerates candidate target processes by name.
pub trait ProcessDiscovery: Send + Sync {
    /// All live processes whose executable name matches `name`.
    fn candidates(&self, name: &str) -> Vec<Candidate>;

    /// Whether the process with the given id is still running.
    fn is_alive(&self, pid: u32) -> bool;
}

/// sysinfo-backed discovery over the OS process table.
pub struct SystemDiscovery {
    system: RwLock<System>,
}

impl SystemDiscovery {
    pub fn new() -> Self {
        Self {
            system: RwLock::new(System::new()),
        }
    }

    fn refresh(&self) {
        let mut system = self.system.write().unwrap();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new(),
        );
    }
}

impl Default for SystemDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessDiscovery for SystemDiscovery {
    fn candidates(&self, name: &str) -> Vec<Candidate> {
        self.refresh();
        let system = self.system.read().unwrap();
        system
            .processes()
            .values()
            .filter(|p| p.name().eq_ignore_ascii_case(name))
            .map(|p| Candidate {
                pid: p.pid().as_u32(),
                uptime: Duration::from_secs(p.run_time()),
            })
            .collect()
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.refresh();
        let system = self.system.read().unwrap();
        system.process(Pid::from_u32(pid)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_alive() {
        let discovery = SystemDiscovery::new();
        assert!(discovery.is_alive(std::process::id()));
    }

    #[test]
    fn test_nonexistent_process_is_not_alive() {
        let discovery = SystemDiscovery::new();
        assert!(!discovery.is_alive(4_000_000_000));
    }

    #[test]
    fn test_candidates_for_unlikely_name_is_empty() {
        let discovery = SystemDiscovery::new();
        assert!(discovery
            .candidates("no-such-process-name-hopefully")
            .is_empty());
    }
}
