//! Resident-set-size probing for the run generator's memory-triggered spill.

use std::sync::OnceLock;

use sysinfo::{Pid, System};

fn system() -> &'static std::sync::Mutex<System> {
    static SYSTEM: OnceLock<std::sync::Mutex<System>> = OnceLock::new();
    SYSTEM.get_or_init(|| std::sync::Mutex::new(System::new()))
}

/// Current process RSS in bytes, or `None` if it could not be determined.
///
/// A best-effort probe: callers treat `None` as "can't tell, spill on the insert
/// counter instead" rather than failing the session outright.
pub fn current_rss() -> Option<u64> {
    let pid = Pid::from_u32(std::process::id());
    let mut sys = system().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    sys.refresh_process(pid);
    sys.process(pid).map(|p| p.memory())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_some_rss_for_the_current_process() {
        assert!(current_rss().is_some());
    }
}
