use core::fmt;

use spin::Mutex;

use crate::error::KernelError;

/// Kernel initialization status tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
    NotStarted,
    InProgress,
    Completed,
    /// Came up, but something under it did not (a driver, the disk).
    Degraded,
    Failed(KernelError),
}

/// Kernel component status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentStatus {
    pub name: &'static str,
    pub status: InitStatus,
}

impl ComponentStatus {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            status: InitStatus::NotStarted,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, InitStatus::Completed | InitStatus::Degraded)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, InitStatus::Failed(_))
    }
}

/// Upper bound on tracked components. Fixed so the tracker works before
/// the heap exists.
pub const MAX_COMPONENTS: usize = 8;

/// Boot components in the order they come up.
#[derive(Debug, Clone, Copy)]
pub struct InitTracker {
    components: [ComponentStatus; MAX_COMPONENTS],
    len: usize,
}

impl InitTracker {
    pub const fn new() -> Self {
        Self {
            components: [ComponentStatus::new(""); MAX_COMPONENTS],
            len: 0,
        }
    }

    pub fn register(&mut self, name: &'static str) {
        if self.position(name).is_none() {
            self.push(ComponentStatus::new(name));
        }
    }

    pub fn update(&mut self, name: &'static str, status: InitStatus) {
        match self.position(name) {
            Some(index) => self.components[index].status = status,
            None => self.push(ComponentStatus { name, status }),
        }
    }

    pub fn status(&self, name: &str) -> Option<InitStatus> {
        self.position(name).map(|index| self.components[index].status)
    }

    pub fn statuses(&self) -> &[ComponentStatus] {
        &self.components[..self.len]
    }

    pub fn all_ready(&self) -> bool {
        !self.statuses().is_empty() && self.statuses().iter().all(ComponentStatus::is_complete)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.statuses().iter().position(|c| c.name == name)
    }

    fn push(&mut self, component: ComponentStatus) {
        if self.len == MAX_COMPONENTS {
            log::warn!("init: not tracking '{}', table full", component.name);
            return;
        }
        self.components[self.len] = component;
        self.len += 1;
    }
}

impl Default for InitTracker {
    fn default() -> Self {
        Self::new()
    }
}

static INIT_STATUS: Mutex<InitTracker> = Mutex::new(InitTracker::new());

/// Track kernel component initialization
pub fn register_component(name: &'static str) {
    crate::arch::without_interrupts(|| INIT_STATUS.lock().register(name));
}

pub fn update_component_status(name: &'static str, status: InitStatus) {
    crate::arch::without_interrupts(|| INIT_STATUS.lock().update(name, status));
}

/// Copy of the table as it stands.
pub fn snapshot() -> InitTracker {
    crate::arch::without_interrupts(|| *INIT_STATUS.lock())
}

pub fn all_components_ready() -> bool {
    crate::arch::without_interrupts(|| INIT_STATUS.lock().all_ready())
}

impl fmt::Display for InitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStatus::NotStarted => write!(f, "Not Started"),
            InitStatus::InProgress => write!(f, "In Progress"),
            InitStatus::Completed => write!(f, "Completed"),
            InitStatus::Degraded => write!(f, "Degraded"),
            InitStatus::Failed(err) => write!(f, "Failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;

    #[test]
    fn tracks_components_in_registration_order() {
        let mut tracker = InitTracker::new();
        tracker.register("Heap");
        tracker.register("Interrupts");
        tracker.register("Heap");
        assert_eq!(tracker.statuses().len(), 2);
        assert!(!tracker.all_ready());

        tracker.update("Heap", InitStatus::Completed);
        tracker.update("Interrupts", InitStatus::Degraded);
        assert!(tracker.all_ready());
        assert_eq!(tracker.statuses()[0].name, "Heap");
    }

    #[test]
    fn failure_is_sticky_until_updated() {
        let mut tracker = InitTracker::new();
        tracker.register("Interrupts");
        let err = KernelError::Config(ConfigError::SyscallInsideIrqRange);
        tracker.update("Interrupts", InitStatus::Failed(err));
        assert!(tracker.statuses()[0].is_failed());
        assert!(!tracker.all_ready());
        assert_eq!(tracker.status("Interrupts"), Some(InitStatus::Failed(err)));
        assert_eq!(tracker.status("Disk"), None);
    }

    #[test]
    fn empty_tracker_is_not_ready() {
        assert!(!InitTracker::new().all_ready());
    }

    #[test]
    fn overflow_is_ignored() {
        let mut tracker = InitTracker::new();
        let names = ["a", "b", "c", "d", "e", "f", "g", "h", "i"];
        for name in names {
            tracker.update(name, InitStatus::Completed);
        }
        assert_eq!(tracker.statuses().len(), MAX_COMPONENTS);
        assert_eq!(tracker.status("i"), None);
    }
}
