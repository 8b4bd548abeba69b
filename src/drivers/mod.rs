//! # Device Drivers
//!
//! Every device implements [`Driver`] and is handed to the
//! [`DriverRegistry`] as a shared trait object. Drivers that need an IRQ
//! bind themselves to the dispatcher with [`bind_irq`]; the dispatcher
//! never learns which concrete driver sits behind a vector.
//!
//! | Driver           | Ports                  | IRQ |
//! |------------------|------------------------|-----|
//! | `KeyboardDriver` | 0x60, 0x64             | 1   |
//! | `PciController`  | 0xCF8, 0xCFC           | -   |
//! | `AtaDriver`      | base..base+8, ctrl     | 14  |
//! | `SpeakerDriver`  | 0x42, 0x43, 0x61       | -   |

pub mod ata;
pub mod keyboard;
pub mod pci;
pub mod router;
pub mod speaker;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

use crate::hal::PortRange;
use crate::interrupts::{InterruptDispatcher, InterruptError, InterruptHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// Nothing answered at the driver's ports.
    NoDevice,
    Timeout,
    /// The device reported an error; carries its status byte.
    DeviceError(u8),
    /// Controller self test returned something other than the pass code.
    SelfTestFailed(u8),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoDevice => f.write_str("no device present"),
            Self::Timeout => f.write_str("device timed out"),
            Self::DeviceError(status) => write!(f, "device error, status {:#04x}", status),
            Self::SelfTestFailed(code) => write!(f, "self test failed with {:#04x}", code),
        }
    }
}

/// Lifecycle of one device.
pub trait Driver: Send {
    fn name(&self) -> &'static str;

    fn activate(&mut self) -> Result<(), DriverError>;

    fn deactivate(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn reset(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    /// Ports this driver drives exclusively. Not arbitrated.
    fn ports(&self) -> &[PortRange] {
        &[]
    }
}

pub type SharedDriver = Arc<Mutex<dyn Driver>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivationSummary {
    pub activated: usize,
    pub failed: usize,
}

/// Ordered driver list. Insertion order is activation order.
///
/// Registering the same driver twice, or two drivers over the same ports,
/// is not rejected; [`port_conflicts`](Self::port_conflicts) only reports it.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<SharedDriver>,
}

impl DriverRegistry {
    pub const fn new() -> Self {
        Self { drivers: Vec::new() }
    }

    pub fn add(&mut self, driver: SharedDriver) {
        self.drivers.push(driver);
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.drivers.iter().map(|d| d.lock().name()).collect()
    }

    /// Activates every driver in insertion order. A failure is logged and
    /// the remaining drivers still get their turn.
    pub fn activate_all(&self) -> ActivationSummary {
        self.run_all(self.drivers.iter(), "activate", |d| d.activate())
    }

    /// Reverse of activation order.
    pub fn deactivate_all(&self) -> ActivationSummary {
        self.run_all(self.drivers.iter().rev(), "deactivate", |d| d.deactivate())
    }

    pub fn reset_all(&self) -> ActivationSummary {
        self.run_all(self.drivers.iter(), "reset", |d| d.reset())
    }

    fn run_all<'a, I, F>(&self, drivers: I, action: &str, mut op: F) -> ActivationSummary
    where
        I: Iterator<Item = &'a SharedDriver>,
        F: FnMut(&mut dyn Driver) -> Result<(), DriverError>,
    {
        let mut summary = ActivationSummary::default();
        for driver in drivers {
            let mut driver = driver.lock();
            match op(&mut *driver) {
                Ok(()) => {
                    log::info!("drivers: {} {} ok", driver.name(), action);
                    summary.activated += 1;
                }
                Err(e) => {
                    log::warn!("drivers: {} {} failed: {}", driver.name(), action, e);
                    summary.failed += 1;
                }
            }
        }
        summary
    }

    /// Pairs of registered drivers whose declared ports overlap.
    pub fn port_conflicts(&self) -> Vec<(&'static str, &'static str)> {
        let mut conflicts = Vec::new();
        for (i, a) in self.drivers.iter().enumerate() {
            for b in &self.drivers[i + 1..] {
                if Arc::ptr_eq(a, b) {
                    continue;
                }
                let (a, b) = (a.lock(), b.lock());
                let overlap = a
                    .ports()
                    .iter()
                    .any(|pa| b.ports().iter().any(|pb| pa.overlaps(pb)));
                if overlap {
                    conflicts.push((a.name(), b.name()));
                }
            }
        }
        conflicts
    }
}

/// Wraps `driver` for sharing and binds it to IRQ `line`. The returned
/// handle can go into the registry as well.
pub fn bind_irq<D>(
    dispatcher: &InterruptDispatcher,
    line: u8,
    driver: D,
) -> Result<Arc<Mutex<D>>, InterruptError>
where
    D: InterruptHandler + 'static,
{
    let driver = Arc::new(Mutex::new(driver));
    dispatcher.register_irq(line, driver.clone())?;
    Ok(driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::sync::Mutex as StdMutex;

    type Journal = Arc<StdMutex<Vec<String>>>;

    struct Fake {
        name: &'static str,
        fail: bool,
        ports: [PortRange; 1],
        journal: Journal,
    }

    impl Fake {
        fn shared(name: &'static str, fail: bool, port: u16, journal: &Journal) -> SharedDriver {
            Arc::new(Mutex::new(Fake {
                name,
                fail,
                ports: [PortRange::single(port)],
                journal: journal.clone(),
            }))
        }

        fn record(&self, what: &str) {
            self.journal.lock().unwrap().push(format!("{} {}", what, self.name));
        }
    }

    impl Driver for Fake {
        fn name(&self) -> &'static str {
            self.name
        }

        fn activate(&mut self) -> Result<(), DriverError> {
            self.record("activate");
            if self.fail {
                Err(DriverError::NoDevice)
            } else {
                Ok(())
            }
        }

        fn deactivate(&mut self) -> Result<(), DriverError> {
            self.record("deactivate");
            Ok(())
        }

        fn reset(&mut self) -> Result<(), DriverError> {
            self.record("reset");
            if self.fail {
                Err(DriverError::Timeout)
            } else {
                Ok(())
            }
        }

        fn ports(&self) -> &[PortRange] {
            &self.ports
        }
    }

    fn journal() -> Journal {
        Arc::new(StdMutex::new(Vec::new()))
    }

    #[test]
    fn failed_activation_does_not_stop_the_rest() {
        let j = journal();
        let mut registry = DriverRegistry::new();
        registry.add(Fake::shared("A", false, 0x10, &j));
        registry.add(Fake::shared("B", true, 0x20, &j));
        registry.add(Fake::shared("C", false, 0x30, &j));

        let summary = registry.activate_all();
        assert_eq!(summary, ActivationSummary { activated: 2, failed: 1 });
        assert_eq!(
            *j.lock().unwrap(),
            vec!["activate A", "activate B", "activate C"]
        );
    }

    #[test]
    fn deactivation_runs_in_reverse() {
        let j = journal();
        let mut registry = DriverRegistry::new();
        registry.add(Fake::shared("A", false, 0x10, &j));
        registry.add(Fake::shared("B", false, 0x20, &j));

        registry.deactivate_all();
        assert_eq!(*j.lock().unwrap(), vec!["deactivate B", "deactivate A"]);
    }

    #[test]
    fn reset_continues_past_failures() {
        let j = journal();
        let mut registry = DriverRegistry::new();
        registry.add(Fake::shared("A", true, 0x10, &j));
        registry.add(Fake::shared("B", false, 0x20, &j));

        let summary = registry.reset_all();
        assert_eq!(summary, ActivationSummary { activated: 1, failed: 1 });
        assert_eq!(registry.names(), vec!["A", "B"]);
    }

    /// Known limitation: the registry accepts the same driver twice and
    /// activates it twice.
    #[test]
    fn duplicate_registration_is_accepted() {
        let j = journal();
        let driver = Fake::shared("A", false, 0x10, &j);
        let mut registry = DriverRegistry::new();
        registry.add(driver.clone());
        registry.add(driver);

        assert_eq!(registry.len(), 2);
        registry.activate_all();
        assert_eq!(*j.lock().unwrap(), vec!["activate A", "activate A"]);
        assert!(registry.port_conflicts().is_empty());
    }

    /// Known limitation: overlapping ports are reported, never refused.
    #[test]
    fn port_collisions_are_reported_not_refused() {
        let j = journal();
        let mut registry = DriverRegistry::new();
        registry.add(Fake::shared("A", false, 0x60, &j));
        registry.add(Fake::shared("B", false, 0x60, &j));
        registry.add(Fake::shared("C", false, 0x70, &j));

        assert_eq!(registry.port_conflicts(), vec![("A", "B")]);
        assert_eq!(registry.activate_all().activated, 3);
    }
}
