//! Scripted port space for driver tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::PortIo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read8(u16),
    Write8(u16, u8),
    Read16(u16),
    Write16(u16, u16),
    Read32(u16),
    Write32(u16, u32),
}

#[derive(Default)]
struct State {
    queued: HashMap<u16, VecDeque<u32>>,
    sticky: HashMap<u16, u32>,
    log: Vec<Access>,
    /// Answers config-space reads on 0xCFC from the last 0xCF8 address.
    pci: Option<Box<dyn FnMut(u32) -> u32 + Send>>,
    pci_address: u32,
}

/// Cloneable handle; clones share the same port space so a test can keep
/// one while the driver owns another.
#[derive(Clone, Default)]
pub struct MockPorts {
    state: Arc<Mutex<State>>,
}

impl MockPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one value returned by the next read of `port`.
    pub fn push(&self, port: u16, value: u32) {
        let mut state = self.state.lock().unwrap();
        state.queued.entry(port).or_default().push_back(value);
    }

    /// Value returned by reads of `port` once its queue is empty.
    pub fn set(&self, port: u16, value: u32) {
        self.state.lock().unwrap().sticky.insert(port, value);
    }

    pub fn on_pci_read(&self, respond: impl FnMut(u32) -> u32 + Send + 'static) {
        self.state.lock().unwrap().pci = Some(Box::new(respond));
    }

    pub fn log(&self) -> Vec<Access> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn writes_to(&self, port: u16) -> Vec<u32> {
        self.log()
            .into_iter()
            .filter_map(|access| match access {
                Access::Write8(p, v) if p == port => Some(u32::from(v)),
                Access::Write16(p, v) if p == port => Some(u32::from(v)),
                Access::Write32(p, v) if p == port => Some(v),
                _ => None,
            })
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    fn read(&self, port: u16, access: Access) -> u32 {
        let mut state = self.state.lock().unwrap();
        state.log.push(access);
        if let Some(value) = state.queued.get_mut(&port).and_then(VecDeque::pop_front) {
            return value;
        }
        if port == 0xCFC {
            let address = state.pci_address;
            if let Some(respond) = state.pci.as_mut() {
                return respond(address);
            }
        }
        state.sticky.get(&port).copied().unwrap_or(0)
    }

    fn write(&self, port: u16, value: u32, access: Access) {
        let mut state = self.state.lock().unwrap();
        state.log.push(access);
        if port == 0xCF8 {
            state.pci_address = value;
        }
    }
}

impl PortIo for MockPorts {
    fn read_u8(&mut self, port: u16) -> u8 {
        self.read(port, Access::Read8(port)) as u8
    }

    fn write_u8(&mut self, port: u16, value: u8) {
        self.write(port, u32::from(value), Access::Write8(port, value));
    }

    fn read_u16(&mut self, port: u16) -> u16 {
        self.read(port, Access::Read16(port)) as u16
    }

    fn write_u16(&mut self, port: u16, value: u16) {
        self.write(port, u32::from(value), Access::Write16(port, value));
    }

    fn read_u32(&mut self, port: u16) -> u32 {
        self.read(port, Access::Read32(port))
    }

    fn write_u32(&mut self, port: u16, value: u32) {
        self.write(port, value, Access::Write32(port, value));
    }
}
