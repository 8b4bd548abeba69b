//! Routes keys between the emulated machine and its machine-code monitor.
//!
//! ```text
//!              toggle key
//!   Emulation ───────────▶ Terminal     (enter monitor)
//!       ▲                     │
//!       └─────────────────────┘         (graphics mode + palette)
//!              toggle key
//! ```
//!
//! The toggle fires on every delivery of the toggle code, key repeat
//! included. Key-up events only matter to the emulator.

use alloc::boxed::Box;
use core::fmt;

use crate::drivers::keyboard::KeyboardEventHandler;

/// What the router talks to once boot hands control to the emulator.
pub trait EmulatorIo: Send {
    fn key_down(&mut self, code: u8);
    fn key_up(&mut self, code: u8);
    /// Switch to the interactive monitor.
    fn enter_monitor(&mut self);
    fn monitor_key_down(&mut self, code: u8);
    fn set_graphics_mode(&mut self);
    fn reload_palette(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Emulation,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterError {
    AlreadyAttached,
}

impl fmt::Display for RouterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::AlreadyAttached => f.write_str("keyboard router already has a target"),
        }
    }
}

pub struct KeyboardEventRouter {
    mode: Mode,
    toggle_key: u8,
    target: Option<Box<dyn EmulatorIo>>,
    /// Keys that arrived before a target was attached.
    dropped: u64,
}

impl KeyboardEventRouter {
    pub const fn new(toggle_key: u8) -> Self {
        Self {
            mode: Mode::Emulation,
            toggle_key,
            target: None,
            dropped: 0,
        }
    }

    /// Connects the emulator. Only the first call succeeds.
    pub fn attach(&mut self, target: Box<dyn EmulatorIo>) -> Result<(), RouterError> {
        if self.target.is_some() {
            return Err(RouterError::AlreadyAttached);
        }
        self.target = Some(target);
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.target.is_some()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn toggle(&mut self) {
        self.mode = match self.mode {
            Mode::Emulation => Mode::Terminal,
            Mode::Terminal => Mode::Emulation,
        };
        log::debug!("keyboard: switched to {:?}", self.mode);

        let Some(target) = self.target.as_mut() else {
            return;
        };
        match self.mode {
            Mode::Terminal => target.enter_monitor(),
            Mode::Emulation => {
                target.set_graphics_mode();
                target.reload_palette();
            }
        }
    }
}

impl KeyboardEventHandler for KeyboardEventRouter {
    fn on_key_down(&mut self, code: u8) {
        if code == self.toggle_key {
            self.toggle();
            return;
        }
        let Some(target) = self.target.as_mut() else {
            self.dropped += 1;
            return;
        };
        match self.mode {
            Mode::Emulation => target.key_down(code),
            Mode::Terminal => target.monitor_key_down(code),
        }
    }

    fn on_key_up(&mut self, code: u8) {
        if self.mode == Mode::Terminal {
            return;
        }
        match self.target.as_mut() {
            Some(target) => target.key_up(code),
            None => self.dropped += 1,
        }
    }
}
