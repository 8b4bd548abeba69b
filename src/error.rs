//! Errors the bootstrap sequence can surface.
//!
//! Each subsystem keeps its own error type; `KernelError` only wraps them
//! so boot phases can use `?`. Driver and disk failures are not here since
//! boot carries on past them.

use core::fmt;

use log::SetLoggerError;

use crate::config::ConfigError;
use crate::drivers::router::RouterError;
use crate::interrupts::InterruptError;
use crate::memory::heap::AllocError;
use crate::task::SchedulerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    Config(ConfigError),
    Heap(AllocError),
    Interrupts(InterruptError),
    Scheduler(SchedulerError),
    Router(RouterError),
    /// A logger was installed twice.
    Logger,
}

impl From<ConfigError> for KernelError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<AllocError> for KernelError {
    fn from(err: AllocError) -> Self {
        Self::Heap(err)
    }
}

impl From<InterruptError> for KernelError {
    fn from(err: InterruptError) -> Self {
        Self::Interrupts(err)
    }
}

impl From<SchedulerError> for KernelError {
    fn from(err: SchedulerError) -> Self {
        Self::Scheduler(err)
    }
}

impl From<RouterError> for KernelError {
    fn from(err: RouterError) -> Self {
        Self::Router(err)
    }
}

impl From<SetLoggerError> for KernelError {
    fn from(_: SetLoggerError) -> Self {
        Self::Logger
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "config: {}", err),
            Self::Heap(err) => write!(f, "heap: {}", err),
            Self::Interrupts(err) => write!(f, "interrupts: {}", err),
            Self::Scheduler(err) => write!(f, "scheduler: {}", err),
            Self::Router(err) => write!(f, "keyboard: {}", err),
            Self::Logger => f.write_str("logger already installed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::ToString;

    fn validate(config: crate::KernelConfig) -> Result<(), KernelError> {
        config.validate()?;
        Ok(())
    }

    #[test]
    fn subsystem_errors_convert_with_question_mark() {
        let mut config = crate::KernelConfig::default();
        config.timer_hz = 0;
        assert_eq!(
            validate(config),
            Err(KernelError::Config(ConfigError::ZeroTimerFrequency))
        );
        assert!(validate(crate::KernelConfig::default()).is_ok());
    }

    #[test]
    fn display_names_the_subsystem() {
        let err = KernelError::from(RouterError::AlreadyAttached);
        assert!(err.to_string().starts_with("keyboard: "));
    }
}
