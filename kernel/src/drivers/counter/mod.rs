// Counter Driver Contract
//
// A free-running hardware counter with one alarm. `start` arms the counter
// at its maximum, `set_alarm` reprograms it to fire once the given count has
// elapsed and calls the registered callback from interrupt context.

pub mod aonpt;

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterError {
    /// Writing the counter configuration failed.
    Io,
    /// The operation needs a started counter.
    NotSupported,
}

impl fmt::Display for CounterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterError::Io => write!(f, "counter configuration write failed"),
            CounterError::NotSupported => write!(f, "counter is not running"),
        }
    }
}

/// Alarm callback, run in interrupt context with the counter that fired and
/// the user data given to `set_alarm`.
pub type CounterCallback = fn(counter: &dyn Counter, user_data: usize);

pub trait Counter {
    fn start(&self) -> Result<(), CounterError>;
    fn stop(&self) -> Result<(), CounterError>;
    fn read(&self) -> u32;
    fn set_alarm(&self, callback: CounterCallback, count: u32, user_data: usize) -> Result<(), CounterError>;
}
