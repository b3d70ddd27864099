// Device Drivers
//
// Drivers that sit directly on the interrupt layer. Each one connects its
// interrupt statically with `irq_connect!` and exposes a small contract
// trait; hardware access goes through a per-driver register trait so the
// driver logic runs unchanged against a simulator in tests.

pub mod counter;

/// Device power state driven by the power-management hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PowerState {
    Active = 0,
    Suspend = 1,
}

impl PowerState {
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => PowerState::Suspend,
            _ => PowerState::Active,
        }
    }
}

/// Suspend/resume hooks of a device.
#[cfg(feature = "device-power-management")]
pub trait DevicePm {
    /// Enter `state`, saving or restoring whatever the device loses across
    /// suspend.
    fn set_power_state(&self, state: PowerState);
    fn get_power_state(&self) -> PowerState;
}
