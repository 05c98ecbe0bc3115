//! Peripheral lifecycle contract.
//!
//! Devices are wired at bring-up with explicit dependencies: the
//! initialization context hands each one the scheduler and the signal
//! lines, and bring-up code registers whatever [`crate::bus::BusTarget`]s
//! the device exposes. There is no global device registry to look things up
//! in afterwards.

use std::cell::RefCell;
use std::rc::Rc;

use crate::scheduler::Scheduler;
use crate::signal::SignalSet;

/// Identifies a device on the backplane; also used as the signal-line
/// source id and the page-entry owner id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceId(pub u16);

/// Dependencies handed to a device exactly once, after all devices exist
/// and the bus is assembled.
#[derive(Clone)]
pub struct DeviceContext {
    /// The machine's scheduler; devices schedule callbacks instead of
    /// polling.
    pub scheduler: Rc<RefCell<Scheduler>>,
    /// Shared signal lines.
    pub signals: Rc<RefCell<SignalSet>>,
    /// This device's backplane identity.
    pub device_id: DeviceId,
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

/// Contract every peripheral satisfies.
pub trait Device {
    /// Human-readable device name.
    fn name(&self) -> &str;

    /// Called once after all devices exist and are wired; the place to
    /// schedule a first event or capture context handles.
    fn initialize(&mut self, ctx: &DeviceContext);

    /// Restores power-on state. Must not re-register bus handlers; the
    /// wiring installed at bring-up stays.
    fn reset(&mut self);
}

/// Shared handle to a device.
pub type DeviceRef = Rc<RefCell<dyn Device>>;

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{Device, DeviceContext, DeviceId};
    use crate::scheduler::Scheduler;
    use crate::signal::SignalSet;

    struct ProbeDevice {
        initialized: bool,
        resets: u32,
    }

    impl Device for ProbeDevice {
        fn name(&self) -> &str {
            "probe"
        }

        fn initialize(&mut self, ctx: &DeviceContext) {
            assert_eq!(ctx.device_id, DeviceId(9));
            self.initialized = true;
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn lifecycle_hooks_receive_identity() {
        let ctx = DeviceContext {
            scheduler: Rc::new(RefCell::new(Scheduler::new())),
            signals: Rc::new(RefCell::new(SignalSet::new())),
            device_id: DeviceId(9),
        };
        let mut device = ProbeDevice {
            initialized: false,
            resets: 0,
        };
        device.initialize(&ctx);
        device.reset();
        assert!(device.initialized);
        assert_eq!(device.resets, 1);
    }
}
