// SPDX-License-Identifier: MPL-2.0

//! The registry of encrypted devices.

use std::collections::BTreeMap;

use aster_block::BlockDevice;

use crate::{device::EncryptedDevice, os::Mutex, prelude::*};

/// The registry of the encrypted devices attached by one administrator.
///
/// Devices are looked up by name. Dropping the registry tears down every
/// device nobody else refers to.
#[derive(Default)]
pub struct BdeClass {
    devices: Mutex<BTreeMap<String, Arc<EncryptedDevice>>>,
}

impl BdeClass {
    /// The suffix appended to the backing device name by [`attach`](Self::attach).
    pub const NAME_SUFFIX: &'static str = ".bde";

    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an encrypted device named after `backing`.
    pub fn attach(
        &self,
        backing: Arc<dyn BlockDevice>,
        passphrase: &[u8],
    ) -> Result<Arc<EncryptedDevice>> {
        let name = format!("{}{}", backing.name(), Self::NAME_SUFFIX);
        self.attach_named(&name, backing, passphrase)
    }

    /// Attaches an encrypted device named `name` on `backing`.
    pub fn attach_named(
        &self,
        name: &str,
        backing: Arc<dyn BlockDevice>,
        passphrase: &[u8],
    ) -> Result<Arc<EncryptedDevice>> {
        if name.is_empty() {
            return_errno_with_msg!(InvalidArgs, "device name is empty");
        }
        if self.devices.lock().contains_key(name) {
            return_errno!(AlreadyExists);
        }

        // Unlocking is slow, so it runs without the registry locked.
        let device = EncryptedDevice::attach(name, backing, passphrase)?;

        let mut devices = self.devices.lock();
        if devices.contains_key(name) {
            // Lost a race; dropping the new device stops it.
            return_errno!(AlreadyExists);
        }
        devices.insert(name.to_string(), device.clone());
        Ok(device)
    }

    /// Stops and removes the device named `name`.
    ///
    /// Fails with `Busy` while the device is held open, and with `NotFound`
    /// if there is no such device, e.g., because it has been dismantled.
    pub fn dismantle(&self, name: &str) -> Result<()> {
        let device = {
            let mut devices = self.devices.lock();
            let Some(device) = devices.get(name) else {
                return_errno!(NotFound);
            };
            if let Err(e) = device.begin_dismantle() {
                warn!("[Bde] refused to dismantle {}: {}", name, e);
                return Err(e);
            }
            devices.remove(name)
        };

        // The worker is joined without the registry locked.
        if let Some(device) = device {
            device.teardown();
            info!("[Bde] dismantled {}", name);
        }
        Ok(())
    }

    /// Returns the device named `name`.
    pub fn get(&self, name: &str) -> Option<Arc<EncryptedDevice>> {
        self.devices.lock().get(name).cloned()
    }

    /// Returns the names of all devices.
    pub fn names(&self) -> Vec<String> {
        self.devices.lock().keys().cloned().collect()
    }
}

impl Debug for BdeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BdeClass")
            .field("devices", &self.names())
            .finish()
    }
}
