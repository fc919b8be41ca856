//! Peripheral addresses.

use btleplug::api::BDAddr;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// 48-bit BLE device address.
///
/// Used as the deduplication key while scanning. The most significant byte
/// comes first, matching the `AA:BB:CC:DD:EE:FF` text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeripheralAddress([u8; 6]);

impl PeripheralAddress {
    /// Create an address from its six bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Get the raw address bytes.
    pub const fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Check for the all-zero address, reported when the OS hides the real one.
    pub fn is_unspecified(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Get the address as the integer form used by the OS Bluetooth stacks.
    pub fn as_u64(&self) -> u64 {
        self.0
            .iter()
            .fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
    }
}

impl From<u64> for PeripheralAddress {
    /// The upper 16 bits are discarded.
    fn from(value: u64) -> Self {
        let be = value.to_be_bytes();
        Self([be[2], be[3], be[4], be[5], be[6], be[7]])
    }
}

impl From<BDAddr> for PeripheralAddress {
    fn from(addr: BDAddr) -> Self {
        Self(addr.into_inner())
    }
}

impl From<PeripheralAddress> for BDAddr {
    fn from(addr: PeripheralAddress) -> Self {
        BDAddr::from(addr.0)
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for PeripheralAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidAddress {
            value: s.to_string(),
        };

        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(bytes))
    }
}
