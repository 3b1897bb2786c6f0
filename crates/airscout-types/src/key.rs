// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Composite device keys.
//!
//! A [`DeviceKey`] is the 16-byte identity of a tracked device:
//! `(phy_id: u32, salt: u48, mac: u48)`, encoded big-endian in that order.
//! The textual form is `PPPPPPPP_SSSSSSSSSSSS_MMMMMMMMMMMM` (hex fields,
//! underscore separated) and is stable across versions.
//!
//! Keys are immutable once assigned. The salt is carried so that two devices
//! with the same `(phy, mac)` pair remain representable; the common-info
//! update path always produces salt 0.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::mac::MacAddr;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("malformed device key '{0}'")]
    InvalidKey(String),

    #[error("malformed MAC address '{0}'")]
    InvalidMac(String),

    #[error("field exceeds 48 bits: {0:#x}")]
    FieldOverflow(u64),
}

/// 16-byte composite device identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceKey {
    phy_id: u32,
    salt: u64,
    mac: u64,
}

impl DeviceKey {
    /// Key for a device observed by `phy_id` at `mac`, salt 0.
    pub fn new(phy_id: u32, mac: MacAddr) -> Self {
        Self {
            phy_id,
            salt: 0,
            mac: mac.to_u64(),
        }
    }

    /// Key with an explicit salt, for callers that must disambiguate
    /// devices sharing a `(phy, mac)` pair.
    pub fn with_salt(phy_id: u32, mac: MacAddr, salt: u64) -> Result<Self, KeyError> {
        if salt > 0xffff_ffff_ffff {
            return Err(KeyError::FieldOverflow(salt));
        }
        Ok(Self {
            phy_id,
            salt,
            mac: mac.to_u64(),
        })
    }

    pub fn phy_id(&self) -> u32 {
        self.phy_id
    }

    pub fn salt(&self) -> u64 {
        self.salt
    }

    pub fn mac(&self) -> MacAddr {
        MacAddr::from_u64(self.mac)
    }

    /// Canonical 16-byte encoding: `[phy_id BE:4][salt BE:6][mac BE:6]`.
    pub fn as_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&self.phy_id.to_be_bytes());
        out[4..10].copy_from_slice(&self.salt.to_be_bytes()[2..]);
        out[10..].copy_from_slice(&self.mac.to_be_bytes()[2..]);
        out
    }

    /// Inverse of [`DeviceKey::as_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != 16 {
            return Err(KeyError::InvalidKey(format!("{} bytes", bytes.len())));
        }
        let phy_id = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let mut salt_buf = [0u8; 8];
        salt_buf[2..].copy_from_slice(&bytes[4..10]);
        let mut mac_buf = [0u8; 8];
        mac_buf[2..].copy_from_slice(&bytes[10..16]);
        Ok(Self {
            phy_id,
            salt: u64::from_be_bytes(salt_buf),
            mac: u64::from_be_bytes(mac_buf),
        })
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}_{:012X}_{:012X}",
            self.phy_id, self.salt, self.mac
        )
    }
}

impl FromStr for DeviceKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('_');
        let (Some(phy), Some(salt), Some(mac), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyError::InvalidKey(s.to_string()));
        };
        if phy.len() != 8 || salt.len() != 12 || mac.len() != 12 {
            return Err(KeyError::InvalidKey(s.to_string()));
        }
        let phy_id =
            u32::from_str_radix(phy, 16).map_err(|_| KeyError::InvalidKey(s.to_string()))?;
        let salt =
            u64::from_str_radix(salt, 16).map_err(|_| KeyError::InvalidKey(s.to_string()))?;
        let mac = u64::from_str_radix(mac, 16).map_err(|_| KeyError::InvalidKey(s.to_string()))?;
        Ok(Self { phy_id, salt, mac })
    }
}

impl Serialize for DeviceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DeviceKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}
