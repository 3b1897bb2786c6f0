// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Airscout shared types
//!
//! Identity primitives used across the airscout workspace:
//! - [`MacAddr`]: 6-byte hardware address with optional mask for group/range keys
//! - [`DeviceKey`]: 16-byte composite `(phy_id, mac, salt)` uniquely naming a device
//! - Reserved PHY ids ([`PHY_ANY`], [`PHY_UNKNOWN`])
//!
//! Keys are immutable once assigned; equality is bytewise. The textual forms
//! are stable and round-trip through `Display`/`FromStr`.

pub mod key;
pub mod mac;

pub use key::{DeviceKey, KeyError};
pub use mac::MacAddr;

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wildcard PHY id matching any registered PHY.
pub const PHY_ANY: i32 = -1;

/// PHY id for packets that could not be attributed to a registered PHY.
pub const PHY_UNKNOWN: i32 = -2;
