// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Service layer for the airscout tracker.

Transport-agnostic operations the HTTP surface maps onto endpoints: view
snapshots, multi-MAC aggregation, PHY listings, and user-settable device
fields. Errors here carry enough structure for adapters to map them to
status codes without string matching.
*/

pub mod device_service;
pub mod dtos;
pub mod errors;

pub use device_service::{DeviceService, DeviceServiceImpl};
pub use dtos::{
    DeviceSummaryDto, MultiMacEntryDto, MultiMacRequestDto, PhyEntryDto, SetNameRequestDto,
    SetTagRequestDto, TrackerStatusDto, ViewDescriptorDto,
};
pub use errors::{ServiceError, ServiceResult};

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
