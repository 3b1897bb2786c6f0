// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Device service: the operations the HTTP layer exposes.
//!
//! Read paths work from immutable snapshots so they never hold tracker
//! locks across serialization; write paths go through the tracker so view
//! membership and persistence stay consistent.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use airscout_tracker::{DeviceRef, DeviceTracker};
use airscout_types::{DeviceKey, MacAddr};

use crate::dtos::{
    DeviceSummaryDto, MultiMacEntryDto, MultiMacRequestDto, PhyEntryDto, SetNameRequestDto,
    SetTagRequestDto, TrackerStatusDto, ViewDescriptorDto,
};
use crate::errors::{ServiceError, ServiceResult};

/// Operations the HTTP surface maps onto endpoints.
pub trait DeviceService: Send + Sync {
    /// `GET /devices/views/<view_id>/devices.json`
    fn view_devices(&self, view_id: &str) -> ServiceResult<Vec<DeviceSummaryDto>>;

    /// `GET /devices/views/all_views.json`
    fn all_views(&self) -> Vec<ViewDescriptorDto>;

    /// `POST /devices/multimac/devices.json`
    fn multimac_devices(&self, request: &MultiMacRequestDto)
        -> ServiceResult<Vec<MultiMacEntryDto>>;

    /// `GET /phys/all_phys.json`
    fn all_phys(&self) -> Vec<PhyEntryDto>;

    /// `GET /devices/by-key/<key>/device.json`
    fn device_by_key(&self, key: &str) -> ServiceResult<Value>;

    /// `POST /devices/by-key/<key>/set_name`
    fn set_device_name(&self, key: &str, request: &SetNameRequestDto) -> ServiceResult<()>;

    /// `POST /devices/by-key/<key>/set_tag`
    fn set_device_tag(&self, key: &str, request: &SetTagRequestDto) -> ServiceResult<()>;

    /// `GET /devices/status.json`
    fn status(&self) -> TrackerStatusDto;
}

/// Production implementation over a shared tracker.
pub struct DeviceServiceImpl {
    tracker: Arc<DeviceTracker>,
}

impl DeviceServiceImpl {
    pub fn new(tracker: Arc<DeviceTracker>) -> Self {
        Self { tracker }
    }

    fn summarize(&self, device: &DeviceRef) -> DeviceSummaryDto {
        let state = device.state();
        DeviceSummaryDto {
            key: device.key().to_string(),
            mac: device.mac().to_string(),
            phy: self.tracker.phys().name_of(device.phy_id() as i32),
            basic_type: state.basic_type.clone(),
            commonname: state.commonname.clone(),
            username: state.username.clone(),
            first_seen: state.first_seen,
            last_seen: state.last_seen,
            packets: state.packets,
            data_size: state.data_size,
            channel: state.channel.clone(),
            frequency: state.frequency,
            signal_dbm: state.signal.last_signal_dbm,
            mod_counter: state.mod_counter(),
        }
    }

    /// Full device object: the serialized state plus identity fields.
    fn device_json(&self, device: &DeviceRef) -> ServiceResult<Value> {
        let mut value = serde_json::to_value(&*device.state())
            .map_err(|e| ServiceError::Internal(e.to_string()))?;
        if let Value::Object(map) = &mut value {
            map.insert("key".to_string(), Value::from(device.key().to_string()));
            map.insert("mac".to_string(), Value::from(device.mac().to_string()));
            map.insert(
                "phy".to_string(),
                Value::from(self.tracker.phys().name_of(device.phy_id() as i32)),
            );
            map.insert("ordinal".to_string(), Value::from(device.ordinal() as u64));
        }
        Ok(value)
    }

    fn parse_key(key: &str) -> ServiceResult<DeviceKey> {
        Ok(key.parse::<DeviceKey>()?)
    }
}

/// Keep only the requested top-level fields of a device object.
fn project_fields(value: Value, fields: &[String]) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| fields.iter().any(|f| f == k))
                .collect(),
        ),
        other => other,
    }
}

impl DeviceService for DeviceServiceImpl {
    fn view_devices(&self, view_id: &str) -> ServiceResult<Vec<DeviceSummaryDto>> {
        let view = self
            .tracker
            .get_view(view_id)
            .ok_or_else(|| ServiceError::NotFound {
                resource: "view".to_string(),
                id: view_id.to_string(),
            })?;
        Ok(view
            .snapshot()
            .iter()
            .map(|device| self.summarize(device))
            .collect())
    }

    fn all_views(&self) -> Vec<ViewDescriptorDto> {
        self.tracker
            .all_views()
            .iter()
            .map(|view| ViewDescriptorDto {
                id: view.id().to_string(),
                description: view.description().to_string(),
                device_count: view.len(),
            })
            .collect()
    }

    fn multimac_devices(
        &self,
        request: &MultiMacRequestDto,
    ) -> ServiceResult<Vec<MultiMacEntryDto>> {
        let mut entries = Vec::with_capacity(request.devices.len());
        for mac_text in &request.devices {
            let mac: MacAddr = mac_text.parse()?;

            let matched: Vec<DeviceRef> = if mac.is_masked() {
                // range queries scan the snapshot
                self.tracker
                    .snapshot_devices()
                    .iter()
                    .filter(|d| mac.matches(&d.mac()))
                    .cloned()
                    .collect()
            } else {
                self.tracker.fetch_devices_by_mac(&mac)
            };

            let mut devices = Vec::with_capacity(matched.len());
            for device in &matched {
                let mut json = self.device_json(device)?;
                if let Some(fields) = &request.fields {
                    json = project_fields(json, fields);
                }
                devices.push(json);
            }
            entries.push(MultiMacEntryDto {
                mac: mac_text.clone(),
                devices,
            });
        }
        debug!(
            "[SERVICES] multimac query for {} mac(s)",
            request.devices.len()
        );
        Ok(entries)
    }

    fn all_phys(&self) -> Vec<PhyEntryDto> {
        let snapshot = self.tracker.snapshot_devices();
        self.tracker
            .phys()
            .all()
            .iter()
            .map(|phy| PhyEntryDto {
                id: phy.id(),
                name: phy.name().to_string(),
                device_count: snapshot.iter().filter(|d| d.phy_id() == phy.id()).count(),
                packet_count: phy.counters().packets(),
            })
            .collect()
    }

    fn device_by_key(&self, key: &str) -> ServiceResult<Value> {
        let key = Self::parse_key(key)?;
        let device = self
            .tracker
            .fetch_device(&key)
            .ok_or_else(|| ServiceError::NotFound {
                resource: "device".to_string(),
                id: key.to_string(),
            })?;
        self.device_json(&device)
    }

    fn set_device_name(&self, key: &str, request: &SetNameRequestDto) -> ServiceResult<()> {
        let key = Self::parse_key(key)?;
        self.tracker.set_device_username(&key, &request.username)?;
        Ok(())
    }

    fn set_device_tag(&self, key: &str, request: &SetTagRequestDto) -> ServiceResult<()> {
        if request.tag.is_empty() {
            return Err(ServiceError::InvalidInput(
                "tag name must not be empty".to_string(),
            ));
        }
        let key = Self::parse_key(key)?;
        self.tracker
            .set_device_tag(&key, &request.tag, &request.content)?;
        Ok(())
    }

    fn status(&self) -> TrackerStatusDto {
        TrackerStatusDto {
            num_devices: self.tracker.num_devices(),
            num_packets: self.tracker.num_packets(),
            num_data_packets: self.tracker.num_data_packets(),
            num_error_packets: self.tracker.num_error_packets(),
            num_filter_packets: self.tracker.num_filter_packets(),
            full_refresh_time: self.tracker.full_refresh_time(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airscout_config::{MemoryConfig, TrackerConfig, ViewsConfig};
    use airscout_tracker::{CommonInfo, Packet, PhyHandler, UpdateFlags};
    use uuid::Uuid;

    struct NamedPhy(&'static str);

    impl PhyHandler for NamedPhy {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn service_with_device() -> (DeviceServiceImpl, String) {
        let tracker = DeviceTracker::new(
            &TrackerConfig::default(),
            &ViewsConfig::default(),
            &MemoryConfig::default(),
        );
        let phy = tracker.register_phy(Arc::new(NamedPhy("IEEE802.11"))).unwrap();

        let packet = Packet::new(1000);
        let common = CommonInfo {
            phy_id: phy.id() as i32,
            device: "aa:bb:cc:dd:ee:ff".parse().unwrap(),
            basic_type: "Wi-Fi AP".to_string(),
            freq_mhz: 2412,
            signal_dbm: Some(-40),
            source_uuid: Some(Uuid::from_u128(0xd5)),
            ..Default::default()
        };
        let device = tracker
            .update_common_device(
                &common,
                common.device,
                &phy,
                &packet,
                UpdateFlags::standard(),
                "Wi-Fi AP",
            )
            .unwrap();
        let key = device.key().to_string();
        (DeviceServiceImpl::new(tracker), key)
    }

    #[test]
    fn test_view_devices_snapshot() {
        let (service, _) = service_with_device();
        let devices = service.view_devices("phy-IEEE802.11").unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(devices[0].phy, "IEEE802.11");
        assert_eq!(devices[0].signal_dbm, Some(-40));
    }

    #[test]
    fn test_unknown_view_is_not_found() {
        let (service, _) = service_with_device();
        assert!(matches!(
            service.view_devices("nope"),
            Err(ServiceError::NotFound { .. })
        ));
    }

    #[test]
    fn test_multimac_with_field_projection() {
        let (service, _) = service_with_device();
        let request = MultiMacRequestDto {
            devices: vec!["aa:bb:cc:dd:ee:ff".to_string(), "00:00:00:00:00:00".to_string()],
            fields: Some(vec!["key".to_string(), "packets".to_string()]),
        };
        let entries = service.multimac_devices(&request).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].devices.len(), 1);
        assert!(entries[1].devices.is_empty());

        let object = entries[0].devices[0].as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert!(object.contains_key("key"));
        assert_eq!(object.get("packets"), Some(&Value::from(1)));
    }

    #[test]
    fn test_multimac_masked_range() {
        let (service, _) = service_with_device();
        let request = MultiMacRequestDto {
            devices: vec!["aa:bb:cc:00:00:00/ff:ff:ff:00:00:00".to_string()],
            fields: None,
        };
        let entries = service.multimac_devices(&request).unwrap();
        assert_eq!(entries[0].devices.len(), 1);
    }

    #[test]
    fn test_all_phys_counts() {
        let (service, _) = service_with_device();
        let phys = service.all_phys();
        assert_eq!(phys.len(), 1);
        assert_eq!(phys[0].name, "IEEE802.11");
        assert_eq!(phys[0].device_count, 1);
    }

    #[test]
    fn test_set_name_roundtrip() {
        let (service, key) = service_with_device();
        service
            .set_device_name(
                &key,
                &SetNameRequestDto {
                    username: "lab-ap".to_string(),
                },
            )
            .unwrap();
        let json = service.device_by_key(&key).unwrap();
        assert_eq!(json.get("username"), Some(&Value::from("lab-ap")));
    }

    #[test]
    fn test_set_tag_validation_and_roundtrip() {
        let (service, key) = service_with_device();
        assert!(matches!(
            service.set_device_tag(
                &key,
                &SetTagRequestDto {
                    tag: String::new(),
                    content: "x".to_string()
                }
            ),
            Err(ServiceError::InvalidInput(_))
        ));

        service
            .set_device_tag(
                &key,
                &SetTagRequestDto {
                    tag: "room".to_string(),
                    content: "413".to_string(),
                },
            )
            .unwrap();
        let json = service.device_by_key(&key).unwrap();
        assert_eq!(
            json.get("tags").and_then(|t| t.get("room")),
            Some(&Value::from("413"))
        );
    }

    #[test]
    fn test_malformed_key_rejected() {
        let (service, _) = service_with_device();
        assert!(matches!(
            service.device_by_key("garbage"),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_status_counters() {
        let (service, _) = service_with_device();
        let status = service.status();
        assert_eq!(status.num_devices, 1);
        // update_common_device alone does not classify packets
        assert_eq!(status.full_refresh_time, 0);
    }
}
