use serde::Serialize;

use crate::identity::DeviceIdentity;

/// Hardware/firmware self-description posted to the bootstrap endpoint.
///
/// The server only inspects a handful of these fields, but it expects the
/// full shape an embedded board would send.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDescription {
    pub version: u32,
    pub flash_size: u64,
    pub psram_size: u64,
    pub minimum_free_heap_size: u64,
    pub mac_address: String,
    pub uuid: String,
    pub chip_model_name: String,
    pub chip_info: ChipInfo,
    pub application: ApplicationInfo,
    pub partition_table: PartitionTable,
    pub ota: OtaSlot,
    pub board: BoardInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChipInfo {
    pub model: u32,
    pub cores: u32,
    pub revision: u32,
    pub features: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationInfo {
    pub name: String,
    pub version: String,
    /// ISO-8601 UTC, stamped when the description is built
    pub compile_time: String,
    pub idf_version: String,
    pub elf_sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionTable {
    pub app: AppPartition,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppPartition {
    pub label: String,
    #[serde(rename = "type")]
    pub kind: u32,
    pub subtype: u32,
    pub address: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct OtaSlot {
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardInfo {
    pub name: String,
    pub version: String,
}

impl DeviceDescription {
    pub fn for_identity(identity: &DeviceIdentity, board_name: &str) -> Self {
        let app_version = env!("CARGO_PKG_VERSION").to_string();

        Self {
            version: 2,
            flash_size: 4 * 1024 * 1024,
            psram_size: 0,
            minimum_free_heap_size: 123_456,
            mac_address: identity.mac_address().to_string(),
            uuid: identity.client_id_string(),
            chip_model_name: "voxlink".to_string(),
            chip_info: ChipInfo {
                model: 1,
                cores: 2,
                revision: 0,
                features: 0,
            },
            application: ApplicationInfo {
                name: "voxlink".to_string(),
                version: app_version.clone(),
                compile_time: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                idf_version: "5.1.0".to_string(),
                elf_sha256: "voxlink-host".to_string(),
            },
            partition_table: PartitionTable {
                app: AppPartition {
                    label: "app".to_string(),
                    kind: 1,
                    subtype: 2,
                    address: 0x10000,
                    size: 0x100000,
                },
            },
            ota: OtaSlot {
                label: "ota_0".to_string(),
            },
            board: BoardInfo {
                name: board_name.to_string(),
                version: app_version,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_serializes_expected_shape() {
        let identity = DeviceIdentity::from_mac("aa:bb:cc:dd:ee:ff").unwrap();
        let description = DeviceDescription::for_identity(&identity, "desk");
        let value = serde_json::to_value(&description).unwrap();

        assert_eq!(value["version"], 2);
        assert_eq!(value["mac_address"], "aa:bb:cc:dd:ee:ff");
        assert_eq!(value["uuid"], identity.client_id_string());
        assert_eq!(value["partition_table"]["app"]["type"], 1);
        assert_eq!(value["partition_table"]["app"]["address"], 0x10000);
        assert_eq!(value["ota"]["label"], "ota_0");
        assert_eq!(value["board"]["name"], "desk");
        assert!(value["application"]["compile_time"]
            .as_str()
            .unwrap()
            .ends_with('Z'));
    }
}
