use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LinkError, LinkResult};

/// Stable device identity: hardware address plus a client id derived from it.
///
/// The client id is a name-based (v5) UUID over the normalised address, so a
/// device keeps the same id across restarts and reinstalls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    mac_address: String,
    client_id: Uuid,
}

impl DeviceIdentity {
    pub fn from_mac(mac: &str) -> LinkResult<Self> {
        let normalized = normalize_mac(mac);
        if normalized.len() != 12 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(LinkError::Config(format!("invalid MAC address: {}", mac)));
        }

        let client_id = Uuid::new_v5(&Uuid::NAMESPACE_DNS, normalized.as_bytes());

        Ok(Self {
            mac_address: format_mac(&normalized),
            client_id,
        })
    }

    /// Random locally administered unicast address
    pub fn generate() -> Self {
        let mut bytes: [u8; 6] = rand::thread_rng().gen();
        bytes[0] = (bytes[0] & 0xFC) | 0x02;

        let normalized = hex::encode(bytes);
        Self {
            mac_address: format_mac(&normalized),
            client_id: Uuid::new_v5(&Uuid::NAMESPACE_DNS, normalized.as_bytes()),
        }
    }

    /// Colon-separated lowercase address, e.g. `02:1a:2b:3c:4d:5e`
    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn client_id_string(&self) -> String {
        self.client_id.hyphenated().to_string()
    }
}

fn normalize_mac(mac: &str) -> String {
    mac.trim()
        .to_ascii_lowercase()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | ' '))
        .collect()
}

fn format_mac(normalized: &str) -> String {
    normalized
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_mac_same_client_id_regardless_of_format() {
        let a = DeviceIdentity::from_mac("AA:BB:CC:DD:EE:FF").unwrap();
        let b = DeviceIdentity::from_mac("aa-bb-cc-dd-ee-ff").unwrap();
        let c = DeviceIdentity::from_mac("aabbccddeeff").unwrap();

        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.mac_address(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(a.client_id().get_version_num(), 5);
    }

    #[test]
    fn client_id_is_v5_over_normalized_mac() {
        let identity = DeviceIdentity::from_mac("AA:BB:CC:DD:EE:FF").unwrap();
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"aabbccddeeff");
        assert_eq!(identity.client_id(), expected);
    }

    #[test]
    fn rejects_malformed_mac() {
        assert!(DeviceIdentity::from_mac("not-a-mac").is_err());
        assert!(DeviceIdentity::from_mac("aa:bb:cc").is_err());
    }

    #[test]
    fn generated_mac_is_locally_administered_unicast() {
        let identity = DeviceIdentity::generate();
        let first = u8::from_str_radix(&identity.mac_address()[..2], 16).unwrap();
        assert_eq!(first & 0x02, 0x02);
        assert_eq!(first & 0x01, 0x00);

        let again = DeviceIdentity::from_mac(identity.mac_address()).unwrap();
        assert_eq!(again, identity);
    }
}
