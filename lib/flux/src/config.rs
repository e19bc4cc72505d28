//! Tunables for the messaging core, loaded from a TOML file the same way `GameConfig` is
//! loaded in `game::core`. The full hot-reloading key/value configuration store is an
//! external collaborator and is not reimplemented here.

use serde_derive::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UdpSettings {
    pub bind_address: String,
    pub handshake_timeout_secs: u64,
    pub max_connection_retries: u32,
    pub keepalive_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_fragment_size: usize,
    pub fragment_window: u16,
}

impl Default for UdpSettings {
    fn default() -> UdpSettings {
        UdpSettings {
            bind_address: "0.0.0.0:28100".to_string(),
            handshake_timeout_secs: 5,
            max_connection_retries: 5,
            keepalive_interval_secs: 3,
            idle_timeout_secs: 15,
            max_fragment_size: 1200,
            fragment_window: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpSettings {
    pub bind_address: String,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub max_message_size: usize,
}

impl Default for TcpSettings {
    fn default() -> TcpSettings {
        TcpSettings {
            bind_address: "0.0.0.0:28101".to_string(),
            read_buffer_size: 65536,
            write_buffer_size: 8 * 65536,
            max_message_size: 8 * 65536,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetSettings {
    pub udp: UdpSettings,
    pub tcp: TcpSettings,
}

impl Default for NetSettings {
    fn default() -> NetSettings {
        NetSettings {
            udp: UdpSettings::default(),
            tcp: TcpSettings::default(),
        }
    }
}

impl NetSettings {
    pub fn load<P: AsRef<Path>>(path: P) -> NetSettings {
        serdeconv::from_toml_file(path).expect("Error loading network configuration file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_roundtrip_toml() {
        let settings = NetSettings::default();
        let text = serdeconv::to_toml_string(&settings).unwrap();
        let parsed: NetSettings = serdeconv::from_toml_str(&text).unwrap();

        assert_eq!(parsed.udp.bind_address, settings.udp.bind_address);
        assert_eq!(parsed.tcp.max_message_size, settings.tcp.max_message_size);
    }
}
