//! Game-server configuration: the networking tunables from [`flux::config::NetSettings`]
//! plus the handful of settings specific to this example server. Loaded the same way the
//! teacher's `GameConfig` was, via `serdeconv::from_toml_file`.

use flux::config::NetSettings;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSettings {
    pub tick_rate_hz: u32,
    pub max_clients: u16,
}

impl Default for GameSettings {
    fn default() -> GameSettings {
        GameSettings {
            tick_rate_hz: 20,
            max_clients: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub net: NetSettings,
    pub game: GameSettings,
}

impl Default for GameConfig {
    fn default() -> GameConfig {
        GameConfig {
            net: NetSettings::default(),
            game: GameSettings::default(),
        }
    }
}

impl GameConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> GameConfig {
        serdeconv::from_toml_file(path).expect("Error loading game configuration file")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_roundtrip_toml() {
        let config = GameConfig::default();
        let text = serdeconv::to_toml_string(&config).unwrap();
        let parsed: GameConfig = serdeconv::from_toml_str(&text).unwrap();

        assert_eq!(parsed.game.tick_rate_hz, config.game.tick_rate_hz);
        assert_eq!(parsed.net.udp.bind_address, config.net.udp.bind_address);
    }
}
