//! Server configuration
//!
//! Defaults suit local development; each value can be overridden from the
//! environment.

use std::env;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::repository::{Role, Room, UserPermission};
use crate::types::{RoomId, UserId};

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default event channel buffer size per room actor
pub const DEFAULT_ROOM_CAPACITY: usize = 64;

/// Default buffer size of each outbound channel per connection
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: String,
    pub room_channel_capacity: usize,
    /// A connection whose outbound buffer fills up is evicted
    pub outbound_channel_capacity: usize,
    /// Reject users that hold no permission in the room
    pub require_membership: bool,
    /// Rooms loaded into the in-memory store at startup
    pub seed_rooms: Vec<RoomSeed>,
}

/// A room and its members, first member is the admin
///
/// Parsed from `CHAT_HUB_SEED`, e.g. `R1:alice,bob;R2:carol`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSeed {
    pub room_id: RoomId,
    pub members: Vec<UserId>,
}

impl RoomSeed {
    pub fn to_room(&self) -> Room {
        let mut room = Room::new(self.room_id.clone());
        room.users = self
            .members
            .iter()
            .enumerate()
            .map(|(i, user)| {
                let role = if i == 0 { Role::Admin } else { Role::Member };
                UserPermission::new(user.clone(), role)
            })
            .collect();
        room
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            room_channel_capacity: DEFAULT_ROOM_CAPACITY,
            outbound_channel_capacity: DEFAULT_OUTBOUND_CAPACITY,
            require_membership: true,
            seed_rooms: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `CHAT_HUB_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = lookup("CHAT_HUB_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(v) = parse(&lookup, "CHAT_HUB_ROOM_CAPACITY")? {
            config.room_channel_capacity = positive("CHAT_HUB_ROOM_CAPACITY", v)?;
        }
        if let Some(v) = parse(&lookup, "CHAT_HUB_OUTBOUND_CAPACITY")? {
            config.outbound_channel_capacity = positive("CHAT_HUB_OUTBOUND_CAPACITY", v)?;
        }
        if let Some(v) = parse(&lookup, "CHAT_HUB_REQUIRE_MEMBERSHIP")? {
            config.require_membership = v;
        }
        if let Some(seed) = lookup("CHAT_HUB_SEED") {
            config.seed_rooms = parse_seed(&seed)?;
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

fn parse_seed(value: &str) -> Result<Vec<RoomSeed>, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "CHAT_HUB_SEED",
        value: value.to_string(),
    };

    let mut seeds = Vec::new();
    for entry in value.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (room, users) = entry.split_once(':').ok_or_else(invalid)?;
        let room = room.trim();
        let members: Vec<UserId> = users
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(UserId::new)
            .collect();
        if room.is_empty() || members.is_empty() {
            return Err(invalid());
        }
        seeds.push(RoomSeed {
            room_id: RoomId::new(room),
            members,
        });
    }
    Ok(seeds)
}

// tokio channels panic on zero capacity
fn positive(key: &'static str, v: usize) -> Result<usize, ConfigError> {
    if v == 0 {
        return Err(ConfigError::InvalidValue {
            key,
            value: v.to_string(),
        });
    }
    Ok(v)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.outbound_channel_capacity, 256);
        assert!(config.require_membership);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("CHAT_HUB_ADDR", "0.0.0.0:9000"),
            ("CHAT_HUB_OUTBOUND_CAPACITY", "8"),
            ("CHAT_HUB_REQUIRE_MEMBERSHIP", "false"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.outbound_channel_capacity, 8);
        assert_eq!(config.room_channel_capacity, DEFAULT_ROOM_CAPACITY);
        assert!(!config.require_membership);
    }

    #[test]
    fn test_invalid_values() {
        let err = ServerConfig::from_lookup(lookup(&[("CHAT_HUB_ROOM_CAPACITY", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "CHAT_HUB_ROOM_CAPACITY", .. }));

        assert!(ServerConfig::from_lookup(lookup(&[("CHAT_HUB_OUTBOUND_CAPACITY", "0")])).is_err());
    }

    #[test]
    fn test_seed_rooms() {
        let config = ServerConfig::from_lookup(lookup(&[("CHAT_HUB_SEED", "R1:alice, bob; R2:carol;")])).unwrap();
        assert_eq!(config.seed_rooms.len(), 2);

        let room = config.seed_rooms[0].to_room();
        assert_eq!(room.id, RoomId::new("R1"));
        assert_eq!(
            room.users,
            vec![
                UserPermission::new(UserId::new("alice"), Role::Admin),
                UserPermission::new(UserId::new("bob"), Role::Member),
            ]
        );
        assert_eq!(config.seed_rooms[1].members, vec![UserId::new("carol")]);
    }

    #[test]
    fn test_invalid_seed() {
        for bad in ["R1", "R1:", ":alice", "R1:alice;R2"] {
            let err = ServerConfig::from_lookup(lookup(&[("CHAT_HUB_SEED", bad)])).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { key: "CHAT_HUB_SEED", .. }), "{bad}");
        }
    }
}
