//! Channel configuration loading
//!
//! Each channel's configuration is a JSON object stored under
//! `<notify_prefix>/<channel>`. Top-level field names and the keys of the
//! destination map are matched case-insensitively, so both are lower-cased
//! before the typed config is decoded.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::Channel;

/// Lower-case the top-level keys and the destination map keys of a raw
/// channel configuration, then decode it.
pub fn parse_channel_config<T: DeserializeOwned>(
    channel: Channel,
    raw: serde_json::Value,
) -> Result<T, ConfigError> {
    let normalized = normalize(channel, raw)?;
    serde_json::from_value(normalized).map_err(|e| ConfigError::Invalid {
        channel,
        reason: e.to_string(),
    })
}

fn normalize(channel: Channel, raw: serde_json::Value) -> Result<serde_json::Value, ConfigError> {
    let serde_json::Value::Object(fields) = raw else {
        return Err(ConfigError::NotAnObject(channel));
    };

    let mut normalized = serde_json::Map::with_capacity(fields.len());
    for (key, value) in fields {
        normalized.insert(key.to_lowercase(), value);
    }

    let field = channel.destination_field();
    match normalized.get_mut(field) {
        Some(serde_json::Value::Object(destinations)) => {
            let lowered = std::mem::take(destinations)
                .into_iter()
                .map(|(key, value)| (key.to_lowercase(), value))
                .collect();
            *destinations = lowered;
        }
        Some(_) => {
            return Err(ConfigError::Invalid {
                channel,
                reason: format!("'{}' must be an object", field),
            })
        }
        None => return Err(ConfigError::MissingField { channel, field }),
    }

    Ok(serde_json::Value::Object(normalized))
}

/// Destination identifier that may be stored as a string or a number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target(pub String);

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => Target(text),
            Repr::Number(number) => Target(number.to_string()),
        })
    }
}

impl AsRef<str> for Target {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// One address or a list of addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipients(pub Vec<String>);

impl<'de> Deserialize<'de> for Recipients {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(address) => Recipients(vec![address]),
            Repr::Many(addresses) => Recipients(addresses),
        })
    }
}

/// Keys of a destination map, already lower-cased by normalization
pub fn destination_keys<V>(destinations: &BTreeMap<String, V>) -> Vec<String> {
    destinations.keys().cloned().collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} configuration must be a JSON object")]
    NotAnObject(Channel),

    #[error("{channel} configuration is missing '{field}'")]
    MissingField {
        channel: Channel,
        field: &'static str,
    },

    #[error("Invalid {channel} configuration: {reason}")]
    Invalid { channel: Channel, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Rooms {
        api_token: String,
        rooms: BTreeMap<String, Target>,
    }

    #[test]
    fn test_keys_are_lowercased() {
        let raw = serde_json::json!({
            "API_TOKEN": "secret",
            "Rooms": {"DevOps": 1234, "Ops": "ops-room"}
        });

        let config: Rooms = parse_channel_config(Channel::Hipchat, raw).unwrap();
        assert_eq!(config.api_token, "secret");
        assert_eq!(config.rooms["devops"], Target("1234".to_string()));
        assert_eq!(config.rooms["ops"].as_ref(), "ops-room");
        assert_eq!(destination_keys(&config.rooms), vec!["devops", "ops"]);
    }

    #[test]
    fn test_invalid_shapes() {
        let missing: Result<Rooms, _> =
            parse_channel_config(Channel::Hipchat, serde_json::json!({"api_token": "x"}));
        assert!(matches!(
            missing,
            Err(ConfigError::MissingField { field: "rooms", .. })
        ));

        let scalar: Result<Rooms, _> =
            parse_channel_config(Channel::Hipchat, serde_json::json!("rooms"));
        assert!(matches!(scalar, Err(ConfigError::NotAnObject(Channel::Hipchat))));

        let list: Result<Rooms, _> = parse_channel_config(
            Channel::Hipchat,
            serde_json::json!({"api_token": "x", "rooms": ["devops"]}),
        );
        assert!(matches!(list, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_recipients_accepts_one_or_many() {
        let one: Recipients = serde_json::from_value(serde_json::json!("ops@example.com")).unwrap();
        let many: Recipients =
            serde_json::from_value(serde_json::json!(["a@example.com", "b@example.com"])).unwrap();
        assert_eq!(one.0.len(), 1);
        assert_eq!(many.0.len(), 2);
    }
}
