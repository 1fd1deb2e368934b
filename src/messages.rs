// Text grammar carried inside WebSocket frames
//
//   <name>                     bare command, value omitted
//   command:<name>[=<value>]   value is a fraction or a percentage
//   config:<key>=<value>       forwarded to the configuration store
//   ping                       keepalive, never routed

use serde::Serialize;

use crate::motor::{NORMALIZED_MAX, NORMALIZED_MIN};

/// Exact payload treated as a keepalive
pub const KEEPALIVE: &str = "ping";

const WHITESPACE: &[char] = &[' ', '\t', '\r', '\n'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Command,
    Config,
}

/// One inbound instruction, keyed by channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedMessage {
    pub channel: Channel,
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MessageFormatError {
    #[error("empty message")]
    Empty,

    #[error("config message without '=': {0}")]
    MissingConfigValue(String),

    #[error("invalid value {value:?} for command {key}")]
    InvalidValue { key: String, value: String },

    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

fn trim(value: &str) -> &str {
    value.trim_matches(WHITESPACE)
}

fn split_assignment(remainder: &str) -> Option<(String, String)> {
    remainder
        .split_once('=')
        .map(|(key, value)| (trim(key).to_string(), trim(value).to_string()))
}

/// Split a payload into channel, key and optional raw value
pub fn parse_inbound(payload: &str) -> Result<ParsedMessage, MessageFormatError> {
    let trimmed = trim(payload);
    if trimmed.is_empty() {
        return Err(MessageFormatError::Empty);
    }

    let Some((token, remainder)) = trimmed.split_once(':') else {
        return Ok(ParsedMessage {
            channel: Channel::Command,
            key: trimmed.to_string(),
            value: None,
        });
    };

    let remainder = trim(remainder);
    let parsed = match trim(token).to_ascii_lowercase().as_str() {
        "command" => match split_assignment(remainder) {
            Some((key, value)) => ParsedMessage {
                channel: Channel::Command,
                key,
                value: Some(value),
            },
            None => ParsedMessage {
                channel: Channel::Command,
                key: remainder.to_string(),
                value: None,
            },
        },
        "config" => {
            let (key, value) = split_assignment(remainder)
                .ok_or_else(|| MessageFormatError::MissingConfigValue(remainder.to_string()))?;
            ParsedMessage {
                channel: Channel::Config,
                key,
                value: Some(value),
            }
        }
        _ => return Err(MessageFormatError::UnknownChannel(trim(token).to_string())),
    };

    if parsed.key.is_empty() {
        return Err(MessageFormatError::Empty);
    }
    Ok(parsed)
}

/// Normalize a command value: optional trailing `%`, percentages (`|v| > 1`)
/// divided by 100, result clamped to `[-1, 1]`.
pub fn parse_command_value(raw: &str) -> Option<f64> {
    let sanitized = trim(raw);
    let sanitized = sanitized.strip_suffix('%').unwrap_or(sanitized);

    let digits = sanitized.strip_prefix(['-', '+']).unwrap_or(sanitized);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let mut value: f64 = sanitized.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    if value.abs() > 1.0 {
        value /= 100.0;
    }
    Some(value.clamp(NORMALIZED_MIN, NORMALIZED_MAX))
}

impl ParsedMessage {
    /// Numeric value of a command message. `Ok(None)` when no value was sent.
    pub fn command_value(&self) -> Result<Option<f64>, MessageFormatError> {
        let Some(raw) = self.value.as_deref() else {
            return Ok(None);
        };
        parse_command_value(raw)
            .map(Some)
            .ok_or_else(|| MessageFormatError::InvalidValue {
                key: self.key.clone(),
                value: raw.to_string(),
            })
    }
}
