//! Hole descriptors and lifecycle enums

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Transport scheme a hole listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Tcp,
    Udp,
    Tcp6,
    Udp6,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Udp => "udp",
            Scheme::Tcp6 => "tcp6",
            Scheme::Udp6 => "udp6",
        }
    }

    /// Returns whether this scheme is datagram based
    pub fn is_udp(&self) -> bool {
        matches!(self, Scheme::Udp | Scheme::Udp6)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported scheme '{0}', expected one of tcp, udp, tcp6, udp6")]
pub struct SchemeError(pub String);

impl FromStr for Scheme {
    type Err = SchemeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(Scheme::Tcp),
            "udp" => Ok(Scheme::Udp),
            "tcp6" => Ok(Scheme::Tcp6),
            "udp6" => Ok(Scheme::Udp6),
            other => Err(SchemeError(other.to_string())),
        }
    }
}

/// Lifecycle status of a hole
///
/// `Unstarted -> Started -> Stopped -> (Started | Removed)`, with `Removed` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum HoleStatus {
    Unstarted,
    Started,
    Stopped,
    Removed,
}

impl HoleStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HoleStatus::Removed)
    }
}

impl fmt::Display for HoleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HoleStatus::Unstarted => "unstarted",
            HoleStatus::Started => "started",
            HoleStatus::Stopped => "stopped",
            HoleStatus::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Request body for `POST /api/holes`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct CreateHoleRequest {
    /// Optional unique name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Scheme, defaults to tcp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

/// Public view of a hole
///
/// `port` is only populated in the response to the create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HoleDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub scheme: Scheme,
    /// Public host the tunnel server listens on
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub status: HoleStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HoleList {
    pub holes: Vec<HoleDescriptor>,
}

/// Acknowledgement for start/kill/remove
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct AckResponse {
    pub id: String,
    pub status: HoleStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_parse() {
        assert_eq!("tcp".parse::<Scheme>().unwrap(), Scheme::Tcp);
        assert_eq!("UDP6".parse::<Scheme>().unwrap(), Scheme::Udp6);
        assert!("http".parse::<Scheme>().is_err());
        assert_eq!(Scheme::default(), Scheme::Tcp);
    }

    #[test]
    fn test_descriptor_omits_missing_port() {
        let hole = HoleDescriptor {
            id: "abc".to_string(),
            name: None,
            scheme: Scheme::Tcp6,
            host: "holehub.test".to_string(),
            port: None,
            status: HoleStatus::Started,
        };

        let json = serde_json::to_value(&hole).unwrap();
        assert!(json.get("port").is_none());
        assert!(json.get("name").is_none());
        assert_eq!(json["scheme"], "tcp6");
        assert_eq!(json["status"], "started");
    }
}
