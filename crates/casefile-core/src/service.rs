//! External AI service identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// One external AI or image-generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    /// Narrative generation model
    #[serde(rename = "storyteller-service")]
    Storyteller,
    /// Analytical reasoning model
    #[serde(rename = "logic-service")]
    Logic,
    /// Image generation, priced per image
    #[serde(rename = "image-service")]
    Image,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 3] = [ServiceKind::Storyteller, ServiceKind::Logic, ServiceKind::Image];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Storyteller => "storyteller-service",
            ServiceKind::Logic => "logic-service",
            ServiceKind::Image => "image-service",
        }
    }

    /// Whether the service consumes and produces text (and is therefore token priced)
    pub fn is_text(&self) -> bool {
        !matches!(self, ServiceKind::Image)
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = Error;

    /// Accepts the canonical names plus the short and vendor aliases clients
    /// have historically sent (`storyteller`, `openai`, `anthropic`, `fal_ai`).
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "storyteller-service" | "storyteller" | "openai" => Ok(ServiceKind::Storyteller),
            "logic-service" | "logic" | "anthropic" => Ok(ServiceKind::Logic),
            "image-service" | "image" | "fal_ai" | "fal-ai" => Ok(ServiceKind::Image),
            other => Err(Error::InvalidRequest(format!("Unknown service: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&ServiceKind::Storyteller).unwrap();
        assert_eq!(json, "\"storyteller-service\"");
        let parsed: ServiceKind = serde_json::from_str("\"image-service\"").unwrap();
        assert_eq!(parsed, ServiceKind::Image);
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!("openai".parse::<ServiceKind>().unwrap(), ServiceKind::Storyteller);
        assert_eq!("Anthropic".parse::<ServiceKind>().unwrap(), ServiceKind::Logic);
        assert_eq!("fal_ai".parse::<ServiceKind>().unwrap(), ServiceKind::Image);
        assert_eq!("logic-service".parse::<ServiceKind>().unwrap(), ServiceKind::Logic);
        assert!("carrier-pigeon".parse::<ServiceKind>().is_err());
    }

    #[test]
    fn test_is_text() {
        assert!(ServiceKind::Storyteller.is_text());
        assert!(ServiceKind::Logic.is_text());
        assert!(!ServiceKind::Image.is_text());
    }
}
