use serde::{Deserialize, Serialize};

/// Platform tag every [`Adapter`](crate) declares exactly one of.
///
/// `Other` is an escape hatch: a deployment can register an adapter for a platform this crate
/// doesn't know about by name, without requiring a new enum variant upstream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    EnterpriseIm,
    Guild,
    Cli,
    Web,
    Email,
    Other(String),
}

impl ChannelType {
    /// Canonical lowercase tag used in routing keys, URLs, and header values.
    pub fn as_str(&self) -> &str {
        match self {
            ChannelType::EnterpriseIm => "enterprise_im",
            ChannelType::Guild => "guild",
            ChannelType::Cli => "cli",
            ChannelType::Web => "web",
            ChannelType::Email => "email",
            ChannelType::Other(tag) => tag.as_str(),
        }
    }

    /// Parses a platform tag string, falling back to `Other` for anything unrecognized.
    pub fn parse(tag: &str) -> Self {
        match tag {
            "enterprise_im" => ChannelType::EnterpriseIm,
            "guild" => ChannelType::Guild,
            "cli" => ChannelType::Cli,
            "web" => ChannelType::Web,
            "email" => ChannelType::Email,
            other => ChannelType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_known_tags() {
        for tag in ["enterprise_im", "guild", "cli", "web", "email"] {
            assert_eq!(ChannelType::parse(tag).as_str(), tag);
        }
    }

    #[test]
    fn parse_unknown_tag_becomes_other() {
        let ct = ChannelType::parse("slack");
        assert_eq!(ct, ChannelType::Other("slack".to_string()));
        assert_eq!(ct.as_str(), "slack");
    }

    #[test]
    fn serde_uses_snake_case_tag() {
        let json = serde_json::to_string(&ChannelType::EnterpriseIm).unwrap();
        assert_eq!(json, "\"enterprise_im\"");
    }
}
