use crate::{
    CpixDocument, DrmSystem, Result,
    fixup::{self, FixupContext},
    xml::Element,
};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpekeVersion {
    V1,
    V2,
}

impl fmt::Display for SpekeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SpekeVersion::V1 => "1.0",
                SpekeVersion::V2 => "2.0",
            }
        )
    }
}

/// Everything that differs between SPEKE 1.0 and 2.0 request handling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Protocol {
    version: SpekeVersion,
    content_id_attribute: &'static str,
    systems: &'static [DrmSystem],
}

impl Protocol {
    pub const V1: Protocol = Protocol {
        version: SpekeVersion::V1,
        content_id_attribute: "id",
        systems: &[
            DrmSystem::HlsAes128,
            DrmSystem::FairPlay,
            DrmSystem::Widevine,
            DrmSystem::PlayReady,
        ],
    };

    pub const V2: Protocol = Protocol {
        version: SpekeVersion::V2,
        content_id_attribute: "contentId",
        systems: &[
            DrmSystem::Widevine,
            DrmSystem::PlayReady,
            DrmSystem::FairPlay,
            DrmSystem::ClearKeyAes128,
            DrmSystem::CommonPssh,
        ],
    };

    /// Select by the `X-Speke-Version` request header. Anything but `2.0`
    /// is treated as 1.0.
    pub fn from_header(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("2.0") => Self::V2,
            _ => Self::V1,
        }
    }

    pub fn version(&self) -> SpekeVersion {
        self.version
    }

    /// Root attribute carrying the content id.
    pub fn content_id_attribute(&self) -> &'static str {
        self.content_id_attribute
    }

    pub fn supports(&self, system: DrmSystem) -> bool {
        self.systems.contains(&system)
    }

    /// Success response headers.
    pub fn headers(&self, user_agent: &str) -> Vec<(String, String)> {
        let mut headers = vec![("Content-Type".to_owned(), "application/xml".to_owned())];

        match self.version {
            SpekeVersion::V1 => {
                headers.push(("Speke-User-Agent".to_owned(), user_agent.to_owned()));
            }
            SpekeVersion::V2 => {
                headers.push(("X-Speke-Version".to_owned(), self.version.to_string()));
                headers.push(("X-Speke-User-Agent".to_owned(), user_agent.to_owned()));
            }
        }

        headers
    }

    pub(crate) fn validate(&self, document: &CpixDocument) -> Result<()> {
        match self.version {
            SpekeVersion::V1 => document.content_id(self.content_id_attribute).map(|_| ()),
            SpekeVersion::V2 => {
                document.content_id(self.content_id_attribute)?;
                document.validate_v2()
            }
        }
    }

    pub(crate) fn fixup(
        &self,
        system: DrmSystem,
        node: &mut Element,
        context: &FixupContext,
    ) -> Result<()> {
        if !self.supports(system) {
            return Err(fixup::unsupported(node));
        }

        match self.version {
            SpekeVersion::V1 => fixup::fixup_v1(system, node, context),
            SpekeVersion::V2 => fixup::fixup_v2(system, node, context),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_header() {
        assert_eq!(Protocol::from_header(Some("2.0")), Protocol::V2);
        assert_eq!(Protocol::from_header(Some(" 2.0 ")), Protocol::V2);
        assert_eq!(Protocol::from_header(Some("1.0")), Protocol::V1);
        assert_eq!(Protocol::from_header(Some("3.0")), Protocol::V1);
        assert_eq!(Protocol::from_header(None), Protocol::V1);
    }

    #[test]
    fn test_headers() {
        assert_eq!(
            Protocol::V1.headers("agent"),
            vec![
                ("Content-Type".to_owned(), "application/xml".to_owned()),
                ("Speke-User-Agent".to_owned(), "agent".to_owned()),
            ]
        );
        assert_eq!(
            Protocol::V2.headers("agent"),
            vec![
                ("Content-Type".to_owned(), "application/xml".to_owned()),
                ("X-Speke-Version".to_owned(), "2.0".to_owned()),
                ("X-Speke-User-Agent".to_owned(), "agent".to_owned()),
            ]
        );
    }

    #[test]
    fn test_supported_systems() {
        assert!(Protocol::V1.supports(DrmSystem::HlsAes128));
        assert!(!Protocol::V1.supports(DrmSystem::CommonPssh));
        assert!(Protocol::V2.supports(DrmSystem::ClearKeyAes128));
        assert!(!Protocol::V2.supports(DrmSystem::HlsAes128));
    }
}
