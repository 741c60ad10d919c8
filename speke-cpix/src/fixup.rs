//! Per DRM system population of `DRMSystem` placeholders.
//!
//! Each profile fills the fields its system needs and removes every other
//! known placeholder, so a processed node carries exactly that system's field
//! set. Missing required placeholders are created.

use crate::{
    DrmSystem, Error, PsshBox, Result, ServerConfig,
    config::HlsSignaling,
    cpix::{CPIX, SPEKE},
    pssh::playready_object,
    xml::Element,
};
use base64::Engine;

const CENC: &str = "urn:mpeg:cenc:2013";
const MSPR: &str = "urn:microsoft:playready";

const FAIRPLAY_KEY_FORMAT: &str = "com.apple.streamingkeydelivery";
const PLAYREADY_KEY_FORMAT: &str = "com.microsoft.playready";

/// Known `DRMSystem` child fields.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Field {
    Pssh,
    ContentProtectionData,
    HlsSignalingData,
    UriExtXKey,
    KeyFormat,
    KeyFormatVersions,
    ProtectionHeader,
    SmoothStreamingProtectionHeaderData,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Pssh,
        Field::ContentProtectionData,
        Field::HlsSignalingData,
        Field::UriExtXKey,
        Field::KeyFormat,
        Field::KeyFormatVersions,
        Field::ProtectionHeader,
        Field::SmoothStreamingProtectionHeaderData,
    ];

    pub fn namespace(&self) -> &'static str {
        match self {
            Field::KeyFormat | Field::KeyFormatVersions | Field::ProtectionHeader => SPEKE,
            _ => CPIX,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Field::Pssh => "PSSH",
            Field::ContentProtectionData => "ContentProtectionData",
            Field::HlsSignalingData => "HLSSignalingData",
            Field::UriExtXKey => "URIExtXKey",
            Field::KeyFormat => "KeyFormat",
            Field::KeyFormatVersions => "KeyFormatVersions",
            Field::ProtectionHeader => "ProtectionHeader",
            Field::SmoothStreamingProtectionHeaderData => "SmoothStreamingProtectionHeaderData",
        }
    }

    pub fn find(self, node: &Element) -> impl Iterator<Item = &Element> {
        node.find_all(self.namespace(), self.name())
    }
}

/// Inputs of one `DRMSystem` fixup.
pub(crate) struct FixupContext<'a> {
    pub(crate) config: &'a ServerConfig,
    pub(crate) kid: [u8; 16],
    /// Clear key retrieval URL of `kid`.
    pub(crate) key_url: String,
}

/// SPEKE 1.0 rules.
pub(crate) fn fixup_v1(
    system: DrmSystem,
    node: &mut Element,
    context: &FixupContext,
) -> Result<()> {
    match system {
        DrmSystem::HlsAes128 => {
            set(node, Field::UriExtXKey, encode_base64(&context.key_url));
            set(node, Field::KeyFormat, encode_base64(""));
            set(node, Field::KeyFormatVersions, encode_base64(""));
            retain(
                node,
                &[Field::UriExtXKey, Field::KeyFormat, Field::KeyFormatVersions],
            );
        }
        DrmSystem::FairPlay => {
            set(node, Field::UriExtXKey, encode_base64(&context.key_url));
            set(node, Field::KeyFormat, encode_base64(FAIRPLAY_KEY_FORMAT));
            set(node, Field::KeyFormatVersions, encode_base64("1"));
            retain(
                node,
                &[Field::UriExtXKey, Field::KeyFormat, Field::KeyFormatVersions],
            );
        }
        DrmSystem::Widevine => {
            set(node, Field::Pssh, widevine_pssh(context));
            retain(node, &[Field::Pssh]);
        }
        DrmSystem::PlayReady => {
            let (pssh, header) = playready_pssh(context)?;
            set(node, Field::ProtectionHeader, header);
            set(node, Field::Pssh, pssh);
            retain(node, &[Field::Pssh, Field::ProtectionHeader]);
        }
        DrmSystem::ClearKeyAes128 | DrmSystem::CommonPssh => {
            return Err(unsupported(node));
        }
    }

    Ok(())
}

/// SPEKE 2.0 rules.
pub(crate) fn fixup_v2(
    system: DrmSystem,
    node: &mut Element,
    context: &FixupContext,
) -> Result<()> {
    match system {
        DrmSystem::Widevine => {
            let pssh = widevine_pssh(context);
            let signaling = context
                .config
                .widevine_hls_signaling()
                .cloned()
                .unwrap_or_else(|| {
                    hls_signaling(
                        "SAMPLE-AES",
                        &format!("data:text/plain;base64,{}", pssh),
                        &format!("urn:uuid:{}", DrmSystem::Widevine.system_id()),
                    )
                });

            set(
                node,
                Field::ContentProtectionData,
                encode_base64(&format!(
                    r#"<cenc:pssh xmlns:cenc="{}">{}</cenc:pssh>"#,
                    CENC, pssh
                )),
            );
            set(node, Field::Pssh, pssh);
            fill_hls_signaling(node, &signaling, false);
            retain(
                node,
                &[
                    Field::Pssh,
                    Field::ContentProtectionData,
                    Field::HlsSignalingData,
                ],
            );
        }
        DrmSystem::PlayReady => {
            let (pssh, header) = playready_pssh(context)?;
            let signaling = context
                .config
                .playready_hls_signaling()
                .cloned()
                .unwrap_or_else(|| {
                    hls_signaling(
                        "SAMPLE-AES",
                        &format!("data:text/plain;charset=UTF-16;base64,{}", header),
                        PLAYREADY_KEY_FORMAT,
                    )
                });

            set(
                node,
                Field::ContentProtectionData,
                encode_base64(&format!(
                    r#"<cenc:pssh xmlns:cenc="{}">{}</cenc:pssh><mspr:pro xmlns:mspr="{}">{}</mspr:pro>"#,
                    CENC, pssh, MSPR, header
                )),
            );
            set(node, Field::Pssh, pssh);
            fill_hls_signaling(node, &signaling, false);
            retain(
                node,
                &[
                    Field::Pssh,
                    Field::ContentProtectionData,
                    Field::HlsSignalingData,
                ],
            );
        }
        DrmSystem::FairPlay => {
            let signaling = hls_signaling(
                "SAMPLE-AES",
                &skd_url(&context.key_url),
                FAIRPLAY_KEY_FORMAT,
            );
            fill_hls_signaling(node, &signaling, true);
            retain(node, &[Field::HlsSignalingData]);
        }
        DrmSystem::ClearKeyAes128 => {
            let signaling = hls_signaling("AES-128", &context.key_url, "identity");
            fill_hls_signaling(node, &signaling, true);
            retain(node, &[Field::HlsSignalingData]);
        }
        DrmSystem::CommonPssh => {
            let pssh = PsshBox::common(context.kid).to_base64();
            set(
                node,
                Field::ContentProtectionData,
                encode_base64(&format!(r#"<pssh xmlns="{}">{}</pssh>"#, CENC, pssh)),
            );
            set(node, Field::Pssh, pssh);
            retain(node, &[Field::Pssh, Field::ContentProtectionData]);
        }
        DrmSystem::HlsAes128 => return Err(unsupported(node)),
    }

    Ok(())
}

pub(crate) fn unsupported(node: &Element) -> Error {
    Error::UnsupportedSystemId(node.attr("systemId").unwrap_or_default().to_owned())
}

fn widevine_pssh(context: &FixupContext) -> String {
    match context.config.pssh_box(DrmSystem::Widevine) {
        Some(x) => x.to_owned(),
        None => PsshBox::widevine(context.kid).to_base64(),
    }
}

/// PlayReady `pssh` box and protection header (PlayReady object), both base64.
fn playready_pssh(context: &FixupContext) -> Result<(String, String)> {
    let header = match context.config.playready_protection_header() {
        Some(x) => x.to_owned(),
        None => encode_base64(playready_object(context.kid)),
    };

    let pssh = match context.config.pssh_box(DrmSystem::PlayReady) {
        Some(x) => x.to_owned(),
        None => {
            let object = base64::engine::general_purpose::STANDARD
                .decode(&header)
                .map_err(|x| {
                    Error::InvalidConfig(format!("playready protection header: {}", x))
                })?;
            PsshBox::playready(object).to_base64()
        }
    };

    Ok((pssh, header))
}

/// `#EXT-X-KEY` and `#EXT-X-SESSION-KEY` tags sharing the same attributes.
fn hls_signaling(method: &str, uri: &str, key_format: &str) -> HlsSignaling {
    let attributes = format!(
        r#"METHOD={},URI="{}",KEYFORMAT="{}",KEYFORMATVERSIONS="1""#,
        method, uri, key_format
    );

    HlsSignaling {
        media: encode_base64(format!("#EXT-X-KEY:{}", attributes)),
        master: encode_base64(format!("#EXT-X-SESSION-KEY:{}", attributes)),
    }
}

fn skd_url(key_url: &str) -> String {
    let rest = key_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(key_url);
    format!("skd://{}", rest)
}

/// Fill `HLSSignalingData` placeholders by their `playlist` attribute. With
/// `create`, a node without any placeholder gets one for each playlist.
fn fill_hls_signaling(node: &mut Element, signaling: &HlsSignaling, create: bool) {
    let mut found = false;

    for element in node.find_all_mut(CPIX, "HLSSignalingData") {
        found = true;
        let value = match element.attr("playlist") {
            Some("master") => &signaling.master,
            _ => &signaling.media,
        };
        element.set_text(value.as_str());
    }

    if !found && create {
        for (playlist, value) in [("media", &signaling.media), ("master", &signaling.master)] {
            node.push(
                Element::new(CPIX, "HLSSignalingData")
                    .with_attr("playlist", playlist)
                    .with_text(value.as_str()),
            );
        }
    }
}

fn set(node: &mut Element, field: Field, text: String) {
    let mut found = false;

    for element in node.find_all_mut(field.namespace(), field.name()) {
        element.set_text(text.as_str());
        found = true;
    }

    if !found {
        node.push(Element::new(field.namespace(), field.name()).with_text(text));
    }
}

fn retain(node: &mut Element, keep: &[Field]) {
    for field in Field::ALL {
        if !keep.contains(&field) {
            node.remove_all(field.namespace(), field.name());
        }
    }
}

fn encode_base64<T: AsRef<[u8]>>(data: T) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}
