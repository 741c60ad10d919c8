//! CPIX document access and request validation.

use crate::{Error, Result, xml::Element};
use std::collections::HashSet;

pub const CPIX: &str = "urn:dashif:org:cpix";
pub const PSKC: &str = "urn:ietf:params:xml:ns:keyprov:pskc";
pub const SPEKE: &str = "urn:aws:amazon:com:speke";
pub const DS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const ENC: &str = "http://www.w3.org/2001/04/xmlenc#";

pub const AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";
pub const RSA_OAEP_MGF1P: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";
pub const HMAC_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha512";

pub const CPIX_VERSION: &str = "2.3";
pub const ENCRYPTION_SCHEMES: [&str; 4] = ["cenc", "cbc1", "cens", "cbcs"];

const PREFIXES: [(&str, &str); 5] = [
    (CPIX, "cpix"),
    (PSKC, "pskc"),
    (SPEKE, "speke"),
    (DS, "ds"),
    (ENC, "enc"),
];

/// Conventional prefix of a namespace used by CPIX documents.
pub(crate) fn preferred_prefix(namespace: &str) -> Option<&'static str> {
    PREFIXES
        .iter()
        .find(|(ns, _)| *ns == namespace)
        .map(|(_, prefix)| *prefix)
}

/// A parsed CPIX request being turned into a response.
#[derive(Clone, Debug)]
pub struct CpixDocument {
    root: Element,
}

impl CpixDocument {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let root = Element::parse(data)?;

        if !root.is(CPIX, "CPIX") {
            return Err(Error::MalformedRequest(format!(
                "root element is {}, expected cpix:CPIX",
                root.name()
            )));
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Value of a required attribute on the root element.
    pub fn content_id(&self, attribute: &str) -> Result<String> {
        self.root
            .attr(attribute)
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::MalformedRequest(format!("CPIX element has no {} attribute", attribute))
            })
    }

    pub fn content_keys(&self) -> impl Iterator<Item = &Element> {
        list_items(&self.root, "ContentKeyList", "ContentKey")
    }

    pub fn content_keys_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.root
            .find_all_mut(CPIX, "ContentKeyList")
            .flat_map(|x| x.find_all_mut(CPIX, "ContentKey"))
    }

    pub fn drm_systems(&self) -> impl Iterator<Item = &Element> {
        list_items(&self.root, "DRMSystemList", "DRMSystem")
    }

    pub fn drm_systems_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.root
            .find_all_mut(CPIX, "DRMSystemList")
            .flat_map(|x| x.find_all_mut(CPIX, "DRMSystem"))
    }

    pub fn delivery_data_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.root
            .find_all_mut(CPIX, "DeliveryDataList")
            .flat_map(|x| x.find_all_mut(CPIX, "DeliveryData"))
    }

    pub fn has_delivery_data(&self) -> bool {
        list_items(&self.root, "DeliveryDataList", "DeliveryData")
            .next()
            .is_some()
    }

    pub fn to_xml(&self) -> Result<Vec<u8>> {
        self.root.to_xml()
    }

    /// Structural checks a SPEKE 2.0 request must pass before any key is
    /// generated.
    pub fn validate_v2(&self) -> Result<()> {
        match self.root.attr("version") {
            Some(x) if x.trim() == CPIX_VERSION => (),
            Some(x) => {
                return Err(Error::MalformedRequest(format!(
                    "unsupported CPIX version {}, expected {}",
                    x, CPIX_VERSION
                )));
            }
            None => {
                return Err(Error::MalformedRequest(
                    "CPIX element has no version attribute".to_owned(),
                ));
            }
        }

        let mut kids = HashSet::new();

        for key in required_items(&self.root, "ContentKeyList", "ContentKey")? {
            let kid = required_attr(key, "kid")?;
            let scheme = required_attr(key, "commonEncryptionScheme")?;

            if !ENCRYPTION_SCHEMES.contains(&scheme) {
                return Err(Error::MalformedRequest(format!(
                    "unsupported commonEncryptionScheme {} on key {}",
                    scheme, kid
                )));
            }

            if !kids.insert(kid.to_ascii_lowercase()) {
                return Err(Error::MalformedRequest(format!(
                    "content key {} is listed more than once",
                    kid
                )));
            }
        }

        for system in required_items(&self.root, "DRMSystemList", "DRMSystem")? {
            let kid = required_attr(system, "kid")?;
            required_attr(system, "systemId")?;
            check_known_kid(&kids, kid, "DRMSystem")?;
        }

        for rule in required_items(&self.root, "ContentKeyUsageRuleList", "ContentKeyUsageRule")? {
            let kid = required_attr(rule, "kid")?;
            required_attr(rule, "intendedTrackType")?;
            check_known_kid(&kids, kid, "ContentKeyUsageRule")?;

            if rule.find(CPIX, "VideoFilter").is_none() && rule.find(CPIX, "AudioFilter").is_none()
            {
                return Err(Error::MalformedRequest(format!(
                    "ContentKeyUsageRule for {} has neither VideoFilter nor AudioFilter",
                    kid
                )));
            }
        }

        Ok(())
    }
}

fn list_items<'a>(
    root: &'a Element,
    list: &'static str,
    item: &'static str,
) -> impl Iterator<Item = &'a Element> + 'a {
    root.find_all(CPIX, list)
        .flat_map(move |x| x.find_all(CPIX, item))
}

fn required_items<'a>(
    root: &'a Element,
    list: &'static str,
    item: &'static str,
) -> Result<Vec<&'a Element>> {
    if root.find(CPIX, list).is_none() {
        return Err(Error::MalformedRequest(format!("missing {}", list)));
    }

    let items = list_items(root, list, item).collect::<Vec<_>>();

    if items.is_empty() {
        return Err(Error::MalformedRequest(format!("{} has no {}", list, item)));
    }

    Ok(items)
}

fn required_attr<'a>(element: &'a Element, name: &str) -> Result<&'a str> {
    element
        .attr(name)
        .map(str::trim)
        .filter(|x| !x.is_empty())
        .ok_or_else(|| {
            Error::MalformedRequest(format!("{} has no {} attribute", element.name(), name))
        })
}

fn check_known_kid(kids: &HashSet<String>, kid: &str, element: &str) -> Result<()> {
    if kids.contains(&kid.to_ascii_lowercase()) {
        Ok(())
    } else {
        Err(Error::MalformedRequest(format!(
            "{} references kid {} missing from ContentKeyList",
            element, kid
        )))
    }
}
