/*
    REFERENCES
    ----------

    1. https://www.w3.org/TR/eme-initdata-cenc/#common-system
    2. https://github.com/shaka-project/shaka-packager/blob/56e227267c9091a0f65b4d92d9064dda4557f3a7/packager/tools/pssh/pssh-box.py

*/

use crate::{DrmSystem, Error, Result, reader::Reader};
use base64::Engine;

const PSSH: [u8; 4] = *b"pssh";

/// Protection system specific header box.
#[derive(Clone, Debug, PartialEq)]
pub struct PsshBox {
    pub version: u8,
    pub flags: u32,
    pub system_id: [u8; 16],
    pub key_ids: Vec<[u8; 16]>,
    pub data: Vec<u8>,
}

impl PsshBox {
    /// Version 1 box of the W3C Common PSSH system listing a single key id.
    pub fn common(kid: [u8; 16]) -> Self {
        Self {
            version: 1,
            flags: 0,
            system_id: DrmSystem::CommonPssh.system_id_bytes(),
            key_ids: vec![kid],
            data: Vec::new(),
        }
    }

    /// Version 0 Widevine box whose `WidevinePsshData` lists a single key id.
    pub fn widevine(kid: [u8; 16]) -> Self {
        // field 2 (key_id), length delimited
        let mut data = vec![0x12, 0x10];
        data.extend_from_slice(&kid);

        Self {
            version: 0,
            flags: 0,
            system_id: DrmSystem::Widevine.system_id_bytes(),
            key_ids: Vec::new(),
            data,
        }
    }

    /// Version 0 PlayReady box carrying a PlayReady object.
    pub fn playready(object: Vec<u8>) -> Self {
        Self {
            version: 0,
            flags: 0,
            system_id: DrmSystem::PlayReady.system_id_bytes(),
            key_ids: Vec::new(),
            data: object,
        }
    }

    pub fn system(&self) -> Option<DrmSystem> {
        DrmSystem::from_system_id_bytes(&self.system_id)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(data.to_vec());
        let read_err = |x: std::io::Error| Error::MalformedRequest(format!("pssh box: {}", x));

        let size = reader.read_u32().map_err(read_err)?;

        if size as usize != data.len() {
            return Err(Error::MalformedRequest(format!(
                "pssh box size {} does not match data length {}",
                size,
                data.len()
            )));
        }

        if reader.read_array::<4>().map_err(read_err)? != PSSH {
            return Err(Error::MalformedRequest("not a pssh box".to_owned()));
        }

        let version = reader.read_u8().map_err(read_err)?;
        let flags = reader.read_u24().map_err(read_err)?;
        let system_id = reader.read_array::<16>().map_err(read_err)?;
        let mut key_ids = Vec::new();

        if version > 0 {
            let count = reader.read_u32().map_err(read_err)?;

            for _ in 0..count {
                key_ids.push(reader.read_array::<16>().map_err(read_err)?);
            }
        }

        let data_size = reader.read_u32().map_err(read_err)?;
        let data = reader.read_bytes(data_size as usize).map_err(read_err)?;

        if reader.has_more_data() {
            return Err(Error::MalformedRequest(
                "pssh box has trailing bytes".to_owned(),
            ));
        }

        Ok(Self {
            version,
            flags,
            system_id,
            key_ids,
            data,
        })
    }

    pub fn from_base64(data: &str) -> Result<Self> {
        Self::parse(&base64::engine::general_purpose::STANDARD.decode(data.trim())?)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.push(self.version);
        body.extend_from_slice(&self.flags.to_be_bytes()[1..]);
        body.extend_from_slice(&self.system_id);

        if self.version > 0 {
            body.extend_from_slice(&(self.key_ids.len() as u32).to_be_bytes());

            for kid in &self.key_ids {
                body.extend_from_slice(kid);
            }
        }

        body.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        body.extend_from_slice(&self.data);

        let mut bytes = Vec::with_capacity(body.len() + 8);
        bytes.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
        bytes.extend_from_slice(&PSSH);
        bytes.extend_from_slice(&body);
        bytes
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.to_bytes())
    }
}

/// PlayReady object with a single v4.3 `WRMHEADER` record for `kid`.
pub fn playready_object(kid: [u8; 16]) -> Vec<u8> {
    // KID values are little endian GUIDs.
    let mut guid = kid;
    guid[..4].reverse();
    guid[4..6].reverse();
    guid[6..8].reverse();

    let header = format!(
        r#"<WRMHEADER xmlns="http://schemas.microsoft.com/DRM/2007/03/PlayReadyHeader" version="4.3.0.0"><DATA><PROTECTINFO><KIDS><KID VALUE="{}"></KID></KIDS></PROTECTINFO></DATA></WRMHEADER>"#,
        base64::engine::general_purpose::STANDARD.encode(guid)
    );
    let record = header
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect::<Vec<_>>();

    let mut object = Vec::with_capacity(record.len() + 10);
    object.extend_from_slice(&((record.len() + 10) as u32).to_le_bytes());
    object.extend_from_slice(&1_u16.to_le_bytes());
    object.extend_from_slice(&1_u16.to_le_bytes());
    object.extend_from_slice(&(record.len() as u16).to_le_bytes());
    object.extend_from_slice(&record);
    object
}

/// Parse a canonical hyphenated UUID into its 16 bytes.
pub fn parse_kid(kid: &str) -> Result<[u8; 16]> {
    let kid = kid.trim();
    let groups = kid.split('-').map(str::len).collect::<Vec<_>>();

    if groups != [8, 4, 4, 4, 12] {
        return Err(Error::InvalidKeyId(kid.to_owned()));
    }

    let mut bytes = [0; 16];
    hex::decode_to_slice(kid.replace('-', ""), &mut bytes)
        .map_err(|_| Error::InvalidKeyId(kid.to_owned()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KID: &str = "6c5f5206-7d98-4808-84d8-94f132c1e9fe";

    #[test]
    fn test_common_box_layout() {
        let kid = parse_kid(KID).unwrap();
        let bytes = PsshBox::common(kid).to_bytes();

        assert_eq!(bytes.len(), 52);
        assert_eq!(&bytes[..4], &[0, 0, 0, 0x34]);
        assert_eq!(&bytes[4..8], b"pssh");
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        assert_eq!(
            hex::encode(&bytes[12..28]),
            "1077efecc0b24d02ace33c1e52e2fb4b"
        );
        assert_eq!(&bytes[28..32], &[0, 0, 0, 1]);
        assert_eq!(&bytes[32..48], &kid);
        assert_eq!(&bytes[48..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_parse_common_box() {
        let kid = parse_kid(KID).unwrap();
        let pssh = PsshBox::from_base64(&PsshBox::common(kid).to_base64()).unwrap();

        assert_eq!(pssh.system(), Some(DrmSystem::CommonPssh));
        assert_eq!(pssh.key_ids, vec![kid]);
        assert!(pssh.data.is_empty());
    }

    #[test]
    fn test_parse_version_0_box() {
        let pssh = PsshBox {
            version: 0,
            flags: 0,
            system_id: DrmSystem::Widevine.system_id_bytes(),
            key_ids: Vec::new(),
            data: vec![0x12, 0x10],
        };
        let bytes = pssh.to_bytes();

        assert_eq!(bytes.len(), 34);
        assert_eq!(PsshBox::parse(&bytes).unwrap(), pssh);
    }

    #[test]
    fn test_parse_rejects_bad_boxes() {
        let mut bytes = PsshBox::common([0; 16]).to_bytes();
        bytes.push(0);
        assert!(PsshBox::parse(&bytes).is_err());
        assert!(PsshBox::parse(b"\x00\x00\x00\x08moov").is_err());
        assert!(PsshBox::parse(&[0, 0]).is_err());
    }

    #[test]
    fn test_widevine_box() {
        let kid = parse_kid(KID).unwrap();
        let pssh = PsshBox::parse(&PsshBox::widevine(kid).to_bytes()).unwrap();

        assert_eq!(pssh.system(), Some(DrmSystem::Widevine));
        assert_eq!(&pssh.data[..2], &[0x12, 0x10]);
        assert_eq!(&pssh.data[2..], &kid);
    }

    #[test]
    fn test_playready_object() {
        let object = playready_object(parse_kid(KID).unwrap());
        let size = u32::from_le_bytes([object[0], object[1], object[2], object[3]]);
        let record_len = u16::from_le_bytes([object[8], object[9]]) as usize;

        assert_eq!(size as usize, object.len());
        assert_eq!(&object[4..8], &[1, 0, 1, 0]);
        assert_eq!(record_len + 10, object.len());

        let header = String::from_utf16(
            &object[10..]
                .chunks_exact(2)
                .map(|x| u16::from_le_bytes([x[0], x[1]]))
                .collect::<Vec<_>>(),
        )
        .unwrap();
        let guid = base64::engine::general_purpose::STANDARD
            .encode(hex::decode("06525f6c987d084884d894f132c1e9fe").unwrap());
        assert!(header.contains(&format!(r#"<KID VALUE="{}">"#, guid)));

        let pssh = PsshBox::parse(&PsshBox::playready(object.clone()).to_bytes()).unwrap();
        assert_eq!(pssh.system(), Some(DrmSystem::PlayReady));
        assert_eq!(pssh.data, object);
    }

    #[test]
    fn test_parse_kid() {
        assert_eq!(
            hex::encode(parse_kid(KID).unwrap()),
            "6c5f52067d98480884d894f132c1e9fe"
        );
        assert!(matches!(
            parse_kid("6c5f52067d98480884d894f132c1e9fe"),
            Err(Error::InvalidKeyId(_))
        ));
        assert!(parse_kid("zc5f5206-7d98-4808-84d8-94f132c1e9fe").is_err());
    }
}
