use std::fmt;

/// DRM systems known to the engine, keyed by their DASH-IF system id.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DrmSystem {
    Widevine,
    PlayReady,
    /// Also used for HLS SAMPLE-AES key delivery.
    FairPlay,
    HlsAes128,
    ClearKeyAes128,
    CommonPssh,
}

impl DrmSystem {
    pub const ALL: [DrmSystem; 6] = [
        DrmSystem::Widevine,
        DrmSystem::PlayReady,
        DrmSystem::FairPlay,
        DrmSystem::HlsAes128,
        DrmSystem::ClearKeyAes128,
        DrmSystem::CommonPssh,
    ];

    pub fn system_id(&self) -> &'static str {
        match self {
            DrmSystem::Widevine => "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed",
            DrmSystem::PlayReady => "9a04f079-9840-4286-ab92-e65be0885f95",
            DrmSystem::FairPlay => "94ce86fb-07ff-4f43-adb8-93d2fa968ca2",
            DrmSystem::HlsAes128 => "81376844-f976-481e-a84e-cc25d39b0b33",
            DrmSystem::ClearKeyAes128 => "3ea8778f-7742-4bf9-b18b-e834b2acbd47",
            DrmSystem::CommonPssh => "1077efec-c0b2-4d02-ace3-3c1e52e2fb4b",
        }
    }

    /// Raw 16 byte system id as carried in `pssh` boxes.
    pub fn system_id_bytes(&self) -> [u8; 16] {
        let mut bytes = [0; 16];

        if let Ok(x) = hex::decode(self.system_id().replace('-', "")) {
            bytes.copy_from_slice(&x);
        }

        bytes
    }

    /// Match a `systemId` attribute value, ignoring case and surrounding whitespace.
    pub fn from_system_id(system_id: &str) -> Option<Self> {
        let system_id = system_id.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|x| x.system_id() == system_id)
    }

    pub fn from_system_id_bytes(system_id: &[u8; 16]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|x| &x.system_id_bytes() == system_id)
    }
}

impl fmt::Display for DrmSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                DrmSystem::Widevine => "widevine",
                DrmSystem::PlayReady => "playready",
                DrmSystem::FairPlay => "fairplay",
                DrmSystem::HlsAes128 => "hls-aes-128",
                DrmSystem::ClearKeyAes128 => "clearkey-aes-128",
                DrmSystem::CommonPssh => "common-pssh",
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_system_id_is_case_insensitive() {
        assert_eq!(
            DrmSystem::from_system_id(" EDEF8BA9-79D6-4ACE-A3C8-27DCD51D21ED "),
            Some(DrmSystem::Widevine)
        );
        assert_eq!(
            DrmSystem::from_system_id("00000000-0000-0000-0000-000000000000"),
            None
        );
    }

    #[test]
    fn test_system_id_bytes() {
        let bytes = DrmSystem::CommonPssh.system_id_bytes();
        assert_eq!(hex::encode(bytes), "1077efecc0b24d02ace33c1e52e2fb4b");
        assert_eq!(
            DrmSystem::from_system_id_bytes(&bytes),
            Some(DrmSystem::CommonPssh)
        );
    }
}
