//! Encrypted response mode.
//!
//! A document key and an HMAC key are generated per response and wrapped
//! with RSA-OAEP for every `DeliveryData` recipient. Content keys are then
//! encrypted with AES-256-CBC under the document key and authenticated with
//! HMAC-SHA512 under the HMAC key.

use crate::{
    Error, Result,
    cpix::{AES256_CBC, CPIX, DS, ENC, HMAC_SHA512, PSKC, RSA_OAEP_MGF1P},
    xml::Element,
};
use aes::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use rsa::{Oaep, RsaPublicKey, pkcs8::DecodePublicKey};
use sha1::Sha1;
use sha2::Sha512;
use x509_cert::{
    Certificate,
    der::{Decode, Encode},
};

pub const DOCUMENT_KEY_SIZE: usize = 32;
pub const HMAC_KEY_SIZE: usize = 64;
const IV_SIZE: usize = 16;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Per response envelope keys.
pub struct EnvelopeEncryptor {
    document_key: [u8; DOCUMENT_KEY_SIZE],
    hmac_key: Option<[u8; HMAC_KEY_SIZE]>,
}

impl EnvelopeEncryptor {
    /// Fresh document and HMAC keys from the operating system RNG.
    pub fn generate() -> Self {
        let mut document_key = [0; DOCUMENT_KEY_SIZE];
        let mut hmac_key = [0; HMAC_KEY_SIZE];
        OsRng.fill_bytes(&mut document_key);
        OsRng.fill_bytes(&mut hmac_key);

        Self {
            document_key,
            hmac_key: Some(hmac_key),
        }
    }

    pub fn with_keys(
        document_key: [u8; DOCUMENT_KEY_SIZE],
        hmac_key: Option<[u8; HMAC_KEY_SIZE]>,
    ) -> Self {
        Self {
            document_key,
            hmac_key,
        }
    }

    /// HMAC-SHA512 of `data`.
    pub fn mac(&self, data: &[u8]) -> Result<Vec<u8>> {
        let key = self.hmac_key.as_ref().ok_or(Error::MissingHmacKey)?;
        let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key)
            .map_err(|x| Error::Crypto(x.to_string()))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Add `DocumentKey` and `MACMethod` to a `DeliveryData` entry, wrapped
    /// for the certificate in its `DeliveryKey`.
    pub fn wrap_for_recipient(&self, delivery_data: &mut Element) -> Result<()> {
        let hmac_key = self.hmac_key.ok_or(Error::MissingHmacKey)?;
        let public_key = recipient_key(delivery_data)?;

        let wrapped_document_key = rsa_encrypt(&public_key, &self.document_key)?;
        let wrapped_hmac_key = rsa_encrypt(&public_key, &hmac_key)?;

        delivery_data.remove_all(CPIX, "DocumentKey");
        delivery_data.remove_all(CPIX, "MACMethod");

        delivery_data.push(
            Element::new(CPIX, "DocumentKey")
                .with_attr("Algorithm", AES256_CBC)
                .with_child(
                    Element::new(CPIX, "Data").with_child(
                        Element::new(PSKC, "Secret")
                            .with_child(encrypted_value(RSA_OAEP_MGF1P, &wrapped_document_key))
                            .with_child(self.value_mac(&wrapped_document_key)?),
                    ),
                ),
        );

        delivery_data.push(
            Element::new(CPIX, "MACMethod")
                .with_attr("Algorithm", HMAC_SHA512)
                .with_child(
                    Element::new(CPIX, "Key")
                        .with_child(
                            Element::new(ENC, "EncryptionMethod")
                                .with_attr("Algorithm", RSA_OAEP_MGF1P),
                        )
                        .with_child(cipher_data(&wrapped_hmac_key))
                        // Extension: the xenc key type of MACMethod/Key has no ValueMAC.
                        .with_child(self.value_mac(&wrapped_hmac_key)?),
                ),
        );

        Ok(())
    }

    /// `Secret` holding `key` encrypted under the document key, IV first.
    pub fn encrypt_content_key(&self, key: &[u8]) -> Result<Element> {
        let mut iv = [0; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new_from_slices(&self.document_key, &iv)
            .map_err(|x| Error::Crypto(x.to_string()))?
            .encrypt_padded_vec_mut::<Pkcs7>(key);

        let mut value = iv.to_vec();
        value.extend_from_slice(&ciphertext);

        Ok(Element::new(PSKC, "Secret")
            .with_child(encrypted_value(AES256_CBC, &value))
            .with_child(self.value_mac(&value)?))
    }

    fn value_mac(&self, data: &[u8]) -> Result<Element> {
        Ok(Element::new(PSKC, "ValueMAC").with_text(encode(self.mac(data)?)))
    }
}

fn recipient_key(delivery_data: &Element) -> Result<RsaPublicKey> {
    let certificate = delivery_data
        .find(CPIX, "DeliveryKey")
        .and_then(|x| x.find(DS, "X509Data"))
        .and_then(|x| x.find(DS, "X509Certificate"))
        .ok_or_else(|| {
            Error::MalformedRequest("DeliveryData has no X509Certificate".to_owned())
        })?
        .text();

    let der = base64::engine::general_purpose::STANDARD.decode(
        certificate
            .chars()
            .filter(|x| !x.is_ascii_whitespace())
            .collect::<String>(),
    )?;

    let certificate =
        Certificate::from_der(&der).map_err(|x| Error::Certificate(x.to_string()))?;
    let spki = certificate
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|x| Error::Certificate(x.to_string()))?;

    RsaPublicKey::from_public_key_der(&spki).map_err(|x| Error::Certificate(x.to_string()))
}

fn rsa_encrypt(public_key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>> {
    public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), data)
        .map_err(|x| Error::Crypto(x.to_string()))
}

fn encrypted_value(algorithm: &str, data: &[u8]) -> Element {
    Element::new(PSKC, "EncryptedValue")
        .with_child(Element::new(ENC, "EncryptionMethod").with_attr("Algorithm", algorithm))
        .with_child(cipher_data(data))
}

fn cipher_data(data: &[u8]) -> Element {
    Element::new(ENC, "CipherData")
        .with_child(Element::new(ENC, "CipherValue").with_text(encode(data)))
}

fn encode<T: AsRef<[u8]>>(data: T) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}
