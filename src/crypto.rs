//! Signature verification and payload decryption.
//!
//! Signatures are SHA-1 over the lexicographically sorted, concatenated
//! inputs, hex-compared against the query parameter. Encrypted payloads are
//! AES-256-CBC with the key doubling as the (truncated) IV, PKCS#7 padded;
//! the plaintext is `random(16) || msg_len(4, big-endian) || msg || appid`.

use aes::cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};
use base64::engine::general_purpose;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
#[cfg(test)]
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Handles decryption of encrypted-mode webhook payloads.
#[derive(Clone)]
pub struct MessageCrypto {
    encoding_aes_key: [u8; 32],
}

impl MessageCrypto {
    /// Create from the 43-character `EncodingAESKey`.
    ///
    /// The platform hands out the key without its trailing base64 padding;
    /// append `=` and decode to the raw 32-byte AES key.
    pub fn new(encoding_aes_key: &str) -> Result<Self> {
        let encoding_aes_key = encoding_aes_key.trim();
        let padded = format!("{}=", encoding_aes_key);
        let decoded = base64::Engine::decode(&general_purpose::STANDARD, &padded)
            .map_err(|e| Error::Crypto(format!("invalid EncodingAESKey: {}", e)))?;
        if decoded.len() != 32 {
            return Err(Error::Crypto(format!(
                "EncodingAESKey must decode to 32 bytes, got {}",
                decoded.len()
            )));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded);
        Ok(Self {
            encoding_aes_key: key,
        })
    }

    /// Compute the webhook signature over `{token, timestamp, nonce}`.
    pub fn sign(token: &str, timestamp: &str, nonce: &str) -> String {
        let mut parts = [token, timestamp, nonce];
        parts.sort_unstable();
        hex::encode(Sha1::digest(parts.join("").as_bytes()))
    }

    /// Verify the webhook signature carried in the query parameters.
    pub fn verify(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
        Self::sign(token, timestamp, nonce) == signature
    }

    /// Compute the message-level signature over
    /// `{token, timestamp, nonce, encrypted}`.
    pub fn sign_message(token: &str, timestamp: &str, nonce: &str, encrypted: &str) -> String {
        let mut parts = [token, timestamp, nonce, encrypted];
        parts.sort_unstable();
        hex::encode(Sha1::digest(parts.join("").as_bytes()))
    }

    /// Verify the `msg_signature` of an encrypted delivery.
    pub fn verify_message(
        token: &str,
        timestamp: &str,
        nonce: &str,
        encrypted: &str,
        msg_signature: &str,
    ) -> bool {
        Self::sign_message(token, timestamp, nonce, encrypted) == msg_signature
    }

    /// Decrypt a base64 payload and extract the inner XML document.
    ///
    /// Trailing appid metadata after the declared message length is ignored.
    pub fn decrypt(&self, encrypted: &str) -> Result<String> {
        let ciphertext = base64::Engine::decode(&general_purpose::STANDARD, encrypted)
            .map_err(|e| Error::Crypto(format!("invalid base64 payload: {}", e)))?;

        if ciphertext.len() < 32 || ciphertext.len() % 16 != 0 {
            return Err(Error::Crypto(format!(
                "ciphertext too short or unaligned: {} bytes",
                ciphertext.len()
            )));
        }

        // IV is the first 16 bytes of the key itself.
        let iv = &self.encoding_aes_key[..16];
        let cipher = Aes256CbcDec::new_from_slices(&self.encoding_aes_key, iv)
            .map_err(|e| Error::Crypto(format!("cipher setup failed: {:?}", e)))?;

        let mut buf = ciphertext;
        let plaintext = cipher
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|e| Error::Crypto(format!("decryption failed: {:?}", e)))?;
        let plaintext = strip_pkcs7(plaintext)?;

        if plaintext.len() < 20 {
            return Err(Error::Crypto(format!(
                "plaintext too short: {} bytes",
                plaintext.len()
            )));
        }

        let msg_len =
            u32::from_be_bytes([plaintext[16], plaintext[17], plaintext[18], plaintext[19]])
                as usize;
        if plaintext.len() < 20 + msg_len {
            return Err(Error::Crypto(format!(
                "declared length {} exceeds payload of {} bytes",
                msg_len,
                plaintext.len() - 20
            )));
        }

        String::from_utf8(plaintext[20..20 + msg_len].to_vec())
            .map_err(|e| Error::Crypto(format!("inner payload is not utf-8: {}", e)))
    }

    /// Encrypt an inner XML document the way the platform does, for
    /// exercising the decrypt path.
    #[cfg(test)]
    pub fn encrypt(&self, plaintext: &str, app_id: &str) -> Result<String> {
        use aes::cipher::BlockEncryptMut;
        use rand::RngCore;

        let mut random_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut random_bytes);

        let msg = plaintext.as_bytes();
        let tail = app_id.as_bytes();
        let total = 16 + 4 + msg.len() + tail.len();
        // PKCS#7: pad to the block size, a full extra block when aligned.
        let pad = 16 - (total % 16);
        let padded = total + pad;

        let mut buf = vec![pad as u8; padded];
        buf[..16].copy_from_slice(&random_bytes);
        buf[16..20].copy_from_slice(&(msg.len() as u32).to_be_bytes());
        buf[20..20 + msg.len()].copy_from_slice(msg);
        buf[20 + msg.len()..total].copy_from_slice(tail);

        let iv = &self.encoding_aes_key[..16];
        let cipher = Aes256CbcEnc::new_from_slices(&self.encoding_aes_key, iv)
            .map_err(|e| Error::Crypto(format!("cipher setup failed: {:?}", e)))?;
        let n = buf.len();
        let encrypted = cipher
            .encrypt_padded_mut::<NoPadding>(&mut buf, n)
            .map_err(|e| Error::Crypto(format!("encryption failed: {:?}", e)))?;

        Ok(base64::Engine::encode(&general_purpose::STANDARD, encrypted))
    }
}

/// Strip PKCS#7 padding: the last byte is the pad length.
fn strip_pkcs7(data: &[u8]) -> Result<&[u8]> {
    let pad = *data
        .last()
        .ok_or_else(|| Error::Crypto("empty plaintext".into()))? as usize;
    if pad == 0 || pad > 16 || pad > data.len() {
        return Err(Error::Crypto(format!("invalid pkcs7 padding byte {}", pad)));
    }
    Ok(&data[..data.len() - pad])
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_key() -> String {
        let raw_key = [0x23u8; 32];
        base64::Engine::encode(&general_purpose::STANDARD_NO_PAD, raw_key)
    }

    fn test_crypto() -> MessageCrypto {
        let key43 = test_key();
        assert_eq!(key43.len(), 43);
        MessageCrypto::new(&key43).unwrap()
    }

    #[test]
    fn sign_and_verify() {
        let signature = MessageCrypto::sign("tok3n", "1234567890", "n0nce");
        assert!(MessageCrypto::verify(
            "tok3n",
            "1234567890",
            "n0nce",
            &signature
        ));
        // Mutating any input invalidates the tuple.
        assert!(!MessageCrypto::verify(
            "other",
            "1234567890",
            "n0nce",
            &signature
        ));
        assert!(!MessageCrypto::verify(
            "tok3n",
            "1234567891",
            "n0nce",
            &signature
        ));
        assert!(!MessageCrypto::verify(
            "tok3n",
            "1234567890",
            "nonce",
            &signature
        ));
    }

    #[test]
    fn sign_sorts_inputs() {
        // Argument order must not matter once sorted.
        assert_eq!(
            MessageCrypto::sign("b", "a", "c"),
            MessageCrypto::sign("a", "c", "b")
        );
    }

    #[test]
    fn message_signature_covers_payload() {
        let sig = MessageCrypto::sign_message("t", "1", "n", "cipherblob");
        assert!(MessageCrypto::verify_message(
            "t",
            "1",
            "n",
            "cipherblob",
            &sig
        ));
        assert!(!MessageCrypto::verify_message(
            "t", "1", "n", "tampered", &sig
        ));
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let crypto = test_crypto();
        let inner = "<xml><MsgType><![CDATA[text]]></MsgType></xml>";
        let encrypted = crypto.encrypt(inner, "wx1234567890").unwrap();
        let decrypted = crypto.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, inner);
    }

    #[test]
    fn round_trip_with_block_aligned_plaintext() {
        let crypto = test_crypto();
        // 16 + 4 + 8 + 4 = 32 bytes, exactly two blocks before padding.
        let encrypted = crypto.encrypt("12345678", "abcd").unwrap();
        assert_eq!(crypto.decrypt(&encrypted).unwrap(), "12345678");
    }

    #[test]
    fn rejects_short_ciphertext() {
        let crypto = test_crypto();
        let short = base64::Engine::encode(&general_purpose::STANDARD, [0u8; 16]);
        assert!(matches!(crypto.decrypt(&short), Err(Error::Crypto(_))));
    }

    #[test]
    fn rejects_unaligned_ciphertext() {
        let crypto = test_crypto();
        let odd = base64::Engine::encode(&general_purpose::STANDARD, [0u8; 40]);
        assert!(matches!(crypto.decrypt(&odd), Err(Error::Crypto(_))));
    }

    #[test]
    fn rejects_malformed_base64() {
        let crypto = test_crypto();
        assert!(matches!(
            crypto.decrypt("%%%not-base64%%%"),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(MessageCrypto::new("too-short").is_err());
    }

    #[test]
    fn strip_pkcs7_truncates_by_last_byte() {
        let mut data = b"hello world!".to_vec();
        data.extend_from_slice(&[4u8; 4]);
        assert_eq!(strip_pkcs7(&data).unwrap(), b"hello world!");
        assert!(strip_pkcs7(&[0u8]).is_err());
        assert!(strip_pkcs7(&[17u8]).is_err());
    }
}
