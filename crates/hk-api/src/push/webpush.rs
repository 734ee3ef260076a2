//! Web Push message encryption (`aes128gcm`, RFC 8291) and VAPID request
//! signing (RFC 8292).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use p256::ecdh::diffie_hellman;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::DecodePrivateKey;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

const RECORD_SIZE: u32 = 4096;
const TAG_LEN: usize = 16;
const KEY_INFO: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";
const VAPID_LIFETIME_SECONDS: i64 = 12 * 3600;

/// The `keys` object of a browser push subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

impl SubscriptionKeys {
    pub fn from_value(keys: &Value) -> Result<Self> {
        let keys: Self = serde_json::from_value(keys.clone())
            .context("subscription keys must carry p256dh and auth")?;
        keys.user_agent_key()?;
        keys.auth_secret()?;
        Ok(keys)
    }

    fn user_agent_key(&self) -> Result<PublicKey> {
        let bytes = decode_b64(&self.p256dh)?;
        PublicKey::from_sec1_bytes(&bytes).map_err(|_| anyhow!("p256dh is not a P-256 public key"))
    }

    fn auth_secret(&self) -> Result<Vec<u8>> {
        let auth = decode_b64(&self.auth)?;
        if auth.len() != 16 {
            return Err(anyhow!("auth secret must be 16 bytes, got {}", auth.len()));
        }
        Ok(auth)
    }
}

/// Encrypts one push message into a single-record `aes128gcm` body.
pub fn encrypt(payload: &[u8], keys: &SubscriptionKeys) -> Result<Vec<u8>> {
    let ua_public = keys.user_agent_key()?;
    let auth = keys.auth_secret()?;
    let server_secret = SecretKey::random(&mut OsRng);
    let mut salt = [0u8; 16];
    OsRng.fill_bytes(&mut salt);
    encrypt_with(payload, &ua_public, &auth, &server_secret, &salt)
}

fn encrypt_with(
    payload: &[u8],
    ua_public: &PublicKey,
    auth: &[u8],
    server_secret: &SecretKey,
    salt: &[u8; 16],
) -> Result<Vec<u8>> {
    if payload.len() + 1 + TAG_LEN > RECORD_SIZE as usize {
        return Err(anyhow!(
            "push payload of {} bytes does not fit one record",
            payload.len()
        ));
    }

    let server_public = server_secret.public_key().to_encoded_point(false);
    let ua_point = ua_public.to_encoded_point(false);
    let shared = diffie_hellman(server_secret.to_nonzero_scalar(), ua_public.as_affine());
    let (cek, nonce) = content_keys(
        shared.raw_secret_bytes(),
        auth,
        ua_point.as_bytes(),
        server_public.as_bytes(),
        salt,
    )?;

    let mut plaintext = Vec::with_capacity(payload.len() + 1);
    plaintext.extend_from_slice(payload);
    // Padding delimiter of the last (only) record.
    plaintext.push(0x02);

    let cipher = Aes128Gcm::new_from_slice(&cek).map_err(|_| anyhow!("invalid content key"))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|e| anyhow!("push payload encryption failed: {e}"))?;

    let key_id = server_public.as_bytes();
    let mut body = Vec::with_capacity(salt.len() + 5 + key_id.len() + ciphertext.len());
    body.extend_from_slice(salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(key_id.len() as u8);
    body.extend_from_slice(key_id);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

fn content_keys(
    shared: &[u8],
    auth: &[u8],
    ua_public: &[u8],
    server_public: &[u8],
    salt: &[u8],
) -> Result<([u8; 16], [u8; 12])> {
    let mut key_info = Vec::with_capacity(KEY_INFO.len() + ua_public.len() + server_public.len());
    key_info.extend_from_slice(KEY_INFO);
    key_info.extend_from_slice(ua_public);
    key_info.extend_from_slice(server_public);

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth), shared)
        .expand(&key_info, &mut ikm)
        .map_err(|_| anyhow!("key derivation failed"))?;

    let prk = Hkdf::<Sha256>::new(Some(salt), &ikm);
    let mut cek = [0u8; 16];
    let mut nonce = [0u8; 12];
    prk.expand(CEK_INFO, &mut cek)
        .map_err(|_| anyhow!("key derivation failed"))?;
    prk.expand(NONCE_INFO, &mut nonce)
        .map_err(|_| anyhow!("key derivation failed"))?;
    Ok((cek, nonce))
}

fn decode_b64(value: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .context("invalid base64url key")
}

#[derive(Debug, Serialize, Deserialize)]
struct VapidClaims {
    aud: String,
    exp: i64,
    sub: String,
}

/// Application server identity sent to push services.
pub struct VapidSigner {
    key: EncodingKey,
    public_key: String,
    subject: String,
}

impl VapidSigner {
    /// `pem` is a PKCS#8 P-256 private key; `subject` a `mailto:` or `https:` contact.
    pub fn from_pem(pem: &str, subject: impl Into<String>) -> Result<Self> {
        let secret =
            SecretKey::from_pkcs8_pem(pem).map_err(|e| anyhow!("invalid VAPID private key: {e}"))?;
        let public = secret.public_key().to_encoded_point(false);
        Ok(Self {
            key: EncodingKey::from_ec_pem(pem.as_bytes()).context("invalid VAPID private key")?,
            public_key: URL_SAFE_NO_PAD.encode(public.as_bytes()),
            subject: subject.into(),
        })
    }

    /// The key browsers pass as `applicationServerKey`.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn authorization(&self, endpoint: &str, now: DateTime<Utc>) -> Result<String> {
        let url = reqwest::Url::parse(endpoint).context("invalid push endpoint")?;
        let claims = VapidClaims {
            aud: url.origin().ascii_serialization(),
            exp: now.timestamp() + VAPID_LIFETIME_SECONDS,
            sub: self.subject.clone(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::ES256), &claims, &self.key)?;
        Ok(format!("vapid t={token}, k={}", self.public_key))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use serde_json::json;

    /// A browser-side key pair plus the `keys` object it would register.
    pub(crate) fn subscriber() -> (SecretKey, Vec<u8>, Value) {
        let secret = SecretKey::random(&mut OsRng);
        let mut auth = vec![0u8; 16];
        OsRng.fill_bytes(&mut auth);
        let public = secret.public_key().to_encoded_point(false);
        let keys = json!({
            "p256dh": URL_SAFE_NO_PAD.encode(public.as_bytes()),
            "auth": URL_SAFE_NO_PAD.encode(&auth),
        });
        (secret, auth, keys)
    }

    /// Opens an `aes128gcm` body the way a browser does.
    pub(crate) fn decrypt(body: &[u8], ua_secret: &SecretKey, auth: &[u8]) -> Result<Vec<u8>> {
        if body.len() < 21 {
            return Err(anyhow!("body shorter than the header"));
        }
        let (salt, rest) = body.split_at(16);
        let id_len = rest[4] as usize;
        let rest = &rest[5..];
        if rest.len() < id_len {
            return Err(anyhow!("truncated key id"));
        }
        let (server_public, ciphertext) = rest.split_at(id_len);

        let server = PublicKey::from_sec1_bytes(server_public)
            .map_err(|_| anyhow!("key id is not a P-256 point"))?;
        let shared = diffie_hellman(ua_secret.to_nonzero_scalar(), server.as_affine());
        let ua_public = ua_secret.public_key().to_encoded_point(false);
        let (cek, nonce) = content_keys(
            shared.raw_secret_bytes(),
            auth,
            ua_public.as_bytes(),
            server_public,
            salt,
        )?;

        let cipher = Aes128Gcm::new_from_slice(&cek).map_err(|_| anyhow!("invalid content key"))?;
        let mut plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|e| anyhow!("decryption failed: {e}"))?;
        match plaintext.pop() {
            Some(0x02) => Ok(plaintext),
            _ => Err(anyhow!("missing last-record delimiter")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{decrypt, subscriber};
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation};
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use serde_json::json;

    #[test]
    fn subscriber_opens_the_encrypted_body() {
        let (secret, auth, keys) = subscriber();
        let keys = SubscriptionKeys::from_value(&keys).unwrap();
        let payload = br#"{"title":"Task updated"}"#;

        let body = encrypt(payload, &keys).unwrap();
        assert_eq!(&body[16..20], &RECORD_SIZE.to_be_bytes());
        assert_eq!(body[20], 65);
        assert_eq!(decrypt(&body, &secret, &auth).unwrap(), payload.to_vec());

        let again = encrypt(payload, &keys).unwrap();
        assert_ne!(body, again);
    }

    #[test]
    fn tampered_body_is_rejected() {
        let (secret, auth, keys) = subscriber();
        let keys = SubscriptionKeys::from_value(&keys).unwrap();
        let mut body = encrypt(b"hello", &keys).unwrap();
        let last = body.len() - 1;
        body[last] ^= 0x01;
        assert!(decrypt(&body, &secret, &auth).is_err());
    }

    #[test]
    fn largest_compact_message_fits_one_record() {
        let (_, _, keys) = subscriber();
        let keys = SubscriptionKeys::from_value(&keys).unwrap();
        let payload = vec![b'x'; hk_core::notification::MAX_PUSH_PAYLOAD_BYTES];
        assert_eq!(encrypt(&payload, &keys).unwrap().len(), 4096);
        assert!(encrypt(&vec![b'x'; 4096], &keys).is_err());
    }

    #[test]
    fn subscriptions_without_usable_keys_are_rejected() {
        assert!(SubscriptionKeys::from_value(&json!({})).is_err());
        assert!(SubscriptionKeys::from_value(&json!({ "p256dh": "AAAA", "auth": "AAAA" })).is_err());

        let (_, _, mut keys) = subscriber();
        keys["auth"] = json!(URL_SAFE_NO_PAD.encode([1u8; 8]));
        assert!(SubscriptionKeys::from_value(&keys).is_err());
    }

    #[test]
    fn vapid_header_verifies_against_the_advertised_key() {
        let secret = SecretKey::random(&mut OsRng);
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        let signer = VapidSigner::from_pem(&pem, "mailto:ops@example.com").unwrap();
        let now = Utc::now();

        let header = signer
            .authorization("https://push.example.net:8443/send/abc", now)
            .unwrap();
        let (token, key) = header
            .strip_prefix("vapid t=")
            .and_then(|rest| rest.split_once(", k="))
            .unwrap();
        assert_eq!(key, signer.public_key());

        let point = URL_SAFE_NO_PAD.decode(key).unwrap();
        assert_eq!(point.len(), 65);
        let decoding = DecodingKey::from_ec_components(
            &URL_SAFE_NO_PAD.encode(&point[1..33]),
            &URL_SAFE_NO_PAD.encode(&point[33..65]),
        )
        .unwrap();
        let mut validation = Validation::new(Algorithm::ES256);
        validation.set_audience(&["https://push.example.net:8443"]);
        let claims = jsonwebtoken::decode::<VapidClaims>(token, &decoding, &validation)
            .unwrap()
            .claims;
        assert_eq!(claims.sub, "mailto:ops@example.com");
        assert_eq!(claims.exp, now.timestamp() + VAPID_LIFETIME_SECONDS);
    }
}
