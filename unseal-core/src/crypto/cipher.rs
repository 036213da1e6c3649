use crate::errors::{Error, Result};
use aes_gcm::aead::consts::U12;
#[allow(deprecated)]
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Length of the random nonce prepended to every sealed payload.
pub const NONCE_LEN: usize = 12;
/// Length of the GCM authentication tag appended by the cipher.
pub const TAG_LEN: usize = 16;
/// Key sizes in bytes selecting AES-128, AES-192 and AES-256.
pub const KEY_SIZES: [usize; 3] = [16, 24, 32];

/// Draws fresh key material of the requested size from the thread CSPRNG.
pub fn generate_key(size: usize) -> Result<Zeroizing<Vec<u8>>> {
    if !KEY_SIZES.contains(&size) {
        return Err(Error::validation(format!(
            "invalid key size {size}: expected 16, 24 or 32 bytes"
        )));
    }
    Ok(Zeroizing::new(random_bytes(size)))
}

/// Seals `plaintext` under `key`, returning `nonce || ciphertext || tag`.
pub fn seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = random_bytes(NONCE_LEN);
    let sealed = match key.len() {
        16 => encrypt_with::<Aes128Gcm>(key, &nonce, plaintext)?,
        24 => encrypt_with::<Aes192Gcm>(key, &nonce, plaintext)?,
        32 => encrypt_with::<Aes256Gcm>(key, &nonce, plaintext)?,
        other => return Err(unsupported_key(other)),
    };

    let mut output = Vec::with_capacity(NONCE_LEN + sealed.len());
    output.extend_from_slice(&nonce);
    output.extend_from_slice(&sealed);
    Ok(output)
}

/// Opens a payload produced by [`seal`].
///
/// Any integrity failure, whether caused by a wrong key or by a modified
/// payload, is reported as [`Error::AuthenticationFailed`].
pub fn open(key: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < NONCE_LEN + TAG_LEN {
        return Err(Error::validation("invalid ciphertext: payload too short"));
    }
    let (nonce, sealed) = payload.split_at(NONCE_LEN);
    match key.len() {
        16 => decrypt_with::<Aes128Gcm>(key, nonce, sealed),
        24 => decrypt_with::<Aes192Gcm>(key, nonce, sealed),
        32 => decrypt_with::<Aes256Gcm>(key, nonce, sealed),
        other => Err(unsupported_key(other)),
    }
}

/// Derives a per-context key of the same length as `key` with HKDF-SHA256.
pub fn derive_key(key: &[u8], context: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let hkdf = Hkdf::<Sha256>::new(None, key);
    let mut okm = Zeroizing::new(vec![0u8; key.len()]);
    hkdf.expand(context, okm.as_mut_slice())
        .map_err(|_| Error::validation("failed to derive key material"))?;
    Ok(okm)
}

pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    let mut buffer = vec![0u8; len];
    let mut rng = rand::rng();
    rng.fill_bytes(&mut buffer);
    buffer
}

#[allow(deprecated)]
fn encrypt_with<C>(key: &[u8], nonce: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| unsupported_key(key.len()))?;
    let nonce = GenericArray::clone_from_slice(nonce);
    cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::validation("failed to encrypt payload"))
}

#[allow(deprecated)]
fn decrypt_with<C>(key: &[u8], nonce: &[u8], sealed: &[u8]) -> Result<Vec<u8>>
where
    C: KeyInit + Aead + AeadCore<NonceSize = U12>,
{
    let cipher = C::new_from_slice(key).map_err(|_| unsupported_key(key.len()))?;
    let nonce = GenericArray::clone_from_slice(nonce);
    cipher
        .decrypt(&nonce, sealed)
        .map_err(|_| Error::AuthenticationFailed)
}

fn unsupported_key(len: usize) -> Error {
    Error::validation(format!("unsupported key length {len}"))
}
