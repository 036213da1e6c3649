//! Envelope encryption primitives: AEAD sealing over one key version and the
//! versioned wire format wrapping each sealed payload.

pub mod cipher;
pub mod wire;

pub use cipher::{derive_key, generate_key, open, seal, KEY_SIZES, NONCE_LEN, TAG_LEN};
pub use wire::{WireCiphertext, CIPHERTEXT_PREFIX};
