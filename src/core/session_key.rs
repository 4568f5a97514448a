//! Symmetric key used to authenticate packets once a handshake completes.

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Width of a session key (one SHA-256 digest)
pub const SESSION_KEY_SIZE: usize = 32;

/// HMAC key shared by exactly one client and the server.
///
/// Zeroized on drop and redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// All-zero key, used for best-effort packets when no key was ever derived
    pub fn zeroed() -> Self {
        Self([0u8; SESSION_KEY_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }

    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}
