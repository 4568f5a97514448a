//! Diffie-Hellman handshake and session-key derivation using X25519
//!
//! Both peers generate an ephemeral keypair, exchange public keys in the
//! checksum-tier ConnectionRequest/Challenge packets, and hash the shared secret
//! with SHA-256 into a [`SessionKey`]. Private keys and shared secrets never
//! leave this module; both are zeroized when dropped.
//!
//! The server runs the derivation on a background thread per challenge
//! ([`KeyDerivation`]) so that packet intake is never blocked. The result is
//! joined lazily the first time the challenge is touched again.

use std::fmt;
use std::thread::JoinHandle;

use rand_core::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, ReusableSecret, SharedSecret};

use crate::core::packet::PublicKeyBytes;
use crate::core::session_key::SessionKey;
use crate::error::{constants, ProtocolError, Result};
use tracing::{debug, instrument, warn};

/// X25519 keypair for one handshake.
///
/// The secret survives a failed exchange, so a rejected peer key does not
/// cost the handshake its keypair.
pub struct Keypair {
    secret: ReusableSecret,
    public: PublicKey,
}

impl Keypair {
    pub fn public_bytes(&self) -> PublicKeyBytes {
        self.public.to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Generate a fresh ephemeral keypair from the OS RNG
pub fn generate_keypair() -> Keypair {
    let secret = ReusableSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    Keypair { secret, public }
}

/// X25519 shared secret between `own_secret` and `peer_public`.
///
/// # Errors
/// Returns `ProtocolError::HandshakeFailed` if the peer key is a low-order point
/// (the secret would not depend on our private key).
pub fn derive_shared_secret(peer_public: &PublicKeyBytes, own: &Keypair) -> Result<SharedSecret> {
    let shared = own.secret.diffie_hellman(&PublicKey::from(*peer_public));
    if !shared.was_contributory() {
        return Err(ProtocolError::HandshakeFailed(
            constants::ERR_NON_CONTRIBUTORY.into(),
        ));
    }
    Ok(shared)
}

/// One-way hash of the raw shared secret into a session key
pub fn session_key(shared_secret: &SharedSecret) -> SessionKey {
    let mut hasher = Sha256::new();
    hasher.update(shared_secret.as_bytes());
    SessionKey::from_bytes(hasher.finalize().into())
}

/// Full derivation: shared secret then hash
#[instrument(skip_all)]
pub fn derive_session_key(keypair: &Keypair, peer_public: &PublicKeyBytes) -> Result<SessionKey> {
    let shared = derive_shared_secret(peer_public, keypair)?;
    let key = session_key(&shared);
    debug!("Derived session key");
    Ok(key)
}

/// Session-key derivation owned by a server challenge slot
pub enum KeyDerivation {
    /// Background task still owns the private key
    Pending(JoinHandle<Result<SessionKey>>),
    Ready(SessionKey),
    Failed(String),
}

impl KeyDerivation {
    /// Start deriving on a background thread.
    ///
    /// Dropping a pending derivation detaches the thread; it finishes on its own
    /// and its result is discarded.
    pub fn spawn(keypair: Keypair, peer_public: PublicKeyBytes) -> Result<Self> {
        let handle = std::thread::Builder::new()
            .name("gamelink-kdf".into())
            .spawn(move || derive_session_key(&keypair, &peer_public))
            .map_err(|e| {
                warn!(error = %e, "{}", constants::ERR_DERIVATION_SPAWN);
                ProtocolError::HandshakeFailed(constants::ERR_DERIVATION_SPAWN.into())
            })?;
        Ok(KeyDerivation::Pending(handle))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, KeyDerivation::Pending(_))
    }

    /// Block until the derivation has finished and return the key.
    ///
    /// Only the caller touching this slot waits; a resolved derivation returns
    /// immediately on every later call.
    pub fn resolve(&mut self) -> Result<&SessionKey> {
        if let KeyDerivation::Pending(_) = self {
            let pending = std::mem::replace(self, KeyDerivation::Failed(String::new()));
            if let KeyDerivation::Pending(handle) = pending {
                *self = match handle.join() {
                    Ok(Ok(key)) => KeyDerivation::Ready(key),
                    Ok(Err(e)) => KeyDerivation::Failed(e.to_string()),
                    Err(_) => KeyDerivation::Failed(constants::ERR_DERIVATION_PANICKED.into()),
                };
            }
        }

        match &*self {
            KeyDerivation::Ready(key) => Ok(key),
            KeyDerivation::Failed(reason) => Err(ProtocolError::HandshakeFailed(reason.clone())),
            KeyDerivation::Pending(_) => Err(ProtocolError::InvalidState),
        }
    }
}

impl fmt::Debug for KeyDerivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyDerivation::Pending(_) => f.write_str("KeyDerivation::Pending"),
            KeyDerivation::Ready(_) => f.write_str("KeyDerivation::Ready"),
            KeyDerivation::Failed(reason) => write!(f, "KeyDerivation::Failed({reason})"),
        }
    }
}
