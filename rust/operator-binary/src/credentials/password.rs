use snafu::{ResultExt, Snafu};
use strum::{EnumDiscriminants, IntoStaticStr};

const ADMIN_PASSWORD_LENGTH: usize = 32;
const SESSION_KEY_LENGTH: usize = 20;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
// Largest multiple of the alphabet size that fits into a byte. Random bytes at or
// above it are discarded so every character is equally likely.
const REJECTION_THRESHOLD: u8 = (256 / ALPHANUMERIC.len() * ALPHANUMERIC.len()) as u8;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to gather random bytes"))]
    RandomBytes { source: openssl::error::ErrorStack },

    #[snafu(display("failed to hash password"))]
    HashPassword { source: bcrypt::BcryptError },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Random admin password. Never log the returned bytes.
pub fn generate_password() -> Result<Vec<u8>> {
    random_alphanumeric(ADMIN_PASSWORD_LENGTH)
}

/// Key used by the API server to sign session tokens, independent of any password.
pub fn generate_session_key() -> Result<Vec<u8>> {
    random_alphanumeric(SESSION_KEY_LENGTH)
}

/// One-way bcrypt hash of `plaintext`. A trailing newline (common when secrets are
/// edited by hand) is not part of the password.
pub fn hash_password(plaintext: &[u8], cost: u32) -> Result<String> {
    bcrypt::hash(normalize(plaintext), cost).context(HashPasswordSnafu)
}

/// Checks `candidate` against a bcrypt `hash`. A hash that cannot be parsed never
/// matches, so the caller re-hashes the current password.
pub fn verify_password(candidate: &[u8], hash: &[u8]) -> bool {
    let Ok(hash) = std::str::from_utf8(hash) else {
        return false;
    };
    match bcrypt::verify(normalize(candidate), hash) {
        Ok(matches) => matches,
        Err(error) => {
            tracing::debug!(%error, "stored password hash is not a valid bcrypt hash");
            false
        }
    }
}

fn normalize(plaintext: &[u8]) -> &[u8] {
    let mut end = plaintext.len();
    while end > 0 && plaintext[end - 1] == b'\n' {
        end -= 1;
    }
    &plaintext[..end]
}

fn random_alphanumeric(length: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(length);
    let mut buf = [0; 64];
    while out.len() < length {
        openssl::rand::rand_bytes(&mut buf).context(RandomBytesSnafu)?;
        out.extend(
            buf.iter()
                .filter(|byte| **byte < REJECTION_THRESHOLD)
                .map(|byte| ALPHANUMERIC[usize::from(*byte) % ALPHANUMERIC.len()])
                .take(length - out.len()),
        );
    }
    Ok(out)
}
