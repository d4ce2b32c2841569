use std::fmt;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Process-wide generator backing [`UniqueId::random`]. Seeded lazily from
/// entropy, or explicitly via [`UniqueId::seed`] for deterministic ids.
static ID_RNG: Mutex<Option<StdRng>> = Mutex::new(None);

/// 128-bit identifier with a 32-character lowercase hex text form.
///
/// Equality and ordering follow the raw bytes. An id is valid iff it is
/// non-zero.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(Uuid);

impl UniqueId {
    pub const NIL: UniqueId = UniqueId(Uuid::nil());

    pub fn from_halves(hi: u64, lo: u64) -> Self {
        Self(Uuid::from_u64_pair(hi, lo))
    }

    pub fn halves(&self) -> (u64, u64) {
        self.0.as_u64_pair()
    }

    pub fn random() -> Self {
        let mut guard = ID_RNG.lock();
        let rng = guard.get_or_insert_with(StdRng::from_entropy);
        Self::from_halves(rng.gen(), rng.gen())
    }

    /// Reseed the process-wide generator. A test that seeds before creating
    /// an engine observes a deterministic id sequence.
    pub fn seed(seed: u64) {
        *ID_RNG.lock() = Some(StdRng::seed_from_u64(seed));
    }

    /// Parse the 32-hex-character form. A leading `0x`/`x` prefix is accepted.
    pub fn from_hex(text: &str) -> Result<Self, CoreError> {
        let hex = text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
            .or_else(|| text.strip_prefix('x'))
            .or_else(|| text.strip_prefix('X'))
            .unwrap_or(text);
        if hex.len() != 32 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidId(text.to_string()));
        }
        Uuid::try_parse(hex)
            .map(Self)
            .map_err(|_| CoreError::InvalidId(text.to_string()))
    }

    pub fn to_hex(&self) -> String {
        self.0.simple().to_string()
    }

    pub fn valid(&self) -> bool {
        !self.0.is_nil()
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        UniqueId::seed(7);
        for _ in 0..64 {
            let id = UniqueId::random();
            assert_eq!(UniqueId::from_hex(&id.to_hex()).unwrap(), id);
        }
    }

    #[test]
    fn test_hex_form_is_32_lowercase() {
        let id = UniqueId::from_halves(0xDEAD_BEEF, 0x1234);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 32);
        assert_eq!(hex, hex.to_lowercase());
    }

    #[test]
    fn test_prefix_accepted() {
        let id = UniqueId::random();
        let hex = id.to_hex();
        assert_eq!(UniqueId::from_hex(&format!("0x{hex}")).unwrap(), id);
        assert_eq!(UniqueId::from_hex(&format!("x{hex}")).unwrap(), id);
    }

    #[test]
    fn test_invalid_rejected() {
        assert!(UniqueId::from_hex("abc").is_err());
        assert!(UniqueId::from_hex(&"g".repeat(32)).is_err());
    }

    #[test]
    fn test_nil_is_invalid() {
        assert!(!UniqueId::NIL.valid());
        assert!(UniqueId::random().valid());
    }

    #[test]
    fn test_seeded_sequence_is_deterministic() {
        UniqueId::seed(42);
        let a = (UniqueId::random(), UniqueId::random());
        UniqueId::seed(42);
        let b = (UniqueId::random(), UniqueId::random());
        assert_eq!(a, b);
    }

    #[test]
    fn test_ordering_by_halves() {
        let lo = UniqueId::from_halves(1, 0);
        let hi = UniqueId::from_halves(2, 0);
        assert!(lo < hi);
    }
}
