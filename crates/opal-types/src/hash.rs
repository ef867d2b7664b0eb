use serde::Serialize;

use crate::error::TypeError;
use crate::identifier::Identifier;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so digests computed for different purposes never collide
/// even when the hashed bytes are identical.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for value-object content digests.
    pub const VALUE_OBJECT: Self = Self {
        domain: "opal-value-object-v1",
    };
    /// Hasher for natural-identity entity keys.
    pub const NATURAL_KEY: Self = Self {
        domain: "opal-natural-key-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        *hasher.finalize().as_bytes()
    }

    /// Hash a serializable value as JSON with domain separation.
    ///
    /// Callers are responsible for canonical ordering; `BTreeMap`s and
    /// `serde_json::Value` objects serialize with sorted keys.
    pub fn hash_json<T: Serialize>(&self, value: &T) -> Result<[u8; 32], TypeError> {
        let data =
            serde_json::to_vec(value).map_err(|e| TypeError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Digest of a serializable value, hex-encoded as an identifier.
    pub fn identifier<T: Serialize>(&self, value: &T) -> Result<Identifier, TypeError> {
        Ok(Identifier::from_digest(&self.hash_json(value)?))
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn hash_is_deterministic() {
        let id1 = ContentHasher::VALUE_OBJECT.hash(b"amount=5");
        let id2 = ContentHasher::VALUE_OBJECT.hash(b"amount=5");
        assert_eq!(id1, id2);
    }

    #[test]
    fn different_domains_produce_different_hashes() {
        let data = b"same content";
        assert_ne!(
            ContentHasher::VALUE_OBJECT.hash(data),
            ContentHasher::NATURAL_KEY.hash(data)
        );
        assert_ne!(
            ContentHasher::new("custom-v1").hash(data),
            ContentHasher::VALUE_OBJECT.hash(data)
        );
    }

    #[test]
    fn json_identifier_is_key_order_independent() {
        let a = json!({ "currency": "EUR", "amount": 5 });
        let b = json!({ "amount": 5, "currency": "EUR" });
        assert_eq!(
            ContentHasher::VALUE_OBJECT.identifier(&a).unwrap(),
            ContentHasher::VALUE_OBJECT.identifier(&b).unwrap()
        );
    }

    proptest! {
        #[test]
        fn equal_content_equal_identifier(amount in any::<i64>(), currency in "[A-Z]{3}") {
            let a = json!({ "amount": amount, "currency": currency });
            let b = a.clone();
            prop_assert_eq!(
                ContentHasher::VALUE_OBJECT.identifier(&a).unwrap(),
                ContentHasher::VALUE_OBJECT.identifier(&b).unwrap()
            );
        }

        #[test]
        fn different_content_different_identifier(a in any::<i64>(), b in any::<i64>()) {
            prop_assume!(a != b);
            prop_assert_ne!(
                ContentHasher::VALUE_OBJECT.identifier(&json!({ "amount": a })).unwrap(),
                ContentHasher::VALUE_OBJECT.identifier(&json!({ "amount": b })).unwrap()
            );
        }
    }
}
