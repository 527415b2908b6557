use std::collections::BTreeMap;
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

/// Operation parameters that take part in a fingerprint. Sorted, so insertion
/// order never changes the key.
pub type OperationParams = BTreeMap<String, String>;

/// Content-addressed cache key (xxHash3-128).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u128);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        format!("{:032x}", self.0)
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        u128::from_str_radix(hex, 16).ok().map(Self)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Derive the cache key for one expensive analysis call.
///
/// Every field is length-prefixed so that moving bytes between fields (e.g.
/// `("ab", "c")` vs `("a", "bc")`) yields a different key. Bump
/// `schema_version` whenever the cached payload shape changes.
pub fn fingerprint(
    image_bytes: &[u8],
    operation: &str,
    params: &OperationParams,
    schema_version: &str,
) -> Fingerprint {
    let mut hasher = Xxh3::new();

    write_field(&mut hasher, image_bytes);
    write_field(&mut hasher, operation.as_bytes());

    hasher.update(&(params.len() as u64).to_le_bytes());
    for (key, value) in params {
        write_field(&mut hasher, key.as_bytes());
        write_field(&mut hasher, value.as_bytes());
    }

    write_field(&mut hasher, schema_version.as_bytes());

    Fingerprint(hasher.digest128())
}

fn write_field(hasher: &mut Xxh3, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Convenience constructor for parameter maps
pub fn params<I, K, V>(pairs: I) -> OperationParams
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
