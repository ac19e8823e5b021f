//! Outbound payload signing.
//!
//! Deliveries carry `hex(HMAC(hash, endpoint_secret, body))` in the header
//! the owning group configured. The hash function comes from the group's
//! signature configuration.

use hmac::{Hmac, Mac};
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use sha3::{Sha3_224, Sha3_256, Sha3_384, Sha3_512};
use subtle::ConstantTimeEq;

use crate::types::HashAlgorithm;

/// Compute the hex-encoded HMAC of `msg` under `key`.
pub fn compute_signature(hash: HashAlgorithm, key: &[u8], msg: &[u8]) -> String {
    // HMAC accepts any key length for these digests, so new_from_slice
    // cannot fail here.
    macro_rules! hmac_hex {
        ($digest:ty) => {{
            let mut mac =
                Hmac::<$digest>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(msg);
            hex::encode(mac.finalize().into_bytes())
        }};
    }

    match hash {
        HashAlgorithm::Sha256 => hmac_hex!(Sha256),
        HashAlgorithm::Sha512 => hmac_hex!(Sha512),
        HashAlgorithm::Md5 => hmac_hex!(Md5),
        HashAlgorithm::Sha1 => hmac_hex!(Sha1),
        HashAlgorithm::Sha224 => hmac_hex!(Sha224),
        HashAlgorithm::Sha384 => hmac_hex!(Sha384),
        HashAlgorithm::Sha3_224 => hmac_hex!(Sha3_224),
        HashAlgorithm::Sha3_256 => hmac_hex!(Sha3_256),
        HashAlgorithm::Sha3_384 => hmac_hex!(Sha3_384),
        HashAlgorithm::Sha3_512 => hmac_hex!(Sha3_512),
    }
}

/// Constant-time check of a received signature.
pub fn verify_signature(hash: HashAlgorithm, key: &[u8], msg: &[u8], signature: &str) -> bool {
    let expected = compute_signature(hash, key, msg);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}
