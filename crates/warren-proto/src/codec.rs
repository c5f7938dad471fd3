use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha384};

use crate::{constants::SIGNATURE_LEN, error::CodecError};

/// Converts a payload into a byte array ready for transmission.
///
/// Wire form: 64-byte Ed25519 signature followed by the CBOR encoding of the
/// payload. The signature covers the SHA-384 checksum of the CBOR bytes.
pub fn marshal<T: Serialize>(payload: &T, signing_key: &SigningKey) -> Result<Vec<u8>, CodecError> {
    let mut data = Vec::new();
    ciborium::into_writer(payload, &mut data).map_err(|e| CodecError::Encode(e.to_string()))?;

    let checksum = Sha384::digest(&data);
    let signature: Signature = signing_key.sign(checksum.as_slice());

    let mut out = Vec::with_capacity(SIGNATURE_LEN + data.len());
    out.extend_from_slice(&signature.to_bytes());
    out.extend_from_slice(&data);
    Ok(out)
}

/// Converts a byte array back into a payload so that it can be processed.
///
/// Any payload this returns is guaranteed to have been produced by the holder
/// of the private key matching `verification_key`.
pub fn unmarshal<T: DeserializeOwned>(
    data: &[u8],
    verification_key: &VerifyingKey,
) -> Result<T, CodecError> {
    if data.len() < SIGNATURE_LEN {
        return Err(CodecError::TooShort(data.len()));
    }

    let (signature_bytes, payload) = data.split_at(SIGNATURE_LEN);
    let signature =
        Signature::from_slice(signature_bytes).map_err(|_| CodecError::BadSignature)?;

    let checksum = Sha384::digest(payload);
    verification_key
        .verify(checksum.as_slice(), &signature)
        .map_err(|_| CodecError::BadSignature)?;

    ciborium::from_reader(payload).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Heartbeat, PacketRr};
    use rand::rngs::OsRng;

    fn test_key() -> SigningKey {
        SigningKey::generate(&mut OsRng)
    }

    fn sample_rr() -> PacketRr {
        PacketRr {
            payload: b"uname -a".to_vec(),
            tx_id: "1f0c0e7e-9a65-4b32-bb67-1b9e78f4a2a0".to_string(),
        }
    }

    #[test]
    fn round_trip_with_matching_keys() {
        let key = test_key();
        let original = sample_rr();

        let wire = marshal(&original, &key).unwrap();
        let decoded: PacketRr = unmarshal(&wire, &key.verifying_key()).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn round_trip_heartbeat() {
        let key = test_key();
        let original = Heartbeat {
            strain_id: "strain-a".into(),
            init_time: 1_700_000_000,
            modules: vec!["exchange".into()],
            host_os: "linux".into(),
            host_arch: "x86_64".into(),
            hostname: "burrow".into(),
            host_user: "nobody".into(),
            host_user_id: "65534".into(),
            errors: 2,
        };

        let wire = marshal(&original, &key).unwrap();
        let decoded: Heartbeat = unmarshal(&wire, &key.verifying_key()).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn mismatched_key_fails_verification() {
        let signer = test_key();
        let other = test_key();

        let wire = marshal(&sample_rr(), &signer).unwrap();
        let err = unmarshal::<PacketRr>(&wire, &other.verifying_key()).unwrap_err();

        assert!(matches!(err, CodecError::BadSignature));
    }

    #[test]
    fn short_input_is_malformed() {
        let key = test_key();
        let err = unmarshal::<PacketRr>(&[0u8; 63], &key.verifying_key()).unwrap_err();

        assert!(matches!(err, CodecError::TooShort(63)));
        assert!(err.is_malformed());
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let key = test_key();
        let mut wire = marshal(&sample_rr(), &key).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let err = unmarshal::<PacketRr>(&wire, &key.verifying_key()).unwrap_err();
        assert!(matches!(err, CodecError::BadSignature));
    }

    #[test]
    fn wrong_payload_shape_is_malformed() {
        let key = test_key();
        // A validly signed heartbeat does not decode as a request/response.
        let wire = marshal(&Heartbeat::default(), &key).unwrap();

        let err = unmarshal::<PacketRr>(&wire, &key.verifying_key()).unwrap_err();
        assert!(err.is_malformed());
    }
}
