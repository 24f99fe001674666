use thiserror::Error;

/// Version byte of a classic account address.
const ACCOUNT_ID_PREFIX: u8 = 0x00;
/// Version bytes of an ed25519 family seed (`sEd...`).
const ED25519_SEED_PREFIX: [u8; 3] = [0x01, 0xE1, 0x4B];

#[derive(Error, Debug)]
pub enum AddressError {
	#[error("invalid base58 encoding: {0}")]
	InvalidEncoding(String),
	#[error("unexpected payload length {0}")]
	InvalidLength(usize),
	#[error("prefix does not match an {0}")]
	InvalidPrefix(&'static str),
}

/// A classic account address: a 20-byte account id in base58check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassicAddress {
	pub account_id: [u8; 20],
}

impl ClassicAddress {
	pub fn decode(encoded: &str) -> Result<Self, AddressError> {
		let payload = decode_check(encoded)?;
		if payload.len() != 21 {
			return Err(AddressError::InvalidLength(payload.len()));
		}
		if payload[0] != ACCOUNT_ID_PREFIX {
			return Err(AddressError::InvalidPrefix("account address"));
		}
		let mut account_id = [0u8; 20];
		account_id.copy_from_slice(&payload[1..]);
		Ok(Self { account_id })
	}

	pub fn encode(&self) -> String {
		let mut payload = Vec::with_capacity(21);
		payload.push(ACCOUNT_ID_PREFIX);
		payload.extend_from_slice(&self.account_id);
		encode_check(&payload)
	}
}

/// An ed25519 family seed: 16 bytes of entropy in base58check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilySeed {
	pub entropy: [u8; 16],
}

impl FamilySeed {
	pub fn decode(encoded: &str) -> Result<Self, AddressError> {
		let payload = decode_check(encoded)?;
		if payload.len() != ED25519_SEED_PREFIX.len() + 16 {
			return Err(AddressError::InvalidLength(payload.len()));
		}
		if payload[..3] != ED25519_SEED_PREFIX {
			return Err(AddressError::InvalidPrefix("ed25519 seed"));
		}
		let mut entropy = [0u8; 16];
		entropy.copy_from_slice(&payload[3..]);
		Ok(Self { entropy })
	}

	pub fn encode(&self) -> String {
		let payload = [&ED25519_SEED_PREFIX[..], &self.entropy[..]].concat();
		encode_check(&payload)
	}
}

fn encode_check(payload: &[u8]) -> String {
	bs58::encode(payload)
		.with_alphabet(bs58::Alphabet::RIPPLE)
		.with_check()
		.into_string()
}

fn decode_check(encoded: &str) -> Result<Vec<u8>, AddressError> {
	bs58::decode(encoded)
		.with_alphabet(bs58::Alphabet::RIPPLE)
		.with_check(None)
		.into_vec()
		.map_err(|e| AddressError::InvalidEncoding(e.to_string()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_account_zero() {
		let address = ClassicAddress {
			account_id: [0u8; 20],
		};
		assert_eq!(address.encode(), "rrrrrrrrrrrrrrrrrrrrrhoLvTp");
		assert_eq!(
			ClassicAddress::decode("rrrrrrrrrrrrrrrrrrrrrhoLvTp")
				.expect("Failed while decoding account zero"),
			address
		);
	}

	#[test]
	fn test_seed_roundtrip_and_prefix() {
		let seed = FamilySeed {
			entropy: [7u8; 16],
		};
		let encoded = seed.encode();
		assert!(encoded.starts_with("sEd"));
		assert_eq!(FamilySeed::decode(&encoded).expect("Failed while decoding seed"), seed);
	}

	#[test]
	fn test_rejects_wrong_payload_kind() {
		let seed = FamilySeed {
			entropy: [1u8; 16],
		}
		.encode();
		assert!(ClassicAddress::decode(&seed).is_err());
		assert!(ClassicAddress::decode("not an address").is_err());
	}
}
