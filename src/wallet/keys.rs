//! ed25519 keypairs and the ledger's derivation of seeds and addresses.

use crate::ledger::address::{AddressError, ClassicAddress, FamilySeed};

use ed25519_dalek::{Signer, SigningKey};
use rand::Rng;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;

/// Prefix marking an ed25519 public key.
const ED25519_KEY_PREFIX: u8 = 0xED;

#[derive(Clone)]
pub struct Keypair {
	entropy: [u8; 16],
	signing_key: SigningKey,
}

impl Keypair {
	/// New keypair from 16 bytes of OS randomness.
	pub fn generate() -> Self {
		let mut entropy = [0u8; 16];
		rand::rng().fill(&mut entropy);
		Self::from_entropy(entropy)
	}

	/// The secret key is the first half of SHA-512 over the seed entropy.
	pub fn from_entropy(entropy: [u8; 16]) -> Self {
		let digest = Sha512::digest(entropy);
		let mut secret = [0u8; 32];
		secret.copy_from_slice(&digest[..32]);

		Self {
			entropy,
			signing_key: SigningKey::from_bytes(&secret),
		}
	}

	/// Decode an `sEd...` family seed.
	pub fn from_seed(seed: &str) -> Result<Self, AddressError> {
		let seed = FamilySeed::decode(seed)?;
		Ok(Self::from_entropy(seed.entropy))
	}

	/// Deterministic keypair derived from a label. Never funded.
	pub fn derive(label: &str) -> Self {
		let digest = Sha512::digest(label.as_bytes());
		let mut entropy = [0u8; 16];
		entropy.copy_from_slice(&digest[..16]);
		Self::from_entropy(entropy)
	}

	pub fn seed(&self) -> String {
		FamilySeed {
			entropy: self.entropy,
		}
		.encode()
	}

	pub fn public_key(&self) -> Vec<u8> {
		let mut key = Vec::with_capacity(33);
		key.push(ED25519_KEY_PREFIX);
		key.extend_from_slice(self.signing_key.verifying_key().as_bytes());
		key
	}

	/// RIPEMD-160 of SHA-256 of the public key.
	pub fn account_id(&self) -> [u8; 20] {
		let sha = Sha256::digest(self.public_key());
		let mut account_id = [0u8; 20];
		account_id.copy_from_slice(&Ripemd160::digest(sha));
		account_id
	}

	pub fn address(&self) -> String {
		ClassicAddress {
			account_id: self.account_id(),
		}
		.encode()
	}

	pub fn sign(&self, message: &[u8]) -> Vec<u8> {
		self.signing_key.sign(message).to_bytes().to_vec()
	}
}

impl fmt::Debug for Keypair {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Keypair")
			.field("address", &self.address())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use ed25519_dalek::{Signature, Verifier, VerifyingKey};

	#[test]
	fn test_seed_restores_same_account() {
		let keypair = Keypair::generate();
		let restored = Keypair::from_seed(&keypair.seed()).unwrap();

		assert_eq!(restored.address(), keypair.address());
		assert!(keypair.address().starts_with('r'));
		assert_eq!(
			ClassicAddress::decode(&keypair.address()).unwrap().account_id,
			keypair.account_id()
		);
	}

	#[test]
	fn test_public_key_is_prefixed() {
		let public_key = Keypair::from_entropy([3u8; 16]).public_key();
		assert_eq!(public_key.len(), 33);
		assert_eq!(public_key[0], 0xED);
	}

	#[test]
	fn test_signature_verifies() {
		let keypair = Keypair::derive("signing");
		let message = b"STX\0payload";
		let signature = keypair.sign(message);

		let public_key = keypair.public_key();
		let verifying_key = VerifyingKey::from_bytes(public_key[1..].try_into().unwrap()).unwrap();
		let signature = Signature::from_slice(&signature).unwrap();
		assert!(verifying_key.verify(message, &signature).is_ok());
	}

	#[test]
	fn test_derived_keys_are_deterministic() {
		assert_eq!(
			Keypair::derive("mock-wallet:a").address(),
			Keypair::derive("mock-wallet:a").address()
		);
		assert_ne!(
			Keypair::derive("mock-wallet:a").address(),
			Keypair::derive("mock-wallet:b").address()
		);
	}
}
