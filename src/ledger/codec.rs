//! Canonical binary serialization of the transactions this core builds.
//!
//! Only the fields used by `Payment` and `TrustSet` are supported. Fields are
//! written in canonical order (type code, then field code), which is what the
//! ledger hashes and verifies signatures over.

use super::address::ClassicAddress;
use super::types::{LedgerAmount, LedgerError, LedgerTransaction, SignedTransaction};
use sha2::{Digest, Sha512};

/// Prefix prepended to the serialized fields before signing (`STX\0`).
const SIGNING_PREFIX: [u8; 4] = [0x53, 0x54, 0x58, 0x00];
/// Prefix prepended to a signed blob before hashing (`TXN\0`).
const TRANSACTION_ID_PREFIX: [u8; 4] = [0x54, 0x58, 0x4E, 0x00];

// Type codes
const UINT16: u8 = 1;
const UINT32: u8 = 2;
const AMOUNT: u8 = 6;
const BLOB: u8 = 7;
const ACCOUNT: u8 = 8;
const OBJECT: u8 = 14;
const ARRAY: u8 = 15;

const OBJECT_END_MARKER: u8 = 0xE1;
const ARRAY_END_MARKER: u8 = 0xF1;

const NATIVE_POSITIVE_BIT: u64 = 0x4000_0000_0000_0000;
const ISSUED_BIT: u64 = 0x8000_0000_0000_0000;
const MAX_DROPS: u64 = 100_000_000_000_000_000;
const MIN_MANTISSA: u64 = 1_000_000_000_000_000;
const MIN_EXPONENT: i32 = -96;
const MAX_EXPONENT: i32 = 80;

/// Serialize a transaction. With `for_signing` the signature field is omitted.
pub fn encode(tx: &LedgerTransaction, for_signing: bool) -> Result<Vec<u8>, LedgerError> {
	let mut out = Vec::with_capacity(256);

	write_field_id(&mut out, UINT16, 2);
	out.extend_from_slice(&tx.kind.code().to_be_bytes());

	write_field_id(&mut out, UINT32, 2);
	out.extend_from_slice(&tx.flags.to_be_bytes());

	let sequence = tx
		.sequence
		.ok_or_else(|| LedgerError::CodecError("Sequence is not set".to_string()))?;
	write_field_id(&mut out, UINT32, 4);
	out.extend_from_slice(&sequence.to_be_bytes());

	if let Some(last_ledger_sequence) = tx.last_ledger_sequence {
		write_field_id(&mut out, UINT32, 27);
		out.extend_from_slice(&last_ledger_sequence.to_be_bytes());
	}

	if let Some(amount) = &tx.amount {
		write_field_id(&mut out, AMOUNT, 1);
		write_amount(&mut out, amount)?;
	}

	if let Some(limit) = &tx.limit_amount {
		write_field_id(&mut out, AMOUNT, 3);
		write_amount(&mut out, limit)?;
	}

	let fee = tx
		.fee_drops
		.ok_or_else(|| LedgerError::CodecError("Fee is not set".to_string()))?;
	write_field_id(&mut out, AMOUNT, 8);
	write_amount(&mut out, &LedgerAmount::Drops(fee))?;

	let signing_pub_key = tx
		.signing_pub_key
		.as_ref()
		.ok_or_else(|| LedgerError::CodecError("SigningPubKey is not set".to_string()))?;
	write_field_id(&mut out, BLOB, 3);
	write_blob(&mut out, signing_pub_key)?;

	if !for_signing {
		let signature = tx
			.txn_signature
			.as_ref()
			.ok_or_else(|| LedgerError::CodecError("TxnSignature is not set".to_string()))?;
		write_field_id(&mut out, BLOB, 4);
		write_blob(&mut out, signature)?;
	}

	write_field_id(&mut out, ACCOUNT, 1);
	write_account(&mut out, &tx.account)?;

	if let Some(destination) = &tx.destination {
		write_field_id(&mut out, ACCOUNT, 3);
		write_account(&mut out, destination)?;
	}

	if !tx.memos.is_empty() {
		write_field_id(&mut out, ARRAY, 9);
		for memo in &tx.memos {
			write_field_id(&mut out, OBJECT, 10);
			write_field_id(&mut out, BLOB, 13);
			write_blob(&mut out, memo)?;
			out.push(OBJECT_END_MARKER);
		}
		out.push(ARRAY_END_MARKER);
	}

	Ok(out)
}

/// Sign a prepared transaction.
///
/// `sign` receives the signing payload and returns the raw signature.
pub fn sign(
	mut tx: LedgerTransaction,
	public_key: &[u8],
	sign: impl FnOnce(&[u8]) -> Vec<u8>,
) -> Result<SignedTransaction, LedgerError> {
	let last_ledger_sequence = tx.last_ledger_sequence.ok_or_else(|| {
		LedgerError::CodecError("LastLedgerSequence is not set".to_string())
	})?;
	tx.signing_pub_key = Some(public_key.to_vec());

	let mut payload = SIGNING_PREFIX.to_vec();
	payload.extend(encode(&tx, true)?);
	tx.txn_signature = Some(sign(&payload));

	let blob = encode(&tx, false)?;
	Ok(SignedTransaction {
		hash: transaction_hash(&blob),
		tx_blob: hex::encode_upper(&blob),
		last_ledger_sequence,
	})
}

/// First half of SHA-512 over the prefixed blob, in uppercase hex.
pub fn transaction_hash(blob: &[u8]) -> String {
	let mut hasher = Sha512::new();
	hasher.update(TRANSACTION_ID_PREFIX);
	hasher.update(blob);
	hex::encode_upper(&hasher.finalize()[..32])
}

fn write_field_id(out: &mut Vec<u8>, type_code: u8, field_code: u8) {
	match (type_code < 16, field_code < 16) {
		(true, true) => out.push((type_code << 4) | field_code),
		(true, false) => out.extend_from_slice(&[type_code << 4, field_code]),
		(false, true) => out.extend_from_slice(&[field_code, type_code]),
		(false, false) => out.extend_from_slice(&[0, type_code, field_code]),
	}
}

fn write_length_prefix(out: &mut Vec<u8>, length: usize) -> Result<(), LedgerError> {
	if length <= 192 {
		out.push(length as u8);
	} else if length <= 12_480 {
		let length = length - 193;
		out.push(193 + (length >> 8) as u8);
		out.push((length & 0xFF) as u8);
	} else {
		return Err(LedgerError::CodecError(format!(
			"Field of {} bytes is too long",
			length
		)));
	}
	Ok(())
}

fn write_blob(out: &mut Vec<u8>, data: &[u8]) -> Result<(), LedgerError> {
	write_length_prefix(out, data.len())?;
	out.extend_from_slice(data);
	Ok(())
}

fn write_account(out: &mut Vec<u8>, address: &str) -> Result<(), LedgerError> {
	let account = ClassicAddress::decode(address)?;
	write_blob(out, &account.account_id)
}

fn write_amount(out: &mut Vec<u8>, amount: &LedgerAmount) -> Result<(), LedgerError> {
	match amount {
		LedgerAmount::Drops(drops) => {
			if *drops > MAX_DROPS {
				return Err(LedgerError::CodecError(format!(
					"{} drops exceeds the native supply",
					drops
				)));
			}
			out.extend_from_slice(&(NATIVE_POSITIVE_BIT | drops).to_be_bytes());
		}
		LedgerAmount::Issued {
			value,
			currency,
			issuer,
		} => {
			out.extend_from_slice(&encode_issued_value(value)?.to_be_bytes());
			out.extend_from_slice(&currency_code(currency)?);
			out.extend_from_slice(&ClassicAddress::decode(issuer)?.account_id);
		}
	}
	Ok(())
}

/// Encode a decimal value string as the 64-bit issued-amount header.
pub fn encode_issued_value(value: &str) -> Result<u64, LedgerError> {
	let invalid = || LedgerError::CodecError(format!("Invalid issued value '{}'", value));

	let (negative, unsigned) = match value.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, value),
	};
	let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
	if integer.is_empty() && fraction.is_empty() {
		return Err(invalid());
	}
	if !integer.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
		return Err(invalid());
	}

	let digits = format!("{}{}", integer, fraction);
	let mut exponent = -(fraction.len() as i32);

	let significant = digits.trim_start_matches('0');
	if significant.is_empty() {
		return Ok(ISSUED_BIT);
	}
	let trimmed = significant.trim_end_matches('0');
	exponent += (significant.len() - trimmed.len()) as i32;
	if trimmed.len() > 16 {
		return Err(LedgerError::CodecError(format!(
			"Issued value '{}' exceeds 16 significant digits",
			value
		)));
	}

	let mut mantissa: u64 = trimmed.parse().map_err(|_| invalid())?;
	while mantissa < MIN_MANTISSA {
		mantissa *= 10;
		exponent -= 1;
	}
	if !(MIN_EXPONENT..=MAX_EXPONENT).contains(&exponent) {
		return Err(LedgerError::CodecError(format!(
			"Issued value '{}' is out of range",
			value
		)));
	}

	let sign = if negative { 0 } else { NATIVE_POSITIVE_BIT };
	Ok(ISSUED_BIT | sign | (((exponent + 97) as u64) << 54) | mantissa)
}

/// 20-byte currency code from a three-letter or 40-character hex code.
pub fn currency_code(currency: &str) -> Result<[u8; 20], LedgerError> {
	let mut code = [0u8; 20];
	match currency.len() {
		3 if currency != "XRP" && currency.is_ascii() => {
			code[12..15].copy_from_slice(currency.as_bytes());
		}
		40 => {
			let bytes = hex::decode(currency)
				.map_err(|e| LedgerError::CodecError(format!("Invalid currency hex: {}", e)))?;
			code.copy_from_slice(&bytes);
		}
		_ => {
			return Err(LedgerError::CodecError(format!(
				"Unsupported currency code '{}'",
				currency
			)));
		}
	}
	Ok(code)
}
