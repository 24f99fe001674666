/// Number of decimal places of the native asset (1 XRP = 1,000,000 drops).
pub const XRP_DECIMALS: u32 = 6;

/// Largest number of drops the ledger can represent in a native amount.
const MAX_DROPS: f64 = 1e17;

/// Significant digits the ledger keeps for issued-currency amounts.
const ISSUED_PRECISION: usize = 15;

pub fn format_token_amount(amount: u128, decimals: u32) -> String {
	format!(
		"{:.*}",
		decimals as usize,
		amount as f64 / 10f64.powi(decimals as i32)
	)
}

/// Convert an XRP amount to drops, rounding to the nearest drop.
///
/// Returns `None` for negative, non-finite or out-of-range amounts.
pub fn xrp_to_drops(amount: f64) -> Option<u64> {
	if !amount.is_finite() || amount < 0.0 {
		return None;
	}
	let drops = (amount * 10f64.powi(XRP_DECIMALS as i32)).round();
	if drops > MAX_DROPS {
		return None;
	}
	Some(drops as u64)
}

/// Parse a drops string as returned by the ledger into XRP.
///
/// Malformed input yields `None` rather than an error so callers can treat
/// the field as absent.
pub fn drops_to_xrp(drops: &str) -> Option<f64> {
	let drops: u64 = drops.trim().parse().ok()?;
	Some(drops as f64 / 10f64.powi(XRP_DECIMALS as i32))
}

/// Render an amount as an issued-currency value string with at most the
/// ledger's precision of significant digits.
pub fn issued_value(amount: f64) -> Option<String> {
	if !amount.is_finite() || amount < 0.0 {
		return None;
	}
	let rounded: f64 = format!("{:.*e}", ISSUED_PRECISION - 1, amount)
		.parse()
		.ok()?;
	Some(format!("{}", rounded))
}
