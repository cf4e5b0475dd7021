//! String formatting for logs and notifications.

/// Shortens an id or hash for log fields: the first 8 characters followed
/// by "..".
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((cut, _)) => format!("{}..", &id[..cut]),
		None => id.to_string(),
	}
}

/// Adds a "0x" prefix unless one (of either case) is present.
pub fn with_0x_prefix(hex_str: &str) -> String {
	if hex_str.starts_with("0x") || hex_str.starts_with("0X") {
		hex_str.to_string()
	} else {
		format!("0x{}", hex_str)
	}
}

/// Strips a "0x" or "0X" prefix if present.
pub fn without_0x_prefix(hex_str: &str) -> &str {
	hex_str
		.strip_prefix("0x")
		.or_else(|| hex_str.strip_prefix("0X"))
		.unwrap_or(hex_str)
}

/// Renders a raw integer amount with `decimals` decimal places, trimming
/// trailing zeros ("1500000" with 6 decimals is "1.5").
pub fn format_token_amount(amount: &str, decimals: u8) -> String {
	let decimals = decimals as usize;
	if decimals == 0 {
		return amount.to_string();
	}

	let padded = format!("{:0>width$}", amount, width = decimals + 1);
	let (whole, fraction) = padded.split_at(padded.len() - decimals);
	let fraction = fraction.trim_end_matches('0');

	if fraction.is_empty() {
		whole.to_string()
	} else {
		format!("{}.{}", whole, fraction)
	}
}
