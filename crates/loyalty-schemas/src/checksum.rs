//! Luhn checksum for order numbers.

/// Returns `true` when `number` is a non-empty string of ASCII digits whose
/// Luhn checksum is valid.
///
/// Whitespace, signs and separators are rejected rather than stripped: the
/// order number is an identifier and is stored exactly as given.
pub fn validate_order_number(number: &str) -> bool {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }

    let mut sum: u32 = 0;
    for (i, b) in number.bytes().rev().enumerate() {
        let mut d = u32::from(b - b'0');
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}
