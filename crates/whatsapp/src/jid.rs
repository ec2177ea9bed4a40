//! Chat address normalization.

use wagate_common::{Error, Result};

/// Suffix of one-to-one chat addresses.
pub const USER_SUFFIX: &str = "@c.us";
/// Suffix of group chat addresses.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Turn a phone-number-like destination into a chat address.
///
/// `+1 (555) 123-4567` becomes `15551234567@c.us`. Inputs that already carry a
/// domain (`...@c.us`, `...@g.us`) are passed through with whitespace and a
/// leading `+` removed.
pub fn normalize_chat_id(input: &str) -> Result<String> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.trim_start_matches('+');

    if compact.contains('@') {
        let (user, domain) = compact.split_once('@').unwrap_or((compact, ""));
        if user.is_empty() || domain.is_empty() {
            return Err(Error::invalid(format!("invalid chat address: {input}")));
        }
        return Ok(compact.to_string());
    }

    let digits: String = compact
        .chars()
        .filter(|c| !matches!(c, '+' | '(' | ')' | '-' | '.'))
        .collect();
    if digits.is_empty() {
        return Err(Error::invalid("destination is required"));
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::invalid(format!("invalid destination: {input}")));
    }
    Ok(format!("{digits}{USER_SUFFIX}"))
}

pub fn is_group(chat_id: &str) -> bool {
    chat_id.ends_with(GROUP_SUFFIX)
}
