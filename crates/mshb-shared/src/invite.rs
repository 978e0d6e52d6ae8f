use rand::Rng;

use crate::constants::{DEEP_LINK_SCHEME, INVITE_CODE_LEN};
use crate::error::SharedError;

// No 0/O or 1/I so codes survive being read aloud.
const INVITE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Generate a fresh server invite code.
pub fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
        .collect()
}

/// Accept whatever the user pasted and return the bare invite code.
///
/// Supported inputs: `AB12CD34`, `mshb://invite/AB12CD34` and any
/// `http(s)://host/.../invite/AB12CD34` link. The result is upper-cased.
pub fn normalize_invite_code(input: &str) -> Result<String, SharedError> {
    let trimmed = input.trim();
    let scheme_prefix = format!("{DEEP_LINK_SCHEME}://invite/");

    let raw = if let Some(rest) = trimmed.strip_prefix(&scheme_prefix) {
        rest
    } else if let Some(idx) = trimmed.rfind("/invite/") {
        &trimmed[idx + "/invite/".len()..]
    } else {
        trimmed
    };

    let code = raw
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');

    if code.len() < 4 || code.len() > 32 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SharedError::InvalidInviteCode);
    }

    Ok(code.to_ascii_uppercase())
}

/// Shareable link for an invite code.
pub fn invite_link(code: &str) -> String {
    format!("{DEEP_LINK_SCHEME}://invite/{code}")
}
