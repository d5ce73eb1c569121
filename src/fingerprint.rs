use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Content hash of a raw statement file.
pub fn file_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Identity of a ledger entry for duplicate comparison: bank, date, amount and
/// a normalized description.
pub fn ledger_fingerprint(bank: &str, date: &str, value: f64, description: &str) -> String {
    let input = format!(
        "{}|{}|{:.2}|{}",
        bank.trim().to_lowercase(),
        date.trim(),
        value,
        normalize_for_fingerprint(description)
    );
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

fn card_mask_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[x*]{4,}\d{4}").expect("static regex"))
}

/// Lower-case, drop masked card numbers, keep only alphanumerics (any script).
pub fn normalize_for_fingerprint(description: &str) -> String {
    let lowered = description.to_lowercase();
    let unmasked = card_mask_re().replace_all(&lowered, "");
    unmasked
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}
