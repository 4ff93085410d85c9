use std::collections::HashSet;
use std::io::Read;

use crate::error::AppError;

/// Tokens that show up in uploaded sheets but are never real identifiers:
/// spreadsheet blanks and header cells.
const PLACEHOLDER_TOKENS: &[&str] = &[
    "nan",
    "none",
    "null",
    "undefined",
    "username",
    "usernames",
    "user",
    "handle",
    "repo",
];

/// Observed upper bound on handle length across the supported platforms.
pub const DEFAULT_MAX_IDENTIFIER_LEN: usize = 50;

fn is_placeholder(token: &str) -> bool {
    PLACEHOLDER_TOKENS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(token))
}

fn clean(raw: &str, max_len: usize) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_placeholder(trimmed) || trimmed.chars().count() > max_len {
        return None;
    }
    Some(trimmed)
}

/// Validate a single identifier, returning its trimmed form.
pub fn validate_identifier(raw: &str, max_len: usize) -> Result<String, AppError> {
    clean(raw, max_len).map(str::to_string).ok_or_else(|| {
        if raw.trim().chars().count() > max_len {
            AppError::InvalidInput(format!("identifier longer than {max_len} characters"))
        } else {
            AppError::InvalidInput(format!("'{}' is not a valid identifier", raw.trim()))
        }
    })
}

/// Trim, filter and deduplicate raw identifiers, preserving first-seen order.
///
/// Deduplication is on the exact trimmed string, so `alice` and `Alice`
/// are distinct. Fails only when nothing usable remains.
pub fn sanitize_identifiers<S: AsRef<str>>(
    raw: &[S],
    max_len: usize,
) -> Result<Vec<String>, AppError> {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();

    for candidate in raw {
        if let Some(id) = clean(candidate.as_ref(), max_len)
            && seen.insert(id)
        {
            unique.push(id.to_string());
        }
    }

    if unique.is_empty() {
        return Err(AppError::InvalidInput(
            "no valid identifiers provided".to_string(),
        ));
    }

    tracing::debug!(
        received = raw.len(),
        unique = unique.len(),
        "Sanitized identifier list"
    );
    Ok(unique)
}

/// Read the first column of every CSV record as a raw identifier.
///
/// Header rows are not special-cased: a `username` or `handle` header cell
/// is dropped later by [`sanitize_identifiers`]. Rows may have any number of
/// columns; empty rows are skipped.
pub fn identifiers_from_csv<R: Read>(reader: R) -> Result<Vec<String>, AppError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut identifiers = Vec::new();
    for record in csv_reader.records() {
        let record =
            record.map_err(|e| AppError::InvalidInput(format!("Malformed CSV input: {e}")))?;
        if let Some(first) = record.get(0) {
            identifiers.push(first.to_string());
        }
    }
    Ok(identifiers)
}
