use std::collections::HashSet;

use log::debug;
use sha2::{Digest, Sha256};

use crate::rows::ProjectedRow;

/// Stable fingerprint of a row's canonical (key-sorted) serialization.
fn fingerprint(row: &ProjectedRow) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for (field, value) in row.iter() {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
        hasher.update((value.len() as u64).to_le_bytes());
        hasher.update(value.as_bytes());
    }
    hasher.finalize().into()
}

/// Drops rows structurally equal to an earlier row; first occurrence wins.
pub fn deduplicate(rows: Vec<ProjectedRow>) -> Vec<ProjectedRow> {
    let before = rows.len();
    let mut seen = HashSet::with_capacity(before);
    let unique = rows
        .into_iter()
        .filter(|row| seen.insert(fingerprint(row)))
        .collect::<Vec<_>>();
    debug!("Deduplicated {} row(s) down to {}", before, unique.len());
    unique
}
