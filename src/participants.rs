use alloy::primitives::Address;
use std::collections::BTreeSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::SnapshotError;

const ADDRESS_COLUMN: &str = "address";

/// The deduplicated holders tracked for a run. Immutable once built.
///
/// Addresses are kept as raw 20-byte values, so `0xAbC…` and `0xabc…` collapse to one
/// entry. Iteration order is ascending by address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParticipantSet {
    addresses: Arc<[Address]>,
}

impl ParticipantSet {
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.addresses
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.binary_search(address).is_ok()
    }
}

impl FromIterator<Address> for ParticipantSet {
    fn from_iter<I: IntoIterator<Item = Address>>(iter: I) -> Self {
        let unique: BTreeSet<Address> = iter.into_iter().collect();
        Self {
            addresses: unique.into_iter().collect(),
        }
    }
}

impl From<BTreeSet<Address>> for ParticipantSet {
    fn from(set: BTreeSet<Address>) -> Self {
        Self {
            addresses: set.into_iter().collect(),
        }
    }
}

/// Load a precomputed participant list.
/// Expected CSV: a header row with an `address` column, one address per row.
/// Other columns are ignored; blank cells are skipped.
pub fn load_precomputed(path: &Path) -> Result<ParticipantSet, SnapshotError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| {
            SnapshotError::Participants(format!(
                "Failed to open participant list '{}': {}",
                path.display(),
                e
            ))
        })?;

    let column = reader
        .headers()
        .map_err(|e| SnapshotError::Participants(e.to_string()))?
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(ADDRESS_COLUMN))
        .ok_or_else(|| {
            SnapshotError::Participants(format!(
                "'{}' has no '{}' column",
                path.display(),
                ADDRESS_COLUMN
            ))
        })?;

    let mut addresses = BTreeSet::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.map_err(|e| SnapshotError::Participants(e.to_string()))?;
        let raw = record.get(column).unwrap_or("").trim();
        if raw.is_empty() {
            continue;
        }
        let address = Address::from_str(raw).map_err(|e| {
            SnapshotError::Participants(format!(
                "invalid address '{}' on row {} of '{}': {}",
                raw,
                row + 2,
                path.display(),
                e
            ))
        })?;
        addresses.insert(address);
    }

    tracing::info!(
        participants = addresses.len(),
        path = %path.display(),
        "Loaded precomputed participant list"
    );
    Ok(ParticipantSet::from(addresses))
}

/// Write `participants` in the same single-column format `load_precomputed` reads.
pub fn export_participants(path: &Path, participants: &ParticipantSet) -> Result<(), SnapshotError> {
    let export_failed = |e: &dyn std::fmt::Display| {
        SnapshotError::Participants(format!(
            "Failed to export participant list to '{}': {}",
            path.display(),
            e
        ))
    };

    let mut writer = csv::Writer::from_path(path).map_err(|e| export_failed(&e))?;
    writer
        .write_record([ADDRESS_COLUMN])
        .map_err(|e| export_failed(&e))?;
    for address in participants.iter() {
        writer
            .write_record([address.to_string()])
            .map_err(|e| export_failed(&e))?;
    }
    writer.flush().map_err(|e| export_failed(&e))?;

    tracing::info!(
        participants = participants.len(),
        path = %path.display(),
        "Exported participant list"
    );
    Ok(())
}
