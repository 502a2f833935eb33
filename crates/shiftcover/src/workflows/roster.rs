//! Provider roster import from CSV exports of the dispatch back office.
//!
//! Used by the demo command and tests to hydrate an in-memory provider
//! directory. Malformed rows fail the whole import; a roster with silently
//! missing providers would skew candidate search.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::workflows::absence::{GeoPoint, Provider, ProviderId, ServiceCategory};

#[derive(Debug)]
pub enum RosterImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    MissingField { row: usize, field: &'static str },
    InvalidCoordinate { row: usize, value: f64 },
    InvalidRadius { row: usize, value: f64 },
    InvalidRating { row: usize, value: f32 },
    Empty,
}

impl std::fmt::Display for RosterImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RosterImportError::Io(err) => write!(f, "failed to read roster export: {}", err),
            RosterImportError::Csv(err) => write!(f, "invalid roster CSV data: {}", err),
            RosterImportError::MissingField { row, field } => {
                write!(f, "roster row {} is missing {}", row, field)
            }
            RosterImportError::InvalidCoordinate { row, value } => {
                write!(f, "roster row {} has out-of-range coordinate {}", row, value)
            }
            RosterImportError::InvalidRadius { row, value } => {
                write!(f, "roster row {} has non-positive radius {}", row, value)
            }
            RosterImportError::InvalidRating { row, value } => {
                write!(f, "roster row {} has rating {} outside 0..=5", row, value)
            }
            RosterImportError::Empty => write!(f, "roster export contains no providers"),
        }
    }
}

impl std::error::Error for RosterImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RosterImportError::Io(err) => Some(err),
            RosterImportError::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RosterImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for RosterImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    provider_id: String,
    name: String,
    /// Pipe-separated category slugs, e.g. `cleaning|gardening`.
    categories: String,
    latitude: f64,
    longitude: f64,
    radius_km: f64,
    rating: f32,
    #[serde(default)]
    completed_jobs: u32,
    #[serde(default = "default_true")]
    approved: bool,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

pub struct RosterImporter;

impl RosterImporter {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Vec<Provider>, RosterImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader(reader: impl Read) -> Result<Vec<Provider>, RosterImportError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut providers = Vec::new();
        for (index, row) in csv_reader.deserialize::<RosterRow>().enumerate() {
            let row = row?;
            // Header is line one, so data rows report from line two.
            providers.push(provider_from_row(row, index + 2)?);
        }

        if providers.is_empty() {
            return Err(RosterImportError::Empty);
        }

        Ok(providers)
    }
}

fn provider_from_row(row: RosterRow, line: usize) -> Result<Provider, RosterImportError> {
    if row.provider_id.trim().is_empty() {
        return Err(RosterImportError::MissingField {
            row: line,
            field: "provider_id",
        });
    }

    let categories: Vec<ServiceCategory> = row
        .categories
        .split('|')
        .map(str::trim)
        .filter(|slug| !slug.is_empty())
        .map(|slug| ServiceCategory(slug.to_ascii_lowercase()))
        .collect();
    if categories.is_empty() {
        return Err(RosterImportError::MissingField {
            row: line,
            field: "categories",
        });
    }

    if !(-90.0..=90.0).contains(&row.latitude) {
        return Err(RosterImportError::InvalidCoordinate {
            row: line,
            value: row.latitude,
        });
    }
    if !(-180.0..=180.0).contains(&row.longitude) {
        return Err(RosterImportError::InvalidCoordinate {
            row: line,
            value: row.longitude,
        });
    }
    if !row.radius_km.is_finite() || row.radius_km <= 0.0 {
        return Err(RosterImportError::InvalidRadius {
            row: line,
            value: row.radius_km,
        });
    }
    if !(0.0..=5.0).contains(&row.rating) {
        return Err(RosterImportError::InvalidRating {
            row: line,
            value: row.rating,
        });
    }

    let completed_by_category: BTreeMap<ServiceCategory, u32> = categories
        .iter()
        .cloned()
        .map(|category| (category, row.completed_jobs))
        .collect();

    Ok(Provider {
        id: ProviderId(row.provider_id),
        name: row.name,
        categories,
        location: GeoPoint {
            latitude: row.latitude,
            longitude: row.longitude,
        },
        service_radius_km: row.radius_km,
        approved: row.approved,
        active: row.active,
        rating: row.rating,
        completed_by_category,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &str = "\
provider_id,name,categories,latitude,longitude,radius_km,rating,completed_jobs
pro-001,Ana Martins,cleaning|gardening,38.72,-9.14,25,4.8,42
pro-002,Rui Costa,cleaning,38.74,-9.15,10,4.1,7
";

    #[test]
    fn imports_well_formed_roster() {
        let providers =
            RosterImporter::from_reader(Cursor::new(SAMPLE)).expect("sample roster imports");
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].id, ProviderId("pro-001".to_string()));
        assert_eq!(providers[0].categories.len(), 2);
        assert_eq!(
            providers[0].completed_in(&ServiceCategory("cleaning".to_string())),
            42
        );
        assert!(providers[1].approved);
    }

    #[test]
    fn rejects_missing_categories() {
        let csv = "\
provider_id,name,categories,latitude,longitude,radius_km,rating,completed_jobs
pro-001,Ana Martins,,38.72,-9.14,25,4.8,42
";
        let result = RosterImporter::from_reader(Cursor::new(csv));
        assert!(matches!(
            result,
            Err(RosterImportError::MissingField {
                row: 2,
                field: "categories"
            })
        ));
    }

    #[test]
    fn rejects_zero_radius() {
        let csv = "\
provider_id,name,categories,latitude,longitude,radius_km,rating,completed_jobs
pro-001,Ana Martins,cleaning,38.72,-9.14,0,4.8,42
";
        let result = RosterImporter::from_reader(Cursor::new(csv));
        assert!(matches!(
            result,
            Err(RosterImportError::InvalidRadius { row: 2, .. })
        ));
    }

    #[test]
    fn rejects_empty_export() {
        let csv = "provider_id,name,categories,latitude,longitude,radius_km,rating,completed_jobs\n";
        let result = RosterImporter::from_reader(Cursor::new(csv));
        assert!(matches!(result, Err(RosterImportError::Empty)));
    }
}
