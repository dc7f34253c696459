//! Report files for identifier outcomes.
//!
//! Three plain-text artifacts per run, timestamped in the file name only.
//! Given the same outcomes and timestamp the bytes are identical, which is
//! how dry runs are checked against live runs.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

use rowbridge_types::registry::{EnrichmentResult, IdentifierRecord};

/// Paths of the three written report files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub corrections: PathBuf,
    pub invalid: PathBuf,
    pub registry_errors: PathBuf,
}

/// Writes the correction, invalid-identifier, and registry-error reports.
///
/// Corrections are advisory: they are never applied to the database.
///
/// # Errors
///
/// Fails when the report directory or files cannot be written.
pub fn write_reports(
    dir: &Path,
    timestamp: &str,
    outcomes: &[(IdentifierRecord, EnrichmentResult)],
    name_weight: f64,
    city_weight: f64,
) -> anyhow::Result<ReportPaths> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating report directory {}", dir.display()))?;

    let paths = ReportPaths {
        corrections: dir.join(format!("siret_corrections_{timestamp}.txt")),
        invalid: dir.join(format!("siret_invalid_{timestamp}.txt")),
        registry_errors: dir.join(format!("registry_errors_{timestamp}.txt")),
    };

    let mut corrections = String::new();
    let mut invalid = String::new();
    let mut registry_errors = String::new();

    for (record, result) in outcomes {
        match result {
            EnrichmentResult::Corrected { candidates } => {
                let _ = writeln!(
                    corrections,
                    "ORIGINAL {} | name={} | city={}",
                    record.siret,
                    record.expected_name.as_deref().unwrap_or("-"),
                    record.expected_city_code.as_deref().unwrap_or("-"),
                );
                for cand in candidates {
                    let _ = writeln!(
                        corrections,
                        "  -> {} | {} | {} {} | distance={} score={:.1} (name={}, city={})",
                        cand.siret,
                        cand.legal_name.as_deref().unwrap_or("-"),
                        cand.city_code.as_deref().unwrap_or("-"),
                        cand.city_name.as_deref().unwrap_or("-"),
                        cand.hamming_distance,
                        cand.combined(name_weight, city_weight),
                        cand.name_score,
                        cand.city_score,
                    );
                }
            }
            EnrichmentResult::InvalidNoCorrection => {
                let _ = writeln!(
                    invalid,
                    "{} | {}",
                    record.siret,
                    record.expected_name.as_deref().unwrap_or("-"),
                );
            }
            EnrichmentResult::LookupError { message } => {
                let _ = writeln!(registry_errors, "{} | {}", record.siret, message);
            }
            EnrichmentResult::Confirmed { .. } | EnrichmentResult::NotInRegistry => {}
        }
    }

    for (path, content) in [
        (&paths.corrections, &corrections),
        (&paths.invalid, &invalid),
        (&paths.registry_errors, &registry_errors),
    ] {
        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(paths)
}
