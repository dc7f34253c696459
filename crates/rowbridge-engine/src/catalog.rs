//! Static table catalog: the fixed source schema this pipeline migrates.
//!
//! The catalog is ordered so that referenced tables precede their
//! dependents; transfer and sync walk it front to back, deletes walk it
//! back to front.

use rowbridge_types::error::MigrationError;

/// A foreign key from a catalog table to another catalog table's primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: &'static str,
}

/// Deduplication key for a table: normalized name plus locality code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupSpec {
    pub name_column: &'static str,
    pub locality_column: &'static str,
}

/// Person-name columns that get canonical casing during transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NameCasing {
    pub first_name_column: &'static str,
    pub last_name_column: &'static str,
}

/// One migrated table and the per-table rules applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSpec {
    pub name: &'static str,
    pub primary_key: &'static str,
    pub foreign_keys: &'static [ForeignKey],
    /// Text columns normalized (accents stripped, uppercased) during transfer.
    pub clean_columns: &'static [&'static str],
    pub name_casing: Option<NameCasing>,
    pub dedup: Option<DedupSpec>,
    /// Rows with a non-null `deleted_at` are purged during cleanup.
    pub soft_delete: bool,
    /// Column holding the SIRET identifier, when the table carries one.
    pub identifier_column: Option<&'static str>,
}

/// Catalog in dependency order (referenced tables first).
pub const CATALOG: &[TableSpec] = &[
    TableSpec {
        name: "city",
        primary_key: "id",
        foreign_keys: &[],
        clean_columns: &["name"],
        name_casing: None,
        dedup: None,
        soft_delete: false,
        identifier_column: None,
    },
    TableSpec {
        name: "company",
        primary_key: "id",
        foreign_keys: &[ForeignKey { column: "address_city_id", references: "city" }],
        clean_columns: &["name"],
        name_casing: None,
        dedup: Some(DedupSpec { name_column: "name", locality_column: "city_code" }),
        soft_delete: false,
        identifier_column: Some("siret"),
    },
    TableSpec {
        name: "apprentice",
        primary_key: "id",
        foreign_keys: &[ForeignKey { column: "address_city_id", references: "city" }],
        clean_columns: &[],
        name_casing: Some(NameCasing {
            first_name_column: "first_name",
            last_name_column: "last_name",
        }),
        dedup: None,
        soft_delete: false,
        identifier_column: None,
    },
    TableSpec {
        name: "training",
        primary_key: "id",
        foreign_keys: &[],
        clean_columns: &["title"],
        name_casing: None,
        dedup: None,
        soft_delete: false,
        identifier_column: None,
    },
    TableSpec {
        name: "registration",
        primary_key: "id",
        foreign_keys: &[
            ForeignKey { column: "apprentice_id", references: "apprentice" },
            ForeignKey { column: "host_company_id", references: "company" },
            ForeignKey { column: "training_id", references: "training" },
        ],
        clean_columns: &[],
        name_casing: None,
        dedup: None,
        soft_delete: true,
        identifier_column: None,
    },
    TableSpec {
        name: "billing",
        primary_key: "id",
        foreign_keys: &[
            ForeignKey { column: "company_id", references: "company" },
            ForeignKey { column: "registration_id", references: "registration" },
        ],
        clean_columns: &[],
        name_casing: None,
        dedup: None,
        soft_delete: true,
        identifier_column: None,
    },
];

/// Looks up a single table by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static TableSpec> {
    CATALOG.iter().find(|t| t.name == name)
}

/// Resolves a user-supplied table selection against the catalog.
///
/// An empty selection means the full catalog. The result preserves catalog
/// (dependency) order regardless of input order.
///
/// # Errors
///
/// Fails fast with a `Config` error naming every unknown table, before any
/// phase runs.
pub fn resolve(selection: &[String]) -> Result<Vec<&'static TableSpec>, MigrationError> {
    if selection.is_empty() {
        return Ok(CATALOG.iter().collect());
    }
    let unknown: Vec<&str> = selection
        .iter()
        .map(String::as_str)
        .filter(|name| find(name).is_none())
        .collect();
    if !unknown.is_empty() {
        return Err(MigrationError::config(
            "UNKNOWN_TABLE",
            format!("unknown table(s): {}", unknown.join(", ")),
        ));
    }
    Ok(CATALOG
        .iter()
        .filter(|t| selection.iter().any(|s| s == t.name))
        .collect())
}

/// Tables that reference `name` through a foreign key, with the referencing
/// column. Used by cleanup to repoint dependents at the canonical row.
#[must_use]
pub fn dependents_of(name: &str) -> Vec<(&'static TableSpec, &'static str)> {
    CATALOG
        .iter()
        .flat_map(|t| {
            t.foreign_keys
                .iter()
                .filter(move |fk| fk.references == name)
                .map(move |fk| (t, fk.column))
        })
        .collect()
}
