//! End-to-end pipeline tests over in-memory stores and a scripted registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;

use rowbridge_engine::budget::QueryBudget;
use rowbridge_engine::catalog::TableSpec;
use rowbridge_engine::config::{DbConfig, MigrationConfig};
use rowbridge_engine::enrich::RegistryClient;
use rowbridge_engine::orchestrator::{Pipeline, RunOptions, Step};
use rowbridge_engine::result::RunState;
use rowbridge_engine::store::{ColumnDef, DryRunTarget, SourceStore, TargetStore, UpsertStats};
use rowbridge_types::error::MigrationError;
use rowbridge_types::registry::{
    EstablishmentStatus, IdentifierRecord, LookupOutcome, RegistryRecord,
};
use rowbridge_types::value::{TargetType, Value};

// ---------------------------------------------------------------------------
// fakes
// ---------------------------------------------------------------------------

struct FakeSource {
    tables: HashMap<String, (Vec<String>, Vec<Vec<Value>>)>,
    budget: Arc<QueryBudget>,
}

impl FakeSource {
    fn table(&self, name: &str) -> Result<&(Vec<String>, Vec<Vec<Value>>), MigrationError> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrationError::internal("NO_TABLE", name.to_string()))
    }
}

impl SourceStore for FakeSource {
    async fn list_tables(&self) -> Result<Vec<String>, MigrationError> {
        self.budget.charge();
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn count_rows(&self, table: &str) -> Result<u64, MigrationError> {
        self.budget.charge();
        Ok(self.table(table)?.1.len() as u64)
    }

    async fn column_names(&self, table: &str) -> Result<Vec<String>, MigrationError> {
        self.budget.charge();
        Ok(self.table(table)?.0.clone())
    }

    async fn fetch_page(
        &self,
        table: &TableSpec,
        columns: &[String],
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Vec<Value>>, MigrationError> {
        self.budget.charge();
        let (names, rows) = self.table(table.name)?;
        let idx: Vec<usize> = columns
            .iter()
            .map(|c| names.iter().position(|n| n == c).expect("column"))
            .collect();
        Ok(rows
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|row| idx.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }

    async fn identifier_records(
        &self,
        table: &TableSpec,
    ) -> Result<Vec<IdentifierRecord>, MigrationError> {
        self.budget.charge();
        let Some(id_col) = table.identifier_column else { return Ok(Vec::new()) };
        let (names, rows) = self.table(table.name)?;
        let get = |row: &[Value], col: &str| -> Option<String> {
            names.iter().position(|n| n == col).and_then(|i| match &row[i] {
                Value::Text(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
        };
        Ok(rows
            .iter()
            .filter_map(|row| {
                get(row, id_col).map(|siret| IdentifierRecord {
                    siret,
                    expected_name: get(row, "name"),
                    expected_city_code: get(row, "city_code"),
                    expected_city_name: get(row, "city_name"),
                })
            })
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
struct TableData {
    columns: Vec<ColumnDef>,
    rows: Vec<Vec<Value>>,
}

impl TableData {
    fn idx(&self, name: &str) -> usize {
        self.columns.iter().position(|c| c.name == name).expect("column")
    }
}

#[derive(Default)]
struct FakeTarget {
    schemas: Mutex<HashMap<String, HashMap<String, TableData>>>,
    /// table -> columns forming a unique constraint
    unique: HashMap<String, Vec<String>>,
    /// fail the Nth insert_batch call (1-based)
    fail_insert_call: Option<usize>,
    insert_calls: AtomicUsize,
}

impl FakeTarget {
    fn with_table(
        &self,
        schema: &str,
        table: &str,
        f: impl FnOnce(&mut TableData) -> Result<u64, MigrationError>,
    ) -> Result<u64, MigrationError> {
        let mut schemas = self.schemas.lock().unwrap();
        let data = schemas
            .get_mut(schema)
            .and_then(|s| s.get_mut(table))
            .ok_or_else(|| {
                MigrationError::internal("NO_TABLE", format!("{schema}.{table}"))
            })?;
        f(data)
    }

    fn snapshot(&self, schema: &str, table: &str) -> TableData {
        self.schemas.lock().unwrap()[schema][table].clone()
    }

    fn row_count(&self, schema: &str, table: &str) -> usize {
        self.snapshot(schema, table).rows.len()
    }
}

impl TargetStore for FakeTarget {
    async fn schema_exists(&self, schema: &str) -> Result<bool, MigrationError> {
        Ok(self.schemas.lock().unwrap().contains_key(schema))
    }

    async fn create_schema(&self, schema: &str) -> Result<(), MigrationError> {
        self.schemas.lock().unwrap().entry(schema.to_string()).or_default();
        Ok(())
    }

    async fn drop_schema(&self, schema: &str) -> Result<(), MigrationError> {
        self.schemas.lock().unwrap().remove(schema);
        Ok(())
    }

    async fn create_shadow_table(
        &self,
        staging_schema: &str,
        target_schema: &str,
        table: &str,
    ) -> Result<(), MigrationError> {
        let mut schemas = self.schemas.lock().unwrap();
        let columns = schemas[target_schema][table].columns.clone();
        schemas
            .get_mut(staging_schema)
            .expect("staging schema")
            .insert(table.to_string(), TableData { columns, rows: Vec::new() });
        Ok(())
    }

    async fn set_triggers(
        &self,
        _schema: &str,
        _table: &str,
        _enabled: bool,
    ) -> Result<(), MigrationError> {
        Ok(())
    }

    async fn table_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDef>, MigrationError> {
        let schemas = self.schemas.lock().unwrap();
        Ok(schemas[schema][table].columns.clone())
    }

    async fn insert_batch(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<(), MigrationError> {
        let call = self.insert_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_insert_call == Some(call) {
            return Err(MigrationError::transient_db("INSERT_FAILED", "simulated failure"));
        }
        self.with_table(schema, table, |data| {
            let idx: Vec<usize> = columns.iter().map(|c| data.idx(c)).collect();
            for row in rows {
                let mut full = vec![Value::Null; data.columns.len()];
                for (i, cell) in idx.iter().zip(row) {
                    full[*i] = cell;
                }
                data.rows.push(full);
            }
            Ok(0)
        })?;
        Ok(())
    }

    async fn count_rows(&self, schema: &str, table: &str) -> Result<u64, MigrationError> {
        self.with_table(schema, table, |data| Ok(data.rows.len() as u64))
    }

    async fn fetch_rows(
        &self,
        schema: &str,
        table: &str,
        columns: &[String],
    ) -> Result<Vec<Vec<Value>>, MigrationError> {
        let data = self.snapshot(schema, table);
        let idx: Vec<usize> = columns.iter().map(|c| data.idx(c)).collect();
        Ok(data
            .rows
            .iter()
            .map(|row| idx.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }

    async fn repoint_references(
        &self,
        schema: &str,
        dependents: &[(&str, &str)],
        from_id: i64,
        to_id: i64,
    ) -> Result<u64, MigrationError> {
        let mut schemas = self.schemas.lock().unwrap();
        let tables = schemas
            .get_mut(schema)
            .ok_or_else(|| MigrationError::internal("NO_SCHEMA", schema.to_string()))?;

        // Stage every dependent's update first; apply all or none, like the
        // single transaction the real store uses.
        let mut staged: Vec<(&str, Vec<Vec<Value>>, u64)> = Vec::new();
        for (table, fk_column) in dependents {
            let data = tables.get(*table).ok_or_else(|| {
                MigrationError::internal("NO_TABLE", format!("{schema}.{table}"))
            })?;
            let fk = data.idx(fk_column);
            let mut updated = data.rows.clone();
            let mut touched = 0u64;
            for row in &mut updated {
                if row[fk] == Value::Int(from_id) {
                    row[fk] = Value::Int(to_id);
                    touched += 1;
                }
            }
            if let Some(cols) = self.unique.get(*table) {
                let key_idx: Vec<usize> = cols.iter().map(|c| data.idx(c)).collect();
                let mut seen = Vec::new();
                for row in &updated {
                    let key: Vec<&Value> = key_idx.iter().map(|&i| &row[i]).collect();
                    if seen.contains(&key) {
                        return Err(MigrationError::data(
                            "UNIQUE_VIOLATION",
                            format!("duplicate key on {table}({})", cols.join(", ")),
                        ));
                    }
                    seen.push(key);
                }
            }
            staged.push((*table, updated, touched));
        }
        let mut total = 0u64;
        for (table, rows, touched) in staged {
            tables.get_mut(table).expect("staged table").rows = rows;
            total += touched;
        }
        Ok(total)
    }

    async fn delete_rows(
        &self,
        schema: &str,
        table: &str,
        pk_column: &str,
        ids: &[i64],
    ) -> Result<u64, MigrationError> {
        self.with_table(schema, table, |data| {
            let pk = data.idx(pk_column);
            let before = data.rows.len();
            data.rows.retain(|row| !ids.iter().any(|id| row[pk] == Value::Int(*id)));
            Ok((before - data.rows.len()) as u64)
        })
    }

    async fn purge_soft_deleted(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<u64, MigrationError> {
        self.with_table(schema, table, |data| {
            let Some(col) = data.columns.iter().position(|c| c.name == "deleted_at") else {
                return Ok(0);
            };
            let before = data.rows.len();
            data.rows.retain(|row| row[col].is_null());
            Ok((before - data.rows.len()) as u64)
        })
    }

    async fn upsert_from_staging(
        &self,
        staging_schema: &str,
        target_schema: &str,
        table: &TableSpec,
        _columns: &[String],
        has_updated_at: bool,
    ) -> Result<UpsertStats, MigrationError> {
        let staged = self.snapshot(staging_schema, table.name);
        let mut stats = UpsertStats::default();
        self.with_table(target_schema, table.name, |data| {
            let pk = data.idx(table.primary_key);
            let updated_at = has_updated_at.then(|| data.idx("updated_at"));
            for row in &staged.rows {
                match data.rows.iter_mut().find(|r| r[pk] == row[pk]) {
                    None => {
                        data.rows.push(row.clone());
                        stats.inserted += 1;
                    }
                    Some(existing) => {
                        let write = match updated_at {
                            Some(i) => match (&row[i], &existing[i]) {
                                (Value::DateTime(new), Value::DateTime(old)) => new > old,
                                (Value::DateTime(_), Value::Null) => true,
                                _ => false,
                            },
                            None => *existing != *row,
                        };
                        if write {
                            *existing = row.clone();
                            stats.updated += 1;
                        }
                    }
                }
            }
            Ok(0)
        })?;
        Ok(stats)
    }

    async fn delete_missing(
        &self,
        staging_schema: &str,
        target_schema: &str,
        table: &TableSpec,
    ) -> Result<u64, MigrationError> {
        let staged = self.snapshot(staging_schema, table.name);
        let staged_pk = staged.idx(table.primary_key);
        let keys: Vec<Value> = staged.rows.iter().map(|r| r[staged_pk].clone()).collect();
        self.with_table(target_schema, table.name, |data| {
            let pk = data.idx(table.primary_key);
            let before = data.rows.len();
            data.rows.retain(|row| keys.contains(&row[pk]));
            Ok((before - data.rows.len()) as u64)
        })
    }
}

#[derive(Clone, Default)]
struct FakeRegistry {
    outcomes: HashMap<String, LookupOutcome>,
}

impl RegistryClient for FakeRegistry {
    async fn lookup(&self, siret: &str) -> LookupOutcome {
        self.outcomes.get(siret).cloned().unwrap_or(LookupOutcome::NotFound)
    }
}

struct DownRegistry;

impl RegistryClient for DownRegistry {
    async fn lookup(&self, _siret: &str) -> LookupOutcome {
        LookupOutcome::Error("connection refused".to_string())
    }
}

// ---------------------------------------------------------------------------
// fixtures
// ---------------------------------------------------------------------------

fn int(i: i64) -> Value {
    Value::Int(i)
}

fn txt(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn ts(day: u32) -> Value {
    Value::DateTime(NaiveDate::from_ymd_opt(2024, 6, day).unwrap().and_hms_opt(0, 0, 0).unwrap())
}

fn col(name: &str, ty: TargetType) -> ColumnDef {
    ColumnDef { name: name.to_string(), data_type: ty }
}

fn db_stub() -> DbConfig {
    DbConfig {
        host: "stub".into(),
        port: 0,
        user: "stub".into(),
        password: String::new(),
        database: "stub".into(),
    }
}

fn make_config(report_dir: &Path) -> MigrationConfig {
    MigrationConfig {
        source: db_stub(),
        target: db_stub(),
        target_schema: "staging".into(),
        staging_schema: "temp_staging".into(),
        batch_size: 2,
        query_budget: 1_000,
        slow_query_ms: 200,
        enrichment_enabled: true,
        registry_rps: 7,
        registry_base_url: String::new(),
        candidate_workers: 4,
        name_match_weight: 1.0,
        city_match_weight: 2.0,
        report_dir: report_dir.display().to_string(),
    }
}

fn sample_source(budget: Arc<QueryBudget>) -> FakeSource {
    let mut tables = HashMap::new();
    tables.insert(
        "city".to_string(),
        (
            vec!["id".into(), "name".into()],
            vec![vec![int(1), txt("Saint-Éloy-les-Mines")], vec![int(2), txt("Lyon")]],
        ),
    );
    tables.insert(
        "company".to_string(),
        (
            vec![
                "id".into(),
                "name".into(),
                "siret".into(),
                "city_code".into(),
                "city_name".into(),
                "address_city_id".into(),
                "updated_at".into(),
            ],
            vec![
                vec![
                    int(1),
                    txt("SARL Boulangerie Dupont"),
                    txt("12345678901235"),
                    txt("63338"),
                    txt("Saint-Eloy-les-Mines"),
                    int(1),
                    ts(10),
                ],
                vec![
                    int(2),
                    txt("Boulangerie DUPONT"),
                    Value::Null,
                    txt("63338"),
                    txt("Saint-Eloy-les-Mines"),
                    int(1),
                    ts(12),
                ],
                vec![
                    int(3),
                    txt("Garage Moderne"),
                    txt("44306184100047"),
                    txt("69381"),
                    txt("Lyon"),
                    int(2),
                    ts(5),
                ],
            ],
        ),
    );
    tables.insert(
        "apprentice".to_string(),
        (
            vec!["id".into(), "first_name".into(), "last_name".into(), "address_city_id".into()],
            vec![
                vec![int(1), txt("jean-pierre"), txt("martin"), int(1)],
                vec![int(2), txt("CLAIRE"), txt("DUBOIS"), int(2)],
            ],
        ),
    );
    tables.insert(
        "training".to_string(),
        (
            vec!["id".into(), "title".into()],
            vec![vec![int(1), txt("Boulangerie CAP")]],
        ),
    );
    tables.insert(
        "registration".to_string(),
        (
            vec![
                "id".into(),
                "apprentice_id".into(),
                "host_company_id".into(),
                "training_id".into(),
                "deleted_at".into(),
                "updated_at".into(),
            ],
            vec![
                vec![int(1), int(1), int(1), int(1), Value::Null, ts(10)],
                vec![int(2), int(2), int(2), int(1), Value::Null, ts(10)],
                vec![int(3), int(2), int(3), int(1), ts(1), ts(10)],
            ],
        ),
    );
    tables.insert(
        "billing".to_string(),
        (
            vec!["id".into(), "company_id".into(), "registration_id".into(), "deleted_at".into()],
            vec![vec![int(1), int(1), int(1), Value::Null]],
        ),
    );
    FakeSource { tables, budget }
}

fn target_columns() -> HashMap<String, Vec<ColumnDef>> {
    let mut map = HashMap::new();
    map.insert(
        "city".to_string(),
        vec![col("id", TargetType::BigInt), col("name", TargetType::Varchar)],
    );
    map.insert(
        "company".to_string(),
        vec![
            col("id", TargetType::BigInt),
            col("name", TargetType::Varchar),
            col("siret", TargetType::Varchar),
            col("city_code", TargetType::Varchar),
            col("city_name", TargetType::Varchar),
            col("address_city_id", TargetType::BigInt),
            col("updated_at", TargetType::Timestamp),
        ],
    );
    map.insert(
        "apprentice".to_string(),
        vec![
            col("id", TargetType::BigInt),
            col("first_name", TargetType::Varchar),
            col("last_name", TargetType::Varchar),
            col("address_city_id", TargetType::BigInt),
        ],
    );
    map.insert(
        "training".to_string(),
        vec![col("id", TargetType::BigInt), col("title", TargetType::Varchar)],
    );
    map.insert(
        "registration".to_string(),
        vec![
            col("id", TargetType::BigInt),
            col("apprentice_id", TargetType::BigInt),
            col("host_company_id", TargetType::BigInt),
            col("training_id", TargetType::BigInt),
            col("deleted_at", TargetType::Timestamp),
            col("updated_at", TargetType::Timestamp),
        ],
    );
    map.insert(
        "billing".to_string(),
        vec![
            col("id", TargetType::BigInt),
            col("company_id", TargetType::BigInt),
            col("registration_id", TargetType::BigInt),
            col("deleted_at", TargetType::Timestamp),
        ],
    );
    map
}

fn seeded_target() -> FakeTarget {
    let tables: HashMap<String, TableData> = target_columns()
        .into_iter()
        .map(|(name, columns)| (name, TableData { columns, rows: Vec::new() }))
        .collect();
    let target = FakeTarget::default();
    target.schemas.lock().unwrap().insert("staging".to_string(), tables);
    target
}

fn registry() -> FakeRegistry {
    let active = |siret: &str, name: &str, city_code: &str| {
        LookupOutcome::Found(RegistryRecord {
            siret: siret.to_string(),
            legal_name: Some(name.to_string()),
            city_code: Some(city_code.to_string()),
            city_name: Some("SAINT-ELOY-LES-MINES".to_string()),
            naf_code: Some("10.71C".to_string()),
            status: EstablishmentStatus::Active,
        })
    };
    FakeRegistry {
        outcomes: [
            ("44306184100047".to_string(), active("44306184100047", "GARAGE MODERNE", "69381")),
            (
                "12345678901237".to_string(),
                active("12345678901237", "BOULANGERIE DUPONT", "63338"),
            ),
        ]
        .into(),
    }
}

fn full_run() -> RunOptions {
    RunOptions { step: Step::Full, dry_run: false, keep_temp: false, tables: Vec::new() }
}

fn read_report(dir: &Path, prefix: &str) -> String {
    let entry = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .find(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .unwrap_or_else(|| panic!("no {prefix} report in {}", dir.display()));
    std::fs::read_to_string(entry.path()).unwrap()
}

// ---------------------------------------------------------------------------
// tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_run_reaches_done_and_populates_target() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = registry();

    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let summary = pipeline.run(&full_run()).await.unwrap();

    assert_eq!(summary.state, RunState::Done);
    assert!(summary.queries_used > 0);

    // Duplicate companies merged into one, soft-deleted registration purged.
    assert_eq!(target.row_count("staging", "company"), 2);
    assert_eq!(target.row_count("staging", "registration"), 2);
    assert_eq!(target.row_count("staging", "city"), 2);

    // Staging schema dropped on success.
    assert!(!target.schemas.lock().unwrap().contains_key("temp_staging"));

    // Names were normalized during transfer.
    let company = target.snapshot("staging", "company");
    let name_idx = company.idx("name");
    let names: Vec<String> = company
        .rows
        .iter()
        .map(|r| match &r[name_idx] {
            Value::Text(s) => s.clone(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert!(names.iter().all(|n| n == &n.to_uppercase()));
}

#[tokio::test]
async fn merge_repoints_references_to_canonical_company() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = registry();

    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let summary = pipeline.run(&full_run()).await.unwrap();

    let merge = summary.merges.iter().find(|m| m.table == "company").unwrap();
    assert_eq!(merge.duplicate_groups, 1);
    assert_eq!(merge.rows_merged, 1);
    assert!(merge.ambiguous.is_empty());

    // Company 1 wins (more non-null attributes than company 2); the billing
    // row already points at it and registration 2 moved over.
    let registration = target.snapshot("staging", "registration");
    let host_idx = registration.idx("host_company_id");
    assert!(registration.rows.iter().all(|r| r[host_idx] != Value::Int(2)));
}

#[tokio::test]
async fn ambiguous_merge_is_flagged_and_left_alone() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let mut source = sample_source(Arc::clone(&budget));
    // Same apprentice registered at both duplicate companies: repointing
    // would collide on (apprentice_id, host_company_id).
    source.tables.get_mut("registration").unwrap().1 = vec![
        vec![int(1), int(1), int(1), int(1), Value::Null, ts(10)],
        vec![int(2), int(1), int(2), int(1), Value::Null, ts(10)],
    ];
    let mut target = seeded_target();
    target.unique.insert(
        "registration".to_string(),
        vec!["apprentice_id".to_string(), "host_company_id".to_string()],
    );
    let client = registry();

    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let summary = pipeline.run(&full_run()).await.unwrap();

    assert_eq!(summary.state, RunState::Done);
    let merge = summary.merges.iter().find(|m| m.table == "company").unwrap();
    assert_eq!(merge.rows_merged, 0);
    assert_eq!(merge.ambiguous.len(), 1);
    assert_eq!(merge.ambiguous[0].duplicate_id, 2);

    // Both companies survive for human review.
    assert_eq!(target.row_count("staging", "company"), 3);
}

#[tokio::test]
async fn blocked_merge_leaves_every_dependent_untouched() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let mut source = sample_source(Arc::clone(&budget));
    // Both duplicate companies bill against the same registration, so the
    // billing repoint collides while the registration repoint would not.
    source.tables.get_mut("billing").unwrap().1 = vec![
        vec![int(1), int(1), int(1), Value::Null],
        vec![int(2), int(2), int(1), Value::Null],
    ];
    let mut target = seeded_target();
    target.unique.insert(
        "billing".to_string(),
        vec!["company_id".to_string(), "registration_id".to_string()],
    );
    let client = registry();

    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let summary = pipeline.run(&full_run()).await.unwrap();

    assert_eq!(summary.state, RunState::Done);
    let merge = summary.merges.iter().find(|m| m.table == "company").unwrap();
    assert_eq!(merge.rows_merged, 0);
    assert_eq!(merge.references_repointed, 0);
    assert_eq!(merge.ambiguous.len(), 1);

    // No dependent moved: registration 2 still references the duplicate,
    // billing 2 likewise, and the duplicate company survives.
    let registration = target.snapshot("staging", "registration");
    let host_idx = registration.idx("host_company_id");
    assert_eq!(
        registration.rows.iter().filter(|r| r[host_idx] == Value::Int(2)).count(),
        1,
        "registration references were repointed despite the blocked merge"
    );
    let billing = target.snapshot("staging", "billing");
    let company_idx = billing.idx("company_id");
    assert_eq!(billing.rows.iter().filter(|r| r[company_idx] == Value::Int(2)).count(), 1);
    assert_eq!(target.row_count("staging", "company"), 3);
}

#[tokio::test]
async fn cleanup_is_idempotent() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = registry();

    let opts = RunOptions { step: Step::Full, dry_run: false, keep_temp: true, tables: Vec::new() };
    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    pipeline.run(&opts).await.unwrap();

    // Staging kept; run the cleanup step again over the cleaned data.
    let again = RunOptions { step: Step::Cleanup, dry_run: false, keep_temp: true, tables: Vec::new() };
    let summary = pipeline.run(&again).await.unwrap();
    let merge = summary.merges.iter().find(|m| m.table == "company").unwrap();
    assert_eq!(merge.duplicate_groups, 0);
    assert_eq!(merge.rows_merged, 0);
    assert_eq!(merge.soft_deleted_purged, 0);
}

#[tokio::test]
async fn second_sync_performs_no_writes() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = registry();

    let opts = RunOptions { step: Step::Full, dry_run: false, keep_temp: true, tables: Vec::new() };
    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let first = pipeline.run(&opts).await.unwrap();
    assert!(first.syncs.iter().any(|s| s.inserted > 0));

    let again = RunOptions { step: Step::Sync, dry_run: false, keep_temp: true, tables: Vec::new() };
    let second = pipeline.run(&again).await.unwrap();
    for sync in &second.syncs {
        assert_eq!(sync.inserted, 0, "{} re-inserted rows", sync.table);
        assert_eq!(sync.updated, 0, "{} re-updated rows", sync.table);
        assert_eq!(sync.deleted, 0, "{} re-deleted rows", sync.table);
    }
}

#[tokio::test]
async fn dry_run_writes_nothing_but_produces_identical_reports() {
    let live_dir = tempfile::tempdir().unwrap();
    let dry_dir = tempfile::tempdir().unwrap();

    // Live run.
    let cfg = make_config(live_dir.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = registry();
    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    pipeline.run(&full_run()).await.unwrap();

    // Dry run against a fresh, identical world.
    let cfg = make_config(dry_dir.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = DryRunTarget::new(seeded_target(), &cfg.staging_schema, &cfg.target_schema);
    let opts = RunOptions { step: Step::Full, dry_run: true, keep_temp: false, tables: Vec::new() };
    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let summary = pipeline.run(&opts).await.unwrap();
    assert_eq!(summary.state, RunState::Done);

    // The target is untouched.
    let inner = target.into_inner();
    for table in ["city", "company", "apprentice", "training", "registration", "billing"] {
        assert_eq!(inner.row_count("staging", table), 0, "{table} was written in dry run");
    }
    assert!(!inner.schemas.lock().unwrap().contains_key("temp_staging"));

    // Same report bytes as the live run.
    for prefix in ["siret_corrections_", "siret_invalid_", "registry_errors_"] {
        assert_eq!(
            read_report(live_dir.path(), prefix),
            read_report(dry_dir.path(), prefix),
            "{prefix} differs between live and dry run"
        );
    }
}

#[tokio::test]
async fn correction_scenario_ranks_the_true_sibling_first() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = registry();

    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let summary = pipeline.run(&full_run()).await.unwrap();

    let stats = summary.enrichment.unwrap();
    assert_eq!(stats.confirmed, 1);
    assert_eq!(stats.corrected, 1);
    assert_eq!(stats.lookup_errors, 0);

    let corrections = read_report(reports.path(), "siret_corrections_");
    assert!(corrections.contains("ORIGINAL 12345678901235"));
    assert!(corrections.contains("-> 12345678901237"));
    // Name match (2 words) plus exact INSEE city match.
    assert!(corrections.contains("score=6.0"));

    let invalid = read_report(reports.path(), "siret_invalid_");
    assert_eq!(invalid, "");
}

#[tokio::test]
async fn unreachable_registry_reports_errors_but_run_completes() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = DownRegistry;

    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let summary = pipeline.run(&full_run()).await.unwrap();

    assert_eq!(summary.state, RunState::Done);
    let stats = summary.enrichment.unwrap();
    assert_eq!(stats.lookup_errors, 2);
    assert_eq!(stats.invalid_no_correction, 0);

    // One line per attempted identifier, none misfiled as invalid.
    let errors = read_report(reports.path(), "registry_errors_");
    assert_eq!(errors.lines().count(), 2);
    assert_eq!(read_report(reports.path(), "siret_invalid_"), "");
}

#[tokio::test]
async fn stale_staging_schema_fails_fast() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    target.schemas.lock().unwrap().insert("temp_staging".to_string(), HashMap::new());
    let client = registry();

    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let err = pipeline.run(&full_run()).await.unwrap_err();

    assert_eq!(err.state, RunState::Migrating);
    let inner = err.error.as_migration_error().unwrap();
    assert_eq!(inner.code, "STALE_STAGING");
    // The stale schema is never overwritten.
    assert!(target.schemas.lock().unwrap().contains_key("temp_staging"));
}

#[tokio::test]
async fn budget_exhaustion_fails_the_run_and_keeps_staging() {
    let reports = tempfile::tempdir().unwrap();
    let mut cfg = make_config(reports.path());
    cfg.query_budget = 4;
    cfg.batch_size = 1;
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = registry();

    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let err = pipeline.run(&full_run()).await.unwrap_err();

    assert_eq!(err.state, RunState::Migrating);
    let inner = err.error.as_migration_error().unwrap();
    assert_eq!(inner.code, "BUDGET_EXCEEDED");
    // Staging retained for inspection.
    assert!(target.schemas.lock().unwrap().contains_key("temp_staging"));
}

#[tokio::test]
async fn failed_batch_leaves_no_partial_rows() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let mut target = seeded_target();
    target.fail_insert_call = Some(2);
    let client = registry();

    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let err = pipeline.run(&full_run()).await.unwrap_err();
    assert_eq!(err.state, RunState::Migrating);

    // Only complete batches are present: the failed one contributed nothing.
    let schemas = target.schemas.lock().unwrap();
    let staged: usize = schemas["temp_staging"].values().map(|t| t.rows.len()).sum();
    assert_eq!(staged % cfg.batch_size as usize, 0);
}

#[tokio::test]
async fn unknown_table_selection_fails_before_any_phase() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = registry();

    let opts = RunOptions {
        step: Step::Full,
        dry_run: false,
        keep_temp: false,
        tables: vec!["company".to_string(), "nonexistent".to_string()],
    };
    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let err = pipeline.run(&opts).await.unwrap_err();

    assert_eq!(err.state, RunState::Init);
    assert_eq!(err.error.as_migration_error().unwrap().code, "UNKNOWN_TABLE");
    assert!(!target.schemas.lock().unwrap().contains_key("temp_staging"));
}

#[tokio::test]
async fn partial_step_without_staging_fails_with_guidance() {
    let reports = tempfile::tempdir().unwrap();
    let cfg = make_config(reports.path());
    let budget = Arc::new(QueryBudget::new(cfg.query_budget));
    let source = sample_source(Arc::clone(&budget));
    let target = seeded_target();
    let client = registry();

    let opts = RunOptions { step: Step::Sync, dry_run: false, keep_temp: false, tables: Vec::new() };
    let pipeline =
        Pipeline { source: &source, target: &target, registry: Some(&client), cfg: &cfg, budget: &budget };
    let err = pipeline.run(&opts).await.unwrap_err();
    assert_eq!(err.error.as_migration_error().unwrap().code, "NO_STAGING");
}
