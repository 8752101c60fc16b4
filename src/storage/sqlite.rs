use crate::error::{ProcessingError, Result};
use crate::models::{ElementDefinition, ForecastPlace, ReferencedModel, RunMetadata};
use crate::storage::{Generation, GenerationState, GenerationStore};
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info, warn};

/// Stable logical names readers query. Each is a view redirected to the
/// active generation's tables during activation.
const PLACES_VIEW: &str = "forecast_places";
const READINGS_VIEW: &str = "forecast_readings";
const ELEMENTS_VIEW: &str = "element_definitions";
const METADATA_VIEW: &str = "run_metadata";
const WIDE_VIEW: &str = "forecasts_wide";

/// SQLite-backed generation store.
///
/// Each generation owns four tables suffixed with its identifier; the
/// stable views above are repointed inside a single transaction, which is
/// what makes the swap atomic for readers.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "wal").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS generations (
                id         TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                valid_from TEXT,
                valid_to   TEXT,
                state      TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    /// Whether an activated generation is currently visible.
    pub fn has_active_dataset(&self) -> Result<bool> {
        let found: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'view' AND name = ?1",
                params![PLACES_VIEW],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn active_place_count(&self) -> Result<i64> {
        if !self.has_active_dataset()? {
            return Ok(0);
        }
        let count = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", PLACES_VIEW), [], |row| {
                row.get(0)
            })?;
        Ok(count)
    }

    pub fn active_reading_count(&self) -> Result<i64> {
        if !self.has_active_dataset()? {
            return Ok(0);
        }
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", READINGS_VIEW),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Run metadata of the active generation, if one exists.
    pub fn active_run_metadata(&self) -> Result<Option<RunMetadata>> {
        if !self.has_active_dataset()? {
            return Ok(None);
        }
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT source_url, download_duration_ms, parsing_duration_ms, parser,
                            issuer, product_id, generating_process,
                            available_variables, timesteps, referenced_models
                     FROM {}",
                    METADATA_VIEW
                ),
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                        row.get::<_, String>(9)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((
                source_url,
                download_duration_ms,
                parse_duration_ms,
                parser,
                issuer,
                product_id,
                generating_process,
                variables_json,
                timesteps_json,
                models_json,
            )) => {
                let available_variables: Vec<String> = serde_json::from_str(&variables_json)?;
                let timesteps: Vec<DateTime<Utc>> = serde_json::from_str(&timesteps_json)?;
                let referenced_models: Vec<ReferencedModel> = serde_json::from_str(&models_json)?;
                Ok(Some(RunMetadata {
                    source_url,
                    download_duration_ms,
                    parse_duration_ms,
                    parser,
                    issuer,
                    product_id,
                    generating_process,
                    available_variables,
                    timesteps,
                    referenced_models,
                }))
            }
        }
    }

    fn places_table(id: &str) -> String {
        format!("{}_{}", PLACES_VIEW, id)
    }

    fn readings_table(id: &str) -> String {
        format!("{}_{}", READINGS_VIEW, id)
    }

    fn elements_table(id: &str) -> String {
        format!("{}_{}", ELEMENTS_VIEW, id)
    }

    fn metadata_table(id: &str) -> String {
        format!("{}_{}", METADATA_VIEW, id)
    }

    fn check_id(id: &str) -> Result<()> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ProcessingError::InvalidFormat(format!(
                "invalid generation identifier '{}'",
                id
            )));
        }
        Ok(())
    }

    /// Tables in the database belonging to any generation of the given
    /// family (e.g. every `forecast_places_*`).
    #[cfg(test)]
    fn generation_tables(&self, family: &str) -> Result<Vec<String>> {
        let pattern = format!("{}_%", family);
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1",
        )?;
        let names = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn wide_view_definition(variables: &[String]) -> Option<String> {
        let usable: Vec<&String> = variables
            .iter()
            .filter(|name| {
                let ok = !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_');
                if !ok {
                    warn!(
                        variable = name.as_str(),
                        "variable name not usable as a column, omitting from wide view"
                    );
                }
                ok
            })
            .collect();

        if usable.is_empty() {
            return None;
        }

        let mut sql = format!(
            "CREATE VIEW {} AS\nSELECT place_id, timestep",
            WIDE_VIEW
        );
        for name in usable {
            sql.push_str(&format!(
                ",\n  MAX(CASE WHEN name = '{0}' THEN value END) AS \"{0}\"",
                name
            ));
        }
        sql.push_str(&format!(
            "\nFROM {}\nGROUP BY place_id, timestep",
            READINGS_VIEW
        ));
        Some(sql)
    }
}

impl GenerationStore for SqliteStore {
    fn begin_generation(&mut self) -> Result<Generation> {
        let generation = Generation::new(Utc::now().trunc_subsecs(0));

        // A primary-key conflict here means two runs started in the same
        // second, which callers avoid by serializing runs.
        self.conn
            .execute(
                "INSERT INTO generations (id, created_at, state) VALUES (?1, ?2, ?3)",
                params![
                    generation.id,
                    generation.created_at,
                    GenerationState::Staging.as_str()
                ],
            )
            .map_err(|e| {
                ProcessingError::Write(format!(
                    "cannot allocate generation {}: {}",
                    generation.id, e
                ))
            })?;

        let id = &generation.id;
        self.conn
            .execute_batch(&format!(
                "CREATE TABLE {places} (
                    id          TEXT PRIMARY KEY,
                    name        TEXT NOT NULL,
                    longitude   REAL NOT NULL,
                    latitude    REAL NOT NULL,
                    altitude    REAL NOT NULL,
                    inserted_at TEXT NOT NULL
                );
                CREATE TABLE {readings} (
                    place_id    TEXT NOT NULL,
                    name        TEXT NOT NULL,
                    timestep    TEXT NOT NULL,
                    value       REAL NOT NULL,
                    inserted_at TEXT NOT NULL
                );
                CREATE TABLE {elements} (
                    short_name  TEXT PRIMARY KEY,
                    description TEXT NOT NULL,
                    unit        TEXT NOT NULL
                );
                CREATE TABLE {metadata} (
                    source_url             TEXT NOT NULL,
                    processing_timestamp   TEXT NOT NULL,
                    download_duration_ms   INTEGER NOT NULL,
                    parsing_duration_ms    INTEGER NOT NULL,
                    parser                 TEXT NOT NULL,
                    issuer                 TEXT NOT NULL,
                    product_id             TEXT NOT NULL,
                    generating_process     TEXT NOT NULL,
                    available_variables    TEXT NOT NULL,
                    timesteps              TEXT NOT NULL,
                    referenced_models      TEXT NOT NULL
                );",
                places = Self::places_table(id),
                readings = Self::readings_table(id),
                elements = Self::elements_table(id),
                metadata = Self::metadata_table(id),
            ))
            .map_err(|e| {
                ProcessingError::Write(format!("cannot create staging tables: {}", e))
            })?;

        info!(generation = generation.id.as_str(), "staging generation created");
        Ok(generation)
    }

    fn insert_place(&mut self, generation: &Generation, place: &ForecastPlace) -> Result<()> {
        Self::check_id(&generation.id)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| ProcessingError::Write(e.to_string()))?;

        tx.execute(
            &format!(
                "INSERT INTO {} (id, name, longitude, latitude, altitude, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                Self::places_table(&generation.id)
            ),
            params![
                place.id,
                place.name,
                place.position.longitude,
                place.position.latitude,
                place.position.altitude,
                generation.created_at,
            ],
        )
        .map_err(|e| ProcessingError::Write(format!("place '{}': {}", place.id, e)))?;

        // Bulk-append path: one prepared statement reused for the whole
        // batch keeps throughput acceptable for tens of millions of rows.
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT INTO {} (place_id, name, timestep, value, inserted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    Self::readings_table(&generation.id)
                ))
                .map_err(|e| ProcessingError::Write(e.to_string()))?;

            for reading in &place.readings {
                stmt.execute(params![
                    place.id,
                    reading.variable,
                    reading.timestep,
                    reading.value,
                    generation.created_at,
                ])
                .map_err(|e| {
                    ProcessingError::Write(format!(
                        "reading for place '{}' variable '{}': {}",
                        place.id, reading.variable, e
                    ))
                })?;
            }
        }

        tx.commit()
            .map_err(|e| ProcessingError::Write(e.to_string()))
    }

    fn insert_elements(
        &mut self,
        generation: &Generation,
        elements: &[ElementDefinition],
    ) -> Result<()> {
        Self::check_id(&generation.id)?;
        let tx = self
            .conn
            .transaction()
            .map_err(|e| ProcessingError::Write(e.to_string()))?;
        {
            let mut stmt = tx
                .prepare(&format!(
                    "INSERT OR REPLACE INTO {} (short_name, description, unit)
                     VALUES (?1, ?2, ?3)",
                    Self::elements_table(&generation.id)
                ))
                .map_err(|e| ProcessingError::Write(e.to_string()))?;
            for element in elements {
                stmt.execute(params![element.short_name, element.description, element.unit])
                    .map_err(|e| {
                        ProcessingError::Write(format!(
                            "element definition '{}': {}",
                            element.short_name, e
                        ))
                    })?;
            }
        }
        tx.commit()
            .map_err(|e| ProcessingError::Write(e.to_string()))
    }

    fn insert_run_metadata(
        &mut self,
        generation: &Generation,
        metadata: &RunMetadata,
    ) -> Result<()> {
        Self::check_id(&generation.id)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO {} (source_url, processing_timestamp, download_duration_ms,
                                     parsing_duration_ms, parser, issuer, product_id,
                                     generating_process, available_variables, timesteps,
                                     referenced_models)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    Self::metadata_table(&generation.id)
                ),
                params![
                    metadata.source_url,
                    generation.created_at,
                    metadata.download_duration_ms,
                    metadata.parse_duration_ms,
                    metadata.parser,
                    metadata.issuer,
                    metadata.product_id,
                    metadata.generating_process,
                    serde_json::to_string(&metadata.available_variables)?,
                    serde_json::to_string(&metadata.timesteps)?,
                    serde_json::to_string(&metadata.referenced_models)?,
                ],
            )
            .map_err(|e| ProcessingError::Write(e.to_string()))?;
        Ok(())
    }

    fn activate(&mut self, generation: &Generation) -> Result<()> {
        Self::check_id(&generation.id)?;
        let id = generation.id.clone();
        let (valid_from, valid_to) = generation.validity_window();

        let places = Self::places_table(&id);
        let readings = Self::readings_table(&id);
        let elements = Self::elements_table(&id);
        let metadata = Self::metadata_table(&id);

        let tx = self
            .conn
            .transaction()
            .map_err(|e| ProcessingError::Activation(e.to_string()))?;

        // 1. Statistics refresh on the now-complete staging tables.
        tx.execute_batch(&format!("ANALYZE {}; ANALYZE {};", places, readings))
            .map_err(|e| ProcessingError::Activation(format!("statistics refresh: {}", e)))?;

        // 2. Derived indexes, built only now that the full row set exists.
        tx.execute_batch(&format!(
            "CREATE INDEX idx_{places}_position ON {places} (longitude, latitude);
             CREATE INDEX idx_{readings}_lookup ON {readings} (place_id, name, timestep);",
            places = places,
            readings = readings,
        ))
        .map_err(|e| ProcessingError::Activation(format!("index build: {}", e)))?;

        // 3. Validity window: every staged row must fall inside it.
        for table in [&places, &readings] {
            let strays: i64 = tx
                .query_row(
                    &format!(
                        "SELECT COUNT(*) FROM {} WHERE inserted_at NOT BETWEEN ?1 AND ?2",
                        table
                    ),
                    params![valid_from, valid_to],
                    |row| row.get(0),
                )
                .map_err(|e| ProcessingError::Activation(e.to_string()))?;
            if strays > 0 {
                return Err(ProcessingError::Activation(format!(
                    "{} rows in {} outside validity window of generation {}",
                    strays, table, id
                )));
            }
        }
        tx.execute(
            "UPDATE generations SET valid_from = ?1, valid_to = ?2 WHERE id = ?3",
            params![valid_from, valid_to, id],
        )
        .map_err(|e| ProcessingError::Activation(e.to_string()))?;

        // 4. Repoint the stable views at this generation's tables.
        tx.execute_batch(&format!(
            "DROP VIEW IF EXISTS {pv};
             DROP VIEW IF EXISTS {rv};
             DROP VIEW IF EXISTS {ev};
             DROP VIEW IF EXISTS {mv};
             CREATE VIEW {pv} AS SELECT id, name, longitude, latitude, altitude FROM {places};
             CREATE VIEW {rv} AS SELECT place_id, name, timestep, value FROM {readings};
             CREATE VIEW {ev} AS SELECT short_name, description, unit FROM {elements};
             CREATE VIEW {mv} AS SELECT * FROM {metadata};",
            pv = PLACES_VIEW,
            rv = READINGS_VIEW,
            ev = ELEMENTS_VIEW,
            mv = METADATA_VIEW,
            places = places,
            readings = readings,
            elements = elements,
            metadata = metadata,
        ))
        .map_err(|e| ProcessingError::Activation(format!("view redirect: {}", e)))?;

        // 5. Retire everything else. Keyed by name-pattern enumeration, not
        // an exact list, so a half-applied previous cleanup is finished on
        // retry.
        let mut stale = Vec::new();
        {
            let mut stmt = tx
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE ?1")
                .map_err(|e| ProcessingError::Activation(e.to_string()))?;
            for family in [PLACES_VIEW, READINGS_VIEW, ELEMENTS_VIEW, METADATA_VIEW] {
                let prefix = format!("{}_", family);
                let rows = stmt
                    .query_map(params![format!("{}%", prefix)], |row| {
                        row.get::<_, String>(0)
                    })
                    .map_err(|e| ProcessingError::Activation(e.to_string()))?;
                for name in rows {
                    let name = name.map_err(|e| ProcessingError::Activation(e.to_string()))?;
                    if name.strip_prefix(&prefix) != Some(id.as_str()) {
                        stale.push(name);
                    }
                }
            }
        }
        for table in &stale {
            debug!(table = table.as_str(), "dropping retired generation table");
            tx.execute_batch(&format!("DROP TABLE IF EXISTS {};", table))
                .map_err(|e| ProcessingError::Activation(format!("retire {}: {}", table, e)))?;
        }
        tx.execute("DELETE FROM generations WHERE id <> ?1", params![id])
            .map_err(|e| ProcessingError::Activation(e.to_string()))?;
        tx.execute(
            "UPDATE generations SET state = ?1 WHERE id = ?2",
            params![GenerationState::Active.as_str(), id],
        )
        .map_err(|e| ProcessingError::Activation(e.to_string()))?;

        tx.commit()
            .map_err(|e| ProcessingError::Activation(e.to_string()))?;

        info!(
            generation = id.as_str(),
            retired = stale.len(),
            "generation activated"
        );
        Ok(())
    }

    fn rebuild_wide_view(&mut self, variables: &[String]) -> Result<bool> {
        let desired = Self::wide_view_definition(variables);

        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'view' AND name = ?1",
                params![WIDE_VIEW],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ProcessingError::DerivedView(e.to_string()))?;

        match (&desired, &existing) {
            (Some(new_sql), Some(old_sql)) if new_sql == old_sql => {
                debug!("wide view definition unchanged, keeping existing view");
                return Ok(false);
            }
            (None, None) => return Ok(false),
            _ => {}
        }

        let tx = self
            .conn
            .transaction()
            .map_err(|e| ProcessingError::DerivedView(e.to_string()))?;
        tx.execute_batch(&format!("DROP VIEW IF EXISTS {};", WIDE_VIEW))
            .map_err(|e| ProcessingError::DerivedView(e.to_string()))?;
        if let Some(sql) = &desired {
            tx.execute_batch(sql)
                .map_err(|e| ProcessingError::DerivedView(e.to_string()))?;
        }
        tx.commit()
            .map_err(|e| ProcessingError::DerivedView(e.to_string()))?;

        info!(
            variables = variables.len(),
            "wide view rebuilt for new variable set"
        );
        Ok(true)
    }

    fn list_generations(&self) -> Result<Vec<Generation>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, created_at, state FROM generations ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, DateTime<Utc>>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut generations = Vec::new();
        for row in rows {
            let (id, created_at, state) = row?;
            let state = GenerationState::from_str(&state).ok_or_else(|| {
                ProcessingError::InvalidFormat(format!("unknown generation state '{}'", state))
            })?;
            generations.push(Generation {
                id,
                created_at,
                state,
            });
        }
        Ok(generations)
    }

    fn discard(&mut self, generation: &Generation) -> Result<()> {
        Self::check_id(&generation.id)?;
        let id = &generation.id;
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {};
             DROP TABLE IF EXISTS {};
             DROP TABLE IF EXISTS {};
             DROP TABLE IF EXISTS {};",
            Self::places_table(id),
            Self::readings_table(id),
            Self::elements_table(id),
            Self::metadata_table(id),
        ))?;
        self.conn.execute(
            "DELETE FROM generations WHERE id = ?1 AND state = ?2",
            params![id, GenerationState::Staging.as_str()],
        )?;
        info!(generation = id.as_str(), "staging generation discarded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Position, VariableReading};
    use chrono::TimeZone;

    fn sample_place(id: &str, values: &[(&str, f64)]) -> ForecastPlace {
        let mut place = ForecastPlace::new(
            id.to_string(),
            format!("Station {}", id),
            Position {
                longitude: 7.63,
                latitude: 51.96,
                altitude: 60.0,
            },
        );
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for (variable, value) in values {
            place.readings.push(VariableReading {
                variable: variable.to_string(),
                timestep: t0,
                value: *value,
            });
        }
        place
    }

    fn sample_metadata() -> RunMetadata {
        RunMetadata {
            source_url: "https://example.org/bulletin.kmz".to_string(),
            download_duration_ms: 100,
            parse_duration_ms: 50,
            parser: RunMetadata::parser_name(),
            issuer: "Deutscher Wetterdienst".to_string(),
            product_id: "MOSMIX".to_string(),
            generating_process: "DWD MOSMIX hourly".to_string(),
            available_variables: vec!["TTT".to_string()],
            timesteps: vec![Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()],
            referenced_models: vec![],
        }
    }

    fn activated_store(place_ids: &[&str]) -> (SqliteStore, Generation) {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let generation = store.begin_generation().unwrap();
        for id in place_ids {
            store
                .insert_place(&generation, &sample_place(id, &[("TTT", 280.15)]))
                .unwrap();
        }
        store
            .insert_run_metadata(&generation, &sample_metadata())
            .unwrap();
        store.activate(&generation).unwrap();
        (store, generation)
    }

    #[test]
    fn test_staging_is_invisible_to_readers() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let generation = store.begin_generation().unwrap();
        store
            .insert_place(&generation, &sample_place("10315", &[("TTT", 280.15)]))
            .unwrap();

        assert!(!store.has_active_dataset().unwrap());
        assert_eq!(store.active_place_count().unwrap(), 0);
    }

    #[test]
    fn test_activation_makes_generation_visible() {
        let (store, generation) = activated_store(&["10315", "10515"]);

        assert_eq!(store.active_place_count().unwrap(), 2);
        assert_eq!(store.active_reading_count().unwrap(), 2);

        let listed = store.list_generations().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, generation.id);
        assert_eq!(listed[0].state, GenerationState::Active);

        let metadata = store.active_run_metadata().unwrap().unwrap();
        assert_eq!(metadata.available_variables, vec!["TTT".to_string()]);
    }

    #[test]
    fn test_second_activation_retires_first() {
        let (mut store, first) = activated_store(&["10315"]);

        // Force a distinct id; begin_generation derives it from the clock.
        let mut second = Generation::new(first.created_at + chrono::Duration::seconds(1));
        store
            .conn
            .execute(
                "INSERT INTO generations (id, created_at, state) VALUES (?1, ?2, 'staging')",
                params![second.id, second.created_at],
            )
            .unwrap();
        store
            .conn
            .execute_batch(&format!(
                "CREATE TABLE {} AS SELECT * FROM {} WHERE 0;
                 CREATE TABLE {} AS SELECT * FROM {} WHERE 0;
                 CREATE TABLE {} AS SELECT * FROM {} WHERE 0;
                 CREATE TABLE {} AS SELECT * FROM {} WHERE 0;",
                SqliteStore::places_table(&second.id),
                SqliteStore::places_table(&first.id),
                SqliteStore::readings_table(&second.id),
                SqliteStore::readings_table(&first.id),
                SqliteStore::elements_table(&second.id),
                SqliteStore::elements_table(&first.id),
                SqliteStore::metadata_table(&second.id),
                SqliteStore::metadata_table(&first.id),
            ))
            .unwrap();
        second.state = GenerationState::Staging;
        store
            .insert_place(&second, &sample_place("10999", &[("TTT", 275.0)]))
            .unwrap();
        store
            .insert_run_metadata(&second, &sample_metadata())
            .unwrap();
        store.activate(&second).unwrap();

        // Exactly one generation remains and the first one's tables are
        // gone.
        let listed = store.list_generations().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(store.active_place_count().unwrap(), 1);

        let old_tables = store.generation_tables(PLACES_VIEW).unwrap();
        assert_eq!(old_tables, vec![SqliteStore::places_table(&second.id)]);
    }

    #[test]
    fn test_discard_leaves_active_generation_untouched() {
        let (mut store, first) = activated_store(&["10315"]);

        let mut failed = Generation::new(first.created_at + chrono::Duration::seconds(2));
        store
            .conn
            .execute(
                "INSERT INTO generations (id, created_at, state) VALUES (?1, ?2, 'staging')",
                params![failed.id, failed.created_at],
            )
            .unwrap();
        store
            .conn
            .execute_batch(&format!(
                "CREATE TABLE {} (id TEXT, name TEXT, longitude REAL, latitude REAL,
                                  altitude REAL, inserted_at TEXT);",
                SqliteStore::places_table(&failed.id)
            ))
            .unwrap();
        failed.state = GenerationState::Staging;

        store.discard(&failed).unwrap();

        assert_eq!(store.active_place_count().unwrap(), 1);
        let listed = store.list_generations().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, first.id);
    }

    #[test]
    fn test_rows_outside_validity_window_block_activation() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let generation = store.begin_generation().unwrap();
        store
            .insert_place(&generation, &sample_place("10315", &[("TTT", 280.15)]))
            .unwrap();
        store
            .insert_run_metadata(&generation, &sample_metadata())
            .unwrap();

        // Corrupt one row's timestamp so it falls outside the window.
        store
            .conn
            .execute(
                &format!(
                    "UPDATE {} SET inserted_at = '1999-01-01T00:00:00+00:00'",
                    SqliteStore::places_table(&generation.id)
                ),
                [],
            )
            .unwrap();

        let err = store.activate(&generation).unwrap_err();
        assert!(matches!(err, ProcessingError::Activation(_)));
        // Nothing became visible.
        assert!(!store.has_active_dataset().unwrap());
    }

    #[test]
    fn test_wide_view_rebuild_and_textual_equality() {
        let (mut store, _generation) = activated_store(&["10315"]);

        let variables = vec!["TTT".to_string(), "FF".to_string()];
        assert!(store.rebuild_wide_view(&variables).unwrap());
        // Identical variable set: definition unchanged, no invalidation.
        assert!(!store.rebuild_wide_view(&variables).unwrap());

        let extended = vec!["TTT".to_string(), "FF".to_string(), "PPPP".to_string()];
        assert!(store.rebuild_wide_view(&extended).unwrap());

        // The view actually pivots: one row per (place, timestep).
        let rows: i64 = store
            .conn
            .query_row("SELECT COUNT(*) FROM forecasts_wide", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        let ttt: f64 = store
            .conn
            .query_row("SELECT \"TTT\" FROM forecasts_wide", [], |row| row.get(0))
            .unwrap();
        assert!((ttt - 280.15).abs() < 1e-9);
    }

    #[test]
    fn test_wide_view_skips_unsafe_variable_names() {
        let (mut store, _generation) = activated_store(&["10315"]);
        let variables = vec!["TTT".to_string(), "bad name; --".to_string()];
        assert!(store.rebuild_wide_view(&variables).unwrap());
        let sql: String = store
            .conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'view' AND name = 'forecasts_wide'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(sql.contains("TTT"));
        assert!(!sql.contains("bad name"));
    }

    #[test]
    fn test_element_definitions_round_trip() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let generation = store.begin_generation().unwrap();
        store
            .insert_elements(
                &generation,
                &[ElementDefinition::new(
                    "TTT".to_string(),
                    "Temperature 2m above surface".to_string(),
                    "K".to_string(),
                )],
            )
            .unwrap();
        store
            .insert_place(&generation, &sample_place("10315", &[("TTT", 280.15)]))
            .unwrap();
        store
            .insert_run_metadata(&generation, &sample_metadata())
            .unwrap();
        store.activate(&generation).unwrap();

        let unit: String = store
            .conn
            .query_row(
                "SELECT unit FROM element_definitions WHERE short_name = 'TTT'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(unit, "K");
    }

    #[test]
    fn test_invalid_generation_id_is_rejected() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let bogus = Generation {
            id: "x; DROP TABLE generations".to_string(),
            created_at: Utc::now(),
            state: GenerationState::Staging,
        };
        assert!(store.discard(&bogus).is_err());
    }
}
