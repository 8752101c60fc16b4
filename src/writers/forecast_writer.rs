use crate::error::Result;
use crate::models::{ElementDefinition, ForecastPlace, RunMetadata};
use crate::storage::{Generation, GenerationStore};
use tracing::{debug, warn};

/// Append-side wrapper around a staging generation.
///
/// Tracks row counts so the pipeline can report what a run produced. Every
/// write error is fatal to the run: a generation with silently missing rows
/// must never be activated.
pub struct ForecastWriter<'a, S: GenerationStore> {
    store: &'a mut S,
    generation: Generation,
    places_written: u64,
    readings_written: u64,
}

impl<'a, S: GenerationStore> ForecastWriter<'a, S> {
    pub fn begin(store: &'a mut S) -> Result<Self> {
        let generation = store.begin_generation()?;
        Ok(Self {
            store,
            generation,
            places_written: 0,
            readings_written: 0,
        })
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn places_written(&self) -> u64 {
        self.places_written
    }

    pub fn readings_written(&self) -> u64 {
        self.readings_written
    }

    pub fn write_place(&mut self, place: &ForecastPlace) -> Result<()> {
        self.store.insert_place(&self.generation, place)?;
        self.places_written += 1;
        self.readings_written += place.readings.len() as u64;
        Ok(())
    }

    pub fn write_elements(&mut self, elements: &[ElementDefinition]) -> Result<()> {
        debug!(count = elements.len(), "writing element definitions");
        self.store.insert_elements(&self.generation, elements)
    }

    pub fn write_run_metadata(&mut self, metadata: &RunMetadata) -> Result<()> {
        self.store.insert_run_metadata(&self.generation, metadata)
    }

    /// Publish the generation. Consumes the writer; afterwards the staged
    /// rows are the dataset readers see. The activation transaction rolls
    /// back on failure, so the staging tables still exist then; they are
    /// discarded before the error propagates.
    pub fn activate(self) -> Result<Generation> {
        match self.store.activate(&self.generation) {
            Ok(()) => Ok(self.generation),
            Err(e) => {
                if let Err(cleanup) = self.store.discard(&self.generation) {
                    warn!(
                        generation = self.generation.id.as_str(),
                        error = %cleanup,
                        "staging cleanup after failed activation failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Tear down the staging area after a failed run.
    pub fn discard(self) -> Result<()> {
        self.store.discard(&self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProcessingError;
    use crate::models::{Position, VariableReading};
    use crate::storage::SqliteStore;
    use chrono::{TimeZone, Utc};

    fn place_with_readings(id: &str, count: usize) -> ForecastPlace {
        let mut place = ForecastPlace::new(
            id.to_string(),
            format!("Station {}", id),
            Position {
                longitude: 7.63,
                latitude: 51.96,
                altitude: 60.0,
            },
        );
        for i in 0..count {
            place.readings.push(VariableReading {
                variable: "TTT".to_string(),
                timestep: Utc.with_ymd_and_hms(2024, 1, 1, i as u32, 0, 0).unwrap(),
                value: 280.0 + i as f64,
            });
        }
        place
    }

    #[test]
    fn test_writer_counts_rows() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut writer = ForecastWriter::begin(&mut store).unwrap();

        writer.write_place(&place_with_readings("10315", 3)).unwrap();
        writer.write_place(&place_with_readings("10515", 2)).unwrap();

        assert_eq!(writer.places_written(), 2);
        assert_eq!(writer.readings_written(), 5);
    }

    #[test]
    fn test_discard_removes_staging() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let writer = ForecastWriter::begin(&mut store).unwrap();
        writer.discard().unwrap();

        assert!(store.list_generations().unwrap().is_empty());
    }

    /// Store whose activation always fails after staging succeeded.
    struct FailingActivation {
        inner: SqliteStore,
    }

    impl GenerationStore for FailingActivation {
        fn begin_generation(&mut self) -> Result<Generation> {
            self.inner.begin_generation()
        }

        fn insert_place(&mut self, generation: &Generation, place: &ForecastPlace) -> Result<()> {
            self.inner.insert_place(generation, place)
        }

        fn insert_elements(
            &mut self,
            generation: &Generation,
            elements: &[crate::models::ElementDefinition],
        ) -> Result<()> {
            self.inner.insert_elements(generation, elements)
        }

        fn insert_run_metadata(
            &mut self,
            generation: &Generation,
            metadata: &crate::models::RunMetadata,
        ) -> Result<()> {
            self.inner.insert_run_metadata(generation, metadata)
        }

        fn activate(&mut self, _generation: &Generation) -> Result<()> {
            Err(ProcessingError::Activation("index build failed".to_string()))
        }

        fn rebuild_wide_view(&mut self, variables: &[String]) -> Result<bool> {
            self.inner.rebuild_wide_view(variables)
        }

        fn list_generations(&self) -> Result<Vec<Generation>> {
            self.inner.list_generations()
        }

        fn discard(&mut self, generation: &Generation) -> Result<()> {
            self.inner.discard(generation)
        }
    }

    #[test]
    fn test_failed_activation_discards_staging() {
        let mut store = FailingActivation {
            inner: SqliteStore::open_in_memory().unwrap(),
        };
        let mut writer = ForecastWriter::begin(&mut store).unwrap();
        writer.write_place(&place_with_readings("10315", 3)).unwrap();

        let err = writer.activate().unwrap_err();
        assert!(matches!(err, ProcessingError::Activation(_)));

        // No staging generation or tables survive the failed activation.
        assert!(store.inner.list_generations().unwrap().is_empty());
        assert!(!store.inner.has_active_dataset().unwrap());
    }
}
