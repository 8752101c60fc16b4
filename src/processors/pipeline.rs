use crate::error::{ProcessingError, Result};
use crate::fetch::{extract_kml, Fetcher};
use crate::readers::{BulletinEvent, BulletinReader, DefinitionReader, MetadataAccumulator};
use crate::storage::{Generation, GenerationStore};
use crate::utils::constants::DEFAULT_BUFFER_SIZE;
use crate::utils::ProgressReporter;
use crate::writers::{ForecastWriter, ViewBuilder};
use std::fs::File;
use std::io::BufReader;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What a run should ingest and how.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Bulletin source: URL or local path, `.kmz` or plain `.kml`.
    pub source: String,
    /// Optional variable-definition catalog source. `None` skips the
    /// catalog step entirely.
    pub catalog: Option<String>,
    /// Abort on value strings whose token count disagrees with the
    /// timestep calendar instead of truncating.
    pub strict_values: bool,
    pub silent: bool,
}

/// Row counts and timings of a completed run.
#[derive(Debug)]
pub struct IngestReport {
    pub generation: Generation,
    pub places: u64,
    pub readings: u64,
    pub variables: usize,
    pub element_definitions: usize,
    pub download_duration: Duration,
    pub parse_duration: Duration,
    pub wide_view_changed: bool,
}

/// One full bulletin run: fetch, stream-parse, stage, activate.
///
/// Every failure before activation discards the staging generation and
/// leaves the previously active dataset untouched.
pub struct Pipeline {
    fetcher: Fetcher,
}

impl Pipeline {
    pub fn new() -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new()?,
        })
    }

    pub async fn run<S: GenerationStore>(
        &self,
        store: &mut S,
        options: &IngestOptions,
    ) -> Result<IngestReport> {
        let work_dir = tempfile::tempdir()?;

        let mut writer = ForecastWriter::begin(store)?;
        let generation_id = writer.generation().id.clone();
        info!(
            generation = generation_id.as_str(),
            source = options.source.as_str(),
            "run started"
        );

        match self
            .run_staged(&mut writer, options, work_dir.path())
            .await
        {
            Ok((element_definitions, download_duration, parse_duration, variables)) => {
                let places = writer.places_written();
                let readings = writer.readings_written();
                let generation = writer.activate()?;

                // The dataset is live; view maintenance failures only cost
                // the convenience surface.
                let wide_view_changed = ViewBuilder::rebuild(store, &variables);

                info!(
                    generation = generation.id.as_str(),
                    places,
                    readings,
                    "run complete"
                );
                Ok(IngestReport {
                    generation,
                    places,
                    readings,
                    variables: variables.len(),
                    element_definitions,
                    download_duration,
                    parse_duration,
                    wide_view_changed,
                })
            }
            Err(e) => {
                error!(
                    generation = generation_id.as_str(),
                    error = %e,
                    "run failed, discarding staging generation"
                );
                if let Err(cleanup) = writer.discard() {
                    warn!(error = %cleanup, "staging cleanup failed");
                }
                Err(e)
            }
        }
    }

    /// Everything that happens while the generation is still invisible.
    async fn run_staged<S: GenerationStore>(
        &self,
        writer: &mut ForecastWriter<'_, S>,
        options: &IngestOptions,
        work_dir: &std::path::Path,
    ) -> Result<(usize, Duration, Duration, Vec<String>)> {
        let element_definitions = match &options.catalog {
            Some(catalog) => self.ingest_catalog(writer, catalog, work_dir).await?,
            None => 0,
        };

        let progress = ProgressReporter::new_spinner("Downloading bulletin", options.silent);
        let (bulletin_path, download_duration) =
            self.fetcher.fetch(&options.source, work_dir).await?;
        let kml_path = extract_kml(&bulletin_path, work_dir)?;
        progress.finish_with_message("Bulletin downloaded");

        let progress = ProgressReporter::new_spinner("Parsing bulletin", options.silent);
        let parse_started = Instant::now();

        let file = File::open(&kml_path)?;
        let mut reader = BulletinReader::from_reader(BufReader::with_capacity(
            DEFAULT_BUFFER_SIZE,
            file,
        ));
        let mut accumulator = MetadataAccumulator::new(options.strict_values);

        while let Some(event) = reader.next_event()? {
            match event {
                BulletinEvent::Product(product) => accumulator.record_product(product),
                BulletinEvent::Placemark(raw) => {
                    let place = accumulator.decode_placemark(raw)?;
                    writer.write_place(&place)?;
                    if writer.places_written() % 100 == 0 {
                        progress.set_message(&format!(
                            "Parsing bulletin ({} places)",
                            writer.places_written()
                        ));
                    }
                }
            }
        }

        let parse_duration = parse_started.elapsed();
        let variables = accumulator.variables().to_vec();
        let metadata = accumulator.into_run_metadata(
            options.source.clone(),
            download_duration,
            parse_duration,
        )?;
        writer.write_run_metadata(&metadata)?;

        progress.finish_with_message(&format!(
            "Parsed {} places, {} readings",
            writer.places_written(),
            writer.readings_written()
        ));

        Ok((
            element_definitions,
            download_duration,
            parse_duration,
            variables,
        ))
    }

    async fn ingest_catalog<S: GenerationStore>(
        &self,
        writer: &mut ForecastWriter<'_, S>,
        catalog: &str,
        work_dir: &std::path::Path,
    ) -> Result<usize> {
        let (path, _) = self.fetcher.fetch(catalog, work_dir).await?;
        let file = File::open(&path)?;
        let mut reader = DefinitionReader::from_reader(BufReader::new(file));
        let elements = reader.read_all()?;

        if elements.is_empty() {
            return Err(ProcessingError::MalformedRecord(
                "variable definition catalog contained no entries".to_string(),
            ));
        }

        writer.write_elements(&elements)?;
        Ok(elements.len())
    }
}
