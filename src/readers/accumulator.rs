use crate::error::{ProcessingError, Result};
use crate::models::{ForecastPlace, ProductInfo, RunMetadata, VariableReading};
use crate::readers::bulletin_reader::RawPlacemark;
use std::time::Duration;
use tracing::warn;
use validator::Validate;

/// Run-scoped collector for the facts that are only fully known partway
/// through (or at the end of) the document.
///
/// One accumulator exists per run and is passed explicitly alongside each
/// decoded record; it owns the timestep calendar needed to decode placemark
/// value strings and the growing set of observed variable names.
pub struct MetadataAccumulator {
    product: Option<ProductInfo>,
    variables: Vec<String>,
    strict_values: bool,
}

impl MetadataAccumulator {
    /// `strict_values` controls the positional-decode contract: when true
    /// (the default pipeline setting), a variable whose token count differs
    /// from the calendar length aborts the run; when false the shorter
    /// length wins, matching the historical behavior of the feed.
    pub fn new(strict_values: bool) -> Self {
        Self {
            product: None,
            variables: Vec::new(),
            strict_values,
        }
    }

    /// Record the run-global product metadata. The calendar is fixed by the
    /// first ProductDefinition; later ones are ignored with a warning.
    pub fn record_product(&mut self, product: ProductInfo) {
        if self.product.is_some() {
            warn!("additional ProductDefinition encountered, keeping the first");
            return;
        }
        self.product = Some(product);
    }

    pub fn product(&self) -> Option<&ProductInfo> {
        self.product.as_ref()
    }

    /// Distinct variable names observed so far, in first occurrence order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Decode a raw placemark against the run's timestep calendar.
    ///
    /// Tokens equal to the declared undefined sentinel are dropped, not
    /// stored. Tokens that fail to parse as numbers are skipped with a
    /// warning; structural violations (no calendar yet, token count
    /// mismatch in strict mode) abort with `MalformedRecord`.
    pub fn decode_placemark(&mut self, raw: RawPlacemark) -> Result<ForecastPlace> {
        let product = self.product.as_ref().ok_or_else(|| {
            ProcessingError::MalformedRecord(format!(
                "placemark '{}' encountered before ProductDefinition",
                raw.id
            ))
        })?;

        if let Err(e) = raw.position.validate() {
            warn!(
                place = raw.id.as_str(),
                error = %e,
                "placemark position outside WGS84 bounds"
            );
        }

        let mut place = ForecastPlace::new(raw.id, raw.name, raw.position);

        for variable in raw.variables {
            let tokens: Vec<&str> = variable.raw_values.split_whitespace().collect();

            if self.strict_values && tokens.len() != product.timesteps.len() {
                return Err(ProcessingError::MalformedRecord(format!(
                    "place '{}' variable '{}': {} value tokens for {} timesteps",
                    place.id,
                    variable.name,
                    tokens.len(),
                    product.timesteps.len()
                )));
            }

            for (token, timestep) in tokens.iter().zip(product.timesteps.iter()) {
                if *token == product.default_undef_sign {
                    continue;
                }
                match token.parse::<f64>() {
                    Ok(value) => place.readings.push(VariableReading {
                        variable: variable.name.clone(),
                        timestep: *timestep,
                        value,
                    }),
                    Err(_) => {
                        warn!(
                            place = place.id.as_str(),
                            variable = variable.name.as_str(),
                            token = *token,
                            "value token cannot be parsed as float, skipping"
                        );
                    }
                }
            }

            if !self.variables.contains(&variable.name) {
                self.variables.push(variable.name);
            }
        }

        Ok(place)
    }

    /// Final run metadata once the stream is exhausted.
    pub fn into_run_metadata(
        self,
        source_url: String,
        download_duration: Duration,
        parse_duration: Duration,
    ) -> Result<RunMetadata> {
        let product = self.product.ok_or_else(|| {
            ProcessingError::MalformedRecord(
                "document contained no ProductDefinition".to_string(),
            )
        })?;

        Ok(RunMetadata {
            source_url,
            download_duration_ms: download_duration.as_millis() as i64,
            parse_duration_ms: parse_duration.as_millis() as i64,
            parser: RunMetadata::parser_name(),
            issuer: product.issuer,
            product_id: product.product_id,
            generating_process: product.generating_process,
            available_variables: self.variables,
            timesteps: product.timesteps,
            referenced_models: product.referenced_models,
        })
    }
}
