use crate::error::{ProcessingError, Result};
use crate::models::{Position, ProductInfo, ReferencedModel};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;
use tracing::warn;

/// One variable of a placemark, with its whitespace-joined positional value
/// string still undecoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVariable {
    pub name: String,
    pub raw_values: String,
}

/// A placemark as it appears in the document, before positional decoding.
#[derive(Debug, Clone)]
pub struct RawPlacemark {
    pub id: String,
    pub name: String,
    pub position: Position,
    pub variables: Vec<RawVariable>,
}

/// Typed events produced by the streaming bulletin parser.
#[derive(Debug, Clone)]
pub enum BulletinEvent {
    Product(ProductInfo),
    Placemark(RawPlacemark),
}

/// Single-pass pull parser over a MOSMIX KML byte stream.
///
/// Recognizes the ProductDefinition element and each Placemark; everything
/// else is skipped without buffering, so memory use is bounded by the size
/// of one element rather than the document. Character encodings declared in
/// the XML prolog are honored.
pub struct BulletinReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

impl<R: BufRead> BulletinReader<R> {
    pub fn from_reader(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);
        reader.expand_empty_elements(false);
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Advance to the next recognized element. Returns `None` at end of
    /// stream.
    pub fn next_event(&mut self) -> Result<Option<BulletinEvent>> {
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)?.into_owned() {
                Event::Start(ref start) => match start.local_name().as_ref() {
                    b"ProductDefinition" => {
                        let product = self.read_product()?;
                        return Ok(Some(BulletinEvent::Product(product)));
                    }
                    b"Placemark" => {
                        let placemark = self.read_placemark()?;
                        return Ok(Some(BulletinEvent::Placemark(placemark)));
                    }
                    _ => {}
                },
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    fn read_product(&mut self) -> Result<ProductInfo> {
        let mut product = ProductInfo::default();

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)?.into_owned() {
                Event::Start(ref start) => match start.local_name().as_ref() {
                    b"Issuer" => product.issuer = self.read_text()?,
                    b"ProductID" => product.product_id = self.read_text()?,
                    b"GeneratingProcess" => product.generating_process = self.read_text()?,
                    b"DefaultUndefSign" => product.default_undef_sign = self.read_text()?,
                    b"TimeStep" => {
                        let raw = self.read_text()?;
                        product.timesteps.push(parse_timestep(&raw)?);
                    }
                    b"Model" => {
                        if let Some(model) = self.read_referenced_model(start)? {
                            product.referenced_models.push(model);
                        }
                    }
                    _ => {}
                },
                Event::Empty(ref start) => {
                    if start.local_name().as_ref() == b"Model" {
                        if let Some(model) = self.read_referenced_model(start)? {
                            product.referenced_models.push(model);
                        }
                    }
                }
                Event::End(ref end) if end.local_name().as_ref() == b"ProductDefinition" => break,
                Event::Eof => {
                    return Err(ProcessingError::MalformedRecord(
                        "document ended inside ProductDefinition".to_string(),
                    ))
                }
                _ => {}
            }
        }

        Ok(product)
    }

    fn read_placemark(&mut self) -> Result<RawPlacemark> {
        let mut id = String::new();
        let mut name = String::new();
        let mut position = None;
        let mut variables = Vec::new();

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)?.into_owned() {
                Event::Start(ref start) => match start.local_name().as_ref() {
                    b"name" => id = self.read_text()?,
                    b"description" => name = self.read_text()?,
                    b"coordinates" => {
                        let raw = self.read_text()?;
                        position = Some(parse_coordinates(&raw)?);
                    }
                    b"Forecast" => {
                        let element_name = self.attribute_value(start, b"elementName")?;
                        let raw_values = self.read_forecast_values()?;
                        if let Some(element_name) = element_name {
                            variables.push(RawVariable {
                                name: element_name,
                                raw_values,
                            });
                        } else {
                            warn!("Forecast element without elementName attribute, skipping");
                        }
                    }
                    _ => {}
                },
                Event::End(ref end) if end.local_name().as_ref() == b"Placemark" => break,
                Event::Eof => {
                    return Err(ProcessingError::MalformedRecord(
                        "document ended inside Placemark".to_string(),
                    ))
                }
                _ => {}
            }
        }

        let position = position.ok_or_else(|| {
            ProcessingError::MalformedRecord(format!("placemark '{}' has no coordinates", id))
        })?;

        Ok(RawPlacemark {
            id,
            name,
            position,
            variables,
        })
    }

    /// Read the value text of a Forecast element, consuming up to its end
    /// tag.
    fn read_forecast_values(&mut self) -> Result<String> {
        let mut raw_values = String::new();
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)?.into_owned() {
                Event::Start(ref start) if start.local_name().as_ref() == b"value" => {
                    raw_values = self.read_text()?;
                }
                Event::End(ref end) if end.local_name().as_ref() == b"Forecast" => break,
                Event::Eof => {
                    return Err(ProcessingError::MalformedRecord(
                        "document ended inside Forecast".to_string(),
                    ))
                }
                _ => {}
            }
        }
        Ok(raw_values)
    }

    /// Collect the text content of the current element, consuming its end
    /// tag.
    fn read_text(&mut self) -> Result<String> {
        let mut text = String::new();
        let mut depth = 0usize;
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)?.into_owned() {
                Event::Text(ref t) => {
                    let decoded = self.reader.decoder().decode(t.as_ref())?;
                    let unescaped =
                        quick_xml::escape::unescape(&decoded).map_err(quick_xml::Error::from)?;
                    text.push_str(&unescaped);
                }
                Event::CData(ref t) => {
                    let decoded = self.reader.decoder().decode(t.as_ref())?;
                    text.push_str(&decoded);
                }
                Event::Start(_) => depth += 1,
                Event::End(_) => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                }
                Event::Eof => {
                    return Err(ProcessingError::MalformedRecord(
                        "document ended inside element text".to_string(),
                    ))
                }
                _ => {}
            }
        }
        Ok(text.trim().to_string())
    }

    fn attribute_value(&self, start: &BytesStart<'_>, local: &[u8]) -> Result<Option<String>> {
        for attribute in start.attributes() {
            let attribute = attribute.map_err(quick_xml::Error::from)?;
            if attribute.key.local_name().as_ref() == local {
                let value = attribute.decode_and_unescape_value(&self.reader)?;
                return Ok(Some(value.into_owned()));
            }
        }
        Ok(None)
    }

    fn read_referenced_model(&self, start: &BytesStart<'_>) -> Result<Option<ReferencedModel>> {
        let name = self.attribute_value(start, b"name")?;
        let reference_time = self.attribute_value(start, b"referenceTime")?;
        match (name, reference_time) {
            (Some(name), Some(raw)) => Ok(Some(ReferencedModel {
                name,
                reference_time: parse_timestep(&raw)?,
            })),
            _ => {
                warn!("referenced model without name/referenceTime attributes, skipping");
                Ok(None)
            }
        }
    }
}

fn parse_timestep(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ProcessingError::MalformedRecord(format!("invalid timestep '{}'", raw)))
}

/// Parse a KML coordinate triple "lon,lat,altitude".
///
/// Wrong arity is a structural violation; a component that fails to parse
/// as a float degrades to 0.0 with a warning, matching the per-record
/// leniency the rest of the pipeline relies on.
fn parse_coordinates(raw: &str) -> Result<Position> {
    let parts: Vec<&str> = raw.split(',').map(|p| p.trim()).collect();
    if parts.len() != 3 {
        return Err(ProcessingError::MalformedRecord(format!(
            "expected 3 coordinate parts, got {} in '{}'",
            parts.len(),
            raw
        )));
    }

    let mut components = [0.0f64; 3];
    for (i, part) in parts.iter().enumerate() {
        match part.parse::<f64>() {
            Ok(value) => components[i] = value,
            Err(_) => {
                warn!(
                    coordinate = *part,
                    triple = raw,
                    "coordinate component cannot be parsed as float, defaulting to 0"
                );
            }
        }
    }

    Ok(Position {
        longitude: components[0],
        latitude: components[1],
        altitude: components[2],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml:kml xmlns:dwd="https://opendata.dwd.de/weather/lib/pointforecast_dwd_extension_V1_0.xsd" xmlns:kml="http://www.opengis.net/kml/2.2">
<kml:Document>
<kml:ExtendedData>
<dwd:ProductDefinition>
<dwd:Issuer>Deutscher Wetterdienst</dwd:Issuer>
<dwd:ProductID>MOSMIX</dwd:ProductID>
<dwd:GeneratingProcess>DWD MOSMIX hourly</dwd:GeneratingProcess>
<dwd:FormatCfg>
<dwd:DefaultUndefSign>-</dwd:DefaultUndefSign>
</dwd:FormatCfg>
<dwd:ForecastTimeSteps>
<dwd:TimeStep>2024-01-01T00:00:00.000Z</dwd:TimeStep>
<dwd:TimeStep>2024-01-01T01:00:00.000Z</dwd:TimeStep>
<dwd:TimeStep>2024-01-01T02:00:00.000Z</dwd:TimeStep>
</dwd:ForecastTimeSteps>
<dwd:ReferencedModel>
<dwd:Model dwd:name="ICON" dwd:referenceTime="2023-12-31T18:00:00.000Z"/>
</dwd:ReferencedModel>
</dwd:ProductDefinition>
</kml:ExtendedData>
<kml:Placemark>
<kml:name>10315</kml:name>
<kml:description>MUENSTER/OSNABR.</kml:description>
<kml:ExtendedData>
<dwd:Forecast dwd:elementName="TTT">
<dwd:value>270.05 - 271.15</dwd:value>
</dwd:Forecast>
</kml:ExtendedData>
<kml:Point>
<kml:coordinates>7.70,52.13,48.0</kml:coordinates>
</kml:Point>
</kml:Placemark>
<kml:Placemark>
<kml:name>10515</kml:name>
<kml:description>BENDORF</kml:description>
<kml:ExtendedData>
<dwd:Forecast dwd:elementName="TTT">
<dwd:value>272.45 272.95 273.15</dwd:value>
</dwd:Forecast>
</kml:ExtendedData>
<kml:Point>
<kml:coordinates>7.57,50.42,110.0</kml:coordinates>
</kml:Point>
</kml:Placemark>
</kml:Document>
</kml:kml>"#;

    fn collect_events(xml: &[u8]) -> Vec<BulletinEvent> {
        let mut reader = BulletinReader::from_reader(xml);
        let mut events = Vec::new();
        while let Some(event) = reader.next_event().unwrap() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_parse_product_definition() {
        let events = collect_events(SAMPLE.as_bytes());
        assert_eq!(events.len(), 3);

        let product = match &events[0] {
            BulletinEvent::Product(p) => p,
            other => panic!("expected product event, got {:?}", other),
        };
        assert_eq!(product.issuer, "Deutscher Wetterdienst");
        assert_eq!(product.product_id, "MOSMIX");
        assert_eq!(product.generating_process, "DWD MOSMIX hourly");
        assert_eq!(product.default_undef_sign, "-");
        assert_eq!(product.timesteps.len(), 3);
        assert_eq!(product.referenced_models.len(), 1);
        assert_eq!(product.referenced_models[0].name, "ICON");
    }

    #[test]
    fn test_parse_placemarks() {
        let events = collect_events(SAMPLE.as_bytes());

        let first = match &events[1] {
            BulletinEvent::Placemark(p) => p,
            other => panic!("expected placemark event, got {:?}", other),
        };
        assert_eq!(first.id, "10315");
        assert_eq!(first.name, "MUENSTER/OSNABR.");
        assert!((first.position.longitude - 7.70).abs() < 1e-9);
        assert!((first.position.latitude - 52.13).abs() < 1e-9);
        assert_eq!(first.variables.len(), 1);
        assert_eq!(first.variables[0].name, "TTT");
        assert_eq!(first.variables[0].raw_values, "270.05 - 271.15");

        let second = match &events[2] {
            BulletinEvent::Placemark(p) => p,
            other => panic!("expected placemark event, got {:?}", other),
        };
        assert_eq!(second.id, "10515");
        assert_eq!(second.variables[0].raw_values, "272.45 272.95 273.15");
    }

    #[test]
    fn test_unknown_elements_are_skipped() {
        let xml = r#"<?xml version="1.0"?>
<kml><Document>
<Style><Icon><href>ignored</href></Icon></Style>
<Placemark>
<name>X1</name>
<description>Somewhere</description>
<ExtendedData></ExtendedData>
<Point><coordinates>1.0,2.0,3.0</coordinates></Point>
</Placemark>
</Document></kml>"#;
        let events = collect_events(xml.as_bytes());
        assert_eq!(events.len(), 1);
        match &events[0] {
            BulletinEvent::Placemark(p) => {
                assert_eq!(p.id, "X1");
                assert!(p.variables.is_empty());
            }
            other => panic!("expected placemark event, got {:?}", other),
        }
    }

    #[test]
    fn test_declared_encoding_is_honored() {
        // Latin-1 document with a u-umlaut (0xFC) in the description.
        let mut xml: Vec<u8> = Vec::new();
        xml.extend_from_slice(b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?>");
        xml.extend_from_slice(b"<kml><Placemark><name>E001</name><description>M\xFCnster</description>");
        xml.extend_from_slice(b"<Point><coordinates>7.6,51.9,60.0</coordinates></Point></Placemark></kml>");

        let events = collect_events(&xml);
        match &events[0] {
            BulletinEvent::Placemark(p) => assert_eq!(p.name, "Münster"),
            other => panic!("expected placemark event, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_coordinate_arity_is_malformed() {
        let xml = r#"<kml><Placemark><name>X</name>
<Point><coordinates>1.0,2.0</coordinates></Point></Placemark></kml>"#;
        let mut reader = BulletinReader::from_reader(xml.as_bytes());
        let err = reader.next_event().unwrap_err();
        assert!(matches!(err, ProcessingError::MalformedRecord(_)));
    }

    #[test]
    fn test_unparseable_coordinate_component_defaults() {
        let xml = r#"<kml><Placemark><name>X</name>
<Point><coordinates>abc,2.0,3.0</coordinates></Point></Placemark></kml>"#;
        let events = collect_events(xml.as_bytes());
        match &events[0] {
            BulletinEvent::Placemark(p) => {
                assert_eq!(p.position.longitude, 0.0);
                assert!((p.position.latitude - 2.0).abs() < 1e-9);
            }
            other => panic!("expected placemark event, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_coordinates_is_malformed() {
        let xml = r#"<kml><Placemark><name>X</name></Placemark></kml>"#;
        let mut reader = BulletinReader::from_reader(xml.as_bytes());
        let err = reader.next_event().unwrap_err();
        assert!(matches!(err, ProcessingError::MalformedRecord(_)));
    }

    #[test]
    fn test_truncated_document_is_malformed() {
        let xml = r#"<kml><Placemark><name>X</name>"#;
        let mut reader = BulletinReader::from_reader(xml.as_bytes());
        assert!(reader.next_event().is_err());
    }
}
