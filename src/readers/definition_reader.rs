use crate::error::{ProcessingError, Result};
use crate::models::ElementDefinition;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::io::BufRead;

/// Streaming decoder for the MetElementDefinition catalog feed.
///
/// Structurally the same machinery as the bulletin parser: one MetElement
/// at a time, nothing else buffered.
pub struct DefinitionReader<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
}

impl<R: BufRead> DefinitionReader<R> {
    pub fn from_reader(source: R) -> Self {
        let mut reader = Reader::from_reader(source);
        reader.trim_text(true);
        Self {
            reader,
            buf: Vec::new(),
        }
    }

    /// Next catalog entry, or `None` at end of stream.
    pub fn next_element(&mut self) -> Result<Option<ElementDefinition>> {
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)?.into_owned() {
                Event::Start(ref start) if start.local_name().as_ref() == b"MetElement" => {
                    return self.read_element().map(Some);
                }
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }

    /// Drain the stream into a vector.
    pub fn read_all(&mut self) -> Result<Vec<ElementDefinition>> {
        let mut elements = Vec::new();
        while let Some(element) = self.next_element()? {
            elements.push(element);
        }
        Ok(elements)
    }

    fn read_element(&mut self) -> Result<ElementDefinition> {
        let mut short_name = String::new();
        let mut description = String::new();
        let mut unit = String::new();

        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)?.into_owned() {
                Event::Start(ref start) => match start.local_name().as_ref() {
                    b"ShortName" => short_name = self.read_text()?,
                    b"Description" => description = self.read_text()?,
                    b"UnitOfMeasurement" => unit = self.read_text()?,
                    _ => {}
                },
                Event::End(ref end) if end.local_name().as_ref() == b"MetElement" => break,
                Event::Eof => {
                    return Err(ProcessingError::MalformedRecord(
                        "document ended inside MetElement".to_string(),
                    ))
                }
                _ => {}
            }
        }

        if short_name.is_empty() {
            return Err(ProcessingError::MalformedRecord(
                "MetElement without ShortName".to_string(),
            ));
        }

        Ok(ElementDefinition::new(short_name, description, unit))
    }

    fn read_text(&mut self) -> Result<String> {
        let mut text = String::new();
        loop {
            self.buf.clear();
            match self.reader.read_event_into(&mut self.buf)?.into_owned() {
                Event::Text(ref t) => {
                    let decoded = self.reader.decoder().decode(t.as_ref())?;
                    let unescaped =
                        quick_xml::escape::unescape(&decoded).map_err(quick_xml::Error::from)?;
                    text.push_str(&unescaped);
                }
                Event::End(_) => break,
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
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MetElementDefinition xmlns="https://opendata.dwd.de/weather/lib/MetElementDefinition.xsd">
<MetElement>
<ShortName>TTT</ShortName>
<UnitOfMeasurement>K</UnitOfMeasurement>
<Description>Temperature 2m above surface</Description>
</MetElement>
<MetElement>
<ShortName>FF</ShortName>
<UnitOfMeasurement>m/s</UnitOfMeasurement>
<Description>Wind speed</Description>
</MetElement>
</MetElementDefinition>"#;

    #[test]
    fn test_read_all_elements() {
        let mut reader = DefinitionReader::from_reader(SAMPLE.as_bytes());
        let elements = reader.read_all().unwrap();

        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].short_name, "TTT");
        assert_eq!(elements[0].unit, "K");
        assert_eq!(elements[0].description, "Temperature 2m above surface");
        assert_eq!(elements[1].short_name, "FF");
    }

    #[test]
    fn test_element_without_short_name_is_malformed() {
        let xml = r#"<MetElementDefinition><MetElement>
<Description>orphan</Description>
</MetElement></MetElementDefinition>"#;
        let mut reader = DefinitionReader::from_reader(xml.as_bytes());
        assert!(reader.next_element().is_err());
    }

    #[test]
    fn test_empty_catalog() {
        let xml = r#"<MetElementDefinition></MetElementDefinition>"#;
        let mut reader = DefinitionReader::from_reader(xml.as_bytes());
        assert!(reader.read_all().unwrap().is_empty());
    }
}
