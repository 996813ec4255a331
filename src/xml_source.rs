//! Row-level records as XML.
//!
//! ```xml
//! <records>
//!   <record id="1" discriminator="7">
//!     <attr name="region">North</attr>
//!     <attr name="channel"/>
//!   </record>
//! </records>
//! ```
//!
//! A self-closing `<attr/>` is a null value. Text inside `<attr>` is taken
//! as is, surrounding whitespace included.

use std::fs;
use std::path::Path;

use quick_xml::escape::{escape, resolve_predefined_entity, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use tracing::info;

use crate::error::{FlowError, Result};
use crate::record::Record;

struct Parser<'a> {
    reader: Reader<&'a [u8]>,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl Into<String>) -> FlowError {
        FlowError::Xml {
            position: self.reader.buffer_position() as u64,
            message: message.into(),
        }
    }

    fn attribute(&self, e: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
        let attr = e
            .try_get_attribute(key)
            .map_err(|err| self.error(err.to_string()))?;
        match attr {
            Some(a) => {
                let raw = String::from_utf8_lossy(&a.value).into_owned();
                let value = unescape(&raw).map_err(|err| self.error(err.to_string()))?;
                Ok(Some(value.into_owned()))
            }
            None => Ok(None),
        }
    }

    fn start_record(&self, e: &BytesStart<'_>) -> Result<Record> {
        let id = self
            .attribute(e, "id")?
            .ok_or_else(|| self.error("<record> without id"))?;
        let id: u64 = id
            .trim()
            .parse()
            .map_err(|_| self.error(format!("invalid record id '{id}'")))?;

        let discriminator = match self.attribute(e, "discriminator")? {
            Some(d) => d
                .trim()
                .parse()
                .map_err(|_| self.error(format!("invalid discriminator '{d}'")))?,
            None => 0,
        };
        Ok(Record::new(id, discriminator))
    }

    fn attr_name(&self, e: &BytesStart<'_>, record: &Record) -> Result<String> {
        let name = self
            .attribute(e, "name")?
            .ok_or_else(|| self.error("<attr> without name"))?;
        if record.has_attribute(&name) {
            return Err(self.error(format!(
                "attribute '{name}' repeated in record {}",
                record.id
            )));
        }
        Ok(name)
    }
}

pub fn parse_records(xml: &str) -> Result<Vec<Record>> {
    let mut p = Parser {
        reader: Reader::from_str(xml),
    };

    let mut buf = Vec::new();
    let mut records = Vec::new();
    let mut current: Option<Record> = None;
    // attribute currently open: (name, text collected so far)
    let mut open_attr: Option<(String, String)> = None;

    loop {
        let event = match p.reader.read_event_into(&mut buf) {
            Ok(ev) => ev,
            Err(e) => return Err(p.error(e.to_string())),
        };

        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"record" => {
                    if current.is_some() {
                        return Err(p.error("<record> nested inside <record>"));
                    }
                    current = Some(p.start_record(&e)?);
                }
                b"attr" => {
                    let rec = current
                        .as_ref()
                        .ok_or_else(|| p.error("<attr> outside of <record>"))?;
                    open_attr = Some((p.attr_name(&e, rec)?, String::new()));
                }
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"record" => {
                    if current.is_some() {
                        return Err(p.error("<record> nested inside <record>"));
                    }
                    records.push(p.start_record(&e)?);
                }
                b"attr" => {
                    let rec = current
                        .as_ref()
                        .ok_or_else(|| p.error("<attr> outside of <record>"))?;
                    let name = p.attr_name(&e, rec)?;
                    if let Some(rec) = current.as_mut() {
                        rec.attributes.insert(name, None);
                    }
                }
                _ => {}
            },
            Event::Text(e) => {
                if let Some((_, text)) = open_attr.as_mut() {
                    let decoded = e.decode().map_err(|err| p.error(err.to_string()))?;
                    text.push_str(&decoded);
                }
            }
            Event::GeneralRef(e) => {
                if let Some((_, text)) = open_attr.as_mut() {
                    if let Some(ch) = e.resolve_char_ref().map_err(|err| p.error(err.to_string()))? {
                        text.push(ch);
                    } else {
                        let name = e.decode().map_err(|err| p.error(err.to_string()))?;
                        let resolved = resolve_predefined_entity(&name)
                            .ok_or_else(|| p.error(format!("unknown entity &{name};")))?;
                        text.push_str(resolved);
                    }
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"attr" => {
                    if let (Some((name, text)), Some(rec)) = (open_attr.take(), current.as_mut()) {
                        rec.attributes.insert(name, Some(text));
                    }
                }
                b"record" => {
                    if let Some(rec) = current.take() {
                        records.push(rec);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if current.is_some() {
        return Err(p.error("unterminated <record>"));
    }
    Ok(records)
}

pub fn to_xml(records: &[Record]) -> String {
    let mut xml = String::from("<records>\n");
    for rec in records {
        xml.push_str(&format!(
            "  <record id=\"{}\" discriminator=\"{}\">\n",
            rec.id, rec.discriminator
        ));
        for (name, value) in &rec.attributes {
            match value {
                Some(v) => xml.push_str(&format!(
                    "    <attr name=\"{}\">{}</attr>\n",
                    escape(name.as_str()),
                    escape(v.as_str())
                )),
                None => xml.push_str(&format!("    <attr name=\"{}\"/>\n", escape(name.as_str()))),
            }
        }
        xml.push_str("  </record>\n");
    }
    xml.push_str("</records>\n");
    xml
}

pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let xml = fs::read_to_string(path)?;
    let records = parse_records(&xml)?;
    info!(path = %path.display(), records = records.len(), "read records");
    Ok(records)
}

pub fn write_records(records: &[Record], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, to_xml(records))?;
    info!(path = %path.display(), records = records.len(), "wrote records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nulls_and_values() {
        let xml = r#"
            <records>
              <record id="1" discriminator="7">
                <attr name="region">North</attr>
                <attr name="channel"/>
              </record>
              <record id="2">
                <attr name="region">South &amp; East</attr>
              </record>
            </records>
        "#;
        let records = parse_records(xml).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].discriminator, 7);
        assert_eq!(records[0].get("region"), Some("North"));
        assert!(records[0].has_attribute("channel"));
        assert_eq!(records[0].get("channel"), None);
        assert_eq!(records[1].discriminator, 0);
        assert_eq!(records[1].get("region"), Some("South & East"));
    }

    #[test]
    fn test_written_xml_reads_back() {
        let records = vec![
            Record::new(1, 3).with("a", Some("x<y")).with("b", None),
            Record::new(2, 9).with("a", Some("z")).with("b", Some("w")),
        ];
        assert_eq!(parse_records(&to_xml(&records)).unwrap(), records);
    }

    #[test]
    fn test_padded_values_survive_a_round_trip() {
        let records = vec![
            Record::new(1, 2).with("a", Some(" padded ")).with("b", Some("")),
            Record::new(2, 4).with("a", Some("padded")).with("b", Some(" \t& ")),
        ];
        let back = parse_records(&to_xml(&records)).unwrap();

        assert_eq!(back, records);
        assert_eq!(back[0].get("a"), Some(" padded "));
        assert_ne!(back[0].get("a"), back[1].get("a"));
    }

    #[test]
    fn test_repeated_attr_is_an_error() {
        let xml = r#"<records><record id="1"><attr name="a">x</attr><attr name="a">y</attr></record></records>"#;
        let err = parse_records(xml).unwrap_err();
        assert!(matches!(err, FlowError::Xml { .. }));
        assert!(err.to_string().contains("repeated"));

        let xml = r#"<records><record id="1"><attr name="a"/><attr name="a">y</attr></record></records>"#;
        assert!(parse_records(xml).is_err());
    }

    #[test]
    fn test_nested_record_is_an_error() {
        let xml = r#"<records><record id="1"><record id="2"></record></record></records>"#;
        let err = parse_records(xml).unwrap_err();
        assert!(err.to_string().contains("nested"));

        let xml = r#"<records><record id="1"><record id="2"/></record></records>"#;
        assert!(parse_records(xml).is_err());
    }

    #[test]
    fn test_missing_id_is_an_error() {
        let err = parse_records("<records><record><attr name=\"a\">x</attr></record></records>")
            .unwrap_err();
        assert!(matches!(err, FlowError::Xml { .. }));
        assert!(err.to_string().contains("without id"));
    }

    #[test]
    fn test_bad_number_and_unterminated() {
        assert!(parse_records("<records><record id=\"abc\"/></records>").is_err());
        assert!(parse_records("<records><record id=\"1\">").is_err());
    }
}
