//! DataCite metadata validation.
//!
//! Runs before any network call: malformed or structurally incomplete
//! metadata must never reach the registration authority. This is not a
//! full XSD validation - it checks well-formedness and the mandatory
//! top-level elements of the DataCite kernel.

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::types::{MinterError, Result};

/// Mandatory children of the `resource` root in the DataCite kernel
const REQUIRED_ELEMENTS: &[&str] = &[
    "identifier",
    "creators",
    "titles",
    "publisher",
    "publicationYear",
];

/// Validate a DataCite metadata document.
///
/// Fails with `InvalidMetadata` on malformed XML, a root element other
/// than `resource`, or a missing mandatory element.
pub fn validate_metadata(xml: &str) -> Result<()> {
    if xml.trim().is_empty() {
        return Err(MinterError::InvalidMetadata(
            "empty metadata document".to_string(),
        ));
    }

    let mut reader = Reader::from_str(xml);

    let mut depth = 0usize;
    let mut root: Option<String> = None;
    let mut top_level: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Err(e) => {
                return Err(MinterError::InvalidMetadata(format!(
                    "malformed XML at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
            Ok(Event::Start(start)) => {
                let name = local_name(start.name().local_name().as_ref());
                match depth {
                    0 => root = Some(name),
                    1 => top_level.push(name),
                    _ => {}
                }
                depth += 1;
            }
            Ok(Event::Empty(start)) => {
                let name = local_name(start.name().local_name().as_ref());
                match depth {
                    0 => root = Some(name),
                    1 => top_level.push(name),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
        }
    }

    match root.as_deref() {
        None => {
            return Err(MinterError::InvalidMetadata(
                "document has no root element".to_string(),
            ));
        }
        Some("resource") => {}
        Some(other) => {
            return Err(MinterError::InvalidMetadata(format!(
                "root element must be `resource`, found `{other}`"
            )));
        }
    }

    for required in REQUIRED_ELEMENTS {
        if !top_level.iter().any(|name| name == required) {
            return Err(MinterError::InvalidMetadata(format!(
                "missing mandatory element `{required}`"
            )));
        }
    }

    Ok(())
}

fn local_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_VALID: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<resource xmlns="http://datacite.org/schema/kernel-4">
  <identifier identifierType="DOI">10.5072/example</identifier>
  <creators>
    <creator><creatorName>Occurrence Downloads</creatorName></creator>
  </creators>
  <titles><title>Occurrence Download</title></titles>
  <publisher>GBIF</publisher>
  <publicationYear>2024</publicationYear>
</resource>"#;

    #[test]
    fn test_minimal_valid_document() {
        assert!(validate_metadata(MINIMAL_VALID).is_ok());
    }

    #[test]
    fn test_malformed_xml_rejected() {
        let err = validate_metadata("<not-xml").unwrap_err();
        assert!(matches!(err, MinterError::InvalidMetadata(_)));
    }

    #[test]
    fn test_empty_document_rejected() {
        assert!(matches!(
            validate_metadata("   ").unwrap_err(),
            MinterError::InvalidMetadata(_)
        ));
    }

    #[test]
    fn test_wrong_root_rejected() {
        let err = validate_metadata("<dataset><identifier/></dataset>").unwrap_err();
        assert!(matches!(err, MinterError::InvalidMetadata(_)));
    }

    #[test]
    fn test_missing_publisher_rejected() {
        let xml = r#"<resource>
  <identifier identifierType="DOI">10.5072/x</identifier>
  <creators/>
  <titles/>
  <publicationYear>2024</publicationYear>
</resource>"#;
        let err = validate_metadata(xml).unwrap_err();
        match err {
            MinterError::InvalidMetadata(msg) => assert!(msg.contains("publisher")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_namespaced_elements_accepted() {
        let xml = r#"<ns:resource xmlns:ns="http://datacite.org/schema/kernel-4">
  <ns:identifier identifierType="DOI">10.5072/x</ns:identifier>
  <ns:creators/>
  <ns:titles/>
  <ns:publisher>GBIF</ns:publisher>
  <ns:publicationYear>2024</ns:publicationYear>
</ns:resource>"#;
        assert!(validate_metadata(xml).is_ok());
    }
}
