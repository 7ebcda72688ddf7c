//! Normalizes the XML output of batch queries into flat [`RawRecord`]s.
//!
//! The expected shape is a ClassAd list:
//!
//! ```xml
//! <?xml version="1.0"?>
//! <!DOCTYPE classads SYSTEM "classads.dtd">
//! <classads>
//! <c>
//!     <a n="JobStatus"><i>2</i></a>
//!     <a n="Owner"><s>pilot</s></a>
//!     <a n="IsCloud"><b v="t"/></a>
//! </c>
//! </classads>
//! ```
//!
//! Attributes whose leaf has no content are left out of the record.
use roxmltree::{Document, Node, ParsingOptions};

use crate::batch::records::RawRecord;
use crate::common::error::FactoryError;

const XML_PROLOG: &str = "<?xml";

/// Returns true if the output looks like (the start of) an XML response.
pub fn is_xml_response(output: &str) -> bool {
    output.trim_start().starts_with(XML_PROLOG)
}

/// Splits a response into individual XML documents.
///
/// Some queries fan out over several pools and return one document per pool, concatenated.
pub fn split_documents(output: &str) -> Vec<&str> {
    let output = output.trim();
    let mut starts: Vec<usize> = output.match_indices(XML_PROLOG).map(|(i, _)| i).collect();
    if starts.first() != Some(&0) {
        // Leading data before the first prolog (or no prolog at all) is kept as a document
        starts.insert(0, 0);
    }
    starts
        .iter()
        .enumerate()
        .map(|(index, &start)| {
            let end = starts.get(index + 1).copied().unwrap_or(output.len());
            output[start..end].trim()
        })
        .filter(|document| !document.is_empty())
        .collect()
}

/// Parses one logical response (one or more concatenated documents) into records.
///
/// A response without any XML document is an error, an empty listing still has a prolog and
/// an empty root element.
pub fn parse_records(output: &str) -> crate::Result<Vec<RawRecord>> {
    let documents = split_documents(output);
    if !documents.iter().any(|document| is_xml_response(document)) {
        return Err(FactoryError::ParseFailed(format!(
            "response contains no XML document: {:?}",
            output.trim()
        )));
    }
    let mut records = Vec::new();
    for (index, document) in documents.into_iter().enumerate() {
        let document = Document::parse_with_options(
            document,
            ParsingOptions {
                allow_dtd: true,
                ..ParsingOptions::default()
            },
        )
        .map_err(|error| {
            FactoryError::ParseFailed(format!("XML document #{index} is malformed: {error}"))
        })?;
        records.extend(
            document
                .root_element()
                .children()
                .filter(Node::is_element)
                .map(parse_record),
        );
    }
    Ok(records)
}

fn parse_record(node: Node) -> RawRecord {
    node.children()
        .filter(Node::is_element)
        .filter_map(|attribute| {
            let name = attribute.attribute("n")?;
            let value = leaf_value(attribute)?;
            Some((name.to_lowercase(), value))
        })
        .collect()
}

fn leaf_value(attribute: Node) -> Option<String> {
    let leaf = attribute.children().find(Node::is_element)?;
    let value = match leaf.attribute("v") {
        Some(value) => value.to_string(),
        None => leaf
            .descendants()
            .filter(Node::is_text)
            .filter_map(|node| node.text())
            .collect::<String>(),
    };
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{is_xml_response, parse_records, split_documents};

    const JOBS: &str = r#"<?xml version="1.0"?>
<!DOCTYPE classads SYSTEM "classads.dtd">
<classads>
<c>
    <a n="MATCH_APF_QUEUE"><s>Q1</s></a>
    <a n="JobStatus"><i>2</i></a>
    <a n="EC2InstanceName"><s></s></a>
    <a n="IsCloud"><b v="t"/></a>
</c>
<c>
    <a n="MATCH_APF_QUEUE"><s>Q2</s></a>
    <a n="JobStatus"><i>1</i></a>
</c>
</classads>
"#;

    #[test]
    fn detect_xml_response() {
        assert!(is_xml_response("\n  <?xml version=\"1.0\"?><classads/>"));
        assert!(!is_xml_response("Error: cannot contact schedd"));
    }

    #[test]
    fn parse_single_document() {
        let records = parse_records(JOBS).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["match_apf_queue"], "Q1");
        assert_eq!(records[0]["jobstatus"], "2");
        assert_eq!(records[0]["iscloud"], "t");
        assert_eq!(records[1]["jobstatus"], "1");
    }

    #[test]
    fn empty_leaf_is_dropped() {
        let records = parse_records(JOBS).unwrap();
        assert!(!records[0].contains_key("ec2instancename"));
    }

    #[test]
    fn parse_concatenated_documents() {
        let output = format!("{JOBS}\n{JOBS}");
        assert_eq!(split_documents(&output).len(), 2);
        let records = parse_records(&output).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[2]["match_apf_queue"], "Q1");
    }

    #[test]
    fn parse_is_idempotent() {
        assert_eq!(parse_records(JOBS).unwrap(), parse_records(JOBS).unwrap());
    }

    #[test]
    fn parse_empty_classads() {
        let records = parse_records("<?xml version=\"1.0\"?><classads></classads>").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn response_without_document_fails() {
        assert!(parse_records("").is_err());
        assert!(parse_records("  \n\t").is_err());
        assert!(parse_records("All pools are empty").is_err());
    }

    #[test]
    fn malformed_document_fails() {
        let output = format!("{JOBS}<?xml version=\"1.0\"?><classads><c>");
        assert!(parse_records(&output).is_err());
    }
}
