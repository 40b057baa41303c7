//! Serialization and layout.

use quick_xml::Reader;
use quick_xml::events::Event;
use xot::output::Indentation;
use xot::output::xml::Parameters;

use super::document::{NodeId, XmlDocument, xml_error};
use crate::Result;

const DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Whether `input` contains an element at all.
///
/// Only scans up to the first start tag; well-formedness is left to the
/// parser. Input the scanner cannot read counts as having a root so that
/// the parser reports it.
#[must_use]
pub fn has_root_element(input: &str) -> bool {
    let mut reader = Reader::from_str(input);
    loop {
        match reader.read_event() {
            Ok(Event::Start(_) | Event::Empty(_)) | Err(_) => return true,
            Ok(Event::Eof) => return false,
            Ok(_) => {}
        }
    }
}

impl XmlDocument {
    /// Serialize the whole document with an UTF-8 declaration
    pub fn to_xml(&self) -> Result<String> {
        let body = if self.indent {
            let parameters = Parameters {
                indentation: Some(Indentation::default()),
                ..Default::default()
            };
            self.xot.serialize_xml_string(parameters, self.document)
        } else {
            self.xot.to_string(self.document)
        }
        .map_err(xml_error)?;

        Ok(format!("{DECLARATION}\n{}\n", strip_declaration(&body).trim()))
    }

    /// Serialize `id` as a standalone fragment carrying the namespace
    /// declarations it inherits from its ancestors
    pub fn fragment_xml(&mut self, id: NodeId) -> Result<String> {
        let copy = self.xot.clone_with_prefixes(id);
        self.xot.to_string(copy).map_err(xml_error)
    }

    /// Indent element-only content when serializing.
    ///
    /// Whitespace-only text is dropped from elements that have element
    /// children and no other character data. Text-only and mixed content
    /// is kept as is.
    pub fn indent(&mut self) -> Result<()> {
        let layout: Vec<NodeId> = self
            .xot
            .descendants(self.document)
            .filter(|&node| self.is_element_only(node))
            .flat_map(|node| {
                self.xot
                    .children(node)
                    .filter(|&child| self.xot.text_str(child).is_some())
                    .collect::<Vec<_>>()
            })
            .collect();
        for node in layout {
            self.remove(node)?;
        }
        self.indent = true;
        Ok(())
    }

    fn is_element_only(&self, id: NodeId) -> bool {
        let mut elements = false;
        for child in self.xot.children(id) {
            if self.xot.is_element(child) {
                elements = true;
            } else if self.xot.text_str(child).is_some_and(|text| !text.trim().is_empty()) {
                return false;
            }
        }
        elements
    }
}

fn strip_declaration(body: &str) -> &str {
    body.strip_prefix("<?xml ")
        .and_then(|rest| rest.split_once("?>"))
        .map_or(body, |(_, rest)| rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lines(xml: &str) -> Vec<String> {
        xml.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_indent_element_only_content() {
        let mut doc =
            XmlDocument::parse("<a>\n      <b>text</b><c>  <d/> </c>\n<e/></a>").unwrap();
        doc.indent().unwrap();
        let xml = doc.to_xml().unwrap();
        let lines = lines(&xml);

        assert_eq!(lines[0], DECLARATION);
        assert_eq!(lines[1], "<a>");
        let depth = |element: &str| {
            let line = lines.iter().find(|line| line.trim() == element).unwrap();
            line.len() - line.trim_start().len()
        };
        assert!(depth("<b>text</b>") > 0);
        assert!(depth("<d/>") > depth("<c>"));
        assert_eq!(depth("<c>"), depth("<e/>"));
        assert_eq!(lines.last().map(String::as_str), Some("</a>"));
    }

    #[test]
    fn test_indent_keeps_whitespace_only_text() {
        let mut doc = XmlDocument::parse("<sets><setName> </setName><x>\n</x></sets>").unwrap();
        doc.indent().unwrap();
        let xml = doc.to_xml().unwrap();
        assert!(xml.contains("<setName> </setName>"), "{xml}");
        assert!(xml.contains("<x>\n</x>"), "{xml}");
    }

    #[test]
    fn test_indent_leaves_mixed_content() {
        let mut doc = XmlDocument::parse("<a><p>one <b>two</b> three</p></a>").unwrap();
        doc.indent().unwrap();
        assert!(doc.to_xml().unwrap().contains("<p>one <b>two</b> three</p>"));
    }

    #[test]
    fn test_indent_is_stable() {
        let mut doc = XmlDocument::parse("<a><b><c/></b></a>").unwrap();
        doc.indent().unwrap();
        let once = doc.to_xml().unwrap();
        let mut again = XmlDocument::parse(&once).unwrap();
        again.indent().unwrap();
        assert_eq!(again.to_xml().unwrap(), once);
    }

    #[test]
    fn test_fragment_carries_inherited_namespaces() {
        let mut doc = XmlDocument::parse(
            r#"<r xmlns="urn:oai" xmlns:dc="urn:dc"><m><dc:title>T</dc:title></m></r>"#,
        )
        .unwrap();
        let title = doc.descendants_named("urn:dc", "title")[0];
        let fragment = doc.fragment_xml(title).unwrap();

        let standalone = XmlDocument::parse(&fragment).unwrap();
        let root = standalone.root().unwrap();
        assert!(standalone.is_named(root, "urn:dc", "title"));
        assert_eq!(standalone.text(root), "T");
    }

    #[test]
    fn test_declaration_is_written_once() {
        let doc = XmlDocument::parse("<?xml version=\"1.0\"?>\n<r/>").unwrap();
        let xml = doc.to_xml().unwrap();
        assert_eq!(xml.matches("<?xml ").count(), 1);
        assert!(xml.starts_with(DECLARATION));
    }

    #[test]
    fn test_has_root_element() {
        assert!(has_root_element("<r/>"));
        assert!(has_root_element("<?xml version=\"1.0\"?>\n<r>x</r>"));
        assert!(!has_root_element("<?xml version=\"1.0\"?>\n"));
        assert!(!has_root_element(""));
        assert!(!has_root_element("  <!-- nothing -->\n"));
    }
}
