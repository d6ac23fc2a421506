//! Engine XML decoded into a plain element tree.
//!
//! The decoder is non-validating: attributes stay strings, numeric
//! conversion happens at the domain layer, and base64 text is only decoded
//! when a caller asks for it via [`Element::decoded_text`].

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn attr_u32(&self, name: &str) -> Option<u32> {
        self.attr(name).and_then(|v| v.parse().ok())
    }

    /// DBGp booleans arrive as `0`/`1`, occasionally as words.
    pub fn attr_bool(&self, name: &str) -> Option<bool> {
        match self.attr(name)? {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        }
    }

    /// Element name with any namespace prefix stripped (`xdebug:message` → `message`).
    pub fn local_name(&self) -> &str {
        match self.name.split_once(':') {
            Some((_, local)) => local,
            None => &self.name,
        }
    }

    /// First child whose local name matches.
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.local_name() == local)
    }

    /// All children whose local name matches, in document order.
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter(move |c| c.local_name() == local)
    }

    /// Text content, base64-decoded when the element declares
    /// `encoding="base64"`. Undecodable input is returned raw.
    pub fn decoded_text(&self) -> String {
        if self.attr("encoding") != Some("base64") {
            return self.text.clone();
        }
        let packed: String = self.text.split_whitespace().collect();
        match BASE64.decode(packed.as_bytes()) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => self.text.clone(),
        }
    }
}

fn element_from_start(e: &BytesStart<'_>) -> Element {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let attributes = e
        .attributes()
        .flatten()
        .filter_map(|a| {
            let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
            let value = a.unescape_value().ok()?.into_owned();
            Some((key, value))
        })
        .collect();
    Element {
        name,
        attributes,
        text: String::new(),
        children: Vec::new(),
    }
}

/// Parse one XML payload into its root element.
pub fn parse_document(xml: &str) -> Result<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(element_from_start(&e)),
            Ok(Event::Empty(e)) => {
                let el = element_from_start(&e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None if root.is_none() => root = Some(el),
                    None => return Err(Error::Protocol("multiple root elements".to_string())),
                }
            }
            Ok(Event::End(_)) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| Error::Protocol("unbalanced end tag".to_string()))?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(el),
                    None if root.is_none() => root = Some(el),
                    None => return Err(Error::Protocol("multiple root elements".to_string())),
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape()?);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {} // declaration, comments, PIs
            Err(e) => return Err(Error::Xml(e)),
        }
        buf.clear();
    }

    root.ok_or_else(|| Error::Protocol("empty XML document".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_attributes_and_self_closing() {
        let root = parse_document(r#"<init appid="123" idekey="k" language="PHP"/>"#).unwrap();
        assert_eq!(root.name, "init");
        assert_eq!(root.attr("appid"), Some("123"));
        assert_eq!(root.attr("idekey"), Some("k"));
        assert_eq!(root.attr("missing"), None);
    }

    #[test]
    fn test_parse_nested_children_preserve_order() {
        let root = parse_document(
            r#"<response><stack level="0"/><stack level="1"/><stack level="2"/></response>"#,
        )
        .unwrap();
        let levels: Vec<_> = root
            .children_named("stack")
            .map(|c| c.attr_u32("level").unwrap())
            .collect();
        assert_eq!(levels, vec![0, 1, 2]);
    }

    #[test]
    fn test_namespaced_local_name() {
        let root = parse_document(
            r#"<response xmlns:xdebug="urn:xdebug"><xdebug:message filename="file:///a.php" lineno="5"/></response>"#,
        )
        .unwrap();
        let msg = root.child("message").unwrap();
        assert_eq!(msg.name, "xdebug:message");
        assert_eq!(msg.local_name(), "message");
        assert_eq!(msg.attr_u32("lineno"), Some(5));
    }

    #[test]
    fn test_text_and_cdata() {
        let root = parse_document(r#"<error code="200"><message><![CDATA[no such file]]></message></error>"#)
            .unwrap();
        assert_eq!(root.child("message").unwrap().text, "no such file");

        let root = parse_document(r#"<message>plain &amp; escaped</message>"#).unwrap();
        assert_eq!(root.text, "plain & escaped");
    }

    #[test]
    fn test_base64_decoded_text() {
        let root =
            parse_document(r#"<property name="$s" type="string" encoding="base64">SGVsbG8=</property>"#)
                .unwrap();
        assert_eq!(root.decoded_text(), "Hello");
        // Without the encoding attribute the raw text is returned.
        let root = parse_document(r#"<property name="$s">SGVsbG8=</property>"#).unwrap();
        assert_eq!(root.decoded_text(), "SGVsbG8=");
    }

    #[test]
    fn test_attr_bool_forms() {
        let root = parse_document(r#"<breakpoint resolved="1" constant="false"/>"#).unwrap();
        assert_eq!(root.attr_bool("resolved"), Some(true));
        assert_eq!(root.attr_bool("constant"), Some(false));
        assert_eq!(root.attr_bool("absent"), None);
    }

    #[test]
    fn test_malformed_document_is_error() {
        assert!(parse_document("").is_err());
        assert!(parse_document("not xml at all").is_err());
        assert!(parse_document("<unclosed>").is_err());
    }
}
