//! Small helpers shared by the quick-xml based readers and rewriters

use quick_xml::events::{BytesStart, Event};
use quick_xml::Writer;

use crate::error::{OdtError, Result};

/// Get an attribute value by its qualified name (e.g. `style:name`)
pub(crate) fn get_attr(e: &BytesStart, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(|a| a.ok())
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| String::from_utf8(a.value.to_vec()).ok())
}

/// Qualified element name as an owned string
pub(crate) fn element_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Write one event into an in-memory writer
pub(crate) fn write_event(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| OdtError::Io(std::io::Error::other(e.to_string())))
}

/// Append an already serialized fragment to an in-memory writer
pub(crate) fn write_raw(writer: &mut Writer<Vec<u8>>, fragment: &str) {
    writer.get_mut().extend_from_slice(fragment.as_bytes());
}

/// Turn the writer's buffer back into a string
pub(crate) fn into_string(writer: Writer<Vec<u8>>) -> Result<String> {
    String::from_utf8(writer.into_inner())
        .map_err(|e| OdtError::MalformedMarkup(format!("invalid UTF-8 in output: {}", e)))
}

/// Escape special XML characters
pub(crate) fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
