//! Command encoding
//!
//! Builds `new*Vector` command documents. Output carries no XML declaration
//! and no namespace; attribute values are XML-escaped. Item text escapes only
//! `&`, `<` and `>`, leaving quotes as written.

use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::{IndigoError, IndigoResult};
use crate::PropertyType;

/// Vector and item tags used to command a property of type `ty`.
///
/// Light and BLOB properties cannot be commanded and map to `None`.
pub fn vector_tags(ty: PropertyType) -> Option<(&'static str, &'static str)> {
    match ty {
        PropertyType::Text => Some(("newTextVector", "oneText")),
        PropertyType::Number => Some(("newNumberVector", "oneNumber")),
        PropertyType::Switch => Some(("newSwitchVector", "oneSwitch")),
        PropertyType::Light | PropertyType::Blob => None,
    }
}

/// Encode a command document:
/// `<vector_tag device=".." name=".."><item_tag name="..">value</item_tag>...</vector_tag>`
pub fn encode_command(
    device: &str,
    property: &str,
    vector_tag: &str,
    item_tag: &str,
    items: &[(&str, &str)],
) -> IndigoResult<Vec<u8>> {
    let mut writer = Writer::new(Vec::new());

    write(
        &mut writer,
        Event::Start(
            BytesStart::new(vector_tag).with_attributes([("device", device), ("name", property)]),
        ),
    )?;
    for (name, value) in items {
        write(
            &mut writer,
            Event::Start(BytesStart::new(item_tag).with_attributes([("name", *name)])),
        )?;
        write(
            &mut writer,
            Event::Text(BytesText::from_escaped(partial_escape(value))),
        )?;
        write(&mut writer, Event::End(BytesEnd::new(item_tag)))?;
    }
    write(&mut writer, Event::End(BytesEnd::new(vector_tag)))?;

    Ok(writer.into_inner())
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> IndigoResult<()> {
    writer
        .write_event(event)
        .map_err(|e| IndigoError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_str(ty: PropertyType, items: &[(&str, &str)]) -> String {
        let (vector, item) = vector_tags(ty).unwrap();
        String::from_utf8(encode_command("D", "P", vector, item, items).unwrap()).unwrap()
    }

    #[test]
    fn test_encode_switch() {
        assert_eq!(
            encode_str(PropertyType::Switch, &[("ON", "On")]),
            r#"<newSwitchVector device="D" name="P"><oneSwitch name="ON">On</oneSwitch></newSwitchVector>"#
        );
    }

    #[test]
    fn test_encode_number_multiple_items_in_order() {
        assert_eq!(
            encode_str(PropertyType::Number, &[("HOR_BIN", "2"), ("VER_BIN", "1")]),
            concat!(
                r#"<newNumberVector device="D" name="P">"#,
                r#"<oneNumber name="HOR_BIN">2</oneNumber>"#,
                r#"<oneNumber name="VER_BIN">1</oneNumber>"#,
                r#"</newNumberVector>"#
            )
        );
    }

    #[test]
    fn test_encode_escapes_text_and_attributes() {
        let xml = String::from_utf8(
            encode_command("Cam <1>", "P", "newTextVector", "oneText", &[("DIR", "a&b<c")])
                .unwrap(),
        )
        .unwrap();
        assert_eq!(
            xml,
            r#"<newTextVector device="Cam &lt;1&gt;" name="P"><oneText name="DIR">a&amp;b&lt;c</oneText></newTextVector>"#
        );
    }

    #[test]
    fn test_encode_keeps_quotes_in_text() {
        assert_eq!(
            encode_str(PropertyType::Text, &[("NAME", r#"it's "x" > y"#)]),
            r#"<newTextVector device="D" name="P"><oneText name="NAME">it's "x" &gt; y</oneText></newTextVector>"#
        );
    }

    #[test]
    fn test_encode_is_deterministic() {
        let first = encode_str(PropertyType::Text, &[("DIR", "/tmp")]);
        let second = encode_str(PropertyType::Text, &[("DIR", "/tmp")]);
        assert_eq!(first, second);
        assert!(!first.starts_with("<?xml"));
    }

    #[test]
    fn test_unsupported_types_have_no_tags() {
        assert!(vector_tags(PropertyType::Light).is_none());
        assert!(vector_tags(PropertyType::Blob).is_none());
    }
}
