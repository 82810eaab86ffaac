//! Page markup: the string form of a [`RichTextBuffer`] kept in the
//! content store and written to book files.
//!
//! Output is a small HTML subset (`<b>`, `<i>`, `<u>`, `<br/>`). Input is
//! read leniently and also covers Qt rich-text HTML documents (paragraphs
//! and styled spans) found in legacy books.

use std::borrow::Cow;

use quick_xml::escape::unescape_with;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::buffer::{CharFormat, FormatChange, RichTextBuffer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarkupError {
    #[error("malformed markup at byte {position}: {message}")]
    Malformed { position: usize, message: String },
}

const HIDDEN_ELEMENTS: &[&[u8]] = &[b"head", b"style", b"title", b"script"];
const VOID_ELEMENTS: &[&[u8]] = &[b"br", b"meta", b"img", b"hr", b"link", b"input"];

pub(crate) fn render(buffer: &RichTextBuffer) -> String {
    let mut out = String::with_capacity(buffer.len() + 16);
    for (text, format) in buffer.segments() {
        if format.bold {
            out.push_str("<b>");
        }
        if format.italic {
            out.push_str("<i>");
        }
        if format.underline {
            out.push_str("<u>");
        }
        escape_into(&mut out, text);
        if format.underline {
            out.push_str("</u>");
        }
        if format.italic {
            out.push_str("</i>");
        }
        if format.bold {
            out.push_str("</b>");
        }
    }
    out
}

fn escape_into(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' => out.push_str("<br/>"),
            '\r' => out.push_str("&#13;"),
            other => out.push(other),
        }
    }
}

struct Frame {
    name: Vec<u8>,
    format: CharFormat,
    hidden: bool,
    // Qt writes blank lines as `<p style="-qt-paragraph-type:empty"><br /></p>`.
    empty_paragraph: bool,
}

pub(crate) fn parse(markup: &str) -> Result<RichTextBuffer, MarkupError> {
    let mut reader = Reader::from_str(markup);
    reader.trim_text(false);
    reader.check_end_names(false);

    let mut buffer = RichTextBuffer::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut paragraphs = 0usize;

    loop {
        let event = reader.read_event().map_err(|err| MarkupError::Malformed {
            position: reader.buffer_position(),
            message: err.to_string(),
        })?;
        let (format, hidden, in_empty_paragraph) = stack
            .last()
            .map(|frame| (frame.format, frame.hidden, frame.empty_paragraph))
            .unwrap_or_default();

        match event {
            Event::Start(element) | Event::Empty(element)
                if is_void(&element_name(&element)) =>
            {
                if element_name(&element) == b"br" && !hidden && !in_empty_paragraph {
                    buffer.append("\n", format);
                }
            }
            Event::Start(element) => {
                let name = element_name(&element);
                let mut empty_paragraph = in_empty_paragraph;
                if name == b"p" && !hidden {
                    if paragraphs > 0 || !buffer.is_empty() {
                        buffer.append("\n", format);
                    }
                    paragraphs += 1;
                    empty_paragraph = style_attribute(&element)
                        .map_or(false, |style| style.contains("-qt-paragraph-type:empty"));
                }
                stack.push(Frame {
                    format: element_change(&name, &element).apply(format),
                    hidden: hidden || HIDDEN_ELEMENTS.contains(&name.as_slice()),
                    empty_paragraph,
                    name,
                });
            }
            Event::Empty(element) => {
                if element_name(&element) == b"p" && !hidden {
                    if paragraphs > 0 || !buffer.is_empty() {
                        buffer.append("\n", format);
                    }
                    paragraphs += 1;
                }
            }
            Event::End(element) => {
                let name = element.name().as_ref().to_ascii_lowercase();
                if let Some(index) = stack.iter().rposition(|frame| frame.name == name) {
                    stack.truncate(index);
                }
            }
            Event::Text(text) => {
                if hidden {
                    continue;
                }
                let raw = String::from_utf8_lossy(&text);
                if raw.trim().is_empty() && raw.contains('\n') {
                    continue;
                }
                // Only raw line breaks are layout; escaped ones (`&#13;`) are content.
                let collapsed = collapse_newlines(raw);
                let decoded = unescape_with(&collapsed, resolve_entity).map_err(|err| {
                    MarkupError::Malformed {
                        position: reader.buffer_position(),
                        message: err.to_string(),
                    }
                })?;
                buffer.append(&decoded, format);
            }
            Event::CData(data) => {
                if !hidden {
                    let raw = data.into_inner();
                    buffer.append(&String::from_utf8_lossy(&raw), format);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    buffer.move_to_start();
    Ok(buffer)
}

fn resolve_entity(entity: &str) -> Option<&'static str> {
    match entity {
        "nbsp" => Some("\u{a0}"),
        _ => None,
    }
}

// Raw line breaks inside markup text are layout whitespace, not content.
fn collapse_newlines(text: Cow<'_, str>) -> Cow<'_, str> {
    if text.contains(['\n', '\r']) {
        Cow::Owned(text.replace("\r\n", " ").replace(['\n', '\r'], " "))
    } else {
        text
    }
}

fn element_name(element: &BytesStart<'_>) -> Vec<u8> {
    element.name().as_ref().to_ascii_lowercase()
}

fn is_void(name: &[u8]) -> bool {
    VOID_ELEMENTS.contains(&name)
}

fn style_attribute(element: &BytesStart<'_>) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.as_ref().eq_ignore_ascii_case(b"style"))
        .and_then(|attr| attr.unescape_value().ok().map(|value| value.into_owned()))
}

fn element_change(name: &[u8], element: &BytesStart<'_>) -> FormatChange {
    let tag = match name {
        b"b" | b"strong" => FormatChange::bold(true),
        b"i" | b"em" => FormatChange::italic(true),
        b"u" | b"ins" => FormatChange::underline(true),
        _ => FormatChange::default(),
    };
    match style_attribute(element) {
        Some(style) => tag.merge(style_change(&style)),
        None => tag,
    }
}

/// Maps inline CSS (as written by Qt) to a format change.
fn style_change(style: &str) -> FormatChange {
    let mut change = FormatChange::default();
    for declaration in style.split(';') {
        let Some((property, value)) = declaration.split_once(':') else {
            continue;
        };
        let property = property.trim().to_ascii_lowercase();
        let value = value.trim().to_ascii_lowercase();
        match property.as_str() {
            "font-weight" => {
                change.bold = match value.as_str() {
                    "bold" | "bolder" => Some(true),
                    "normal" | "lighter" => Some(false),
                    numeric => numeric.parse::<u16>().ok().map(|weight| weight >= 600),
                };
            }
            "font-style" => {
                change.italic = Some(value == "italic" || value == "oblique");
            }
            "text-decoration" | "text-decoration-line" => {
                change.underline = Some(value.contains("underline"));
            }
            _ => {}
        }
    }
    change
}
