//! Bridges the page buffer and egui's string-based `TextEdit`.
//!
//! egui cursors count characters while the buffer counts bytes, so every
//! position crossing the boundary goes through [`char_to_byte`] or
//! [`byte_to_char`].

use eframe::egui;
use egui::epaint::text::cursor::CCursor;
use egui::text::LayoutJob;
use egui::text_edit::{CCursorRange, CursorRange, TextEditState};
use egui::{Stroke, Style, TextFormat, TextStyle};
use rustbook_core::{CharFormat, FormatRun, RichTextBuffer};

pub fn char_to_byte(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map_or(text.len(), |(byte, _)| byte)
}

pub fn byte_to_char(text: &str, byte_index: usize) -> usize {
    let byte_index = byte_index.min(text.len());
    text.char_indices()
        .take_while(|(byte, _)| *byte < byte_index)
        .count()
}

fn text_format(style: &Style, format: CharFormat) -> TextFormat {
    let color = if format.bold {
        style.visuals.strong_text_color()
    } else {
        style.visuals.text_color()
    };
    TextFormat {
        font_id: TextStyle::Body.resolve(style),
        color,
        italics: format.italic,
        underline: if format.underline {
            Stroke::new(1.0, color)
        } else {
            Stroke::NONE
        },
        ..Default::default()
    }
}

/// Lays out `text` with `runs`; the runs are ignored unless they cover the
/// text exactly, which happens for one frame after each keystroke.
pub fn layout_job(style: &Style, text: &str, runs: &[FormatRun]) -> LayoutJob {
    let mut job = LayoutJob::default();
    let covered: usize = runs.iter().map(|run| run.len).sum();
    if covered != text.len() {
        job.append(text, 0.0, text_format(style, CharFormat::default()));
        return job;
    }
    let mut offset = 0;
    for run in runs {
        job.append(
            &text[offset..offset + run.len],
            0.0,
            text_format(style, run.format),
        );
        offset += run.len;
    }
    job
}

/// Selection ends of the buffer as (anchor, head) byte offsets.
fn anchor_and_head(buffer: &RichTextBuffer) -> (usize, usize) {
    let head = buffer.caret();
    let anchor = match buffer.selection() {
        Some(selection) if selection.start() == head => selection.end(),
        Some(selection) => selection.start(),
        None => head,
    };
    (anchor, head)
}

/// Copies the widget cursor into the buffer when it moved.
///
/// Reapplying an unchanged caret would reset the typing format chosen with
/// the format toggles.
pub fn pull_cursor(buffer: &mut RichTextBuffer, range: CursorRange) {
    let text = buffer.plain_text();
    let anchor = char_to_byte(text, range.secondary.ccursor.index);
    let head = char_to_byte(text, range.primary.ccursor.index);
    if (anchor, head) != anchor_and_head(buffer) {
        let _ = buffer.select(anchor, head);
    }
}

/// Moves the widget cursor to the buffer's caret and selection.
pub fn push_cursor(ctx: &egui::Context, id: egui::Id, buffer: &RichTextBuffer) {
    let text = buffer.plain_text();
    let (anchor, head) = anchor_and_head(buffer);
    let mut state = TextEditState::load(ctx, id).unwrap_or_default();
    state.set_ccursor_range(Some(CCursorRange::two(
        CCursor::new(byte_to_char(text, anchor)),
        CCursor::new(byte_to_char(text, head)),
    )));
    state.store(ctx, id);
}
