mod rich_text;

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use clap::Parser;
use eframe::{egui, App, Frame, NativeOptions};
use egui::collapsing_header::CollapsingState;
use egui::{Align2, Key, RichText};
use log::LevelFilter;
use rustbook_core::{
    BookDocument, ControllerOptions, DefaultLabels, DocumentTree, EditorController, EditorState,
    FindOutcome, FormatVersion, NodeId, NodeKind, SearchSettings,
};
use rustbook_settings::{Preferences, PreferencesStore};
use simplelog::{Config, WriteLogger};

const APP_NAME: &str = "RustBook";
const LOG_FILE: &str = "rustbook.log";
const EDITOR_ID: &str = "page_editor";

#[derive(Parser)]
#[command(name = "rustbook", about = "Rich-text book editor", version)]
struct Args {
    /// Preferences file.
    #[arg(long, value_name = "PATH", default_value = "rustbook.json")]
    config: PathBuf,
    /// Write a debug log to rustbook.log in the working directory.
    #[arg(long)]
    log: bool,
    /// Book to open at startup instead of the sample book.
    file: Option<PathBuf>,
}

struct Notice {
    title: &'static str,
    message: String,
}

struct Rename {
    id: NodeId,
    text: String,
    focus: bool,
}

enum TreeAction {
    Select(NodeId),
    StartRename(NodeId),
    CommitRename,
    CancelRename,
}

#[derive(Clone, Copy)]
enum Find {
    First,
    Next,
    Previous,
}

struct RustBookApp {
    controller: EditorController,
    preferences: PreferencesStore,
    path_input: String,
    notice: Option<Notice>,
    renaming: Option<Rename>,
    sync_cursor: bool,
    /// Parent of the node added last; its header is opened on the next frame.
    reveal: Option<NodeId>,
    title: String,
}

fn controller_options(prefs: &Preferences) -> ControllerOptions {
    ControllerOptions {
        labels: DefaultLabels {
            book: prefs.book.root_label.clone(),
            chapter: prefs.book.new_chapter_label.clone(),
            page: prefs.book.new_page_label.clone(),
        },
        format: if prefs.book.write_legacy_format {
            FormatVersion::Legacy
        } else {
            FormatVersion::Tagged
        },
    }
}

impl RustBookApp {
    fn new(preferences: PreferencesStore, file: Option<PathBuf>) -> Self {
        let prefs = preferences.preferences();
        let options = controller_options(prefs);
        let mut document = BookDocument::sample(&options.labels);
        document.set_format(options.format);
        let mut controller = EditorController::with_document(document, options);
        controller.set_search_settings(SearchSettings {
            case_sensitive: prefs.search.case_sensitive,
            whole_word: prefs.search.whole_word,
        });

        let mut app = Self {
            controller,
            preferences,
            path_input: String::new(),
            notice: None,
            renaming: None,
            sync_cursor: false,
            reveal: None,
            title: String::new(),
        };
        if let Some(path) = file {
            app.path_input = path.display().to_string();
            app.open();
        }
        app
    }

    fn notify(&mut self, title: &'static str, message: impl Into<String>) {
        self.notice = Some(Notice {
            title,
            message: message.into(),
        });
    }

    fn remember(&mut self, path: &Path) {
        let path = path.to_path_buf();
        if let Err(err) = self.preferences.update(|prefs| prefs.remember(path.clone())) {
            log::warn!("{err}");
        }
    }

    fn input_path(&self) -> Option<PathBuf> {
        let trimmed = self.path_input.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    fn new_document(&mut self) {
        self.renaming = None;
        self.controller.new_document();
    }

    fn open(&mut self) {
        let Some(path) = self.input_path() else {
            self.notify("Open", "Enter the path of a book file first.");
            return;
        };
        match self.controller.open(&path) {
            Ok(()) => {
                self.renaming = None;
                self.remember(&path);
            }
            Err(err) => {
                log::warn!("open {} failed: {err}", path.display());
                self.notify("Error", format!("Could not open {}: {err}", path.display()));
            }
        }
    }

    fn save(&mut self) {
        if self.controller.document().path().is_none() {
            self.save_as();
            return;
        }
        let result = self.controller.save();
        self.after_save(result);
    }

    fn save_as(&mut self) {
        let Some(path) = self.input_path() else {
            self.notify("Save As", "Enter a file path to save the book to.");
            return;
        };
        let result = self.controller.save_as(&path);
        self.after_save(result);
    }

    fn after_save(&mut self, result: Result<(), rustbook_core::ControllerError>) {
        match result {
            Ok(()) => {
                if let Some(path) = self.controller.document().path().map(Path::to_path_buf) {
                    self.path_input = path.display().to_string();
                    self.remember(&path);
                }
            }
            Err(err) => {
                log::warn!("save failed: {err}");
                self.notify("Error", format!("Could not save the book: {err}"));
            }
        }
    }

    fn find(&mut self, kind: Find) {
        let result = match kind {
            Find::First => self.controller.search(),
            Find::Next => self.controller.find_next(),
            Find::Previous => self.controller.find_previous(),
        };
        match result {
            Ok(FindOutcome::Skipped) => {}
            Ok(FindOutcome::Found(_)) => self.sync_cursor = true,
            Ok(FindOutcome::Wrapped(_)) => {
                self.sync_cursor = true;
                let message = match kind {
                    Find::Previous => "Reached the start of the page. Searching from the end.",
                    Find::First | Find::Next => {
                        "Reached the end of the page. Searching from the start."
                    }
                };
                self.notify("Search", message);
            }
            Err(err) => self.notify("Search", err.to_string()),
        }
    }

    fn select(&mut self, id: NodeId) {
        match self.controller.select(Some(id)) {
            Ok(_) => self.sync_cursor = true,
            Err(err) => log::warn!("{err}"),
        }
    }

    fn add_node(&mut self, kind: NodeKind) {
        let added = match kind {
            NodeKind::Page => self.controller.add_page(),
            _ => self.controller.add_chapter(),
        };
        match added {
            Ok(id) => self.reveal = self.controller.document().tree().parent(id),
            Err(err) => self.notify("Error", err.to_string()),
        }
    }

    fn window_title(&self) -> String {
        match self.controller.document().path() {
            Some(path) => format!("{} - {APP_NAME}", path.display()),
            None => format!("Untitled - {APP_NAME}"),
        }
    }

    fn show_toolbar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                if ui.button("New").clicked() {
                    self.new_document();
                }
                if ui.button("Open").clicked() {
                    self.open();
                }
                if ui.button("Save").clicked() {
                    self.save();
                }
                if ui.button("Save As").clicked() {
                    self.save_as();
                }
                ui.add(
                    egui::TextEdit::singleline(&mut self.path_input)
                        .hint_text("path/to/book.ebk")
                        .desired_width(260.0),
                );
                self.show_recent_files(ui);

                ui.separator();
                if ui.button("Add Chapter").clicked() {
                    self.add_node(NodeKind::Chapter);
                }
                if ui.button("Add Page").clicked() {
                    self.add_node(NodeKind::Page);
                }
                if ui.button("Remove").clicked() && self.controller.remove_selected().is_some() {
                    self.renaming = None;
                }
            });

            ui.horizontal(|ui| {
                let current = self.controller.current_format();
                if ui
                    .selectable_label(current.bold, RichText::new("Bold").strong())
                    .clicked()
                {
                    self.controller.toggle_bold();
                }
                if ui
                    .selectable_label(current.italic, RichText::new("Italic").italics())
                    .clicked()
                {
                    self.controller.toggle_italic();
                }
                if ui
                    .selectable_label(current.underline, RichText::new("Underline").underline())
                    .clicked()
                {
                    self.controller.toggle_underline();
                }

                ui.separator();
                let mut query = self.controller.query().to_string();
                let response = ui.add(
                    egui::TextEdit::singleline(&mut query)
                        .hint_text("Search")
                        .desired_width(200.0),
                );
                if response.changed() {
                    self.controller.set_query(query);
                }
                let submitted = response.lost_focus() && ui.input(|i| i.key_pressed(Key::Enter));
                if ui.button("Find").clicked() || submitted {
                    self.find(Find::First);
                }
                if ui.button("Find Next").clicked() {
                    self.find(Find::Next);
                }
                if ui.button("Find Previous").clicked() {
                    self.find(Find::Previous);
                }
                self.show_search_settings(ui);
            });
        });
    }

    fn show_recent_files(&mut self, ui: &mut egui::Ui) {
        let recent = self.preferences.preferences().recent();
        let mut chosen = None;
        egui::ComboBox::from_id_source("recent_files")
            .selected_text("Recent")
            .width(90.0)
            .show_ui(ui, |ui| {
                if recent.is_empty() {
                    ui.weak("No recent books");
                }
                for path in recent.iter() {
                    if ui.selectable_label(false, path.display().to_string()).clicked() {
                        chosen = Some(path.clone());
                    }
                }
            });
        if let Some(path) = chosen {
            self.path_input = path.display().to_string();
            self.open();
        }
    }

    fn show_search_settings(&mut self, ui: &mut egui::Ui) {
        let mut settings = self.controller.search_settings();
        let case = ui.checkbox(&mut settings.case_sensitive, "Match case").changed();
        let word = ui.checkbox(&mut settings.whole_word, "Whole word").changed();
        if case || word {
            self.controller.set_search_settings(settings);
            let result = self.preferences.update(|prefs| {
                prefs.search.case_sensitive = settings.case_sensitive;
                prefs.search.whole_word = settings.whole_word;
            });
            if let Err(err) = result {
                log::warn!("{err}");
            }
        }
    }

    fn show_tree(&mut self, ctx: &egui::Context) {
        let mut actions = Vec::new();
        egui::SidePanel::left("book_tree")
            .default_width(220.0)
            .resizable(true)
            .show(ctx, |ui| {
                ui.heading("Book Structure");
                ui.separator();
                egui::ScrollArea::vertical().show(ui, |ui| {
                    let tree = self.controller.document().tree();
                    render_node(
                        ui,
                        tree,
                        tree.root(),
                        self.controller.selection(),
                        &mut self.renaming,
                        &mut actions,
                        &mut self.reveal,
                    );
                });
            });

        self.reveal = None;

        for action in actions {
            match action {
                TreeAction::Select(id) => self.select(id),
                TreeAction::StartRename(id) => {
                    let text = self
                        .controller
                        .document()
                        .tree()
                        .get(id)
                        .map(|node| node.label().to_string())
                        .unwrap_or_default();
                    self.renaming = Some(Rename {
                        id,
                        text,
                        focus: true,
                    });
                }
                TreeAction::CommitRename => {
                    if let Some(rename) = self.renaming.take() {
                        if let Err(err) = self.controller.rename(rename.id, rename.text) {
                            self.notify("Error", err.to_string());
                        }
                    }
                }
                TreeAction::CancelRename => self.renaming = None,
            }
        }
    }

    fn show_editor(&mut self, ctx: &egui::Context) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let editable = matches!(self.controller.state(), EditorState::PageSelected(_));
            if !editable {
                ui.weak("Select a page to edit its text.");
            }
            let editor_id = egui::Id::new(EDITOR_ID);
            if self.sync_cursor {
                rich_text::push_cursor(ctx, editor_id, self.controller.buffer());
                if editable {
                    ctx.memory_mut(|memory| memory.request_focus(editor_id));
                }
                self.sync_cursor = false;
            }

            let buffer = self.controller.buffer();
            let mut text = buffer.plain_text().to_string();
            let snapshot = text.clone();
            let runs = buffer.runs().to_vec();
            let mut layouter = |ui: &egui::Ui, string: &str, wrap_width: f32| {
                let runs = if string == snapshot { runs.as_slice() } else { &[] };
                let mut job = rich_text::layout_job(ui.style(), string, runs);
                job.wrap.max_width = wrap_width;
                ui.fonts(|fonts| fonts.layout_job(job))
            };

            let output = egui::ScrollArea::vertical()
                .show(ui, |ui| {
                    egui::TextEdit::multiline(&mut text)
                        .id(editor_id)
                        .desired_width(f32::INFINITY)
                        .desired_rows(24)
                        .interactive(editable)
                        .layouter(&mut layouter)
                        .show(ui)
                })
                .inner;

            let Some(buffer) = self.controller.buffer_mut() else {
                return;
            };
            if output.response.changed() {
                buffer.sync_plain_text(&text);
            }
            if let Some(range) = output.cursor_range {
                rich_text::pull_cursor(buffer, range);
            }
        });
    }

    fn show_notice(&mut self, ctx: &egui::Context) {
        let Some(notice) = &self.notice else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new(notice.title)
            .collapsible(false)
            .resizable(false)
            .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(notice.message.as_str());
                ui.add_space(8.0);
                if ui.button("OK").clicked() || ui.input(|i| i.key_pressed(Key::Enter)) {
                    dismissed = true;
                }
            });
        if dismissed {
            self.notice = None;
        }
    }
}

fn render_node(
    ui: &mut egui::Ui,
    tree: &DocumentTree,
    id: NodeId,
    selection: Option<NodeId>,
    renaming: &mut Option<Rename>,
    actions: &mut Vec<TreeAction>,
    reveal: &mut Option<NodeId>,
) {
    let Some(node) = tree.get(id) else {
        return;
    };
    if node.is_page() {
        node_label(ui, tree, id, selection, renaming, actions);
        return;
    }
    let default_open = node.kind() == NodeKind::Book || node.is_expanded();
    let mut state =
        CollapsingState::load_with_default_open(ui.ctx(), node_state_id(id), default_open);
    // The stored state wins over `default_open`, so a fresh insertion has to
    // reopen a header the user collapsed earlier.
    if *reveal == Some(id) {
        state.set_open(true);
        *reveal = None;
    }
    state
        .show_header(ui, |ui| node_label(ui, tree, id, selection, renaming, actions))
        .body(|ui| {
            for child in node.children() {
                render_node(ui, tree, *child, selection, renaming, actions, reveal);
            }
        });
}

fn node_state_id(id: NodeId) -> egui::Id {
    egui::Id::new(("book_node", id.as_u64()))
}

fn node_label(
    ui: &mut egui::Ui,
    tree: &DocumentTree,
    id: NodeId,
    selection: Option<NodeId>,
    renaming: &mut Option<Rename>,
    actions: &mut Vec<TreeAction>,
) {
    let Some(node) = tree.get(id) else {
        return;
    };
    if let Some(rename) = renaming.as_mut().filter(|rename| rename.id == id) {
        let response = ui.text_edit_singleline(&mut rename.text);
        if rename.focus {
            response.request_focus();
            rename.focus = false;
        }
        if response.lost_focus() {
            if ui.input(|i| i.key_pressed(Key::Escape)) {
                actions.push(TreeAction::CancelRename);
            } else {
                actions.push(TreeAction::CommitRename);
            }
        }
        return;
    }

    let response = ui.selectable_label(selection == Some(id), node.label());
    if response.clicked() {
        actions.push(TreeAction::Select(id));
    }
    if response.double_clicked() && node.is_editable() {
        actions.push(TreeAction::StartRename(id));
    }
}

impl App for RustBookApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        let title = self.window_title();
        if title != self.title {
            ctx.send_viewport_cmd(egui::ViewportCommand::Title(title.clone()));
            self.title = title;
        }

        self.show_toolbar(ctx);
        self.show_tree(ctx);
        self.show_editor(ctx);
        self.show_notice(ctx);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        self.controller.flush();
        log::info!("closing {}", self.window_title());
    }
}

fn init_logging(enabled: bool) -> Result<()> {
    if enabled {
        let log_file = File::create(LOG_FILE)
            .with_context(|| format!("failed to create {LOG_FILE}"))?;
        WriteLogger::init(LevelFilter::Debug, Config::default(), log_file)
            .context("failed to install the logger")?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log)?;
    let preferences = PreferencesStore::load(&args.config)
        .with_context(|| format!("failed to load preferences from {}", args.config.display()))?;

    let options = NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 720.0])
            .with_title(format!("Untitled - {APP_NAME}")),
        ..Default::default()
    };
    let app = RustBookApp::new(preferences, args.file);
    eframe::run_native(APP_NAME, options, Box::new(move |_cc| Box::new(app)))
        .map_err(|err| anyhow::anyhow!("{err}"))
}
