use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::LevelFilter;
use rustbook_core::{
    format_path, parse_path, BookDocument, CharFormat, DefaultLabels, FormatChange, FormatVersion,
    NodeId, NodeKind, RichTextBuffer,
};
use rustbook_search::{SearchEngine, SearchMode, SearchOptions};
use rustbook_settings::{Preferences, PreferencesStore};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

#[derive(Parser)]
#[command(
    name = "rustbook-cli",
    about = "Inspect and edit RustBook files from the command line",
    author,
    version
)]
struct Cli {
    /// Preferences file supplying default labels and the output format.
    #[arg(long, global = true, value_name = "PATH", default_value = "rustbook.json")]
    config: PathBuf,
    /// Log debug output to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new book file.
    New(NewArgs),
    /// Print the outline of a book with node paths.
    Tree { file: PathBuf },
    /// Add a chapter or page next to the node at --at.
    Add(AddArgs),
    /// Remove a node and everything below it.
    Remove { file: PathBuf, path: String },
    /// Change the label of a node.
    Rename {
        file: PathBuf,
        path: String,
        label: String,
    },
    /// Print the content of a page.
    Cat(CatArgs),
    /// Replace the content of a page.
    Write(WriteArgs),
    /// Search the text of every page.
    Find(FindArgs),
}

#[derive(Args)]
struct NewArgs {
    file: PathBuf,
    /// Label of the book root.
    #[arg(long)]
    title: Option<String>,
    /// Start with one chapter holding two pages.
    #[arg(long)]
    sample: bool,
    /// Write the header-less format understood by older editors.
    #[arg(long)]
    legacy: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindChoice {
    Chapter,
    Page,
}

impl From<KindChoice> for NodeKind {
    fn from(choice: KindChoice) -> Self {
        match choice {
            KindChoice::Chapter => NodeKind::Chapter,
            KindChoice::Page => NodeKind::Page,
        }
    }
}

#[derive(Args)]
struct AddArgs {
    file: PathBuf,
    #[arg(value_enum)]
    kind: KindChoice,
    /// Anchor node; a page anchor adds a sibling. Defaults to the root.
    #[arg(long, value_name = "PATH")]
    at: Option<String>,
    #[arg(long)]
    label: Option<String>,
}

#[derive(Args)]
struct CatArgs {
    file: PathBuf,
    path: String,
    /// Print the stored markup instead of plain text.
    #[arg(long)]
    markup: bool,
}

#[derive(Args)]
struct WriteArgs {
    file: PathBuf,
    path: String,
    text: String,
    #[arg(long)]
    bold: bool,
    #[arg(long)]
    italic: bool,
    #[arg(long)]
    underline: bool,
}

#[derive(Args)]
struct FindArgs {
    file: PathBuf,
    pattern: String,
    #[arg(long)]
    case_sensitive: bool,
    #[arg(long)]
    whole_word: bool,
    /// Treat the pattern as a regular expression.
    #[arg(long)]
    regex: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let Cli {
        config,
        verbose,
        command,
    } = Cli::parse();
    init_logging(verbose);
    let store = PreferencesStore::load(&config)
        .with_context(|| format!("failed to load preferences from {}", config.display()))?;
    let prefs = store.preferences();

    match command {
        Commands::New(args) => execute_new(args, prefs),
        Commands::Tree { file } => execute_tree(&file),
        Commands::Add(args) => execute_add(args, prefs),
        Commands::Remove { file, path } => execute_remove(&file, &path),
        Commands::Rename { file, path, label } => execute_rename(&file, &path, label),
        Commands::Cat(args) => execute_cat(args),
        Commands::Write(args) => execute_write(args),
        Commands::Find(args) => execute_find(args, prefs),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    // A logger may already be installed when embedded; that is fine.
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto);
}

fn labels_from(prefs: &Preferences) -> DefaultLabels {
    DefaultLabels {
        book: prefs.book.root_label.clone(),
        chapter: prefs.book.new_chapter_label.clone(),
        page: prefs.book.new_page_label.clone(),
    }
}

fn open_book(file: &Path) -> Result<BookDocument> {
    BookDocument::open(file).with_context(|| format!("failed to open {}", file.display()))
}

fn save_book(document: &mut BookDocument, file: &Path) -> Result<()> {
    document
        .save()
        .with_context(|| format!("failed to save {}", file.display()))
}

fn resolve(document: &BookDocument, path: &str) -> Result<NodeId> {
    let indices = parse_path(path)?;
    let id = document.tree().resolve_path(&indices)?;
    Ok(id)
}

fn display_path(document: &BookDocument, id: NodeId) -> String {
    match document.tree().position_path(id) {
        Some(path) if !path.is_empty() => format_path(&path),
        _ => "/".to_string(),
    }
}

fn label_of(document: &BookDocument, id: NodeId) -> &str {
    document.tree().get(id).map(|node| node.label()).unwrap_or("")
}

fn execute_new(args: NewArgs, prefs: &Preferences) -> Result<()> {
    let mut labels = labels_from(prefs);
    if let Some(title) = args.title {
        labels.book = title;
    }
    let mut document = if args.sample {
        BookDocument::sample(&labels)
    } else {
        BookDocument::new(labels.book.clone())
    };
    let format = if args.legacy || prefs.book.write_legacy_format {
        FormatVersion::Legacy
    } else {
        FormatVersion::Tagged
    };
    document
        .save_as(&args.file, format)
        .with_context(|| format!("failed to create {}", args.file.display()))?;
    println!("Created {}", args.file.display());
    Ok(())
}

fn execute_tree(file: &Path) -> Result<()> {
    let document = open_book(file)?;
    let tree = document.tree();
    for id in tree.preorder() {
        let Some(node) = tree.get(id) else {
            continue;
        };
        let depth = tree.depth(id).unwrap_or(0);
        println!(
            "{}{} [{}] {}",
            "  ".repeat(depth),
            node.label(),
            node.kind(),
            display_path(&document, id)
        );
    }
    Ok(())
}

fn execute_add(args: AddArgs, prefs: &Preferences) -> Result<()> {
    let mut document = open_book(&args.file)?;
    let anchor = match args.at.as_deref() {
        Some(path) => Some(resolve(&document, path)?),
        None => None,
    };
    let kind = NodeKind::from(args.kind);
    let label = args
        .label
        .unwrap_or_else(|| labels_from(prefs).for_kind(kind).to_string());
    let id = document.insert(kind, anchor, label)?;
    save_book(&mut document, &args.file)?;
    println!("Added {} at {}", kind, display_path(&document, id));
    Ok(())
}

fn execute_remove(file: &Path, path: &str) -> Result<()> {
    let mut document = open_book(file)?;
    let id = resolve(&document, path)?;
    let Some(diff) = document.remove(id) else {
        bail!("the book root cannot be removed");
    };
    save_book(&mut document, file)?;
    println!("Removed {} node(s)", diff.removed.len());
    Ok(())
}

fn execute_rename(file: &Path, path: &str, label: String) -> Result<()> {
    let mut document = open_book(file)?;
    let id = resolve(&document, path)?;
    document.rename(id, label)?;
    save_book(&mut document, file)?;
    println!("Renamed {} to {}", display_path(&document, id), label_of(&document, id));
    Ok(())
}

fn page_at(document: &BookDocument, path: &str) -> Result<NodeId> {
    let id = resolve(document, path)?;
    match document.tree().kind(id) {
        Some(NodeKind::Page) => Ok(id),
        Some(kind) => bail!("node at `{path}` is a {kind}, not a page"),
        None => bail!("no node at `{path}`"),
    }
}

fn page_text(document: &BookDocument, id: NodeId) -> String {
    let markup = document.content(id);
    match RichTextBuffer::from_markup(markup) {
        Ok(buffer) => buffer.plain_text().to_string(),
        Err(err) => {
            log::warn!("page {id} has unreadable markup: {err}");
            markup.to_string()
        }
    }
}

fn execute_cat(args: CatArgs) -> Result<()> {
    let document = open_book(&args.file)?;
    let id = page_at(&document, &args.path)?;
    if args.markup {
        println!("{}", document.content(id));
    } else {
        println!("{}", page_text(&document, id));
    }
    Ok(())
}

fn execute_write(args: WriteArgs) -> Result<()> {
    let mut document = open_book(&args.file)?;
    let id = page_at(&document, &args.path)?;
    let format = CharFormat {
        bold: args.bold,
        italic: args.italic,
        underline: args.underline,
    };
    let mut buffer = RichTextBuffer::new();
    buffer.merge_format(
        FormatChange::bold(format.bold)
            .merge(FormatChange::italic(format.italic))
            .merge(FormatChange::underline(format.underline)),
    );
    buffer.insert_text(&args.text);
    document.set_content(id, buffer.to_markup())?;
    save_book(&mut document, &args.file)?;
    println!("Wrote {} byte(s) to {}", args.text.len(), display_path(&document, id));
    Ok(())
}

fn execute_find(args: FindArgs, prefs: &Preferences) -> Result<()> {
    let document = open_book(&args.file)?;
    let mut options = SearchOptions::new(args.pattern.clone());
    options.case_sensitive = args.case_sensitive || prefs.search.case_sensitive;
    options.whole_word = args.whole_word || prefs.search.whole_word;
    if args.regex {
        options.mode = SearchMode::Regex;
    }

    let mut total = 0usize;
    let mut pages = 0usize;
    for id in document.tree().pages() {
        let text = page_text(&document, id);
        let matches = SearchEngine::new(&text)
            .find_all(&options)
            .with_context(|| format!("invalid pattern `{}`", args.pattern))?;
        if matches.is_empty() {
            continue;
        }
        pages += 1;
        total += matches.len();
        for found in matches {
            println!(
                "{} ({}) {}:{}: {}",
                display_path(&document, id),
                label_of(&document, id),
                found.line,
                found.column,
                found.line_text
            );
        }
    }

    if total == 0 {
        println!("No matches found.");
    } else {
        println!("{total} match(es) in {pages} page(s)");
    }
    Ok(())
}
