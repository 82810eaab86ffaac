use std::error::Error;
use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn cli(dir: &Path) -> Result<Command, Box<dyn Error>> {
    let mut command = Command::cargo_bin("rustbook-cli")?;
    command.arg("--config").arg(dir.join("rustbook.json"));
    Ok(command)
}

#[test]
fn new_sample_book_prints_its_outline() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let book = dir.path().join("sample.ebk");

    cli(dir.path())?
        .arg("new")
        .arg(&book)
        .args(["--sample", "--title", "Travel Notes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    let bytes = fs::read(&book)?;
    assert!(bytes.starts_with(b"EBK\0"));

    cli(dir.path())?
        .arg("tree")
        .arg(&book)
        .assert()
        .success()
        .stdout(
            "Travel Notes [book] /\n  Chapter 1 [chapter] 0\n    Page 1.1 [page] 0/0\n    Page 1.2 [page] 0/1\n",
        );
    Ok(())
}

#[test]
fn legacy_books_have_no_header() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let book = dir.path().join("legacy.ebk");
    cli(dir.path())?
        .arg("new")
        .arg(&book)
        .arg("--legacy")
        .assert()
        .success();
    let bytes = fs::read(&book)?;
    assert_eq!(&bytes[..4], &[0, 0, 0, 1]);
    Ok(())
}

#[test]
fn add_rename_remove_edit_the_tree() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let book = dir.path().join("book.ebk");
    cli(dir.path())?.arg("new").arg(&book).assert().success();

    cli(dir.path())?
        .arg("add")
        .arg(&book)
        .arg("chapter")
        .assert()
        .success()
        .stdout(predicate::str::contains("Added chapter at 0"));
    cli(dir.path())?
        .arg("add")
        .arg(&book)
        .args(["page", "--at", "0", "--label", "Opening"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added page at 0/0"));
    // A page anchor adds a sibling, not a child.
    cli(dir.path())?
        .arg("add")
        .arg(&book)
        .args(["page", "--at", "0/0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added page at 0/1"));
    cli(dir.path())?
        .arg("rename")
        .arg(&book)
        .args(["0", "Part One"])
        .assert()
        .success();

    cli(dir.path())?
        .arg("tree")
        .arg(&book)
        .assert()
        .success()
        .stdout(predicate::str::contains("  Part One [chapter] 0"))
        .stdout(predicate::str::contains("    Opening [page] 0/0"))
        .stdout(predicate::str::contains("    New Page [page] 0/1"));

    cli(dir.path())?
        .arg("remove")
        .arg(&book)
        .arg("0")
        .assert()
        .success()
        .stdout(predicate::str::contains("Removed 3 node(s)"));
    cli(dir.path())?
        .arg("remove")
        .arg(&book)
        .arg("/")
        .assert()
        .failure()
        .stderr(predicate::str::contains("root cannot be removed"));
    cli(dir.path())?
        .arg("tree")
        .arg(&book)
        .assert()
        .success()
        .stdout("My Book [book] /\n");
    Ok(())
}

#[test]
fn write_and_cat_page_content() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let book = dir.path().join("book.ebk");
    cli(dir.path())?
        .arg("new")
        .arg(&book)
        .arg("--sample")
        .assert()
        .success();

    cli(dir.path())?
        .arg("write")
        .arg(&book)
        .args(["0/1", "Bold & brave", "--bold"])
        .assert()
        .success();
    cli(dir.path())?
        .arg("cat")
        .arg(&book)
        .arg("0/1")
        .assert()
        .success()
        .stdout("Bold & brave\n");
    cli(dir.path())?
        .arg("cat")
        .arg(&book)
        .args(["0/1", "--markup"])
        .assert()
        .success()
        .stdout("<b>Bold &amp; brave</b>\n");
    cli(dir.path())?
        .arg("cat")
        .arg(&book)
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("is a chapter, not a page"));
    cli(dir.path())?
        .arg("cat")
        .arg(&book)
        .arg("0/7")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no node at position `0/7`"));
    Ok(())
}

#[test]
fn labels_come_from_the_config_file() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    fs::write(
        dir.path().join("rustbook.json"),
        r#"{ "book": { "root_label": "Journal", "new_chapter_label": "Week" } }"#,
    )?;
    let book = dir.path().join("journal.ebk");
    cli(dir.path())?.arg("new").arg(&book).assert().success();
    cli(dir.path())?
        .arg("add")
        .arg(&book)
        .arg("chapter")
        .assert()
        .success();
    cli(dir.path())?
        .arg("tree")
        .arg(&book)
        .assert()
        .success()
        .stdout("Journal [book] /\n  Week [chapter] 0\n");
    Ok(())
}

#[test]
fn missing_file_is_reported() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    cli(dir.path())?
        .arg("tree")
        .arg(dir.path().join("absent.ebk"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open"));
    Ok(())
}
