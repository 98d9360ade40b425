//! Writes rupdi's section 1 manual pages
//!
//! One page for the top-level command plus one per subcommand, recursing
//! into nested groups: `rupdi-debug.1`, `rupdi-debug-break.1` and so on.
//! The output directory (default `man`) also gets an `index` listing the
//! pages it holds.
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]

use clap::{Command, CommandFactory};
use std::fs;
use std::io;
use std::path::PathBuf;

#[path = "../cli.rs"]
mod cli;

#[path = "../programmers.rs"]
#[allow(dead_code)]
mod programmers;

/// A rendered page and the name it is filed under, without the `.1`
struct Page {
    name: String,
    roff: Vec<u8>,
}

fn render(cmd: &Command, name: &str) -> io::Result<Page> {
    let mut roff = Vec::new();
    clap_mangen::Man::new(cmd.clone())
        .title(name.to_string())
        .section("1")
        .manual("rupdi manual")
        .render(&mut roff)?;
    Ok(Page {
        name: name.to_string(),
        roff,
    })
}

/// Render `cmd` and every subcommand below it, parents first
fn collect_pages(cmd: &Command, name: &str, pages: &mut Vec<Page>) -> io::Result<()> {
    pages.push(render(cmd, name)?);
    for sub in cmd.get_subcommands().filter(|s| !s.is_hide_set()) {
        collect_pages(sub, &format!("{}-{}", name, sub.get_name()), pages)?;
    }
    Ok(())
}

fn main() -> io::Result<()> {
    let output_dir = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));
    fs::create_dir_all(&output_dir)?;

    let mut pages = Vec::new();
    collect_pages(&cli::Cli::command(), "rupdi", &mut pages)?;

    let mut index = String::new();
    for page in &pages {
        fs::write(output_dir.join(format!("{}.1", page.name)), &page.roff)?;
        index.push_str(&page.name);
        index.push('\n');
    }
    fs::write(output_dir.join("index"), index)?;

    println!("Wrote {} pages to {}", pages.len(), output_dir.display());
    println!("  man -l {}", output_dir.join("rupdi.1").display());
    Ok(())
}
