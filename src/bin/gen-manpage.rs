//! Man page generator for tagflasher
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]
//!
//! Writes `tagflasher.1` plus one `tagflasher-<command>.1` page per
//! subcommand.

use clap::CommandFactory;
use std::fs;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

fn render(cmd: clap::Command, path: &Path) -> std::io::Result<()> {
    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;
    fs::write(path, buffer)
}

fn main() -> std::io::Result<()> {
    // Default to ./man directory
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));

    fs::create_dir_all(&output_dir)?;

    let cmd = cli::Cli::command();
    let main_page = output_dir.join("tagflasher.1");
    render(cmd.clone(), &main_page)?;
    println!("Man page generated at: {}", main_page.display());

    for sub in cmd.get_subcommands() {
        let name = format!("tagflasher-{}", sub.get_name());
        let path = output_dir.join(format!("{}.1", name));
        render(sub.clone().name(name), &path)?;
        println!("Man page generated at: {}", path.display());
    }

    println!("\nTo view the man page:");
    println!("  man -l {}", main_page.display());

    Ok(())
}
