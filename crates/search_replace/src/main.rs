use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

fn main() {
    if let Err(error) = run() {
        eprintln!("{error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = std::env::args_os().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        bail!("usage: search_replace <file> < diff");
    };
    if args.next().is_some() {
        bail!("usage: search_replace <file> < diff");
    }

    let mut diff = String::new();
    io::stdin()
        .read_to_string(&mut diff)
        .context("failed to read diff from stdin")?;

    let summary = search_replace::apply_diff_to_file(&path, &diff)
        .with_context(|| format!("failed to patch {}", path.display()))?;

    let mut stdout = io::stdout().lock();
    writeln!(
        stdout,
        "Success. Applied {} block(s) to {} ({} bytes).",
        summary.blocks_applied,
        summary.path.display(),
        summary.bytes_written
    )?;
    Ok(())
}
