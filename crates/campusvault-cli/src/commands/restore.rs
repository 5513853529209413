use super::{build_manager, describe_snapshot};
use anyhow::{bail, Context, Result};
use campusvault_core::Snapshot;
use campusvault_service::Config;
use campusvault_storage::restore::safety_copy_path;
use chrono::Local;
use std::io::{BufRead, Write};
use std::path::Path;

/// Operator's answer to the snapshot menu.
#[derive(Debug, PartialEq, Eq)]
enum Selection {
    Quit,
    Index(usize),
}

/// Restore the live database from a snapshot.
///
/// Without `--snapshot`, the operator picks from a numbered list. Quitting
/// or declining the confirmation is not an error; an invalid choice is.
pub async fn run(config: &Config, snapshot: Option<&str>, yes: bool) -> Result<()> {
    let manager = build_manager(config)?;
    let live = manager.settings().database_path.clone();

    let chosen = match snapshot {
        Some(name) => manager
            .find_backup(name)
            .await
            .with_context(|| format!("no backup named `{name}`"))?,
        None => {
            let snapshots = manager
                .list_backups()
                .await
                .context("failed to list backups")?;
            if snapshots.is_empty() {
                bail!(
                    "no backups found in {}",
                    manager.settings().backup_dir.display()
                );
            }

            let selection = prompt_selection(
                &snapshots,
                &mut std::io::stdin().lock(),
                &mut std::io::stdout().lock(),
            )?;
            match selection {
                Selection::Quit => {
                    println!("Restore cancelled.");
                    return Ok(());
                }
                Selection::Index(index) => snapshots[index].clone(),
            }
        }
    };

    if !yes
        && !confirm(
            &chosen,
            &live,
            &mut std::io::stdin().lock(),
            &mut std::io::stdout().lock(),
        )?
    {
        println!("Restore cancelled.");
        return Ok(());
    }

    let outcome = manager
        .restore(&chosen.path)
        .await
        .with_context(|| format!("failed to restore {}", chosen.name))?;

    println!(
        "✅ Restored {} into {} ({:.2} MB)",
        chosen.name,
        outcome.live.display(),
        campusvault_core::snapshot::bytes_to_mb(outcome.restored_bytes)
    );
    match outcome.safety_copy {
        Some(path) => println!("Previous database saved as {}", path.display()),
        None => println!("No previous database existed; nothing was set aside."),
    }

    Ok(())
}

fn prompt_selection<R: BufRead, W: Write>(
    snapshots: &[Snapshot],
    input: &mut R,
    output: &mut W,
) -> Result<Selection> {
    let now = Local::now();
    writeln!(output, "Available backups:")?;
    for (index, snapshot) in snapshots.iter().enumerate() {
        writeln!(output, "  {:>3}. {}", index + 1, describe_snapshot(snapshot, &now))?;
    }
    write!(
        output,
        "Select a backup to restore (1-{}, q to quit): ",
        snapshots.len()
    )?;
    output.flush()?;

    let mut answer = String::new();
    if input.read_line(&mut answer)? == 0 {
        return Ok(Selection::Quit);
    }
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case("q") {
        return Ok(Selection::Quit);
    }

    match answer.parse::<usize>() {
        Ok(n) if (1..=snapshots.len()).contains(&n) => Ok(Selection::Index(n - 1)),
        _ => bail!("invalid selection `{answer}`"),
    }
}

fn confirm<R: BufRead, W: Write>(
    snapshot: &Snapshot,
    live: &Path,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    writeln!(output)?;
    writeln!(output, "⚠️  This will replace {}", live.display())?;
    writeln!(output, "   with {}", snapshot.name)?;
    writeln!(
        output,
        "   The current database will be kept as {}",
        safety_copy_path(live).display()
    )?;
    write!(output, "Type 'yes' to continue: ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
