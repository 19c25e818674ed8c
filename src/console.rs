use anyhow::{bail, Result};

use crate::engine::Updater;
use crate::svc::SystemServices;

/// One-shot text pass: enumerate the candidate set, run a bulk update, and
/// print the engine log. Connectivity gating lives here, not in the engine.
pub fn run<S: SystemServices>(mut updater: Updater<S>, online: bool) -> Result<()> {
    if !online {
        bail!("network connectivity couldn't be established");
    }

    updater.refresh()?;

    let rows = updater.candidate_rows();
    if rows.is_empty() {
        if updater.manifest().is_empty() {
            println!("Version list is empty; fetch from the CDN or let the OS repopulate it.");
        } else {
            println!("All titles are up to date.");
        }
        return Ok(());
    }

    println!("{} title(s) need attention:", rows.len());
    for (id, candidate) in &rows {
        let view = updater.title_view(*id);
        let marker = if candidate.needs_launch_bump {
            " [launch version required]"
        } else {
            ""
        };
        println!(
            "  [{id}] {}  {} -> {}{marker}",
            candidate.name, view.installed_version, view.available_version
        );
    }

    println!();
    updater.update_all();

    for line in updater.log_lines() {
        println!("{line}");
    }
    Ok(())
}
