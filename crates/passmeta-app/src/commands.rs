//! Command bodies. Passphrases are read by the caller; each command turns
//! its result into an `Outcome` whose data is the lines to print.

use std::path::Path;
use std::time::Duration;

use passmeta_core::Outcome;
use passmeta_crypto::Passphrase;
use passmeta_db::{PassFile, PassFileId, Section, SectionItem};
use passmeta_sync::{
    CancelToken, ConflictChoice, DeletedResolution, SyncEngine, SyncError, SyncEvent, SyncReport,
    SyncResult, SyncState,
};
use tokio::sync::mpsc;

use crate::setup::Services;

pub type Lines = Vec<String>;

fn require_engine(services: &Services) -> SyncResult<&SyncEngine> {
    services.engine.as_ref().ok_or_else(|| {
        SyncError::IllegalState("no remote server configured, set [remote] base_url".into())
    })
}

fn summary(pf: &PassFile) -> String {
    let color = pf.color.as_deref().unwrap_or("-");
    let mut line = format!("{}\t{}\t{}\tv{}\t{}", pf.id, pf.name, color, pf.version, pf.state);
    if let Some(problem) = &pf.problem {
        line.push_str(&format!("\t[{problem}]"));
    }
    line
}

fn section_lines(sections: &[Section], reveal: bool) -> Lines {
    let mut lines = Vec::new();
    for section in sections {
        lines.push(format!("[{}] {}", section.id, section.name));
        for item in &section.items {
            let value = if reveal { item.value.as_str() } else { "********" };
            if item.comment.is_empty() {
                lines.push(format!("  {} = {value}", item.key));
            } else {
                lines.push(format!("  {} = {value}  # {}", item.key, item.comment));
            }
        }
    }
    lines
}

pub fn describe_state(state: &SyncState) -> String {
    match state {
        SyncState::Synced => "synced".into(),
        SyncState::NeedsMerge { conflicts } if conflicts.is_empty() => {
            "needs merge (run sync again)".into()
        }
        SyncState::NeedsMerge { conflicts } => {
            let ids: Vec<&str> = conflicts.iter().map(|c| c.section_id.as_str()).collect();
            format!("needs merge, conflicting sections: {}", ids.join(", "))
        }
        SyncState::Conflict { detail } => format!("conflict: {detail}"),
        SyncState::Failed(failure) => format!("failed: {failure:?}"),
        SyncState::Cancelled => "cancelled".into(),
    }
}

fn report_line(report: &SyncReport) -> String {
    let mut line = format!("{}\t{:?}\t{}", report.id, report.action, describe_state(&report.state));
    if let Some(new_id) = report.new_id {
        line.push_str(&format!("\t-> {new_id}"));
    }
    line
}

pub async fn list(services: &Services) -> Outcome<Lines> {
    let result = services.manager.list().await;
    Outcome::from(result).map(|files| {
        let count = files.len();
        let mut lines: Lines = files.iter().map(summary).collect();
        lines.push(format!("({count} passfiles)"));
        lines
    })
}

pub async fn create(
    services: &Services,
    name: &str,
    color: Option<&str>,
    passphrase: Passphrase,
) -> Outcome<Lines> {
    match services.manager.create(name, color, passphrase, Vec::new()).await {
        Ok(pf) => Outcome::success_with(vec![pf.id.to_string()], format!("Created {}", pf.name)),
        Err(e) => Outcome::failure(e.to_string()),
    }
}

pub async fn show(
    services: &Services,
    id: PassFileId,
    passphrase: Passphrase,
    reveal: bool,
) -> Outcome<Lines> {
    let result: SyncResult<Lines> = async {
        let pf = services.manager.get(id).await?;
        let sections = services.manager.decrypt(id, passphrase).await?;
        let mut lines = vec![summary(&pf)];
        lines.extend(pf.status_lines());
        lines.extend(section_lines(&sections, reveal));
        Ok(lines)
    }
    .await;
    result.into()
}

pub async fn set_section(
    services: &Services,
    id: PassFileId,
    passphrase: Passphrase,
    section_id: Option<String>,
    name: &str,
    items: Vec<SectionItem>,
) -> Outcome<Lines> {
    let result: SyncResult<Lines> = async {
        services.manager.decrypt(id, passphrase).await?;
        let section = match section_id {
            Some(section_id) => Section::with_id(section_id, name, items),
            None => Section::new(name, items),
        };
        let section_id = section.id.clone();
        let pf = services.manager.upsert_section(id, section).await?;
        Ok(vec![section_id, summary(&pf)])
    }
    .await;
    result.into()
}

pub async fn remove_section(
    services: &Services,
    id: PassFileId,
    passphrase: Passphrase,
    section_id: &str,
) -> Outcome<Lines> {
    let result: SyncResult<Lines> = async {
        services.manager.decrypt(id, passphrase).await?;
        let pf = services.manager.remove_section(id, section_id).await?;
        Ok(vec![summary(&pf)])
    }
    .await;
    result.into()
}

pub async fn rename(
    services: &Services,
    id: PassFileId,
    name: &str,
    color: Option<&str>,
) -> Outcome<Lines> {
    Outcome::from(services.manager.update_info(id, name, color).await)
        .map(|pf| vec![summary(&pf)])
}

pub async fn delete(services: &Services, id: PassFileId) -> Outcome<Lines> {
    match services.manager.delete(id).await {
        Ok(Some(pf)) => Outcome::success_with(
            vec![summary(&pf)],
            "Marked deleted, removed from the server on next sync",
        ),
        Ok(None) => Outcome::success_with(Vec::new(), format!("Deleted {id}")),
        Err(e) => Outcome::failure(e.to_string()),
    }
}

pub async fn restore(services: &Services, id: PassFileId) -> Outcome<Lines> {
    Outcome::from(services.manager.restore(id).await).map(|pf| vec![summary(&pf)])
}

pub async fn rollback(services: &Services, id: PassFileId) -> Outcome<Lines> {
    Outcome::from(services.manager.rollback(id).await).map(|pf| vec![summary(&pf)])
}

pub async fn change_passphrase(
    services: &Services,
    id: PassFileId,
    old: Passphrase,
    new: Passphrase,
) -> Outcome<Lines> {
    let result: SyncResult<Lines> = async {
        services.manager.decrypt(id, old).await?;
        let pf = services.manager.change_passphrase(id, new).await?;
        Ok(vec![summary(&pf)])
    }
    .await;
    result.into()
}

/// Unlock the given passfiles, then run one full sync pass.
pub async fn sync(services: &Services, unlock: Vec<(PassFileId, Passphrase)>) -> Outcome<Lines> {
    let result: SyncResult<Lines> = async {
        let engine = require_engine(services)?;
        for (id, passphrase) in unlock {
            services.manager.decrypt(id, passphrase).await?;
        }
        let reports = engine.sync_all(&CancelToken::new()).await?;
        Ok(reports.iter().map(report_line).collect())
    }
    .await;
    match result {
        Ok(lines) => {
            let message = format!("Synced {} passfiles", lines.len());
            Outcome::success_with(lines, message)
        }
        Err(e) => Outcome::failure(e.to_string()),
    }
}

/// Sync every `interval` until `cancel` fires, printing each finished item.
pub async fn watch(
    services: &Services,
    unlock: Vec<(PassFileId, Passphrase)>,
    interval: Duration,
    cancel: CancelToken,
) -> Outcome<Lines> {
    let result: SyncResult<()> = async {
        let engine = require_engine(services)?;
        for (id, passphrase) in unlock {
            services.manager.decrypt(id, passphrase).await?;
        }
        let (tx, mut rx) = mpsc::channel(64);
        let engine = engine.clone().with_events(tx);
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    SyncEvent::ItemFinished(report) => println!("{}", report_line(&report)),
                    SyncEvent::BatchFinished { total, failed } => {
                        tracing::info!("Sync pass done: {total} passfiles, {failed} failed")
                    }
                    SyncEvent::BatchFailed { error } => tracing::warn!("Sync pass failed: {error}"),
                }
            }
        });
        engine.run_periodic(interval, cancel).await;
        let _ = printer.await;
        Ok(())
    }
    .await;
    Outcome::from(result).map(|_| Vec::new())
}

/// Sync one passfile and settle all of its conflicts in favour of one side.
pub async fn merge(
    services: &Services,
    id: PassFileId,
    passphrase: Passphrase,
    choice: ConflictChoice,
) -> Outcome<Lines> {
    let result: SyncResult<SyncReport> = async {
        let engine = require_engine(services)?;
        services.manager.decrypt(id, passphrase).await?;

        let mut report = engine.sync_one(id).await?;
        // A version conflict on push defers the merge to the next pass.
        if matches!(&report.state, SyncState::NeedsMerge { conflicts } if conflicts.is_empty()) {
            report = engine.sync_one(id).await?;
        }
        let conflicts = match &report.state {
            SyncState::NeedsMerge { conflicts } => conflicts.clone(),
            _ => return Ok(report),
        };
        for conflict in &conflicts {
            engine.resolve(id, &conflict.section_id, choice.clone())?;
        }
        engine.apply_merge(id).await
    }
    .await;
    match result {
        Ok(report) if report.state == SyncState::Synced => {
            Outcome::success_with(vec![report_line(&report)], format!("Passfile {id} merged"))
        }
        Ok(report) => Outcome::failure(format!(
            "Passfile {id} not merged: {}",
            describe_state(&report.state)
        )),
        Err(e) => Outcome::failure(e.to_string()),
    }
}

pub async fn resolve_deleted(
    services: &Services,
    id: PassFileId,
    resolution: DeletedResolution,
) -> Outcome<Lines> {
    match services.manager.resolve_deleted(id, resolution).await {
        Ok(Some(pf)) => Outcome::success_with(vec![summary(&pf)], format!("Kept as {}", pf.id)),
        Ok(None) => Outcome::success_with(Vec::new(), format!("Discarded {id}")),
        Err(e) => Outcome::failure(e.to_string()),
    }
}

pub async fn export(services: &Services, id: PassFileId, out: &Path) -> Outcome<Lines> {
    Outcome::from(services.manager.export_encrypted(id, out).await)
        .map(|_| vec![out.display().to_string()])
}

pub async fn import(services: &Services, file: &Path, passphrase: Passphrase) -> Outcome<Lines> {
    Outcome::from(services.manager.import_encrypted(file, passphrase).await)
        .map(|pf| vec![summary(&pf)])
}
