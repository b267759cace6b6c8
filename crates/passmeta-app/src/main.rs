mod cli;
mod commands;
mod setup;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use passmeta_core::config::AppConfig;
use passmeta_core::{lifecycle, Outcome};
use passmeta_crypto::Passphrase;
use passmeta_db::PassFileId;
use passmeta_sync::CancelToken;

use cli::{Cli, Commands};
use commands::Lines;
use setup::{create_services, prompt_new_passphrase, prompt_passphrase};

fn prompt_for(id: PassFileId) -> Result<Passphrase> {
    prompt_passphrase(&format!("Passphrase for passfile {id}: "))
}

fn prompt_each(ids: &[PassFileId]) -> Result<Vec<(PassFileId, Passphrase)>> {
    ids.iter().map(|&id| Ok((id, prompt_for(id)?))).collect()
}

fn render(outcome: &Outcome<Lines>, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    for line in outcome.data.iter().flatten() {
        println!("{line}");
    }
    match (&outcome.message, outcome.ok) {
        (Some(message), true) => println!("{message}"),
        (Some(message), false) => eprintln!("Error: {message}"),
        (None, _) => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    lifecycle::init_tracing();
    lifecycle::log_startup();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(cli.config.as_deref());
    let services = create_services(&config)?;

    let outcome = match cli.command {
        Commands::List => commands::list(&services).await,
        Commands::Create { name, color } => {
            let passphrase = prompt_new_passphrase()?;
            commands::create(&services, &name, color.as_deref(), passphrase).await
        }
        Commands::Show { id, reveal } => {
            let passphrase = prompt_for(id)?;
            commands::show(&services, id, passphrase, reveal).await
        }
        Commands::SetSection {
            id,
            section_id,
            name,
            items,
        } => {
            let passphrase = prompt_for(id)?;
            commands::set_section(&services, id, passphrase, section_id, &name, items).await
        }
        Commands::RemoveSection { id, section_id } => {
            let passphrase = prompt_for(id)?;
            commands::remove_section(&services, id, passphrase, &section_id).await
        }
        Commands::Rename { id, name, color } => {
            commands::rename(&services, id, &name, color.as_deref()).await
        }
        Commands::Delete { id } => commands::delete(&services, id).await,
        Commands::Restore { id } => commands::restore(&services, id).await,
        Commands::Rollback { id } => commands::rollback(&services, id).await,
        Commands::ChangePassphrase { id } => {
            let old = prompt_for(id)?;
            let new = prompt_new_passphrase()?;
            commands::change_passphrase(&services, id, old, new).await
        }
        Commands::Sync { unlock, watch } => {
            let unlock = prompt_each(&unlock)?;
            match (watch, config.sync.auto_sync_interval()) {
                (false, _) => commands::sync(&services, unlock).await,
                (true, None) => Outcome::failure(
                    "--watch needs sync.auto_sync_interval_secs set in the config",
                ),
                (true, Some(interval)) => {
                    let cancel = CancelToken::new();
                    let on_interrupt = cancel.clone();
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            on_interrupt.cancel();
                        }
                    });
                    tracing::info!("Syncing every {}s, Ctrl-C to stop", interval.as_secs());
                    commands::watch(&services, unlock, interval, cancel).await
                }
            }
        }
        Commands::Merge { id, prefer } => {
            let passphrase = prompt_for(id)?;
            commands::merge(&services, id, passphrase, prefer.into()).await
        }
        Commands::ResolveDeleted { id, choice } => {
            commands::resolve_deleted(&services, id, choice.into()).await
        }
        Commands::Export { id, out } => commands::export(&services, id, &out).await,
        Commands::Import { file } => {
            let passphrase = prompt_passphrase("Passphrase of the imported passfile: ")?;
            commands::import(&services, &file, passphrase).await
        }
    };

    render(&outcome, cli.json)?;
    services.keys.clear();
    lifecycle::log_shutdown();

    Ok(if outcome.is_bad() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
