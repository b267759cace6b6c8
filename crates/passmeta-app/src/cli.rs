use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use passmeta_db::{PassFileId, SectionItem};
use passmeta_sync::{ConflictChoice, DeletedResolution};

#[derive(Parser)]
#[command(name = "passmeta", about = "PassMeta: encrypted passfiles, synced")]
pub struct Cli {
    /// Path to config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List local passfiles with their sync state
    List,

    /// Create a new passfile (prompts for its passphrase)
    Create {
        #[arg(long)]
        name: String,
        /// Color as #RRGGBB
        #[arg(long)]
        color: Option<String>,
    },

    /// Decrypt a passfile and print its sections
    Show {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
        /// Print secret values instead of masking them
        #[arg(long)]
        reveal: bool,
    },

    /// Add a section, or replace an existing one
    SetSection {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
        /// Section to replace; a new section is created when omitted
        #[arg(long)]
        section_id: Option<String>,
        #[arg(long)]
        name: String,
        /// Item as key=value, repeatable
        #[arg(long = "item", value_parser = parse_item)]
        items: Vec<SectionItem>,
    },

    /// Remove a section
    RemoveSection {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
        #[arg(long)]
        section_id: String,
    },

    /// Change name or color
    Rename {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
        #[arg(long)]
        name: String,
        #[arg(long)]
        color: Option<String>,
    },

    /// Mark a passfile deleted (removed from the server on next sync)
    Delete {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
    },

    /// Undo a local deletion that was not synced yet
    Restore {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
    },

    /// Discard local changes back to the last synced content
    Rollback {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
    },

    /// Re-encrypt a passfile under a new passphrase
    ChangePassphrase {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
    },

    /// Sync all passfiles with the server
    Sync {
        /// Unlock a passfile first so merges can be computed, repeatable
        #[arg(long = "unlock", allow_negative_numbers = true)]
        unlock: Vec<PassFileId>,
        /// Keep syncing at the configured interval until interrupted
        #[arg(long)]
        watch: bool,
    },

    /// Merge concurrent edits, settling every conflict in favour of one side
    Merge {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
        #[arg(long, value_enum)]
        prefer: Prefer,
    },

    /// Settle a passfile the server deleted while it was edited here
    ResolveDeleted {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
        #[arg(long, value_enum)]
        choice: DeletedChoice,
    },

    /// Write a passfile in sealed form to a file
    Export {
        #[arg(long, allow_negative_numbers = true)]
        id: PassFileId,
        #[arg(long)]
        out: PathBuf,
    },

    /// Import a sealed passfile as a new local passfile
    Import {
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Prefer {
    Local,
    Remote,
}

impl From<Prefer> for ConflictChoice {
    fn from(prefer: Prefer) -> Self {
        match prefer {
            Prefer::Local => ConflictChoice::Local,
            Prefer::Remote => ConflictChoice::Remote,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeletedChoice {
    /// Upload the local copy again
    Keep,
    /// Accept the deletion
    Discard,
}

impl From<DeletedChoice> for DeletedResolution {
    fn from(choice: DeletedChoice) -> Self {
        match choice {
            DeletedChoice::Keep => DeletedResolution::Resurrect,
            DeletedChoice::Discard => DeletedResolution::Discard,
        }
    }
}

/// Parse `key=value`. Only the first `=` splits, so values may contain `=`.
pub fn parse_item(raw: &str) -> Result<SectionItem, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("item key must not be empty in {raw}"));
    }
    Ok(SectionItem::new(key, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_item_splits_on_first_equals() {
        let item = parse_item("token=abc=def").unwrap();
        assert_eq!(item.key, "token");
        assert_eq!(item.value, "abc=def");
    }

    #[test]
    fn parse_item_rejects_missing_key() {
        assert!(parse_item("=value").is_err());
        assert!(parse_item("novalue").is_err());
    }

    #[test]
    fn sync_accepts_repeated_unlock() {
        let cli =
            Cli::try_parse_from(["passmeta", "sync", "--unlock", "3", "--unlock", "-1"]).unwrap();
        match cli.command {
            Commands::Sync { unlock, watch } => {
                assert_eq!(unlock, vec![PassFileId(3), PassFileId(-1)]);
                assert!(!watch);
            }
            _ => panic!("expected sync"),
        }
    }

    #[test]
    fn merge_requires_prefer() {
        assert!(Cli::try_parse_from(["passmeta", "merge", "--id", "2"]).is_err());
        let args = ["passmeta", "--json", "merge", "--id", "2", "--prefer", "remote"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Merge {
                prefer: Prefer::Remote,
                ..
            }
        ));
    }

    #[test]
    fn set_section_collects_items() {
        let cli = Cli::try_parse_from([
            "passmeta",
            "set-section",
            "--id",
            "4",
            "--name",
            "Mail",
            "--item",
            "login=me",
            "--item",
            "password=pw",
        ])
        .unwrap();
        let Commands::SetSection { items, section_id, .. } = cli.command else {
            panic!("expected set-section");
        };
        assert_eq!(section_id, None);
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].value, "pw");
    }
}
