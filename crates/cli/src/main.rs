mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use imagebank_core::config::Config;
use imagebank_core::permissions::Action;
use imagebank_core::ImageBank;
use uuid::Uuid;

/// imagebank: image bank with duplicate detection
#[derive(Parser)]
#[command(name = "imagebank", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value_t = default_config_path())]
    config: String,

    /// Override the catalog database path from the configuration
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register principals
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// List, create, or delete collections
    Collections {
        /// Acting principal's username
        #[arg(long, short)]
        user: String,

        #[command(subcommand)]
        action: Option<CollectionsAction>,
    },
    /// List, create, rename, or delete labels
    Labels {
        /// Acting principal's username
        #[arg(long, short)]
        user: String,

        #[command(subcommand)]
        action: Option<LabelsAction>,
    },
    /// Import image files or directories into a collection
    Import {
        /// Acting principal's username
        #[arg(long, short)]
        user: String,

        /// Target collection (defaults to the principal's default collection)
        #[arg(long)]
        collection: Option<Uuid>,

        /// Label to attach to every imported image (repeatable)
        #[arg(long = "label")]
        labels: Vec<String>,

        /// Files or directories to import
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// List duplicate links among a principal's images
    Duplicates {
        /// Acting principal's username
        #[arg(long, short)]
        user: String,
    },
    /// Rank images by embedding similarity to one image
    Similar {
        /// Acting principal's username
        #[arg(long, short)]
        user: String,

        image_id: Uuid,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Grant or revoke access to a collection
    Share {
        /// Acting principal's username
        #[arg(long, short)]
        user: String,

        #[command(subcommand)]
        action: ShareAction,
    },
    /// Show catalog status summary
    Status,
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a principal together with its default collection
    Add {
        username: String,

        #[arg(long)]
        display_name: Option<String>,

        /// Pre-computed credential hash; this tool never hashes passwords
        #[arg(long)]
        credential_hash: String,
    },
}

#[derive(Subcommand)]
enum CollectionsAction {
    /// Create a collection
    Add {
        name: String,

        #[arg(long = "label")]
        labels: Vec<String>,
    },
    /// Rename a collection
    Rename { id: Uuid, name: String },
    /// Delete a non-default collection and every image in it
    Rm { id: Uuid },
    /// List the images in a collection
    Show { id: Uuid },
}

#[derive(Subcommand)]
enum LabelsAction {
    /// Create a label
    Add { text: String },
    /// Rename a label
    Rename { id: Uuid, text: String },
    /// Delete a label; tagged images and collections keep everything else
    Rm { id: Uuid },
}

#[derive(Subcommand)]
enum ShareAction {
    /// Grant `grantee` the given actions on a collection and its images
    Grant {
        collection: Uuid,
        grantee: String,

        #[arg(long = "action", value_enum, default_values_t = [ActionArg::View])]
        actions: Vec<ActionArg>,
    },
    /// Remove every grant `grantee` holds on a collection
    Revoke { collection: Uuid, grantee: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ActionArg {
    View,
    Add,
    Change,
    Delete,
}

impl From<ActionArg> for Action {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::View => Action::View,
            ActionArg::Add => Action::Add,
            ActionArg::Change => Action::Change,
            ActionArg::Delete => Action::Delete,
        }
    }
}

fn default_config_path() -> String {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("imagebank")
        .join("imagebank.toml")
        .to_string_lossy()
        .to_string()
}

fn open_bank(cli: &Cli) -> Result<ImageBank> {
    let config_path = PathBuf::from(&cli.config);
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    ImageBank::open(config).context("opening catalog")
}

fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let mut bank = open_bank(&cli)?;

    match cli.command {
        Commands::User { action } => match action {
            UserAction::Add {
                username,
                display_name,
                credential_hash,
            } => commands::users::add(&mut bank, username, display_name, credential_hash)?,
        },
        Commands::Collections { user, action } => {
            let owner = commands::users::resolve(&bank, &user)?;
            match action {
                None => commands::collections::list(&bank, owner)?,
                Some(CollectionsAction::Add { name, labels }) => {
                    commands::collections::add(&mut bank, owner, &name, &labels)?
                }
                Some(CollectionsAction::Rename { id, name }) => {
                    commands::collections::rename(&mut bank, owner, id, name)?
                }
                Some(CollectionsAction::Rm { id }) => {
                    commands::collections::rm(&mut bank, owner, id)?
                }
                Some(CollectionsAction::Show { id }) => {
                    commands::collections::show(&bank, owner, id)?
                }
            }
        }
        Commands::Labels { user, action } => {
            let owner = commands::users::resolve(&bank, &user)?;
            match action {
                None => commands::labels::list(&bank, owner)?,
                Some(LabelsAction::Add { text }) => commands::labels::add(&mut bank, owner, &text)?,
                Some(LabelsAction::Rename { id, text }) => {
                    commands::labels::rename(&mut bank, owner, id, &text)?
                }
                Some(LabelsAction::Rm { id }) => commands::labels::rm(&mut bank, owner, id)?,
            }
        }
        Commands::Import {
            user,
            collection,
            labels,
            paths,
        } => {
            let owner = commands::users::resolve(&bank, &user)?;
            commands::import::run(&mut bank, owner, collection, &labels, &paths)?
        }
        Commands::Duplicates { user } => {
            let owner = commands::users::resolve(&bank, &user)?;
            commands::duplicates::list(&bank, owner)?
        }
        Commands::Similar {
            user,
            image_id,
            limit,
        } => {
            let actor = commands::users::resolve(&bank, &user)?;
            commands::duplicates::similar(&bank, actor, image_id, limit)?
        }
        Commands::Share { user, action } => {
            let owner = commands::users::resolve(&bank, &user)?;
            match action {
                ShareAction::Grant {
                    collection,
                    grantee,
                    actions,
                } => {
                    let actions: Vec<Action> = actions.into_iter().map(Action::from).collect();
                    commands::collections::share(&mut bank, owner, collection, &grantee, &actions)?
                }
                ShareAction::Revoke {
                    collection,
                    grantee,
                } => commands::collections::revoke(&mut bank, owner, collection, &grantee)?,
            }
        }
        Commands::Status => commands::status::run(&bank)?,
    }

    Ok(())
}
