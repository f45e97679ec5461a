//! CLI argument parsing with clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::catalog::EntityKind;

/// Chat front-end for a generative image model.
#[derive(Parser, Debug)]
#[command(name = "imagen-bot", version, about)]
pub struct Cli {
    /// Config file path override.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Catalog file (types, styles, artists) override.
    #[arg(long, global = true)]
    pub styles: Option<PathBuf>,

    /// Prompt templates file override.
    #[arg(long, global = true)]
    pub prompts: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// What to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Chat on the console: one event per stdin line, one JSON operation per stdout line.
    Chat {
        /// Chat id of the session; positive ids behave as private chats.
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        chat_id: i64,
        /// User id of the session.
        #[arg(long, default_value_t = 1)]
        user_id: i64,
    },
    /// Print the settings parsed from a command line as JSON.
    Parse {
        /// Text as typed in chat, e.g. `"!cat -t1 -s?"`.
        text: String,
    },
    /// Generate one image and save it.
    Generate {
        /// Text as typed in chat.
        text: String,
        /// Source image to edit or redraw.
        #[arg(short, long)]
        image: Option<PathBuf>,
        /// Output file path (auto-generated if not specified).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List catalog entries.
    List {
        /// Which catalog to print.
        #[arg(value_enum)]
        what: ListKind,
    },
}

/// Catalog selector for `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListKind {
    /// Types.
    Types,
    /// Styles, grouped.
    Styles,
    /// Artists.
    Artists,
}

impl From<ListKind> for EntityKind {
    fn from(kind: ListKind) -> Self {
        match kind {
            ListKind::Types => EntityKind::Type,
            ListKind::Styles => EntityKind::Style,
            ListKind::Artists => EntityKind::Artist,
        }
    }
}
