use clap::{Parser, Subcommand};

/// Preview gateway: capability tokens for previewing tenant resources
#[derive(Parser)]
#[command(name = "preview", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the preview server
    Serve {
        /// Port to bind (overrides PREVIEW_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage preview tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },

    /// Purge expired file access tokens once and exit
    Sweep,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Return the preview token for a resource, creating one if needed
    Create {
        /// Resource kind: deployment | group
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        id: i64,
        #[arg(long)]
        tenant: i64,
        /// Always mint a new token
        #[arg(long)]
        force: bool,
    },
    /// List a tenant's tokens of one kind
    List {
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        tenant: i64,
    },
    /// Delete a token by id
    Delete {
        #[arg(long = "type")]
        kind: String,
        #[arg(long)]
        id: i64,
        #[arg(long)]
        tenant: i64,
    },
}
