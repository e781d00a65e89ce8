use clap::{Parser, Subcommand};

use openice_envoy::config::SERVER_URL_ENV;

#[derive(Parser, Debug)]
#[command(name = "envoy", version, about = "Terminal client for the OpenICE chat assistant")]
pub struct Cli {
    /// Server URL for this run, overriding the config file.
    #[arg(long, global = true, env = SERVER_URL_ENV)]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start an interactive chat (the default).
    Chat {
        /// Continue the last chat instead of starting a new one.
        #[arg(long)]
        resume: bool,
    },
    /// Send a single message and print the reply.
    Ask {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Show or change the configuration.
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    Show,
    /// Set the server URL.
    SetServer { url: String },
}
