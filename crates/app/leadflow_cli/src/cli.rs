use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use leadflow_core::models::auth::RoleHint;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "leadflow", version, about = "Leadflow CRM client")]
pub struct Cli {
    /// Hosted backend base URL. Overrides `LEADFLOW_BACKEND_URL`.
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    /// SQLite file for offline capture. Overrides `LEADFLOW_LOCAL_DB`.
    #[arg(long, global = true)]
    pub local_db: Option<PathBuf>,

    /// Persisted session file. Overrides `LEADFLOW_SESSION_FILE`.
    #[arg(long, global = true)]
    pub session_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in with email and password
    Login(Credentials),
    /// Sign out and forget the stored session
    Logout,
    /// Create an account
    Register {
        #[command(flatten)]
        credentials: Credentials,
        /// Display name
        #[arg(long)]
        name: Option<String>,
    },
    /// Send a password reset email
    ResetPassword {
        #[arg(long)]
        email: String,
    },
    /// Change the signed-in user's password
    UpdatePassword {
        #[arg(long, env = "LEADFLOW_NEW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Show the signed-in identity, profile and admin status
    Whoami,
    /// Evaluate the access guard for a protected resource
    Guard {
        /// Require administrator privileges
        #[arg(long)]
        admin: bool,
    },
    /// Manage leads on the backend
    #[command(subcommand)]
    Leads(LeadCommands),
    /// Manage users (administrators only for role changes)
    #[command(subcommand)]
    Users(UserCommands),
    /// Capture leads offline in the local store
    #[command(subcommand)]
    Local(LocalCommands),
    /// Move offline leads to the signed-in account
    Migrate {
        /// Only report whether there is anything to migrate
        #[arg(long)]
        check: bool,
    },
    /// Print version
    Version,
}

#[derive(Args, Debug)]
pub struct Credentials {
    #[arg(long)]
    pub email: String,
    #[arg(long, env = "LEADFLOW_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Args, Debug, Default)]
pub struct LeadFields {
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub company: Option<String>,
    /// Pipeline stage; unknown values become `new`
    #[arg(long)]
    pub stage: Option<String>,
    #[arg(long)]
    pub notes: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum LeadCommands {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        fields: LeadFields,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        name: Option<String>,
        #[command(flatten)]
        fields: LeadFields,
    },
    Delete {
        id: Uuid,
    },
    /// Stage history of a lead
    History {
        id: Uuid,
    },
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    List,
    SetRole {
        user_id: String,
        #[arg(value_parser = parse_role)]
        role: RoleHint,
    },
}

#[derive(Subcommand, Debug)]
pub enum LocalCommands {
    Add {
        #[arg(long)]
        name: String,
        #[command(flatten)]
        fields: LeadFields,
    },
    List,
}

fn parse_role(s: &str) -> Result<RoleHint, String> {
    s.parse()
}
