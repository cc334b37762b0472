//! Subcommand implementations.

use std::sync::Arc;

use chrono::Utc;
use leadflow_core::auth::AuthError;
use leadflow_core::auth::guard::{AccessGuard, GuardOutcome, GuardRoutes};
use leadflow_core::auth::session::SessionManager;
use leadflow_core::backend::rest::HostedBackend;
use leadflow_core::config::ClientConfig;
use leadflow_core::leads::LeadService;
use leadflow_core::migration::MigrationRunner;
use leadflow_core::models::auth::Identity;
use leadflow_core::models::leads::{LeadDraft, LeadPatch, LeadStage, LocalLead, RemoteLead};
use leadflow_core::notify::Notifier;
use leadflow_core::storage::FileStorage;
use leadflow_core::store::{LocalLeads, SqliteStore};
use leadflow_core::users::UserDirectory;

use crate::cli::{Cli, Commands, LeadCommands, LeadFields, LocalCommands, UserCommands};
use crate::notifier::ConsoleNotifier;
use crate::{Error, Result};

pub async fn dispatch(args: Cli) -> Result<()> {
    let config = resolve_config(&args);
    log::debug!("backend {}", config.backend_url);

    match args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Local(command) => local(&config, command).await,
        Commands::Migrate { check: true } => {
            let store = Arc::new(SqliteStore::open(&config.local_db_path).await?);
            let runner = MigrationRunner::new(store.clone(), backend(&config)?, notifier());
            if runner.check_needs_migration().await {
                println!("Local leads are waiting to be migrated");
            } else {
                println!("No local leads to migrate");
            }
            store.close().await;
            Ok(())
        }
        command => {
            let remote = Remote::connect(&config).await?;
            let outcome = remote.run(&config, command).await;
            remote.session.shutdown();
            outcome
        }
    }
}

fn resolve_config(args: &Cli) -> ClientConfig {
    let mut config = ClientConfig::from_env();
    if let Some(url) = &args.backend_url {
        config.backend_url = url.clone();
    }
    if let Some(path) = &args.local_db {
        config.local_db_path = path.clone();
    }
    if let Some(path) = &args.session_file {
        config.session_file = path.clone();
    }
    config
}

fn notifier() -> Arc<dyn Notifier> {
    Arc::new(ConsoleNotifier)
}

fn backend(config: &ClientConfig) -> Result<Arc<HostedBackend>> {
    let storage = Arc::new(FileStorage::new(&config.session_file));
    Ok(Arc::new(HostedBackend::new(config, storage)?))
}

// ---------------------------------------------------------------------------
// Offline capture
// ---------------------------------------------------------------------------

async fn local(config: &ClientConfig, command: LocalCommands) -> Result<()> {
    let store = SqliteStore::open(&config.local_db_path).await?;
    let leads = LocalLeads::new(&store);

    match command {
        LocalCommands::Add { name, fields } => {
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::Custom("Lead name is required".into()));
            }
            let now = Utc::now();
            let lead = LocalLead {
                id: 0,
                name: name.to_string(),
                email: fields.email,
                phone: fields.phone,
                company: fields.company,
                stage: fields
                    .stage
                    .unwrap_or_else(|| LeadStage::New.as_str().to_string()),
                notes: fields.notes,
                created_at: now,
                updated_at: now,
            };
            let id = leads.add_lead(&lead).await?;
            println!("Saved local lead #{id}");
        }
        LocalCommands::List => {
            for lead in leads.leads().await? {
                println!(
                    "#{:<4} {:<12} {}{}",
                    lead.id,
                    lead.stage,
                    lead.name,
                    lead.company.map(|c| format!(" ({c})")).unwrap_or_default()
                );
            }
        }
    }

    store.close().await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands that talk to the backend
// ---------------------------------------------------------------------------

struct Remote {
    backend: Arc<HostedBackend>,
    session: SessionManager,
    notifier: Arc<dyn Notifier>,
}

impl Remote {
    async fn connect(config: &ClientConfig) -> Result<Self> {
        let backend = backend(config)?;
        let notifier = notifier();
        let session = SessionManager::start(backend.clone(), backend.clone(), notifier.clone());
        session.settled().await;
        Ok(Self {
            backend,
            session,
            notifier,
        })
    }

    fn actor(&self) -> Result<Identity> {
        self.session
            .current_identity()
            .ok_or_else(|| AuthError::NotSignedIn.into())
    }

    async fn run(&self, config: &ClientConfig, command: Commands) -> Result<()> {
        match command {
            Commands::Login(credentials) => {
                self.session
                    .sign_in(&credentials.email, &credentials.password)
                    .await?;
            }
            Commands::Logout => self.session.sign_out().await?,
            Commands::Register { credentials, name } => {
                self.session
                    .sign_up(&credentials.email, &credentials.password, name.as_deref())
                    .await?;
            }
            Commands::ResetPassword { email } => {
                self.session.request_password_reset(&email).await?
            }
            Commands::UpdatePassword { password } => self.session.update_password(&password).await?,
            Commands::Whoami => self.whoami().await,
            Commands::Guard { admin } => {
                let mut guard = AccessGuard::new(GuardRoutes::default(), self.notifier.clone());
                match guard.check(&self.session, admin).await {
                    GuardOutcome::Render => println!("granted"),
                    GuardOutcome::Loading => println!("loading"),
                    GuardOutcome::Redirect { to, .. } => {
                        return Err(Error::Custom(format!("redirect to {to}")));
                    }
                }
            }
            Commands::Leads(command) => self.leads(command).await?,
            Commands::Users(command) => self.users(command).await?,
            Commands::Migrate { .. } => {
                let actor = self.actor()?;
                let store = Arc::new(SqliteStore::open(&config.local_db_path).await?);
                let runner =
                    MigrationRunner::new(store.clone(), self.backend.clone(), self.notifier.clone());
                let migrated = runner.migrate(&actor.id).await;
                store.close().await;
                if !migrated {
                    return Err(Error::Custom("migration failed".into()));
                }
            }
            Commands::Version | Commands::Local(_) => {
                return Err(Error::Custom("command does not use the backend".into()));
            }
        }
        Ok(())
    }

    async fn whoami(&self) {
        let snapshot = self.session.snapshot();
        let Some(identity) = snapshot.identity() else {
            println!("Not signed in");
            return;
        };
        println!("id:    {}", identity.id);
        println!("email: {}", identity.email.as_deref().unwrap_or("-"));
        match snapshot.profile() {
            Some(profile) => {
                println!("name:  {}", profile.display_name());
                println!("role:  {}", profile.role_hint);
            }
            None => println!("profile: unavailable"),
        }
        let admin = self.session.admin_capability().await.is_admin();
        println!("admin: {}", if admin { "yes" } else { "no" });
    }

    async fn leads(&self, command: LeadCommands) -> Result<()> {
        let service = LeadService::new(self.backend.clone(), self.notifier.clone());
        match command {
            LeadCommands::List => {
                for lead in service.list().await? {
                    print_lead(&lead);
                }
            }
            LeadCommands::Add { name, fields } => {
                let actor = self.actor()?;
                let draft = LeadDraft {
                    name,
                    email: fields.email,
                    phone: fields.phone,
                    company: fields.company,
                    stage: fields.stage,
                    notes: fields.notes,
                };
                print_lead(&service.create(&actor.id, draft).await?);
            }
            LeadCommands::Update { id, name, fields } => {
                let actor = self.actor()?;
                print_lead(&service.update(&actor.id, id, patch(name, fields)).await?);
            }
            LeadCommands::Delete { id } => service.delete(id).await?,
            LeadCommands::History { id } => {
                for entry in service.history(id).await? {
                    println!(
                        "{}  {} -> {}  by {}{}",
                        entry.created_at.format("%Y-%m-%d %H:%M"),
                        entry.from_stage.map(|s| s.as_str()).unwrap_or("-"),
                        entry.to_stage,
                        entry.updated_by,
                        entry.notes.map(|n| format!("  {n}")).unwrap_or_default()
                    );
                }
            }
        }
        Ok(())
    }

    async fn users(&self, command: UserCommands) -> Result<()> {
        let directory = UserDirectory::new(self.backend.clone(), self.notifier.clone());
        match command {
            UserCommands::List => {
                for profile in directory.list().await? {
                    println!(
                        "{}  {:<6} {}",
                        profile.id,
                        profile.role_hint.as_str(),
                        profile.display_name()
                    );
                }
            }
            UserCommands::SetRole { user_id, role } => {
                let capability = self.session.admin_capability().await;
                directory.set_role(&capability, &user_id, role).await?;
            }
        }
        Ok(())
    }
}

/// Build a patch from CLI fields. Stage names outside the pipeline become `new`.
fn patch(name: Option<String>, fields: LeadFields) -> LeadPatch {
    LeadPatch {
        name,
        email: fields.email,
        phone: fields.phone,
        company: fields.company,
        stage: fields.stage.as_deref().map(LeadStage::from_lossy),
        notes: fields.notes,
        updated_at: None,
    }
}

fn print_lead(lead: &RemoteLead) {
    println!(
        "{}  {:<12} {}{}",
        lead.id,
        lead.stage.as_str(),
        lead.name,
        lead.company
            .as_deref()
            .map(|c| format!(" ({c})"))
            .unwrap_or_default()
    );
}
