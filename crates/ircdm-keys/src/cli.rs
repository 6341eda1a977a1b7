//! CLI command definitions and execution

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::debug;

use ircdm_core::{
    AcceptanceOutcome, CoreError, ImportOutcome, KeyExchange, PeerId, SecretStore,
    SqliteSecretStore,
};
use ircdm_crypto::ExternalPayload;

use crate::config::{CliOverrides, Config, StorageConfig};
use crate::output::{OutputFormat, OutputFormatter};
use crate::storage::FileSecretStore;
use crate::ExitCode;

/// ircdm-keys - manage keys for end-to-end encrypted IRC DMs
#[derive(Parser, Debug)]
#[command(name = "ircdm-keys")]
#[command(version, about = "Manage keys for end-to-end encrypted IRC DMs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format: table, json, quiet
    #[arg(long, global = true)]
    pub output: Option<OutputFormat>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// IRC network the peer nicks belong to
    #[arg(short, long, global = true, env = "IRCDM_NETWORK")]
    pub network: Option<String>,

    /// Own nick, written into exported payloads
    #[arg(long = "as", global = true, value_name = "NICK")]
    pub own_nick: Option<String>,

    /// Secrets file or database
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Local identity
    Identity(IdentityArgs),
    /// Write an out-of-band payload (bundle or fingerprint)
    Export(ExportArgs),
    /// Read an out-of-band payload from a peer
    Import(ImportArgs),
    /// Stored peer keys
    Peers(PeersArgs),
    /// Encrypt a DM body for a peer
    Encrypt(EncryptArgs),
    /// Decrypt a DM body from a peer
    Decrypt(DecryptArgs),
}

#[derive(Parser, Debug)]
pub struct IdentityArgs {
    #[command(subcommand)]
    pub action: IdentityAction,
}

#[derive(Subcommand, Debug)]
pub enum IdentityAction {
    /// Show keys and fingerprint, creating the identity if needed
    Show,
    /// Print only the grouped fingerprint
    Fingerprint,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Full signed bundle
    Bundle,
    /// Fingerprint only, for comparing a key already received
    Fingerprint,
}

#[derive(Parser, Debug)]
pub struct ExportArgs {
    #[arg(value_enum, default_value = "bundle")]
    pub kind: PayloadKind,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ImportArgs {
    /// Nick the payload claims to be from
    pub nick: String,

    /// Payload file, or - for stdin
    #[arg(default_value = "-")]
    pub input: PathBuf,

    /// Trust a received bundle right away
    #[arg(long)]
    pub accept: bool,

    /// Allow --accept to replace a different stored key
    #[arg(long, requires = "accept")]
    pub allow_replace: bool,

    /// Mark the peer verified when the payload matches
    #[arg(long)]
    pub verify: bool,
}

#[derive(Parser, Debug)]
pub struct PeersArgs {
    #[command(subcommand)]
    pub action: PeersAction,
}

#[derive(Subcommand, Debug)]
pub enum PeersAction {
    /// List peers on the network
    List,
    /// Networks with stored keys
    Networks,
    /// Show one peer
    Show { nick: String },
    /// Store a bundle received in-band
    Add {
        nick: String,
        /// Bundle JSON file, or - for stdin
        #[arg(default_value = "-")]
        input: PathBuf,
        /// Accept it if it replaces a different stored key
        #[arg(long)]
        accept: bool,
        #[arg(long, requires = "accept")]
        allow_replace: bool,
    },
    /// Mark a peer's key as verified
    Verify { nick: String },
    /// Clear a peer's verified flag
    Unverify { nick: String },
    /// Delete a peer's key and trust record
    Delete { nick: String },
    /// Move a peer's key to another network
    Move {
        nick: String,
        #[arg(long)]
        to: String,
    },
    /// Copy legacy nick-only keys onto the network
    Migrate,
}

#[derive(Parser, Debug)]
pub struct EncryptArgs {
    pub nick: String,

    /// Message text; read from stdin when absent
    pub message: Option<String>,
}

#[derive(Parser, Debug)]
pub struct DecryptArgs {
    pub nick: String,

    /// Encrypted message JSON file, or - for stdin
    #[arg(default_value = "-")]
    pub input: PathBuf,
}

/// Failure of a single command, reported to the user and mapped to an exit
/// code.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("{0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommandError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            CommandError::Core(e) => ExitCode::from(e),
            CommandError::InvalidInput(_) => ExitCode::InvalidInput,
            CommandError::Io(_) => ExitCode::GeneralError,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            CommandError::Core(e) => e.kind().as_str(),
            CommandError::InvalidInput(_) => "invalid_input",
            CommandError::Io(_) => "io_error",
        }
    }

    fn user_message(&self) -> String {
        match self {
            CommandError::Core(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

impl Cli {
    /// Flags that override the config file.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            output_format: self.output.map(|f| f.to_string()),
            verbose: self.verbose.then_some(true),
            debug: self.debug.then_some(true),
            network: self.network.clone(),
            nick: self.own_nick.clone(),
            storage_path: self.store.clone(),
        }
    }

    /// Execute with a config that already has the CLI overrides applied.
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let session = Session::open(config).await?;
        match session.run(self.command).await {
            Ok(code) => Ok(code),
            Err(e) => {
                session.formatter.error(&e.user_message(), Some(e.kind()));
                Ok(e.exit_code())
            }
        }
    }
}

/// An opened store plus the exchange built on it.
pub struct Session {
    config: Config,
    exchange: KeyExchange<dyn SecretStore>,
    formatter: OutputFormatter,
}

impl Session {
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let store = open_store(&config.storage)?;
        let exchange = KeyExchange::builder(store)
            .config(config.exchange.clone())
            .build();
        let format = config.output.format.parse().unwrap_or(OutputFormat::Table);
        let formatter = OutputFormatter::new(format, config.output.verbose);
        Ok(Self {
            config,
            exchange,
            formatter,
        })
    }

    pub fn exchange(&self) -> &KeyExchange<dyn SecretStore> {
        &self.exchange
    }

    fn network(&self) -> Result<&str, CommandError> {
        self.config.network.default.as_deref().ok_or_else(|| {
            CommandError::InvalidInput(
                "no network given; pass --network or set [network] default".to_string(),
            )
        })
    }

    fn peer(&self, nick: &str) -> Result<PeerId, CommandError> {
        if nick.trim().is_empty() {
            return Err(CommandError::InvalidInput("nick must not be empty".to_string()));
        }
        Ok(PeerId::new(self.network()?, nick))
    }

    fn own_nick(&self) -> Result<&str, CommandError> {
        self.config.identity.nick.as_deref().ok_or_else(|| {
            CommandError::InvalidInput(
                "own nick unknown; pass --as or set [identity] nick".to_string(),
            )
        })
    }

    fn print(&self, text: String) {
        if !text.is_empty() {
            println!("{text}");
        }
    }

    pub async fn run(&self, command: Commands) -> Result<ExitCode, CommandError> {
        match command {
            Commands::Identity(args) => self.identity(args.action).await,
            Commands::Export(args) => self.export(args).await,
            Commands::Import(args) => self.import(args).await,
            Commands::Peers(args) => self.peers(args.action).await,
            Commands::Encrypt(args) => self.encrypt(args).await,
            Commands::Decrypt(args) => self.decrypt(args).await,
        }
    }

    async fn identity(&self, action: IdentityAction) -> Result<ExitCode, CommandError> {
        let info = self.exchange.identity().info().await?;
        match action {
            IdentityAction::Show => {
                let nick = self.config.identity.nick.as_deref();
                self.print(self.formatter.format_identity(&info, nick));
            }
            IdentityAction::Fingerprint => match self.formatter.format() {
                OutputFormat::Table => println!("{}", info.fingerprint.to_display()),
                _ => self.print(
                    self.formatter
                        .format_success(&info.fingerprint, "identity fingerprint"),
                ),
            },
        }
        Ok(ExitCode::Success)
    }

    async fn export(&self, args: ExportArgs) -> Result<ExitCode, CommandError> {
        let nick = self.own_nick()?;
        let payload: ExternalPayload = match args.kind {
            PayloadKind::Bundle => self.exchange.export_bundle_payload(nick).await?.into(),
            PayloadKind::Fingerprint => {
                self.exchange.export_fingerprint_payload(nick).await?.into()
            }
        };
        let json = payload.to_json();

        match args.out {
            Some(path) => {
                tokio::fs::write(&path, json.as_bytes()).await?;
                self.formatter
                    .success(&format!("Wrote payload to {}", path.display()));
            }
            None => println!("{json}"),
        }
        Ok(ExitCode::Success)
    }

    async fn import(&self, args: ImportArgs) -> Result<ExitCode, CommandError> {
        let peer = self.peer(&args.nick)?;
        let raw = read_input(&args.input).await?;
        let outcome = self.exchange.import_external_payload(&peer, &raw).await?;
        self.print(self.formatter.format_import(&outcome));

        match outcome {
            ImportOutcome::BundleReceived(_) => {
                if !args.accept {
                    self.formatter.warning(&format!(
                        "Key for {peer} not stored; rerun with --accept after comparing fingerprints"
                    ));
                    return Ok(ExitCode::Success);
                }
                self.exchange
                    .accept_key_offer(&peer, args.allow_replace)
                    .await?;
                self.formatter.success(&format!("Stored key for {peer}"));
                if args.verify {
                    self.mark_verified(&peer, true).await?;
                }
                Ok(ExitCode::Success)
            }
            ImportOutcome::AlreadyTrusted(_) => {
                if args.verify {
                    self.mark_verified(&peer, true).await?;
                }
                Ok(ExitCode::Success)
            }
            ImportOutcome::FingerprintCompared { matches, stored, .. } => {
                if stored.is_none() {
                    return Err(CoreError::UnknownPeer(peer).into());
                }
                if !matches {
                    self.formatter.warning(&format!(
                        "Fingerprint does not match the key stored for {peer}"
                    ));
                    return Ok(ExitCode::VerificationFailed);
                }
                if args.verify {
                    self.mark_verified(&peer, true).await?;
                }
                Ok(ExitCode::Success)
            }
        }
    }

    async fn mark_verified(&self, peer: &PeerId, verified: bool) -> Result<(), CommandError> {
        if !self.exchange.ledger().set_verified(peer, verified).await? {
            return Err(CoreError::UnknownPeer(peer.clone()).into());
        }
        let state = if verified { "verified" } else { "unverified" };
        self.formatter.success(&format!("Marked {peer} {state}"));
        Ok(())
    }

    async fn peers(&self, action: PeersAction) -> Result<ExitCode, CommandError> {
        let ledger = self.exchange.ledger();
        match action {
            PeersAction::List => {
                let network = self.network()?;
                let peers = ledger.list_peers(network).await?;
                self.print(self.formatter.format_peers(network, &peers));
            }
            PeersAction::Networks => {
                let networks = ledger.list_networks().await?;
                match self.formatter.format() {
                    OutputFormat::Table => {
                        for network in &networks {
                            println!("{network}");
                        }
                    }
                    _ => self.print(self.formatter.format_success(&networks, "peers networks")),
                }
            }
            PeersAction::Show { nick } => {
                let peer = self.peer(&nick)?;
                let summary = ledger
                    .list_peers(peer.network())
                    .await?
                    .into_iter()
                    .find(|p| p.nick == peer.nick())
                    .ok_or_else(|| CoreError::UnknownPeer(peer.clone()))?;
                self.print(self.formatter.format_peer(&summary, peer.network()));
            }
            PeersAction::Add {
                nick,
                input,
                accept,
                allow_replace,
            } => {
                let peer = self.peer(&nick)?;
                let raw = read_input(&input).await?;
                match self.exchange.handle_incoming_bundle(&peer, &raw).await? {
                    AcceptanceOutcome::Stored => {
                        self.formatter.success(&format!("Stored key for {peer}"));
                    }
                    AcceptanceOutcome::Invalid => {
                        return Err(CommandError::InvalidInput(
                            "not a valid signed bundle".to_string(),
                        ));
                    }
                    AcceptanceOutcome::Pending => {
                        if let Some(request) = self.exchange.pending_request(&peer).await {
                            self.print(self.formatter.format_pending(&request));
                        }
                        if !accept {
                            self.formatter.warning(&format!(
                                "Key for {peer} changed; rerun with --accept --allow-replace to replace it"
                            ));
                            return Ok(ExitCode::KeyChanged);
                        }
                        self.exchange.accept_key_offer(&peer, allow_replace).await?;
                        self.formatter.success(&format!("Replaced key for {peer}"));
                    }
                }
            }
            PeersAction::Verify { nick } => self.mark_verified(&self.peer(&nick)?, true).await?,
            PeersAction::Unverify { nick } => {
                self.mark_verified(&self.peer(&nick)?, false).await?
            }
            PeersAction::Delete { nick } => {
                let peer = self.peer(&nick)?;
                if !ledger.delete_peer(&peer).await? {
                    return Err(CoreError::UnknownPeer(peer).into());
                }
                self.formatter.success(&format!("Deleted key for {peer}"));
            }
            PeersAction::Move { nick, to } => {
                let from = self.network()?;
                ledger.move_peer(from, &to, &nick).await?;
                self.formatter
                    .success(&format!("Moved {nick} from {from} to {to}"));
            }
            PeersAction::Migrate => {
                let network = self.network()?;
                let migrated = self.exchange.migrate_old_keys_to_network(network).await?;
                match self.formatter.format() {
                    OutputFormat::Table => self
                        .formatter
                        .success(&format!("Migrated {migrated} legacy key(s) to {network}")),
                    _ => self.print(self.formatter.format_success(
                        &MigrateOutput { network, migrated },
                        "peers migrate",
                    )),
                }
            }
        }
        Ok(ExitCode::Success)
    }

    async fn encrypt(&self, args: EncryptArgs) -> Result<ExitCode, CommandError> {
        let peer = self.peer(&args.nick)?;
        let text = match args.message {
            Some(text) => text,
            None => read_input(Path::new("-")).await?,
        };
        let message = self.exchange.cipher().encrypt_for(&peer, &text).await?;
        println!("{}", message.to_json());
        Ok(ExitCode::Success)
    }

    async fn decrypt(&self, args: DecryptArgs) -> Result<ExitCode, CommandError> {
        let peer = self.peer(&args.nick)?;
        let raw = read_input(&args.input).await?;
        let text = self.exchange.cipher().decrypt_json_from(&peer, &raw).await?;
        match self.formatter.format() {
            OutputFormat::Json => {
                self.print(self.formatter.format_success(&text, "decrypt"));
            }
            _ => println!("{text}"),
        }
        Ok(ExitCode::Success)
    }
}

#[derive(Serialize)]
struct MigrateOutput<'a> {
    network: &'a str,
    migrated: usize,
}

fn open_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn SecretStore>> {
    let path = config
        .resolved_path()
        .context("no data directory found; set [storage] path or pass --store")?;
    debug!(backend = %config.backend, path = %path.display(), "opening secret store");

    match config.backend.as_str() {
        "sqlite" => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let store: Arc<dyn SecretStore> = Arc::new(
                SqliteSecretStore::new(&path)
                    .with_context(|| format!("opening {}", path.display()))?,
            );
            Ok(store)
        }
        _ => {
            let store: Arc<dyn SecretStore> = FileSecretStore::new_shared(path);
            Ok(store)
        }
    }
}

async fn read_input(path: &Path) -> Result<String, CommandError> {
    if path == Path::new("-") {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        return Ok(buf);
    }
    Ok(tokio::fs::read_to_string(path).await?)
}
