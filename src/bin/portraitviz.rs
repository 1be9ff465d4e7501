//! CLI for PortraitViz - four AI camera angles from one portrait.

use clap::{Args, Parser, Subcommand};
use portraitviz::archive::{generated_entry_name, save_archive};
use portraitviz::{
    read_upload, BatchOrchestrator, Config, Credential, CredentialStore, FileCredentialStore,
    Session, SlotState,
};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portraitviz")]
#[command(about = "Reimagine a portrait from four camera angles with Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate medium shot, close-up and both profiles of a portrait
    Generate(GenerateArgs),

    /// Manage the stored Gemini API key
    #[command(subcommand)]
    Key(KeyCommand),
}

#[derive(Args)]
struct GenerateArgs {
    /// Portrait image (png, jpeg, webp or gif)
    image: PathBuf,

    /// Keep only the face, on a plain white background
    #[arg(long)]
    face_only: bool,

    /// Archive path (default: ai_generated_faces.zip, or `output` from the config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write each generated image into this directory
    #[arg(long)]
    save_images: Option<PathBuf>,
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Save an API key (read from stdin when omitted)
    Set {
        /// The API key
        key: Option<String>,
    },
    /// Remove the stored API key
    Clear,
    /// Show the stored API key, masked
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portraitviz=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let store = config.credential_store()?;

    match cli.command {
        Commands::Generate(args) => generate(args, &config, &store, cli.json).await?,
        Commands::Key(command) => manage_key(command, &store, cli.json)?,
    }

    Ok(())
}

async fn generate(
    args: GenerateArgs,
    config: &Config,
    store: &FileCredentialStore,
    json_output: bool,
) -> anyhow::Result<()> {
    // Rejected uploads stop here, before asking for a key or calling the API
    let source = read_upload(&args.image).await?;

    let mut session = Session::new(store.resolve()?);
    if session.take_credential_prompt() {
        match prompt_for_key("No Gemini API key found.")? {
            Some(credential) => {
                store.set(&credential)?;
                session.set_credential(credential);
            }
            None => anyhow::bail!(portraitviz::PortraitVizError::MissingCredential),
        }
    }
    session.set_isolate_face_only(args.face_only);

    let orchestrator = BatchOrchestrator::new(Arc::new(config.gemini_client()))
        .with_temperature(config.temperature);

    let ticket = session.begin_batch(source)?;
    match ticket.run(&orchestrator).await {
        Ok(outcome) => {
            session.complete(ticket.id, outcome);
        }
        Err(e) => {
            session.fail(ticket.id, &e);
            return Err(e.into());
        }
    }

    if session.take_credential_prompt() {
        if let Some(message) = session.error() {
            eprintln!("{message}");
        }
        if let Some(credential) = prompt_for_key("The API key was rejected.")? {
            store.set(&credential)?;
            session.set_credential(credential);
            eprintln!("Saved the new key; run the command again to retry.");
        }
    }

    if let Some(dir) = &args.save_images {
        std::fs::create_dir_all(dir)?;
        for (index, image) in session.batch().successes() {
            image.save(dir.join(generated_entry_name(index, image.image.extension())))?;
        }
    }

    let output = args.output.unwrap_or_else(|| config.output.clone());
    let archive = if session.batch().success_count() > 0 {
        save_archive(&session.export_archive()?, &output)?;
        Some(output)
    } else {
        None
    };

    print_summary(&session, archive.as_ref(), json_output)?;
    Ok(())
}

fn print_summary(
    session: &Session,
    archive: Option<&PathBuf>,
    json_output: bool,
) -> anyhow::Result<()> {
    if json_output {
        let slots: Vec<_> = session
            .batch()
            .slots()
            .iter()
            .map(|slot| {
                let (status, image) = match &slot.state {
                    SlotState::Succeeded(image) => ("succeeded", Some(image)),
                    SlotState::Failed => ("failed", None),
                    SlotState::Pending => ("pending", None),
                    SlotState::Idle => ("idle", None),
                };
                serde_json::json!({
                    "slot": slot.index + 1,
                    "label": slot.label(),
                    "instruction": slot.instruction,
                    "status": status,
                    "mime_type": image.map(|i| i.image.mime_type.clone()),
                    "model": image.and_then(|i| i.metadata.model.clone()),
                    "duration_ms": image.and_then(|i| i.metadata.duration_ms),
                })
            })
            .collect();

        let result = serde_json::json!({
            "success": session.batch().success_count() > 0,
            "succeeded": session.batch().success_count(),
            "failed": session.batch().failure_count(),
            "archive": archive.map(|p| p.display().to_string()),
            "advisory": session.advisory(),
            "error": session.error(),
            "slots": slots,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    for slot in session.batch().slots() {
        let status = match &slot.state {
            SlotState::Succeeded(image) => match image.metadata.duration_ms {
                Some(ms) => format!("ok ({ms}ms)"),
                None => "ok".to_string(),
            },
            SlotState::Failed => "failed".to_string(),
            SlotState::Pending => "pending".to_string(),
            SlotState::Idle => "idle".to_string(),
        };
        println!("  {}. {:<14} {}", slot.index + 1, slot.label(), status);
    }
    if let Some(advisory) = session.advisory() {
        println!("\n{advisory}");
    }
    match archive {
        Some(path) => println!("\nSaved archive: {}", path.display()),
        None => println!("\nNo images were generated; nothing to download."),
    }
    Ok(())
}

fn manage_key(
    command: KeyCommand,
    store: &FileCredentialStore,
    json_output: bool,
) -> anyhow::Result<()> {
    match command {
        KeyCommand::Set { key } => {
            let credential = match key {
                Some(key) => Credential::new(key),
                None => {
                    if std::io::stdin().is_terminal() {
                        eprint!("Gemini API key: ");
                        std::io::stderr().flush()?;
                    }
                    read_key_line()?
                }
            };
            if credential.is_empty() {
                anyhow::bail!("API key must not be empty");
            }
            store.set(&credential)?;
            println!("Saved API key to {}", store.path().display());
        }
        KeyCommand::Clear => {
            store.clear()?;
            println!("Removed stored API key");
        }
        KeyCommand::Show => {
            let stored = store.get()?;
            if json_output {
                let result = serde_json::json!({
                    "stored": stored.is_some(),
                    "key": stored.as_ref().map(Credential::masked),
                    "path": store.path().display().to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                match stored {
                    Some(credential) => println!("{}", credential.masked()),
                    None => println!("No API key stored ({})", store.path().display()),
                }
            }
        }
    }
    Ok(())
}

/// Asks for a key on stdin. Returns `None` when stdin is not interactive or
/// the user enters nothing.
fn prompt_for_key(reason: &str) -> anyhow::Result<Option<Credential>> {
    let stdin = std::io::stdin();
    if !stdin.is_terminal() {
        eprintln!("{reason} Save one with `portraitviz key set <KEY>`.");
        return Ok(None);
    }

    eprint!("{reason} Gemini API key: ");
    std::io::stderr().flush()?;
    let credential = read_key_line()?;
    Ok((!credential.is_empty()).then_some(credential))
}

fn read_key_line() -> anyhow::Result<Credential> {
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(Credential::new(line))
}
