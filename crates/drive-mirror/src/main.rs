//! drive-mirror: Mirror a dotted-code task taxonomy into Drive folders.
//!
//! Runs one mirror-core operation per invocation against the Drive REST API
//! (or an in-memory store with `--dry-run`) and waits for any background work
//! the operation started before exiting.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use drive_mirror::{Config, DriveGateway, WebhookSignal};
use mirror_core::{
    DottedCode, InMemoryStore, MirrorService, SharedStore, TaskUpload, TokioDispatcher,
};

#[derive(Parser, Debug)]
#[command(name = "drive-mirror")]
#[command(about = "Mirror a dotted-code task taxonomy into Drive folders")]
struct Args {
    /// Directory holding config.json (created with defaults if missing)
    #[arg(long, default_value = "./drive-mirror", env = "DRIVE_MIRROR_CONFIG_DIR")]
    config_dir: PathBuf,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Work against an empty in-memory store instead of Drive
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a project folder and clone the template into it
    SetupProject {
        /// Project folder name
        name: String,
    },

    /// Clone the template into an existing folder
    Clone {
        /// Destination folder id
        #[arg(long)]
        dest: String,
    },

    /// Regenerate the table of contents of a folder
    Toc {
        /// Folder id
        #[arg(long)]
        root: String,

        /// Title shown at the top of the document
        #[arg(long)]
        title: String,
    },

    /// Make sure a task folder exists and print its id
    Materialize {
        #[arg(long)]
        project: String,

        #[arg(long)]
        code: DottedCode,

        #[arg(long, default_value = "")]
        title: String,
    },

    /// Upload a file into a task folder
    Upload {
        #[arg(long)]
        project: String,

        /// Task code; without it the file goes into the project folder
        #[arg(long)]
        code: Option<DottedCode>,

        #[arg(long, default_value = "")]
        title: String,

        /// Name to store the file under (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,

        file: PathBuf,
    },

    /// List tasks defined by the template
    Tasks {
        /// Comma-separated codes already known; only the rest are printed
        #[arg(long, value_delimiter = ',')]
        known: Vec<String>,
    },

    /// List every file in a project
    Files {
        #[arg(long)]
        project: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_store(args: &Args, config: &mut Config) -> Result<SharedStore> {
    if args.dry_run {
        let store = InMemoryStore::new();
        if config.drive.root_folder_id.is_empty() {
            config.drive.root_folder_id = "drive-root".to_string();
        }
        if config.drive.template_folder_id.is_empty() {
            config.drive.template_folder_id = "template-root".to_string();
        }
        store.add_root_with_id(&config.drive.root_folder_id, "Projects");
        store.add_root_with_id(&config.drive.template_folder_id, "Template");
        info!("Dry run: using an in-memory store");
        return Ok(Arc::new(store));
    }

    if config.drive.root_folder_id.is_empty() {
        bail!("drive.root_folder_id is not set in {:?}", args.config_dir.join("config.json"));
    }
    if config.drive.template_folder_id.is_empty() {
        warn!("drive.template_folder_id is not set; template operations will find nothing");
    }
    let gateway = DriveGateway::from_config(config).context("Failed to create Drive client")?;
    Ok(Arc::new(gateway))
}

async fn run(command: Command, service: &MirrorService) -> Result<()> {
    match command {
        Command::SetupProject { name } => {
            let root = service
                .setup_project(&name)
                .await
                .with_context(|| format!("Failed to set up project {}", name))?;
            info!("Project {} ready at {}, cloning template", name, root);
            println!("{}", root);
        }
        Command::Clone { dest } => {
            service.trigger_template_clone(&dest);
        }
        Command::Toc { root, title } => {
            service.trigger_toc_regeneration(&root, &title);
        }
        Command::Materialize {
            project,
            code,
            title,
        } => {
            let root = service.project_folder(&project).await?;
            let folder = service
                .materialize_task_folder(&root, &code, &title)
                .await
                .with_context(|| format!("Failed to materialize {} in {}", code, project))?;
            println!("{}", folder);
        }
        Command::Upload {
            project,
            code,
            title,
            name,
            file,
        } => {
            let content = std::fs::read(&file).with_context(|| format!("Failed to read {:?}", file))?;
            let filename = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("No file name in {:?}", file))?,
            };
            let outcome = service
                .upload_task_file(TaskUpload {
                    project_name: &project,
                    code: code.as_ref(),
                    title: &title,
                    filename: &filename,
                    content: &content,
                })
                .await
                .with_context(|| format!("Failed to upload {}", filename))?;
            print_json(&outcome)?;
        }
        Command::Tasks { known } => {
            let tasks = if known.is_empty() {
                service.template_tasks().await
            } else {
                let known: HashSet<String> = known.into_iter().map(|c| c.trim().to_string()).collect();
                service.missing_tasks(&known).await
            };
            print_json(&tasks)?;
        }
        Command::Files { project } => {
            let root = service.project_folder(&project).await?;
            print_json(&service.project_files(&root).await)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,drive_mirror=debug,mirror_core=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(&args.config_dir)?;
    let store = build_store(&args, &mut config)?;

    let dispatcher = Arc::new(TokioDispatcher::new());
    let mut service = MirrorService::new(store, dispatcher.clone(), config.settings());
    if let Some(url) = &config.webhook.url {
        let signal = WebhookSignal::new(url, config.webhook_timeout())
            .context("Failed to create executor client")?;
        service = service.with_signal(Arc::new(signal));
    }

    let _events = service
        .events()
        .subscribe(|event| debug!("Mirror event: {}", serde_json::to_string(&event).unwrap_or_default()));

    let result = run(args.command, &service).await;

    if dispatcher.pending() > 0 {
        info!("Waiting for {} background task(s)", dispatcher.pending());
    }
    dispatcher.drain().await;

    result
}
