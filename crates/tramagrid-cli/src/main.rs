use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};

use tramagrid_client::{
    CanvasGateway, ClientState, HttpGateway, ImportOrchestrator, MergeProgress,
    MutationDispatcher, RefreshBus, RestoreOutcome, SessionManager, SnapshotReader,
};
use tramagrid_core::config::{ClientConfig, LoggingConfig};
use tramagrid_core::session_store::{FileSessionStore, SessionStore};
use tramagrid_core::types::{
    ColorIndex, ExportFormat, GridParams, ImportDescriptor, Region, SourceImage,
};

#[derive(Parser)]
#[command(
    name = "tramagrid",
    about = "Edit knitting and cross-stitch grids on a TramaGrid server",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Server base URL (overrides config and TRAMAGRID_SERVER_URL)
    #[arg(short, long, global = true)]
    server: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Session management
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Upload a source image into the current session
    Upload { path: PathBuf },

    /// Generate the grid from the uploaded image
    Generate,

    /// Paint one cell
    Paint {
        x: u32,
        y: u32,
        /// Palette index to paint with
        #[arg(long, default_value_t = 0)]
        color: ColorIndex,
    },

    /// Undo the last edit
    Undo,

    /// Redo the last undone edit
    Redo,

    /// Merge one palette color into another
    Merge { from: ColorIndex, to: ColorIndex },

    /// Merge several palette colors into one
    MergeBatch {
        #[arg(long)]
        to: ColorIndex,
        #[arg(required = true)]
        from: Vec<ColorIndex>,
    },

    /// Palette color management
    Color {
        #[command(subcommand)]
        action: ColorAction,
    },

    /// Replace one color with another inside a rectangle
    Region {
        #[arg(long)]
        x: i32,
        #[arg(long)]
        y: i32,
        #[arg(long)]
        w: u32,
        #[arg(long)]
        h: u32,
        #[arg(long)]
        from: ColorIndex,
        #[arg(long)]
        to: ColorIndex,
    },

    /// Grid parameters
    Params {
        #[command(subcommand)]
        action: ParamsAction,
    },

    /// Show the palette
    Palette,

    /// Fetch the rendered grid
    Grid {
        /// Write the PNG here instead of printing the data URI
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Show the color runs of a row (1-based)
    Row { row: u32 },

    /// Show the palette index under a cell
    Pixel { x: u32, y: u32 },

    /// Show groups of similar colors
    Clusters,

    /// Download the pattern
    Export {
        format: Format,
        #[arg(long)]
        out: PathBuf,
    },

    /// Rebuild a stored project into a fresh session
    Import {
        /// Project descriptor JSON file
        descriptor: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Start a new session
    New,
    /// Restore the persisted session
    Restore,
    /// Show the active session
    Show,
    /// Forget the session locally
    Clear {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ColorAction {
    /// Add a color (hex, e.g. #ff8800)
    Add { hex: String },
    /// Change the color of an existing entry
    Replace { index: ColorIndex, hex: String },
    /// Remove a palette entry
    Delete { index: ColorIndex },
}

#[derive(Subcommand)]
enum ParamsAction {
    /// Print the current parameters
    Get,
    /// Apply parameters from a JSON object, e.g. '{"max_colors": 12}'
    Set { json: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Write a default config file if none exists
    Init,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Png,
    Pdf,
}

impl From<Format> for ExportFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Png => ExportFormat::Png,
            Format::Pdf => ExportFormat::Pdf,
        }
    }
}

/// Everything a command needs, wired once per invocation.
struct App {
    sessions: Arc<SessionManager>,
    dispatcher: Arc<MutationDispatcher>,
    reader: SnapshotReader,
    importer: ImportOrchestrator,
    state: Arc<ClientState>,
}

impl App {
    fn new(config: &ClientConfig, server: Option<&str>) -> anyhow::Result<Self> {
        let mut http = HttpGateway::from_config(config)?;
        if let Some(url) = server {
            http = http.with_base_url(url);
        }
        tracing::debug!(base_url = http.base_url(), "Using canvas server");
        let gateway: Arc<dyn CanvasGateway> = Arc::new(http);

        let store: Arc<dyn SessionStore> =
            Arc::new(FileSessionStore::new(config.session_store_path()));
        let state = Arc::new(ClientState::new());
        let bus = Arc::new(RefreshBus::new());
        bus.subscribe(|| tracing::debug!("Canvas changed, views should re-fetch"));

        let sessions = Arc::new(SessionManager::new(
            gateway.clone(),
            store,
            state.clone(),
            bus.clone(),
        ));
        let dispatcher = Arc::new(MutationDispatcher::new(gateway.clone(), state.clone(), bus));
        let importer =
            ImportOrchestrator::new(gateway.clone(), sessions.clone(), dispatcher.clone());
        let reader = SnapshotReader::new(gateway, state.clone());

        Ok(Self {
            sessions,
            dispatcher,
            reader,
            importer,
            state,
        })
    }

    async fn require_session(&self) -> anyhow::Result<()> {
        if !self.state.has_session().await {
            anyhow::bail!("No active session. Run `tramagrid session new` or `tramagrid import`.");
        }
        Ok(())
    }
}

fn init_logging(logging: Option<&LoggingConfig>, verbose: bool) {
    let level = if verbose {
        "debug"
    } else {
        logging.and_then(|l| l.level.as_deref()).unwrap_or("warn")
    };
    let mut directives = level.to_string();
    for filter in logging.map(|l| l.filters.as_slice()).unwrap_or_default() {
        directives.push(',');
        directives.push_str(filter);
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives));

    let json = logging.is_some_and(|l| l.format == "json");
    let stdout = logging.is_some_and(|l| l.output == "stdout");
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).init(),
        (true, false) => builder.json().with_writer(std::io::stderr).init(),
        (false, true) => builder.with_writer(std::io::stdout).init(),
        (false, false) => builder.with_writer(std::io::stderr).init(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn read_source_image(path: &Path) -> anyhow::Result<SourceImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".into());
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Ok(SourceImage::new(bytes, file_name, mime.essence_str()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(ClientConfig::config_path);
    let config = ClientConfig::load(&config_path)?;

    init_logging(config.logging.as_ref(), cli.verbose);

    if let Commands::Config { action } = &cli.command {
        return run_config(action, &config, &config_path);
    }

    let (warnings, errors) = config.validate();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        anyhow::bail!("Invalid config {}: {}", config_path.display(), errors.join("; "));
    }

    let app = App::new(&config, cli.server.as_deref())?;

    // Restore first so every command runs against the persisted session
    let restoring = matches!(
        cli.command,
        Commands::Session {
            action: SessionAction::Restore
        }
    );
    if !restoring {
        match app.sessions.restore().await {
            RestoreOutcome::Unconfirmed => {
                tracing::warn!("Could not reach the server to confirm the saved session");
            }
            RestoreOutcome::Invalidated => {
                eprintln!("The saved session has expired on the server.");
            }
            RestoreOutcome::Restored(_) | RestoreOutcome::NoSavedSession => {}
        }
    }

    run(cli.command, &app).await
}

fn run_config(action: &ConfigAction, config: &ClientConfig, path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("Config: {}", path.display());
            println!("Server: {}", config.base_url());
            println!("Session store: {}", config.session_store_path().display());
            print_json(config)?;
        }
        ConfigAction::Validate => {
            let (warnings, errors) = config.validate();
            for warning in &warnings {
                println!("warning: {warning}");
            }
            for error in &errors {
                println!("error: {error}");
            }
            if !errors.is_empty() {
                anyhow::bail!("{} error(s) in {}", errors.len(), path.display());
            }
            println!("Config OK");
        }
        ConfigAction::Init => {
            if path.exists() {
                println!("Config already exists at {}", path.display());
            } else {
                let defaults = ClientConfig {
                    server: Some(Default::default()),
                    ..ClientConfig::default()
                };
                defaults.save(path)?;
                println!("Wrote {}", path.display());
            }
        }
    }
    Ok(())
}

async fn run(command: Commands, app: &App) -> anyhow::Result<()> {
    match command {
        Commands::Session { action } => match action {
            SessionAction::New => {
                let session = app.sessions.create_session().await?;
                println!("{}", session.id);
            }
            SessionAction::Restore => match app.sessions.restore().await {
                RestoreOutcome::Restored(id) => println!("Restored {id}"),
                RestoreOutcome::NoSavedSession => println!("No saved session"),
                RestoreOutcome::Invalidated => println!("Saved session expired and was cleared"),
                RestoreOutcome::Unconfirmed => {
                    anyhow::bail!("Could not reach the server; the saved session was kept")
                }
            },
            SessionAction::Show => match app.sessions.session().await {
                Some(session) => println!("{}", session.id),
                None => println!("No active session"),
            },
            SessionAction::Clear { yes } => {
                let confirmed = yes
                    || dialoguer::Confirm::new()
                        .with_prompt("Forget the current session? Unsaved work cannot be recovered")
                        .default(false)
                        .interact()?;
                if confirmed {
                    app.sessions.logout().await?;
                    println!("Session cleared");
                }
            }
        },

        Commands::Upload { path } => {
            let image = read_source_image(&path).await?;
            app.dispatcher.upload_image(&image).await?;
            println!("Uploaded {} ({} bytes)", image.file_name, image.bytes.len());
        }

        Commands::Generate => {
            app.dispatcher.generate_grid().await?;
            println!("Grid generated");
        }

        Commands::Paint { x, y, color } => {
            app.require_session().await?;
            app.state.set_active_color(color);
            if !app.dispatcher.paint(x, y).await? {
                println!("Paint rejected");
            }
        }

        Commands::Undo => {
            app.require_session().await?;
            if !app.dispatcher.undo().await? {
                println!("Nothing to undo");
            }
        }

        Commands::Redo => {
            app.require_session().await?;
            if !app.dispatcher.redo().await? {
                println!("Nothing to redo");
            }
        }

        Commands::Merge { from, to } => {
            app.require_session().await?;
            app.dispatcher.begin_merge();
            app.dispatcher.merge_pick(from).await?;
            match app.dispatcher.merge_pick(to).await? {
                MergeProgress::Merged { from, to } => println!("Merged {from} into {to}"),
                _ => {
                    app.dispatcher.cancel_merge();
                    println!("Nothing to merge");
                }
            }
        }

        Commands::MergeBatch { to, from } => {
            app.require_session().await?;
            app.dispatcher.merge_batch(&from, to).await?;
        }

        Commands::Color { action } => {
            app.require_session().await?;
            match action {
                ColorAction::Add { hex } => {
                    let index = app.dispatcher.add_color(&hex).await?;
                    println!("{index}");
                }
                ColorAction::Replace { index, hex } => {
                    app.dispatcher.replace_color(index, &hex).await?;
                }
                ColorAction::Delete { index } => {
                    app.dispatcher.delete_color(index).await?;
                }
            }
        }

        Commands::Region { x, y, w, h, from, to } => {
            app.require_session().await?;
            app.dispatcher
                .replace_region(Region { x, y, w, h }, from, to)
                .await?;
        }

        Commands::Params { action } => {
            app.require_session().await?;
            match action {
                ParamsAction::Get => print_json(&app.reader.params().await?)?,
                ParamsAction::Set { json } => {
                    let settings: GridParams =
                        serde_json::from_str(&json).context("parsing grid parameters")?;
                    app.dispatcher.update_params(settings).await?;
                }
            }
        }

        Commands::Palette => {
            app.require_session().await?;
            for entry in app.reader.palette().await? {
                println!("{:>3}  {}  {:>8}", entry.index, entry.hex, entry.count);
            }
        }

        Commands::Grid { out } => {
            app.require_session().await?;
            let image = app.reader.grid_image().await?;
            if image.is_empty() {
                println!("No grid yet. Upload an image and run `tramagrid generate`.");
            } else if let Some(out) = out {
                tokio::fs::write(&out, image.image_bytes()?).await?;
                println!("Wrote {}", out.display());
            } else {
                println!("{}", image.as_str());
            }
        }

        Commands::Row { row } => {
            app.require_session().await?;
            let runs = app.reader.row_summary(row).await?;
            let line: Vec<String> = runs
                .iter()
                .map(|r| format!("{}x {}", r.count, r.hex))
                .collect();
            println!("Row {row}: {}", line.join(", "));
        }

        Commands::Pixel { x, y } => {
            app.require_session().await?;
            match app.reader.pixel_index(x, y).await? {
                Some(index) => println!("{index}"),
                None => println!("Outside the grid"),
            }
        }

        Commands::Clusters => {
            app.require_session().await?;
            for cluster in app.reader.clusters().await? {
                let members: Vec<String> = cluster.iter().map(ToString::to_string).collect();
                println!("{}", members.join(" "));
            }
        }

        Commands::Export { format, out } => {
            let bytes = app.reader.export(format.into()).await?;
            tokio::fs::write(&out, &bytes).await?;
            println!("Wrote {} ({} bytes)", out.display(), bytes.len());
        }

        Commands::Import { descriptor } => {
            let raw = tokio::fs::read_to_string(&descriptor)
                .await
                .with_context(|| format!("reading {}", descriptor.display()))?;
            let descriptor: ImportDescriptor =
                serde_json::from_str(&raw).context("parsing project descriptor")?;
            app.importer.import_project(&descriptor).await?;
            if let Some(id) = app.sessions.session_id().await {
                println!("{id}");
            }
        }

        Commands::Config { .. } => {}
    }

    Ok(())
}
