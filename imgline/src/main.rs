#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use imagegen::types::{RegisterRequest, Style};
use imagegen::{
    ApiClient, ApiError, FavoritesController, FileSessionStore, GenerationController,
    GenerationError, ProfileController, SessionEvent,
};
use imgconfig::ImgConfig;
use std::io::{self, IsTerminal, Write};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
mod format;

#[derive(Parser)]
#[command(name = "imgline", about = "A CLI for the AI image generator")]
struct Cli {
    /// Log requests and session changes to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account and sign in
    Register {
        username: String,
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign in
    Login {
        email: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Sign out and forget the stored session
    Logout,
    /// Show the signed-in user without contacting the server
    Whoami,
    /// Generate an image from a prompt
    Generate {
        prompt: String,
        /// realistic, anime, painting, cartoon or minimalist
        #[arg(long)]
        style: Option<Style>,
    },
    /// List your generated images, newest first
    Images {
        #[arg(long, default_value_t = 1)]
        page: u64,
        /// Defaults to `page_size` from the config
        #[arg(long)]
        per_page: Option<u64>,
    },
    /// List your favorites, most recent first
    Favorites {
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long)]
        per_page: Option<u64>,
    },
    /// Add an image to your favorites
    Favorite { image_id: i64 },
    /// Remove an image from your favorites
    Unfavorite { image_id: i64 },
    /// Show account counters
    Stats,
    /// Show your profile, counters, recent images and favorites
    Profile,
    /// Generate shell completions
    #[command(hide = true)]
    Completions {
        /// The shell to generate completions for
        shell: Shell,
    },
}

struct App {
    config: ImgConfig,
    client: Arc<ApiClient>,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "imagegen=debug,imgline=debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();
}

fn get_app() -> Result<App> {
    let config = ImgConfig::load().with_context(|| "Failed to load imagegen config")?;
    let session_dir = config
        .session_dir()
        .with_context(|| "Failed to locate the session directory")?;
    tracing::debug!(api_url = %config.api_url, session_dir = %session_dir.display(), "Loaded config");
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .with_context(|| "Failed to build HTTP client")?;
    let client = ApiClient::new(Arc::new(FileSessionStore::new(session_dir)))
        .with_base_url(config.api_url.clone())
        .with_http_client(http);
    Ok(App {
        config,
        client: Arc::new(client),
    })
}

fn read_password(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    if io::stdin().is_terminal() {
        eprint!("Password: ");
        io::stderr().flush()?;
    }
    let mut input = String::new();
    io::stdin()
        .read_line(&mut input)
        .with_context(|| "Failed to read password from stdin")?;
    Ok(input.trim_end_matches(['\r', '\n']).to_string())
}

fn require_session(client: &ApiClient) -> Result<()> {
    if client.is_authenticated() {
        Ok(())
    } else {
        Err(anyhow::anyhow!("Not signed in. Run `imgline login <email>` first."))
    }
}

/// Prints a hint for every session that ended while the command ran.
fn report_session_events(events: &mut broadcast::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::Expired {
            eprintln!(
                "{}",
                "Your session has expired. Run `imgline login <email>` to sign in again.".yellow()
            );
        }
    }
}

fn handle_error(err: &anyhow::Error) -> ! {
    let message = if let Some(err) = err.downcast_ref::<ApiError>() {
        err.display_message(&err.to_string())
    } else if let Some(GenerationError::Api(err)) = err.downcast_ref::<GenerationError>() {
        err.display_message("Failed to generate image")
    } else {
        format!("{err:#}")
    };
    eprintln!("{}", message.red());
    process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        handle_error(&err);
    }

    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "imgline", &mut std::io::stdout());
        return Ok(());
    }

    let app = get_app()?;
    let mut events = app.client.subscribe();
    let result = dispatch(&app, cli.command).await;
    report_session_events(&mut events);
    result
}

#[allow(clippy::too_many_lines)]
async fn dispatch(app: &App, command: Command) -> Result<()> {
    let client = &app.client;
    let per_page_default = app.config.page_size;

    match command {
        Command::Completions { .. } => {}
        Command::Register {
            username,
            email,
            password,
        } => {
            let password = read_password(password)?;
            let session = client
                .register(&RegisterRequest {
                    username,
                    email,
                    password,
                })
                .await?;
            println!("Registered and signed in as {}", session.user.username.bold());
        }
        Command::Login { email, password } => {
            let password = read_password(password)?;
            let session = client.login(&email, &password).await?;
            println!("Signed in as {}", session.user.username.bold());
        }
        Command::Logout => {
            client.sign_out();
            println!("Signed out");
        }
        Command::Whoami => match client.session() {
            Some(session) => println!("{}", format::format_user(&session.user)),
            None => println!("Not signed in"),
        },
        Command::Generate { prompt, style } => {
            require_session(client)?;
            let style = match style {
                Some(style) => style,
                None => app
                    .config
                    .default_style
                    .parse::<Style>()
                    .with_context(|| "Invalid default_style in config")?,
            };
            let generation = GenerationController::new(Arc::clone(client));
            eprintln!("{}", "Generating...".dimmed());
            let image = generation.generate(&prompt, style).await?;
            println!("{}", format::format_generated(&image));
        }
        Command::Images { page, per_page } => {
            require_session(client)?;
            let result = client
                .images(page, per_page.unwrap_or(per_page_default))
                .await?;
            if result.images.is_empty() {
                println!("No images yet");
            }
            for image in &result.images {
                println!("{}", format::format_image(image));
            }
            if let (Some(current), Some(pages)) = (result.current_page, result.pages) {
                println!("{}", format!("page {current}/{pages}").dimmed());
            }
        }
        Command::Favorites { page, per_page } => {
            require_session(client)?;
            let result = client
                .favorites(page, per_page.unwrap_or(per_page_default))
                .await?;
            if result.favorites.is_empty() {
                println!("No favorites yet");
            }
            for favorite in &result.favorites {
                println!("{}", format::format_favorite(favorite));
            }
            if let (Some(current), Some(pages)) = (result.current_page, result.pages) {
                println!("{}", format!("page {current}/{pages}").dimmed());
            }
        }
        Command::Favorite { image_id } => {
            require_session(client)?;
            let favorites = FavoritesController::new(Arc::clone(client));
            favorites
                .add_favorite(image_id)
                .await
                .map_err(|err| anyhow::anyhow!(favorites.last_error().unwrap_or_else(|| err.to_string())))?;
            println!("Added image {image_id} to favorites");
        }
        Command::Unfavorite { image_id } => {
            require_session(client)?;
            let favorites = FavoritesController::new(Arc::clone(client));
            favorites
                .remove_favorite(image_id)
                .await
                .map_err(|err| anyhow::anyhow!(favorites.last_error().unwrap_or_else(|| err.to_string())))?;
            println!("Removed image {image_id} from favorites");
        }
        Command::Stats => {
            require_session(client)?;
            let stats = client.stats().await?;
            println!("{}", format::format_stats(&stats));
        }
        Command::Profile => {
            require_session(client)?;
            let profile = ProfileController::new(Arc::clone(client)).with_page_size(per_page_default);
            let (user, data) = tokio::join!(profile.fetch_user(), profile.refresh());
            let (user, data) = (user?, data?);

            println!("{}", format::format_user(&user));
            println!("{}", format::format_stats(&data.stats));
            println!("\n{}", "Recent images".bold());
            for image in &data.images {
                println!("{}", format::format_image(image));
            }
            println!("\n{}", "Favorites".bold());
            for favorite in &data.favorites {
                println!("{}", format::format_favorite(favorite));
            }
        }
    }

    Ok(())
}
