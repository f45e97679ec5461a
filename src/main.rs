//! imagen-bot - chat front-end for a generative image model.

mod adapters;
mod callbacks;
mod cassette;
mod catalog;
mod chat;
mod cli;
mod config;
mod context;
mod error;
mod media_group;
mod orchestrator;
mod output;
mod parser;
mod ports;
mod prompt;
mod render;
mod resolver;
mod router;
mod settings;
mod state;
mod streaming;
#[cfg(test)]
mod test_support;

use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::adapters::live::console::{parse_line, ConsoleEvent, ConsoleTransport};
use crate::adapters::live::media::{CachingMediaFetcher, LocalMediaStore};
use crate::catalog::Catalog;
use crate::chat::ChatStore;
use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::context::{BotOptions, RecordingSession, ServiceContext};
use crate::error::BotError;
use crate::output::{resolve_output_path, save_image};
use crate::ports::{GenerationApi, ImageRequest, Transport};
use crate::prompt::PromptTemplates;
use crate::router::Router;
use crate::state::{MemoryStateStore, StateStore};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("IMAGEN_BOT_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli) -> Result<(), BotError> {
    let config_path = config::discover_config_path(cli.config.as_deref());
    let config = Config::load(&config_path)?;
    let styles_path = cli.styles.clone().unwrap_or_else(|| config.paths.styles.clone());
    let prompts_path = cli.prompts.clone().unwrap_or_else(|| config.paths.prompts.clone());

    match cli.command {
        Command::Parse { text } => {
            let catalog = Catalog::load(&styles_path)?;
            let intent = parser::parse(&text, &catalog);
            let json = serde_json::to_string_pretty(&intent)
                .map_err(|e| BotError::InvalidArgument(format!("Failed to encode settings: {e}")))?;
            println!("{json}");
            Ok(())
        }
        Command::List { what } => {
            let catalog = Catalog::load(&styles_path)?;
            for chunk in render::catalog_listing(&catalog, what.into(), config.bot.text_limit) {
                println!("{chunk}");
            }
            Ok(())
        }
        Command::Generate { text, image, output } => {
            let catalog = Catalog::load(&styles_path)?;
            let templates = PromptTemplates::load(&prompts_path)?;
            generate(&config, &catalog, &templates, &text, image.as_deref(), output.as_deref()).await
        }
        Command::Chat { chat_id, user_id } => {
            let catalog = Catalog::load(&styles_path)?;
            let templates = PromptTemplates::load(&prompts_path)?;
            chat(config, catalog, templates, chat_id, user_id).await
        }
    }
}

/// Live, recording or replaying API, chosen by environment.
fn generation_api(config: &Config) -> Result<(Box<dyn GenerationApi>, Option<RecordingSession>), BotError> {
    if let Ok(path) = std::env::var("IMAGEN_BOT_REPLAY") {
        info!(cassette = %path, "replaying");
        return Ok((context::replaying_api(Path::new(&path))?, None));
    }
    let recording = std::env::var("IMAGEN_BOT_REC").is_ok_and(|v| v == "1" || v == "true");
    if recording {
        let (api, session) = context::recording_api(config)?;
        info!("recording");
        return Ok((api, Some(session)));
    }
    Ok((context::live_api(config)?, None))
}

fn finish_recording(session: Option<RecordingSession>) {
    if let Some(session) = session {
        match session.finish() {
            Ok(path) => eprintln!("Cassette saved: {}", path.display()),
            Err(e) => eprintln!("Warning: failed to save cassette: {e}"),
        }
    }
}

async fn generate(
    config: &Config,
    catalog: &Catalog,
    templates: &PromptTemplates,
    text: &str,
    image: Option<&Path>,
    output: Option<&Path>,
) -> Result<(), BotError> {
    let mut intent = parser::parse(text, catalog);
    if intent.free_text.is_empty() {
        intent.free_text = if image.is_some() {
            templates.redraw_default.clone()
        } else if intent.is_random() {
            "random".to_string()
        } else {
            return Err(BotError::InvalidArgument("Add a description of the image".into()));
        };
    }

    let images = match image {
        Some(path) => vec![tokio::fs::read(path).await?],
        None => Vec::new(),
    };
    let mut rng = context::rng_from_seed(config.bot.seed);
    let settings = resolver::resolve(&intent, catalog, &mut rng);
    let suffix = Some(templates.default_image_suffix.as_str()).filter(|s| !s.is_empty());
    let prompt = templates.image_prompt(&intent.free_text, &settings, suffix);
    info!(prompt = %prompt, images = images.len(), "generating");

    let (api, session) = generation_api(config)?;
    let result = api.generate_image(&ImageRequest::new(prompt, images)).await;
    drop(api);
    finish_recording(session);
    let response = result?;

    if let Some(text) = &response.text {
        println!("{text}");
    }
    println!("{}", render::command_line(&intent.free_text, &settings));
    match response.image {
        Some(image) => {
            let path = resolve_output_path(output, &intent.free_text, &image.mime_type);
            save_image(&image.data, &image.mime_type, &path)?;
            eprintln!("Saved: {}", path.display());
            Ok(())
        }
        None => Err(BotError::EmptyResult),
    }
}

async fn chat(
    config: Config,
    catalog: Catalog,
    templates: PromptTemplates,
    chat_id: i64,
    user_id: i64,
) -> Result<(), BotError> {
    let (api, session) = generation_api(&config)?;

    let store = Arc::new(LocalMediaStore::new(&config.paths.media_dir));
    let console = Arc::new(ConsoleTransport::new(
        Box::new(std::io::stdout()),
        Arc::clone(&store),
        chat_id,
        user_id,
    ));
    let media = CachingMediaFetcher::new(Box::new(Arc::clone(&store)), &config.paths.cache_dir);

    let states = MemoryStateStore::new(
        config.bot.state_capacity,
        chrono::Duration::hours(config.bot.state_ttl_hours),
    );
    let chats = ChatStore::new();
    restore(&states, &chats, &config.paths.state_file, &config.paths.chat_file);

    let transport: Arc<dyn Transport> = console.clone();
    let ctx = ServiceContext {
        api,
        transport,
        media: Box::new(media),
        states: Box::new(states),
        chats,
        catalog,
        templates,
        options: BotOptions::from_config(&config),
        rng: context::seeded_rng(config.bot.seed),
    };
    let router = Arc::new(Router::new(Arc::new(ctx)));
    info!(chat_id, user_id, "console chat ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let event = match parse_line(&line) {
            Ok(Some(parsed)) => console.resolve(parsed).await,
            Ok(None) => continue,
            Err(e) => Err(e),
        };
        match event {
            Ok(ConsoleEvent::Update(update)) => router.handle_isolated(update).await,
            Ok(ConsoleEvent::Wait(duration)) => tokio::time::sleep(duration).await,
            Err(e) => warn!(error = %e, "input line ignored"),
        }
    }

    router.settle().await;
    let ctx = router.context();
    persist(ctx.states.as_ref(), &ctx.chats, &config.paths.state_file, &config.paths.chat_file);
    drop(router);
    finish_recording(session);
    Ok(())
}

fn restore(states: &dyn StateStore, chats: &ChatStore, state_file: &Path, chat_file: &Path) {
    if let Err(e) = states.load_all(state_file) {
        warn!(error = %e, "message state not restored");
    }
    if let Err(e) = chats.load_all(chat_file) {
        warn!(error = %e, "chat settings not restored");
    }
}

fn persist(states: &dyn StateStore, chats: &ChatStore, state_file: &Path, chat_file: &Path) {
    if let Err(e) = states.save_all(state_file) {
        warn!(error = %e, "message state not saved");
    }
    if let Err(e) = chats.save_all(chat_file) {
        warn!(error = %e, "chat settings not saved");
    }
}
