use anyhow::{Context, Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use nlsh::config::Config;
use nlsh::editor::ExternalEditor;
use nlsh::errors::NlshError;
use nlsh::executor::Executor;
use nlsh::http_client::ReqwestHttpClient;
use nlsh::llm_client::{ImageAttachment, OpenAiCompatClient};
use nlsh::log_sink::{JsonFileLogSink, LogSink};
use nlsh::selector::{SelectionMode, ToolSelector};
use nlsh::session::{Collaborators, SessionEngine};
use nlsh::ui::TerminalUi;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let mut command = Command::new("nlsh")
        .about("Neural shell - turn natural language into shell commands")
        .long_about(
            "nlsh gathers live context from your system, asks a language model for a shell \
             command, and runs it only after you confirm.",
        )
        .version(env!("CARGO_PKG_VERSION"))
        .arg(Arg::new("prompt")
            .help("What you want to do, in plain language")
            .num_args(1..))
        .arg(Arg::new("backend")
            .long("backend")
            .short('b')
            .help("Backend index from the config file")
            .value_name("N")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("Show reasoning and more logs (-vv for debug)")
            .action(ArgAction::Count))
        .arg(Arg::new("config")
            .long("config")
            .help("Path to the config file")
            .value_name("PATH")
            .value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("init")
            .long("init")
            .help("Write a default config file and exit")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("prompt-file")
            .long("prompt-file")
            .help("Read the prompt from a file")
            .value_name("PATH")
            .value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("log-file")
            .long("log-file")
            .help("Append every model exchange to this file as JSON")
            .value_name("PATH")
            .value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("image")
            .long("image")
            .help("Attach an image (needs a vision-capable backend)")
            .value_name("PATH")
            .value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("follow-up")
            .long("follow-up")
            .short('f')
            .help("Keep the session open for follow-up prompts")
            .action(ArgAction::SetTrue))
        .arg(Arg::new("static-tools")
            .long("static-tools")
            .help("Run every enabled context tool instead of asking the model which ones matter")
            .action(ArgAction::SetTrue));

    // -0 .. -9 select a backend by index.
    for digit in 0..10u8 {
        let short = char::from(b'0' + digit);
        command = command.arg(Arg::new(format!("backend-{digit}"))
            .short(short)
            .help(format!("Use backend {digit}"))
            .hide(true)
            .action(ArgAction::SetTrue));
    }
    command
}

fn backend_index(matches: &ArgMatches) -> Option<usize> {
    (0..10usize)
        .rev()
        .find(|d| matches.get_flag(&format!("backend-{d}")))
        .or_else(|| matches.get_one::<usize>("backend").copied())
}

fn init_tracing(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_prompt(matches: &ArgMatches) -> Result<Option<String>> {
    if let Some(path) = matches.get_one::<PathBuf>("prompt-file") {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
        return Ok(Some(prompt.trim().to_string()).filter(|p| !p.is_empty()));
    }
    let words: Vec<&str> = matches
        .get_many::<String>("prompt")
        .unwrap_or_default()
        .map(|s| s.as_str())
        .collect();
    Ok(Some(words.join(" ")).filter(|p| !p.trim().is_empty()))
}

async fn run(matches: ArgMatches) -> Result<i32> {
    let config_path = matches.get_one::<PathBuf>("config").cloned();

    if matches.get_flag("init") {
        let path = match config_path {
            Some(path) => path,
            None => Config::get_config_path()?,
        };
        Config::write_default(&path)?;
        println!("Wrote default config to {}", path.display());
        return Ok(0);
    }

    let follow_up = matches.get_flag("follow-up");
    let prompt = read_prompt(&matches)?;
    if prompt.is_none() && !follow_up {
        return Err(anyhow!("No prompt provided. Use 'nlsh --help' for usage information."));
    }

    let config = Config::load(config_path.as_deref())?;
    let image = matches
        .get_one::<PathBuf>("image")
        .map(|p| ImageAttachment::from_path(Path::new(p)))
        .transpose()?;
    let backend = config
        .registry()
        .select(backend_index(&matches), image.is_some())?
        .clone();
    if let Some(image) = &image {
        image.check_fits(&backend)?;
    }
    info!("Using backend {} ({})", backend.name, backend.model);

    let client = Arc::new(OpenAiCompatClient::new(Arc::new(ReqwestHttpClient::new())));
    let log_sink = matches
        .get_one::<PathBuf>("log-file")
        .map(|p| Arc::new(JsonFileLogSink::new(p)) as Arc<dyn LogSink>);
    let deps = Collaborators {
        client: client.clone(),
        runner: Arc::new(Executor::new(&config.shell)),
        editor: Arc::new(ExternalEditor::from_env()),
        log_sink,
    };

    let mode = if matches.get_flag("static-tools") || !config.tools.intelligent_selection {
        SelectionMode::Static
    } else {
        SelectionMode::Preflight
    };
    let selector = ToolSelector::new(client, mode, config.selection_timeout());

    let verbose = matches.get_count("verbose") > 0;
    let mut engine = SessionEngine::new(
        backend,
        deps,
        selector,
        config.tool_descriptors(),
        config.session_settings(follow_up),
        TerminalUi::stdio(verbose),
    )
    .with_image(image);

    let code = match prompt {
        Some(prompt) => engine.run(&prompt).await?,
        None => engine.run_interactive().await?,
    };
    Ok(code)
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_count("verbose"));

    let code = match run(matches).await {
        Ok(code) => code,
        Err(e) => match e.downcast_ref::<NlshError>() {
            Some(NlshError::SessionCancelled) => {
                eprintln!("\nCancelled.");
                130
            }
            _ => {
                eprintln!("Error: {e:#}");
                1
            }
        },
    };

    // A pending stdin read would otherwise keep the runtime alive.
    std::process::exit(code);
}
