//! llmodel - run a local GGUF model from the command line
//!
//! Prints the chat completion (or raw completion text) for the given messages.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use llmodel::model::LlModel;
use llmodel::storage::settings::load_settings;
use llmodel::types::message::ChatTurn;

#[derive(Parser, Debug)]
#[command(version, about = "Generate text with a local GGUF model")]
struct Args {
    /// Path to the GGUF model (defaults to the one in settings.json)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// System message, may be repeated
    #[arg(short, long)]
    system: Vec<String>,

    /// User messages; sent verbatim as the prompt with --raw
    #[arg(required = true)]
    messages: Vec<String>,

    /// Skip the chat template and print only the generated text
    #[arg(long)]
    raw: bool,

    /// Number of CPU threads
    #[arg(short, long)]
    threads: Option<i32>,

    /// Maximum number of tokens to generate
    #[arg(short = 'n', long)]
    n_predict: Option<i32>,

    /// Stream generated text to stdout while generating
    #[arg(long)]
    echo: bool,

    /// Print the full prompt before generating
    #[arg(long)]
    echo_prompt: bool,

    /// Log every token id
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout only carries generated output
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("llmodel=info".parse()?))
        .init();

    let args = Args::parse();
    let settings = load_settings();

    let model_path = args
        .model
        .or(settings.model_path.clone())
        .ok_or("no model given and none configured in settings")?;

    info!("Starting llmodel v{}", env!("CARGO_PKG_VERSION"));

    let mut model = LlModel::load(&model_path, settings.gpu_layers)?;
    model.set_thread_count(args.threads.unwrap_or(settings.threads));

    let mut config = settings.generation.clone();
    if let Some(n_predict) = args.n_predict {
        config.n_predict = n_predict;
    }

    let mut options = settings.output_options();
    options.echo |= args.echo;
    options.echo_prompt |= args.echo_prompt;
    options.debug |= args.debug;

    if args.raw {
        let prompt = args.messages.join("\n");
        let adapter = llmodel::inference::StreamingAdapter::from_options(&options);
        let result = model.generate_with(&prompt, &config, adapter)?;
        if !options.echo {
            print!("{}", result.text);
        }
        println!();
        return Ok(());
    }

    let turns: Vec<ChatTurn> = args
        .system
        .into_iter()
        .map(ChatTurn::system)
        .chain(args.messages.into_iter().map(ChatTurn::user))
        .collect();

    let response = model.chat_completion_with(&turns, &config, &options)?;
    if options.echo {
        println!();
    }
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
