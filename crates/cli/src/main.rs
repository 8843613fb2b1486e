use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use medassist_api::{build_assistant, build_rag_chain, serve, AppConfig};
use medassist_core::{ChatReply, Intent, IntentClassifier};
use medassist_observability::{init_tracing, AppMetrics};

#[derive(Debug, Parser)]
#[command(name = "medassist")]
#[command(about = "Medical information assistant CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve {
        #[arg(long, env = "MEDASSIST_BIND")]
        bind: Option<String>,
    },
    /// Interactive chat on stdin.
    Chat,
    /// Answer a single message and exit.
    Ask {
        message: String,
        #[arg(long)]
        json: bool,
    },
    /// Show how a message would be classified. Makes no network calls.
    Classify {
        message: String,
        #[arg(long, env = "MEDASSIST_INTENT_RULES")]
        rules: Option<PathBuf>,
    },
    /// Print the passages retrieved for a query.
    Search {
        query: String,
        #[arg(long, default_value_t = 3)]
        k: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("medassist_cli");
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind } => {
            let mut config = AppConfig::from_env()?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            serve(config).await?;
        }
        Command::Chat => run_chat().await?,
        Command::Ask { message, json } => {
            let config = AppConfig::from_env()?;
            let assistant = build_assistant(&config, AppMetrics::shared()).await?;
            let reply = assistant.handle(&message).await;
            print_reply(&reply, json)?;
        }
        Command::Classify { message, rules } => {
            let classifier = match rules {
                Some(path) => IntentClassifier::from_json_path(&path).with_context(|| {
                    format!("failed to load intent rules from {}", path.display())
                })?,
                None => IntentClassifier::builtin(),
            };
            let classification = classifier.classify_detailed(&message);
            println!("{}", serde_json::to_string_pretty(&classification)?);
        }
        Command::Search { query, k } => {
            let config = AppConfig::from_env()?;
            let chain = build_rag_chain(&config).await?;
            let passages = chain.search(&query, k).await?;
            println!("{}", serde_json::to_string_pretty(&passages)?);
        }
    }

    Ok(())
}

async fn run_chat() -> Result<()> {
    let config = AppConfig::from_env()?;
    let assistant = build_assistant(&config, AppMetrics::shared()).await?;

    println!("Medical assistant chat. Say 'bye' to leave.");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if io::stdin().read_line(&mut line)? == 0 {
            break;
        }

        let message = line.trim();
        if message.is_empty() {
            continue;
        }

        let reply = assistant.handle(message).await;
        println!("\n{}\n", reply.text);

        if !reply.sources.is_empty() {
            println!("Sources:");
            for source in &reply.sources {
                println!("- {source}");
            }
            println!();
        }

        if reply.intent == Intent::Farewell {
            break;
        }
    }

    Ok(())
}

fn print_reply(reply: &ChatReply, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reply)?);
    } else {
        println!("{}", reply.text);
    }
    Ok(())
}
