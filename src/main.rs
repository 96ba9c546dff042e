use clap::{Parser, Subcommand};
use prism::{config, run, store::sql::SqlStore};

#[derive(Parser)]
#[command(name = "prism", about = "Prism - batched URL analysis orchestrator")]
struct Cli {
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Apply the entity store schema and exit
	InitDb,
	/// Run the orchestrator (default)
	Run,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();

	match cli.command.unwrap_or(Commands::Run) {
		Commands::InitDb => {
			let settings = match config::load() {
				Ok(s) => s,
				Err(e) => {
					eprintln!("failed to load config: {}", e);
					return;
				}
			};
			match SqlStore::connect(&settings.database_url).await {
				Ok(store) => match store.migrate().await {
					Ok(()) => println!("schema applied to {}", settings.database_url),
					Err(e) => eprintln!("failed to apply schema: {}", e),
				},
				Err(e) => eprintln!("failed to connect to {}: {}", settings.database_url, e),
			}
		}
		Commands::Run => {
			match config::load() {
				Ok(settings) => println!(
					"Loaded settings: host={} port={}",
					settings.host, settings.port
				),
				Err(e) => eprintln!("Warning: failed to load config: {}", e),
			}

			run().await;
		}
	}
}
