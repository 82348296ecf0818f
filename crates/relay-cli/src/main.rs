use clap::Parser;
use relay_cli::{
    App,
    app::{init_config, init_logging, load_config},
    cli::{Args, Commands},
    error::Result,
    signal::wait_for_termination,
};
use std::process;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args = Args::parse();
    let command = args.command();

    // Init needs no configuration and must work when the current one is broken
    if let Commands::Init { output, force } = &command {
        init_logging(&relay_config::LoggingConfig::default());
        finish(init_config(output, *force));
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            process::exit(1);
        }
    };
    init_logging(&config.logging);

    let result = match command {
        Commands::Config { show } => handle_config(&config, show),
        command => run(App::new(config), command).await,
    };

    finish(result);
}

fn finish(result: Result<()>) -> ! {
    match result {
        Ok(_) => {
            info!("Command completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Command failed: {}", e);
            process::exit(1);
        }
    }
}

/// Run a broker command
async fn run(app: App, command: Commands) -> Result<()> {
    match command {
        Commands::Provision {
            topic,
            subscription,
            filter,
        } => {
            app.provision(&topic, subscription.as_deref(), filter.as_deref())
                .await?;
        }
        Commands::Publish {
            topic,
            payload,
            attributes,
            ordering_key,
        } => {
            warn_if_in_process(&app);
            let receipt = app
                .publish(&topic, &payload, attributes, ordering_key)
                .await?;
            let rendered = serde_json::to_string(&receipt)
                .map_err(relay_pubsub::PubSubError::encoding)?;
            println!("{rendered}");
        }
        Commands::Listen {
            subscription,
            max_messages,
        } => {
            warn_if_in_process(&app);
            app.listen_until(&subscription, max_messages, async {
                if let Err(e) = wait_for_termination().await {
                    error!("Signal handling failed: {}", e);
                }
            })
            .await?;
        }
        Commands::Demo {
            topic,
            subscription,
            filter,
            timeout_secs,
        } => {
            app.demo(
                &topic,
                &subscription,
                &filter,
                Duration::from_secs(timeout_secs),
            )
            .await?;
        }
        Commands::Config { .. } | Commands::Init { .. } => {}
    }

    Ok(())
}

fn warn_if_in_process(app: &App) {
    if !app.config().pubsub.uses_emulator() {
        warn!("No emulator host configured; the in-process broker does not outlive this command");
    }
}

/// Handle configuration commands
fn handle_config(config: &relay_config::Config, show: bool) -> Result<()> {
    if show {
        println!("{}", config.to_toml_string()?);
    } else {
        info!("Configuration is valid");
    }

    Ok(())
}
