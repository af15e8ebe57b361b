//! CLI binary for voicelink.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use voicelink::audio::{MicCapture, SpeakerOutput};
use voicelink::{ChatClient, ClientCommand, ClientConfig, ClientEvent};

/// Voicelink: real-time voice/text conversation client.
#[derive(Parser)]
#[command(name = "voicelink", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Agent server base URL (overrides the config file).
    #[arg(short, long)]
    server: Option<String>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a conversation with the agent.
    Chat {
        /// Begin in voice mode instead of text mode.
        #[arg(long)]
        voice: bool,
    },

    /// List available audio devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voicelink=info,reqwest=warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = if let Some(ref path) = cli.config {
        ClientConfig::from_file(path)?
    } else {
        ClientConfig::default()
    };
    if let Some(server) = cli.server {
        config.server.base_url = server;
    }

    match cli.command.unwrap_or(Command::Chat { voice: false }) {
        Command::Chat { voice } => run_chat(config, voice).await,
        Command::Devices => list_devices(),
    }
}

async fn run_chat(config: ClientConfig, voice: bool) -> anyhow::Result<()> {
    println!("voicelink v{}", env!("CARGO_PKG_VERSION"));
    println!("connecting to {} ...", config.server.base_url);
    println!("commands: /voice, /text, /mute, /unmute, /quit");

    let mut client = ChatClient::new(config);
    let commands = client.command_sender();
    let mut events = client.subscribe();
    let cancel = client.cancel_token();

    client.connect().await?;
    if voice {
        client.start_voice().await?;
    }

    let loop_handle = tokio::spawn(client.run());

    // Render observation events as transcript lines.
    let render = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ClientEvent::MessageAppended(message) => {
                    use voicelink::transcript::Sender;
                    let who = match message.sender {
                        Sender::User => "you",
                        Sender::Agent => "agent",
                    };
                    println!("[{who}] {}", message.content);
                }
                ClientEvent::MessageUpdated { delta, .. } => {
                    print!("{delta}");
                    use std::io::Write;
                    let _ = std::io::stdout().flush();
                }
                ClientEvent::Typing { active: false } => println!(),
                ClientEvent::VoiceActive { active } => {
                    println!("-- voice {}", if active { "on" } else { "off" });
                }
                ClientEvent::Muted { muted } => {
                    println!("-- {}", if muted { "muted" } else { "unmuted" });
                }
                ClientEvent::PlaybackInterrupted => println!("-- interrupted"),
                _ => {}
            }
        }
    });

    // Read stdin lines as user input until /quit or Ctrl-C.
    let stdin = tokio::io::stdin();
    let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(stdin));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim().to_owned();
                match line.as_str() {
                    "" => {}
                    "/quit" => break,
                    "/voice" => { let _ = commands.send(ClientCommand::StartVoice); }
                    "/text" => { let _ = commands.send(ClientCommand::StopVoice); }
                    "/mute" => { let _ = commands.send(ClientCommand::SetMuted(true)); }
                    "/unmute" => { let _ = commands.send(ClientCommand::SetMuted(false)); }
                    _ => { let _ = commands.send(ClientCommand::SendText(line)); }
                }
            }
        }
    }

    cancel.cancel();
    let _ = loop_handle.await;
    render.abort();
    println!("bye");
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    match MicCapture::list_input_devices() {
        Ok(devices) if devices.is_empty() => println!("  (none found)"),
        Ok(devices) => {
            for name in devices {
                println!("  - {name}");
            }
        }
        Err(e) => println!("  error: {e}"),
    }

    println!("\nOutput devices:");
    match SpeakerOutput::list_output_devices() {
        Ok(devices) if devices.is_empty() => println!("  (none found)"),
        Ok(devices) => {
            for name in devices {
                println!("  - {name}");
            }
        }
        Err(e) => println!("  error: {e}"),
    }

    Ok(())
}
