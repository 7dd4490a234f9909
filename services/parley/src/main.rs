//! Terminal client for realtime voice and text conversations.
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Connecting the conversation engine and configuring the session.
//! 3. Wiring the default audio devices to the engine, unless `--text-only`.
//! 4. Reading typed messages and commands from stdin until `/quit` or EOF.

mod audio_io;
mod config;

use anyhow::Context;
use clap::Parser;
use config::Config;
use openai_realtime::{Intent, WebSocketConnector};
use openai_realtime_types::{
    AudioFormat, InputAudioTranscription, ItemRole, Modality, ServerEvent, Session,
    TranscriptionModel, TranscriptionSession, TurnDetection,
};
use parley_core::{Conversation, ConversationOptions};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Talk to a realtime model from the terminal")]
struct Cli {
    /// Do not open audio devices; chat over text only.
    #[arg(long)]
    text_only: bool,
    /// Connect with the transcription intent and only print transcripts.
    #[arg(long)]
    transcription: bool,
}

enum Command {
    Quit,
    Interrupt,
    Commit,
    Say(String),
    Nothing,
}

fn parse_command(line: &str) -> Command {
    match line.trim() {
        "" => Command::Nothing,
        "/quit" | "/exit" => Command::Quit,
        "/interrupt" => Command::Interrupt,
        "/commit" => Command::Commit,
        text => Command::Say(text.to_string()),
    }
}

fn conversation_session(config: &Config, text_only: bool) -> Session {
    let modalities = if text_only {
        vec![Modality::Text]
    } else {
        vec![Modality::Text, Modality::Audio]
    };
    Session {
        modalities: Some(modalities),
        instructions: config.instructions.clone(),
        voice: Some(config.voice.clone()),
        input_audio_format: Some(AudioFormat::Pcm16),
        output_audio_format: Some(AudioFormat::Pcm16),
        input_audio_transcription: Some(InputAudioTranscription::new(TranscriptionModel::Whisper1)),
        turn_detection: (!text_only).then(TurnDetection::server_vad),
        ..Default::default()
    }
}

fn transcription_session() -> TranscriptionSession {
    TranscriptionSession {
        input_audio_format: Some(AudioFormat::Pcm16),
        input_audio_transcription: Some(InputAudioTranscription::new(
            TranscriptionModel::Gpt4oTranscribe,
        )),
        turn_detection: Some(TurnDetection::server_vad()),
        ..Default::default()
    }
}

/// Prints model output and transcripts as they arrive.
async fn print_events(conversation: &Conversation) {
    let mut events = conversation.events();
    let mut errors = conversation.errors();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event printer fell behind."),
                Err(RecvError::Closed) => break,
            },
            err = errors.recv() => match err {
                Ok(err) => error!(error = %err, "Conversation error."),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Error printer fell behind."),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

fn print_event(event: &ServerEvent) {
    let mut stdout = std::io::stdout().lock();
    let _ = match event {
        ServerEvent::ResponseTextDelta(delta) | ServerEvent::ResponseAudioTranscriptDelta(delta) => {
            write!(stdout, "{}", delta.delta)
        }
        ServerEvent::ResponseDone(_) => writeln!(stdout),
        ServerEvent::InputAudioTranscriptionCompleted(done) => {
            writeln!(stdout, "\n> {}", done.transcript.trim())
        }
        _ => Ok(()),
    };
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Connect ---
    let intent = if cli.transcription {
        Intent::Transcription
    } else {
        Intent::Conversation
    };
    let connector = WebSocketConnector::new(config.api_key.clone())
        .with_url(config.url.clone())
        .with_model(config.model.clone())
        .with_intent(intent);
    info!(endpoint = %connector.endpoint(), "Connecting to realtime endpoint.");

    let options = ConversationOptions {
        playback_capacity: config.playback_capacity,
        ..Default::default()
    };
    let conversation = Conversation::connect(&connector, options)
        .await
        .context("Failed to connect")?;
    conversation
        .wait_for_connection()
        .await
        .context("Connection closed before the session was created")?;
    info!(model = %config.model, "Session created.");

    if cli.transcription {
        conversation
            .set_transcription_session(transcription_session())
            .await
            .context("Failed to configure transcription session")?;
    } else {
        conversation
            .set_session(conversation_session(&config, cli.text_only))
            .await
            .context("Failed to configure session")?;
    }

    // --- 4. Audio Devices ---
    let _devices = if cli.text_only {
        None
    } else {
        let devices = audio_io::AudioDevices::start(
            conversation.playback_queue(),
            conversation.capture_bridge(),
        )
        .context("Failed to open audio devices")?;
        conversation.start_listening();
        Some(devices)
    };

    // --- 5. Chat Loop ---
    let printer = print_events(&conversation);
    let input = async {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
            match parse_command(&line) {
                Command::Quit => break,
                Command::Nothing => {}
                Command::Interrupt => match conversation.interrupt_speech().await {
                    Ok(Some(intent)) => info!(item_id = %intent.item_id, audio_end_ms = intent.audio_end_ms, "Interrupted."),
                    Ok(None) => info!("Nothing playing."),
                    Err(e) => warn!(error = %e, "Interrupt failed."),
                },
                Command::Commit => {
                    if let Err(e) = conversation.commit_audio().await {
                        warn!(error = %e, "Commit failed.");
                    }
                }
                Command::Say(text) => {
                    if let Err(e) = conversation.send_text(ItemRole::User, text, None).await {
                        warn!(error = %e, "Failed to send message.");
                    }
                }
            }
        }
        anyhow::Ok(())
    };

    let mut state = conversation.state();
    tokio::select! {
        result = input => result?,
        _ = printer => {}
        _ = state.wait_for(|s| !s.connected) => warn!("Connection closed by the server."),
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C."),
    }

    info!("Shutting down...");
    conversation.stop_handling_voice();
    conversation.shutdown().await;
    Ok(())
}
