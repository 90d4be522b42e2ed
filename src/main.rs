//! livecall binary - terminal front-end for the conversation core
//!
//! Wires the capture pipeline, session transport and playback scheduler
//! together for a single conversation: transcript lines go to stdout,
//! Ctrl-C stops the call. The simulated call-connection delay lives out
//! here, not in the core.

use anyhow::Context;
use livecall::config::{self, SessionConfig, Voice};
use livecall::convo::{Conversation, ConversationStatus};
use livecall::playback::{PulseSink, SystemClock};
use livecall::transcript::TranscriptEntry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How long a tool-requested call "rings" before it is treated as connected.
const CALL_CONNECT_DELAY: Duration = Duration::from_secs(3);

fn system_instruction(participant: &str, language: &str) -> String {
    format!(
        "You are a professional and empathetic payment-resolution agent for \
         Impetus Collection Services. You are speaking with {participant}. \
         Conduct the entire conversation in {language} and do not switch \
         languages unless the customer explicitly asks. Be polite and \
         understanding, but firm about the need to resolve the outstanding \
         amount. Start by introducing yourself and the company."
    )
}

fn print_new_entries(entries: &[TranscriptEntry], printed: &mut usize) {
    for entry in entries.get(*printed..).unwrap_or_default() {
        println!("[{}] {}", entry.speaker, entry.text);
    }
    *printed = entries.len();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    info!("starting livecall");

    let api_key = config::api_key_from_env().context("credential required before connecting")?;

    let participant = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "the customer".to_string());
    let voice = std::env::var("LIVECALL_VOICE")
        .ok()
        .and_then(|v| Voice::parse(&v))
        .unwrap_or_default();
    let language = std::env::var("LIVECALL_LANGUAGE").unwrap_or_else(|_| "Hindi".to_string());

    let config = SessionConfig::new(voice, system_instruction(&participant, &language));

    let clock = Arc::new(SystemClock::new());
    let sink = Arc::new(PulseSink::new()?);
    let mut convo = Conversation::new(config, clock, sink);

    let mut events = convo.start(&api_key).await?;
    info!("connecting with voice {}...", voice.as_str());

    let mut printed = 0;
    // Armed while a tool-requested call is ringing; kept as a select arm so
    // server events stay consumed during the delay.
    let ring = tokio::time::sleep(CALL_CONNECT_DELAY);
    tokio::pin!(ring);
    let mut ringing = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("stopping conversation");
                convo.stop().await;
                break;
            }
            _ = &mut ring, if ringing => {
                ringing = false;
                convo.resolve_call().await;
                print_new_entries(convo.transcript(), &mut printed);
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                convo.handle_event(event).await;
                print_new_entries(convo.transcript(), &mut printed);

                if convo.status() == ConversationStatus::Calling && !ringing {
                    ringing = true;
                    ring.as_mut().reset(tokio::time::Instant::now() + CALL_CONNECT_DELAY);
                }

                if matches!(
                    convo.status(),
                    ConversationStatus::Idle | ConversationStatus::Error
                ) {
                    break;
                }
            }
        }
    }

    if let Some(message) = convo.error_message() {
        error!("conversation ended: {}", message);
    }
    info!("livecall stopped");
    Ok(())
}
