use std::{collections::HashSet, sync::Arc};

use {
    anyhow::Result,
    tether_client::ConnectionState,
    tether_config::TetherConfig,
    tether_mirror::{Sender, Turn, TurnStatus},
    tether_protocol::EnvelopeType,
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        sync::broadcast,
    },
};

use crate::{device_tools::DeviceTools, history_commands::format_turn, session::Session};

const HELP: &str = "Type a message and press enter. /more loads older turns, /quit exits.";

pub async fn run_chat(config: &TetherConfig) -> Result<()> {
    let session = Session::open(config).await?;
    session.tools.set_handler(Arc::new(DeviceTools));

    let mut state = session.connection.state();
    let mut messages = session.mirror.messages();
    let mut status = session.mirror.status_label();
    let mut lifecycle = session.router.lifecycle();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut lifecycle_open = true;

    eprintln!("Connecting to {}. {HELP}", config.gateway.ws_url());
    let mut seen = HashSet::new();
    print_window(&messages.borrow_and_update(), &mut seen);

    let result = loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e.into()),
                };
                match line.trim() {
                    "" => {},
                    "/quit" => break Ok(()),
                    "/help" => eprintln!("{HELP}"),
                    "/more" => {
                        if let Err(e) = session.mirror.load_more().await {
                            break Err(e.into());
                        }
                        seen.clear();
                        print_window(&messages.borrow_and_update(), &mut seen);
                    },
                    text => match session.mirror.send_message(text, Vec::new()).await {
                        Ok(turn) => {
                            seen.insert(turn.id.clone());
                            if turn.status == TurnStatus::Failed {
                                eprintln!("(not delivered: {})", session.connection.current_state());
                            }
                        },
                        Err(e) => break Err(e.into()),
                    },
                }
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = *state.borrow_and_update();
                eprintln!("[{current}]");
                if current == ConnectionState::Disconnected
                    && let Some(error) = session.connection.last_error()
                {
                    eprintln!("Connection closed: {error}");
                }
            },
            changed = messages.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                print_new_agent_turns(&messages.borrow_and_update(), &mut seen);
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                if let Some(label) = status.borrow_and_update().as_deref() {
                    eprintln!("... {label}");
                }
            },
            next = lifecycle.recv(), if lifecycle_open => match next {
                Ok(envelope) => match envelope.kind() {
                    Some(EnvelopeType::Exit) => {
                        eprintln!("Gateway ended the session.");
                        break Ok(());
                    },
                    Some(EnvelopeType::SetupRequired) => {
                        eprintln!("Gateway needs setup first; run `tether setup init`.");
                    },
                    _ => {},
                },
                Err(broadcast::error::RecvError::Lagged(_)) => {},
                Err(broadcast::error::RecvError::Closed) => lifecycle_open = false,
            },
        }
    };

    session.close();
    result
}

fn print_window(turns: &[Turn], seen: &mut HashSet<String>) {
    for turn in turns {
        seen.insert(turn.id.clone());
        println!("{}", format_turn(turn));
    }
}

/// Agent turns not printed yet. The user's own turns are already on screen.
fn print_new_agent_turns(turns: &[Turn], seen: &mut HashSet<String>) {
    for turn in turns {
        if seen.insert(turn.id.clone()) && turn.sender == Sender::Agent {
            println!("{}", format_turn(turn));
        }
    }
}
