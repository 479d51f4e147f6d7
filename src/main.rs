//! Gem Duel - local runner for the battle engine
//!
//! Runs one of two matches against the in-process backend:
//! - duel: two sessions in a private room, each driven by an autoplayer,
//!   replicating their boards through the shared event feed
//! - practice: an autoplayer against the scripted opponent

use std::time::Duration;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use gem_duel::app::{AppState, MatchView, SessionNotice};
use gem_duel::config::{Config, RunMode};
use gem_duel::game::{AiAction, AiOpponent, AttackInventory, GemGrid, PracticeCommand, PracticeMatch};
use gem_duel::matchmaking::Lobby;
use gem_duel::replication::{SessionError, SessionHandle};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    info!(mode = ?config.mode, seed = ?config.seed, "Starting Gem Duel");
    let state = AppState::new(config);

    let run = async {
        match state.config.mode {
            RunMode::Duel => run_duel(&state).await,
            RunMode::Practice => run_practice(&state).await,
        }
    };

    tokio::select! {
        result = run => result?,
        _ = shutdown_signal() => info!("Match abandoned"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn run_duel(state: &AppState) -> anyhow::Result<()> {
    let config = &state.config;
    let host_lobby = Lobby::new(state.backend.clone(), Uuid::new_v4(), config.game.clone())
        .with_seed(config.seed);
    let guest_lobby = Lobby::new(state.backend.clone(), Uuid::new_v4(), config.game.clone());

    let room = host_lobby.create_room(true).await?;
    info!(code = %room.id, "Private room open");
    let room = guest_lobby
        .join_room(Some(&room.id))
        .await?
        .context("room closed before the guest could join")?;

    let (host, host_task) = host_lobby.enter(room.clone());
    let (guest, guest_task) = guest_lobby.enter(room);
    log_notices("host", host.subscribe());
    log_notices("guest", guest.subscribe());

    host.set_ready(true).await?;
    guest.set_ready(true).await?;
    while !host.start_game().await? {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let bot_seed = config.seed.unwrap_or_else(rand::random);
    let (min_ms, max_ms) = (config.game.ai_min_delay_ms, config.game.ai_max_delay_ms);
    let host_bot = tokio::spawn(autoplay_session(host.clone(), AiOpponent::new(bot_seed, min_ms, max_ms)));
    let guest_bot = tokio::spawn(autoplay_session(
        guest.clone(),
        AiOpponent::new(bot_seed.rotate_left(1), min_ms, max_ms),
    ));

    let host_view = host_task.await?;
    let guest_view = guest_task.await?;
    host_bot.abort();
    guest_bot.abort();

    report("host", &host_view);
    report("guest", &guest_view);

    let in_sync = match (&host_view.local, &guest_view.opponent) {
        (Some(board), Some(mirror)) => board.snapshot == mirror.snapshot,
        _ => false,
    };
    if in_sync {
        info!("Guest mirror matches the host board");
    } else {
        warn!("Guest mirror differs from the host board at shutdown");
    }
    Ok(())
}

async fn run_practice(state: &AppState) -> anyhow::Result<()> {
    let config = &state.config;
    let seed = config.seed.unwrap_or_else(rand::random);
    let practice = PracticeMatch::new(seed, &config.game);
    log_notices("practice", practice.subscribe());

    let (commands, task) = practice.spawn(state.backend.clock.clone());
    let bot = tokio::spawn(autoplay_practice(
        commands,
        AiOpponent::new(
            seed.rotate_left(7),
            config.game.ai_min_delay_ms,
            config.game.ai_max_delay_ms,
        ),
    ));

    let view = task.await?;
    bot.abort();
    report("practice", &view);
    Ok(())
}

/// What an autoplayer wants to do given its own board
fn pick_action(ai: &mut AiOpponent, view: &MatchView) -> AiAction {
    let Some(board) = &view.local else {
        return AiAction::Wait;
    };
    let snapshot = &board.snapshot;
    match GemGrid::from_cells(snapshot.size, snapshot.cells.clone(), 0) {
        Some(grid) => ai.decide(&grid, &AttackInventory::from_slots(board.inventory)),
        None => AiAction::Wait,
    }
}

async fn autoplay_session(session: SessionHandle, mut ai: AiOpponent) {
    loop {
        tokio::time::sleep(ai.next_delay()).await;
        let view = match session.inspect().await {
            Ok(view) if !view.is_finished() => view,
            _ => return,
        };
        if !view.state_allows_moves() {
            continue;
        }

        let result = match pick_action(&mut ai, &view) {
            AiAction::Swap(a, b) => session.make_move(a, b).await.map(|_| ()),
            AiAction::Attack(slot) => session.use_attack(slot).await.map(|_| ()),
            AiAction::Wait => Ok(()),
        };
        match result {
            Err(SessionError::Closed) => return,
            Err(e) => warn!(player = %session.player_id(), error = %e, "Autoplay action failed"),
            Ok(()) => {}
        }
    }
}

async fn autoplay_practice(commands: mpsc::Sender<PracticeCommand>, mut ai: AiOpponent) {
    loop {
        tokio::time::sleep(ai.next_delay()).await;
        let (reply, view) = oneshot::channel();
        if commands.send(PracticeCommand::Inspect { reply }).await.is_err() {
            return;
        }
        let Ok(view) = view.await else {
            return;
        };
        if !view.state_allows_moves() {
            continue;
        }

        let sent = match pick_action(&mut ai, &view) {
            AiAction::Swap(from, to) => {
                let (reply, _outcome) = oneshot::channel();
                commands.send(PracticeCommand::MakeMove { from, to, reply }).await
            }
            AiAction::Attack(slot) => {
                let (reply, _cast) = oneshot::channel();
                commands.send(PracticeCommand::UseAttack { slot, reply }).await
            }
            AiAction::Wait => Ok(()),
        };
        if sent.is_err() {
            return;
        }
    }
}

fn log_notices(label: &'static str, mut rx: broadcast::Receiver<SessionNotice>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(notice @ SessionNotice::BattleFinished { .. })
                | Ok(notice @ SessionNotice::AttackReceived { .. })
                | Ok(notice @ SessionNotice::Paused { .. })
                | Ok(notice @ SessionNotice::MirrorResynced) => info!(side = label, ?notice, "Notice"),
                Ok(notice) => debug!(side = label, ?notice, "Notice"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(side = label, skipped, "Notice log fell behind")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn report(label: &str, view: &MatchView) {
    info!(
        side = label,
        outcome = ?view.outcome,
        score = view.local_stats.score,
        opponent_score = view.opponent_stats.score,
        matches = view.local_stats.total_matches,
        biggest_combo = view.local_stats.biggest_combo,
        attacks_used = view.local_stats.attacks_used,
        "Final result"
    );
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
