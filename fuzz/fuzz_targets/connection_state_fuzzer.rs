//! Fuzz target for the connection lifecycle state machine
//!
//! # Strategy
//!
//! - Caller operations: connect in any mode, disconnect, network flaps
//! - Collaborator results: delivered for the current generation or a
//!   fuzzer-chosen (often stale) one
//! - Timers: fired in arbitrary order, including superseded ones
//!
//! # Invariants
//!
//! - `should_connect` implies a URL, a credential and no teardown in progress
//! - Never more than one credential request in flight
//! - Retry count never exceeds the configured budget
//! - Nothing changes after shutdown

#![no_main]

use arbitrary::Arbitrary;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use carelink_core::{
    ConnectionAction, ConnectionEvent, ConnectionManager, ConnectionMode, ConnectionPhase,
    ManagerConfig, Timer, TokenError,
};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Connect(u8),
    Disconnect,
    Network(bool),
    Fetched { stale: Option<u8>, outcome: Outcome },
    Refreshed { stale: Option<u8>, ok: bool },
    FireTimer(u8),
    Shutdown,
}

#[derive(Debug, Clone, Arbitrary)]
enum Outcome {
    Valid,
    Garbage(String),
    Unauthorized,
    Status(u16),
    Transport,
}

fn mode(choice: u8) -> ConnectionMode {
    match choice % 3 {
        0 => ConnectionMode::Cloud,
        1 => ConnectionMode::Manual,
        _ => ConnectionMode::Env,
    }
}

fn valid_token() -> String {
    let payload = URL_SAFE_NO_PAD.encode(br#"{"identity":"fuzz"}"#);
    format!("e30.{payload}.sig")
}

fuzz_target!(|ops: Vec<Op>| {
    let mut mgr = ConnectionManager::new(ManagerConfig::with_media_url("wss://media.fuzz"));
    let mut timers: Vec<Timer> = Vec::new();
    let mut in_flight: Option<u64> = None;
    let mut frozen = None;

    for op in ops {
        let pick_generation = |stale: Option<u8>| match stale {
            Some(back) => mgr.generation().saturating_sub(u64::from(back)),
            None => mgr.generation(),
        };

        let event = match op {
            Op::Connect(choice) => ConnectionEvent::Connect { mode: mode(choice) },
            Op::Disconnect => ConnectionEvent::Disconnect,
            Op::Network(online) => ConnectionEvent::NetworkChanged { online },
            Op::Fetched { stale, outcome } => {
                let generation = pick_generation(stale);
                if in_flight == Some(generation) {
                    in_flight = None;
                }
                let result = match outcome {
                    Outcome::Valid => Ok(valid_token()),
                    Outcome::Garbage(token) => Ok(token),
                    Outcome::Unauthorized => Err(TokenError::Unauthorized),
                    Outcome::Status(status) => {
                        Err(TokenError::Status { status, message: String::new() })
                    },
                    Outcome::Transport => Err(TokenError::Transport("reset".into())),
                };
                ConnectionEvent::CredentialFetched { generation, result }
            },
            Op::Refreshed { stale, ok } => {
                let generation = pick_generation(stale);
                let result = if ok { Ok(()) } else { Err("refresh failed".into()) };
                ConnectionEvent::SessionRefreshed { generation, result }
            },
            Op::FireTimer(index) => {
                if timers.is_empty() {
                    continue;
                }
                let timer = timers.remove(usize::from(index) % timers.len());
                ConnectionEvent::TimerFired(timer)
            },
            Op::Shutdown => ConnectionEvent::Shutdown,
        };

        for action in mgr.handle(event) {
            match action {
                ConnectionAction::FetchCredential { generation, .. } => {
                    assert_ne!(in_flight, Some(generation), "duplicate credential request");
                    in_flight = Some(generation);
                },
                ConnectionAction::Schedule { timer, .. } => timers.push(timer),
                _ => {},
            }
        }

        let details = mgr.details();
        assert!(details.is_consistent(), "inconsistent details: {details:?}");
        if details.should_connect {
            assert_eq!(mgr.phase(), ConnectionPhase::Connected);
        }
        assert!(mgr.retry_count() <= mgr.config().backoff.max_attempts);

        if !mgr.is_live() {
            let snapshot = (mgr.phase(), details.clone());
            let previous = frozen.get_or_insert_with(|| snapshot.clone());
            assert_eq!(*previous, snapshot, "state changed after shutdown");
        }
    }
});
