#![forbid(unsafe_code)]

use std::env;
use std::io::{self, IsTerminal, Read};
use std::sync::Arc;
use std::time::Duration;

use roadwatch_contracts::identity::SessionPhase;
use roadwatch_contracts::view::ViewId;
use roadwatch_contracts::violation::EvidenceRef;
use roadwatch_engines::dev_identity::{StaticIdentityConfig, StaticIdentityProvider};
use roadwatch_engines::http_backend::{HttpBackend, HttpBackendConfig};
use roadwatch_engines::ConsoleBackend;
use roadwatch_os::{Console, ConsoleConfig};
use roadwatch_tools::console_cli::{
    format_archive, format_presets, format_stats, parse_invocation, CliCommand,
};
use tracing_subscriber::EnvFilter;

const SESSION_WAIT: Duration = Duration::from_secs(10);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let invocation = parse_invocation(&args)?;
    let console_config = ConsoleConfig::from_env();
    let backend = Arc::new(HttpBackend::new(HttpBackendConfig::from_env())?);

    if !invocation.command.needs_session() {
        match &invocation.command {
            CliCommand::Presets => {
                println!("{}", format_presets(&console_config.camera_presets));
            }
            CliCommand::EvidenceUrl { filename } => {
                let evidence = EvidenceRef::new(filename.as_str()).map_err(|e| e.to_string())?;
                println!("{}", backend.evidence_url(&evidence));
            }
            CliCommand::Watch { .. } | CliCommand::Archive => {}
        }
        return Ok(());
    }

    let email = match invocation.email.clone() {
        Some(email) => email,
        None => env::var("ROADWATCH_EMAIL")
            .map_err(|_| "an operator email is required (--email or ROADWATCH_EMAIL)".to_string())?,
    };
    let password = read_password(&email)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| e.to_string())?;
    runtime.block_on(async move {
        let identity = Arc::new(StaticIdentityProvider::new(StaticIdentityConfig::from_env()));
        let console =
            Console::new(console_config, backend, identity).map_err(|e| e.to_string())?;
        console.start_session_listener().map_err(|e| e.to_string())?;
        console
            .sign_in_with_password(&email, &password)
            .await
            .map_err(|e| format!("sign-in failed: {e}"))?;
        let mut views = console.subscribe();
        let established = tokio::time::timeout(
            SESSION_WAIT,
            views.wait_for(|v| v.session.phase == SessionPhase::Authenticated),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
        if !established {
            return Err("session could not be established".to_string());
        }

        match invocation.command {
            CliCommand::Watch { ticks } => {
                let mut printed = 0_u32;
                let mut last_stats = None;
                loop {
                    views.changed().await.map_err(|e| e.to_string())?;
                    let stats = views.borrow_and_update().stats.clone();
                    if let Some(stats) = stats {
                        if last_stats.as_ref() != Some(&stats) {
                            println!("{}", format_stats(&stats));
                            last_stats = Some(stats);
                            printed += 1;
                        }
                    }
                    if ticks.is_some_and(|limit| printed >= limit) {
                        break;
                    }
                }
            }
            CliCommand::Archive => {
                console
                    .select_view(ViewId::Archive)
                    .map_err(|e| e.to_string())?;
                console.refresh_archive().await.map_err(|e| e.to_string())?;
                println!("{}", format_archive(&console.snapshot().archive.entries));
            }
            CliCommand::Presets | CliCommand::EvidenceUrl { .. } => {}
        }
        console.sign_out().await.map_err(|e| e.to_string())?;
        Ok(())
    })
}

fn read_password(email: &str) -> Result<String, String> {
    if io::stdin().is_terminal() {
        let prompt = format!("Password for {email}:");
        let value = rpassword::prompt_password(prompt).map_err(|e| e.to_string())?;
        if value.is_empty() {
            return Err("password must not be empty".to_string());
        }
        Ok(value)
    } else {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| e.to_string())?;
        let trimmed = input.trim_end_matches(['\r', '\n']).to_string();
        if trimmed.is_empty() {
            return Err("password must not be empty".to_string());
        }
        Ok(trimmed)
    }
}
