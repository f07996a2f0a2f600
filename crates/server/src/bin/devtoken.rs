//! Issues a local HS256 dev bearer token for exercising the API against a
//! `local`/`mixed`-auth-mode instance without a real identity provider.
//!
//! Usage: `orchestrator-devtoken <actor_id> <role> [expires_in_seconds]`

use std::process::ExitCode;

use orchestrator_server::auth::{issue_dev_jwt, Role};

fn parse_role(raw: &str) -> Option<Role> {
    match raw.to_lowercase().as_str() {
        "requester" => Some(Role::Requester),
        "reviewer" => Some(Role::Reviewer),
        "approver" => Some(Role::Approver),
        "admin" => Some(Role::Admin),
        _ => None,
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let [actor_id, role_raw, rest @ ..] = args.as_slice() else {
        eprintln!("usage: orchestrator-devtoken <actor_id> <role> [expires_in_seconds]");
        return ExitCode::FAILURE;
    };

    let Some(role) = parse_role(role_raw) else {
        eprintln!("unknown role `{role_raw}` (expected requester|reviewer|approver|admin)");
        return ExitCode::FAILURE;
    };

    let expires_in_seconds = match rest.first() {
        Some(raw) => match raw.parse::<i64>() {
            Ok(value) => value,
            Err(_) => {
                eprintln!("invalid expires_in_seconds: `{raw}`");
                return ExitCode::FAILURE;
            }
        },
        None => 3600,
    };

    let secret = std::env::var("ORCH_JWT_SECRET")
        .unwrap_or_else(|_| "dev-insecure-secret-change-me".to_string());

    let token = issue_dev_jwt(actor_id, role, &secret, expires_in_seconds);
    println!("{token}");
    ExitCode::SUCCESS
}
