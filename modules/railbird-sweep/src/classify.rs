//! Response classifier — reduces a fetched payload to one outcome kind.
//!
//! Rule order is load-bearing. Explicit error fields are checked before the
//! "name looks like an error" heuristic, so a real configuration failure
//! ("API key not configured") is never misreported as an unparseable page.
//! The tournament-not-found pattern is checked before the generic
//! UNKNOWN-status error, so an empty slot is never misreported as a failure.

use fetcher_client::{FetchResult, FetchSource};
use railbird_common::GameStatus;

/// Phrases that mark an UNKNOWN-status payload as "no tournament at this ID"
/// rather than a genuine failure. Matched case-insensitively against the
/// error and name fields.
const TOURNAMENT_NOT_FOUND_PHRASES: [&str; 5] = [
    "tournament not found",
    "event not found",
    "no tournament",
    "does not exist",
    "invalid tournament",
];

/// One outcome per fetched payload. `TournamentNotFound` and `NotFound`
/// share counter semantics and differ only in the emitted message;
/// `Unparseable` counts like NOT_FOUND but keeps its own label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Published,
    TournamentNotFound,
    NotFound,
    NotPublished,
    Unparseable,
    Error(String),
}

/// Classify a fetched payload. Pure: same payload in, same kind out.
pub fn classify(payload: Option<&FetchResult>) -> Classification {
    let Some(p) = payload else {
        return Classification::Error("null fetch payload".to_string());
    };

    let not_found_text = matches_tournament_not_found(p);

    // A valid not-found page sometimes arrives with error fields set by the
    // scraper; the status text wins over the error flag for those.
    if has_error_fields(p) && !not_found_text {
        return Classification::Error(error_message(p));
    }

    match p.game_status {
        Some(GameStatus::Unknown) if not_found_text => {
            return Classification::TournamentNotFound;
        }
        Some(GameStatus::Unknown) => {
            return Classification::Error(format!(
                "unrecognized game status: {}",
                p.name.as_deref().unwrap_or("<unnamed>")
            ));
        }
        Some(GameStatus::NotFound) | Some(GameStatus::NotInUse) => {
            return Classification::NotFound;
        }
        Some(GameStatus::NotPublished) => return Classification::NotPublished,
        _ => {}
    }

    // Known false-positive risk: a real tournament named e.g. "Error's
    // Revenge" lands here. Accepted; the error fields were already ruled out.
    if name_looks_like_error(p) {
        return Classification::Unparseable;
    }

    Classification::Published
}

/// Does a fetch/save exception message match the GraphQL enum-serialization
/// failure for the gameStatus field? Those pages are real tournaments whose
/// status string the schema does not know — treated as NOT_PUBLISHED, not
/// as errors.
pub fn is_game_status_enum_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("gamestatus")
        && (lower.contains("invalid value")
            || lower.contains("enum")
            || lower.contains("cannot represent"))
}

fn has_error_fields(p: &FetchResult) -> bool {
    p.error_message.is_some()
        || p.error.is_some()
        || p.source == FetchSource::Error
        || p.http_status.is_some_and(|s| s >= 400)
}

fn matches_tournament_not_found(p: &FetchResult) -> bool {
    let mut haystacks = Vec::with_capacity(3);
    if let Some(ref e) = p.error_message {
        haystacks.push(e.to_lowercase());
    }
    if let Some(ref e) = p.error {
        haystacks.push(e.to_lowercase());
    }
    if let Some(ref n) = p.name {
        haystacks.push(n.to_lowercase());
    }

    haystacks.iter().any(|text| {
        TOURNAMENT_NOT_FOUND_PHRASES
            .iter()
            .any(|phrase| text.contains(phrase))
    })
}

fn name_looks_like_error(p: &FetchResult) -> bool {
    p.name
        .as_deref()
        .is_some_and(|n| n.to_lowercase().contains("error"))
}

fn error_message(p: &FetchResult) -> String {
    if let Some(ref msg) = p.error_message {
        return msg.clone();
    }
    if let Some(ref msg) = p.error {
        return msg.clone();
    }
    match p.http_status {
        Some(status) => format!("upstream returned HTTP {status}"),
        None => "upstream reported an error".to_string(),
    }
}
