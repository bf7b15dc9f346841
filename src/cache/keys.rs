//! Key helpers for the namespaces cached in front of Jira and GitHub.

use super::CacheKey;
use crate::breaker::BreakerKey;

pub const BOARDS: &str = "boards";
pub const SPRINTS: &str = "sprints";
pub const SPRINT_ISSUES: &str = "sprint_issues";
pub const VELOCITY: &str = "velocity";
pub const COMMITS: &str = "commits";
pub const PULL_REQUESTS: &str = "pull_requests";
pub const ANALYTICS: &str = "analytics";
pub const HEALTH: &str = "health";
pub const CIRCUIT_BREAKER: &str = "circuit_breaker";

/// Every namespace above.
pub const ALL_NAMESPACES: [&str; 9] = [
    BOARDS,
    SPRINTS,
    SPRINT_ISSUES,
    VELOCITY,
    COMMITS,
    PULL_REQUESTS,
    ANALYTICS,
    HEALTH,
    CIRCUIT_BREAKER,
];

pub fn boards() -> String {
    CacheKey::new(BOARDS).param("all").build()
}

pub fn board(board_id: impl std::fmt::Display) -> String {
    CacheKey::new(BOARDS).param("id").param(board_id).build()
}

/// Sprints of a board, optionally filtered by state.
pub fn sprints(board_id: impl std::fmt::Display, state: Option<&str>) -> String {
    CacheKey::new(SPRINTS)
        .param("board")
        .param(board_id)
        .opt_param(state)
        .build()
}

pub fn sprint(sprint_id: impl std::fmt::Display) -> String {
    CacheKey::new(SPRINTS).param("id").param(sprint_id).build()
}

pub fn sprint_issues(sprint_id: impl std::fmt::Display) -> String {
    CacheKey::new(SPRINT_ISSUES).param(sprint_id).build()
}

pub fn velocity(board_id: impl std::fmt::Display, sprint_count: u32) -> String {
    CacheKey::new(VELOCITY)
        .param(board_id)
        .param(sprint_count)
        .build()
}

/// Commits of `owner/repo` in an optionally bounded date range.
pub fn commits(owner: &str, repo: &str, since: Option<&str>, until: Option<&str>) -> String {
    CacheKey::new(COMMITS)
        .param(owner)
        .param(repo)
        .opt_param(since)
        .opt_param(until)
        .build()
}

pub fn pull_requests(owner: &str, repo: &str, state: &str) -> String {
    CacheKey::new(PULL_REQUESTS)
        .param(owner)
        .param(repo)
        .param(state)
        .build()
}

/// Aggregate keyed by kind and the ordered inputs it was computed from.
pub fn analytics<I>(kind: &str, inputs: I) -> String
where
    I: IntoIterator,
    I::Item: std::fmt::Display,
{
    CacheKey::new(ANALYTICS).param(kind).params(inputs).build()
}

pub fn health(service: &str) -> String {
    CacheKey::new(HEALTH).param(service).build()
}

pub fn breaker_state(key: &BreakerKey) -> String {
    CacheKey::new(CIRCUIT_BREAKER)
        .param(&key.tool)
        .param(&key.operation)
        .build()
}
