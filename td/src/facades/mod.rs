//! External-system façades: thin typed wrappers the Orchestrator calls
//! through trait objects, so swapping the code host or issue tracker
//! never touches orchestration logic.

mod code_host;
mod issue_tracker;

pub use code_host::{CodeHost, CodeHostError, GitHubCodeHost, PullRequestDraft, PullRequestRef};
pub use issue_tracker::{IssueTracker, IssueTrackerError, LinearIssueTracker, NullIssueTracker};
