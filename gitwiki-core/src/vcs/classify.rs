//! Interpretation of git failure output.
//!
//! git reports most recoverable conditions only as human-readable text, so
//! the gateway maps that text onto explicit variants here and branches on the
//! variants. The marker lists are heuristics tied to git's English messages.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullFailure {
    /// Histories diverged; a rebase pull can integrate them.
    FastForwardBlocked,
    /// A previous merge was left unfinished in the work tree.
    UnfinishedMerge,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushFailure {
    NonFastForward,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageFailure {
    /// A pathspec matched nothing on disk (deleted or renamed files).
    NoMatch,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitFailure {
    /// Changes exist in the work tree but none were staged.
    NothingStaged,
    /// The tree already matches HEAD.
    NoChanges,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    MissingUpstream,
    Other,
}

const FAST_FORWARD_MARKERS: &[&str] = &[
    "Not possible to fast-forward",
    "cannot fast-forward",
    "Diverging branches",
];

const UNFINISHED_MERGE_MARKERS: &[&str] = &["You have not concluded your merge"];

const NON_FAST_FORWARD_MARKERS: &[&str] = &[
    "non-fast-forward",
    "fetch first",
    "updates were rejected because",
    "failed to push some refs",
];

const NO_MATCH_MARKERS: &[&str] = &["did not match any files", "pathspec"];

const NOTHING_STAGED_MARKERS: &[&str] = &["nothing added to commit", "no changes added to commit"];

const NO_CHANGES_MARKERS: &[&str] = &["nothing to commit"];

const MISSING_UPSTREAM_MARKERS: &[&str] = &[
    "no upstream configured",
    "missing upstream",
    "does not point to a branch",
    "no upstream branch",
];

fn contains_any(output: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| output.contains(marker))
}

fn contains_any_ignore_case(output: &str, markers: &[&str]) -> bool {
    let lowered = output.to_lowercase();
    markers
        .iter()
        .any(|marker| lowered.contains(&marker.to_lowercase()))
}

pub fn classify_pull_failure(output: &str) -> PullFailure {
    if contains_any(output, UNFINISHED_MERGE_MARKERS) {
        PullFailure::UnfinishedMerge
    } else if contains_any(output, FAST_FORWARD_MARKERS) {
        PullFailure::FastForwardBlocked
    } else {
        PullFailure::Other
    }
}

pub fn classify_push_failure(output: &str) -> PushFailure {
    if contains_any_ignore_case(output, NON_FAST_FORWARD_MARKERS) {
        PushFailure::NonFastForward
    } else {
        PushFailure::Other
    }
}

pub fn classify_stage_failure(output: &str) -> StageFailure {
    if contains_any(output, NO_MATCH_MARKERS) {
        StageFailure::NoMatch
    } else {
        StageFailure::Other
    }
}

pub fn classify_commit_failure(output: &str) -> CommitFailure {
    if contains_any(output, NOTHING_STAGED_MARKERS) {
        CommitFailure::NothingStaged
    } else if contains_any(output, NO_CHANGES_MARKERS) {
        CommitFailure::NoChanges
    } else {
        CommitFailure::Other
    }
}

pub fn classify_upstream_failure(output: &str) -> UpstreamFailure {
    if contains_any_ignore_case(output, MISSING_UPSTREAM_MARKERS) {
        UpstreamFailure::MissingUpstream
    } else {
        UpstreamFailure::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_diverged() {
        let output = "hint: Diverging branches can't be fast-forwarded, you need to either:\n\
                      fatal: Not possible to fast-forward, aborting.";
        assert_eq!(classify_pull_failure(output), PullFailure::FastForwardBlocked);
    }

    #[test]
    fn test_pull_unfinished_merge_wins() {
        let output = "error: You have not concluded your merge (MERGE_HEAD exists).\n\
                      fatal: Not possible to fast-forward, aborting.";
        assert_eq!(classify_pull_failure(output), PullFailure::UnfinishedMerge);
    }

    #[test]
    fn test_pull_network_error_is_other() {
        let output = "fatal: unable to access 'https://example.com/': Could not resolve host";
        assert_eq!(classify_pull_failure(output), PullFailure::Other);
    }

    #[test]
    fn test_push_rejections() {
        let output = " ! [rejected]        main -> main (fetch first)\n\
                      error: failed to push some refs to '/tmp/remote.git'";
        assert_eq!(classify_push_failure(output), PushFailure::NonFastForward);
        assert_eq!(
            classify_push_failure("hint: Updates were rejected because the tip is behind"),
            PushFailure::NonFastForward
        );
        assert_eq!(
            classify_push_failure("remote: Permission to repo denied"),
            PushFailure::Other
        );
    }

    #[test]
    fn test_stage_no_match() {
        assert_eq!(
            classify_stage_failure("fatal: pathspec 'Old.md' did not match any files"),
            StageFailure::NoMatch
        );
        assert_eq!(
            classify_stage_failure("fatal: Unable to create index.lock"),
            StageFailure::Other
        );
    }

    #[test]
    fn test_commit_nothing_staged() {
        let output = "Untracked files:\n\tnew.md\n\
                      nothing added to commit but untracked files present";
        assert_eq!(classify_commit_failure(output), CommitFailure::NothingStaged);
        assert_eq!(
            classify_commit_failure("Author identity unknown"),
            CommitFailure::Other
        );
    }

    #[test]
    fn test_commit_clean_tree() {
        let output = "On branch main\nYour branch is up to date with 'origin/main'.\n\n\
                      nothing to commit, working tree clean";
        assert_eq!(classify_commit_failure(output), CommitFailure::NoChanges);
        assert_eq!(
            classify_commit_failure("nothing to commit (create/copy files and use \"git add\" to track)"),
            CommitFailure::NoChanges
        );
    }

    #[test]
    fn test_missing_upstream() {
        assert_eq!(
            classify_upstream_failure("fatal: no upstream configured for branch 'main'"),
            UpstreamFailure::MissingUpstream
        );
        assert_eq!(
            classify_upstream_failure("fatal: HEAD does not point to a branch"),
            UpstreamFailure::MissingUpstream
        );
        assert_eq!(
            classify_upstream_failure("fatal: bad revision 'HEAD...@{u}'"),
            UpstreamFailure::Other
        );
    }
}
