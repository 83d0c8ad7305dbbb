//! Chaining Policy — consulted by [`crate::Chainer`] after a stage completes
//! to decide the next action. Encoded as a pure function over
//! `(Stage, has_parent)` rather than a lookup table, since the five outcomes
//! don't share a uniform shape (two of them don't enqueue anything).

use pipeline_core::models::Stage;

/// What the runner should do once a stage's job has been marked COMPLETED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Enqueue the given stage against the same run.
    Enqueue(Stage),
    /// A child run stops at categorize; mark the run COMPLETED without
    /// touching the shared corpus further.
    CompleteChildRun,
    /// Terminal stage for a standalone/parent run.
    CompleteRun,
}

/// The chaining table, keyed on which stage just finished and whether the
/// run has a parent (i.e. is a batch child).
pub fn next_action(completed: Stage, has_parent: bool) -> NextAction {
    match completed {
        Stage::Extract => NextAction::Enqueue(Stage::Parse),
        Stage::Parse => NextAction::Enqueue(Stage::Categorize),
        Stage::Categorize if has_parent => NextAction::CompleteChildRun,
        Stage::Categorize => NextAction::Enqueue(Stage::Similarity),
        Stage::Similarity => NextAction::Enqueue(Stage::Split),
        Stage::Split => NextAction::CompleteRun,
        // A parent run's only stage is Coordinate; its completion is driven
        // by the Batch Coordinator's hand-off, not this table.
        Stage::Coordinate => NextAction::CompleteRun,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_branches_on_parent() {
        assert_eq!(
            next_action(Stage::Categorize, true),
            NextAction::CompleteChildRun
        );
        assert_eq!(
            next_action(Stage::Categorize, false),
            NextAction::Enqueue(Stage::Similarity)
        );
    }

    #[test]
    fn split_always_completes_the_run() {
        assert_eq!(next_action(Stage::Split, true), NextAction::CompleteRun);
        assert_eq!(next_action(Stage::Split, false), NextAction::CompleteRun);
    }

    #[test]
    fn linear_stages_enqueue_their_successor() {
        assert_eq!(
            next_action(Stage::Extract, false),
            NextAction::Enqueue(Stage::Parse)
        );
        assert_eq!(
            next_action(Stage::Parse, true),
            NextAction::Enqueue(Stage::Categorize)
        );
        assert_eq!(
            next_action(Stage::Similarity, false),
            NextAction::Enqueue(Stage::Split)
        );
    }
}
