use serde::Serialize;

use crate::{
    archive::ReadingArchive,
    events::{CompletionEvent, IdeEvent},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    /// Records pulled from the archive, undecodable ones included.
    pub read: usize,
    pub decode_failures: usize,
    /// Applied member completions yielded.
    pub passed: usize,
}

/// Applied member completions from one event archive.
///
/// Reads the archive lazily, only as far as the next matching event.
/// Records that fail to decode are logged and skipped. Owns the archive,
/// so dropping the iterator closes it.
#[derive(Debug)]
pub struct AppliedCompletions {
    archive: ReadingArchive,
    stats: FilterStats,
}

impl AppliedCompletions {
    pub fn new(archive: ReadingArchive) -> Self {
        Self {
            archive,
            stats: FilterStats::default(),
        }
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }
}

impl Iterator for AppliedCompletions {
    type Item = CompletionEvent;

    fn next(&mut self) -> Option<CompletionEvent> {
        loop {
            let record = self.archive.next_record::<IdeEvent>()?;
            self.stats.read += 1;
            let event = match record {
                Ok(event) => event,
                Err(e) => {
                    self.stats.decode_failures += 1;
                    tracing::warn!("skipping event: {e}");
                    continue;
                }
            };
            if let Some(ce) = event.into_completion()
                && ce.is_applied_member_completion()
            {
                self.stats.passed += 1;
                return Some(ce);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        archive::write_archive,
        context::Context,
        events::{CommandEvent, Proposal, ProposalSelection, TerminationState},
        names::{MemberName, Name, TypeName},
    };

    fn completion(state: TerminationState, selected: Option<Name>) -> IdeEvent {
        IdeEvent::Completion(CompletionEvent {
            context: Context::default(),
            proposals: vec![],
            selections: selected
                .into_iter()
                .map(|name| ProposalSelection {
                    proposal: Proposal::new(name),
                    selected_after_ms: None,
                })
                .collect(),
            terminated_state: state,
            triggered_at: None,
        })
    }

    fn member() -> Name {
        Name::Member(MemberName::method(TypeName::class("Foo", "Lib"), "Bar"))
    }

    #[test]
    fn yields_only_applied_member_completions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("events.zip");
        let events = vec![
            completion(TerminationState::Applied, Some(member())),
            completion(TerminationState::Cancelled, Some(member())),
            IdeEvent::Command(CommandEvent {
                command_id: "Edit.Copy".to_string(),
                triggered_at: None,
            }),
            completion(
                TerminationState::Applied,
                Some(Name::Other {
                    identifier: "var".to_string(),
                }),
            ),
            completion(TerminationState::Applied, None),
            completion(TerminationState::Applied, Some(member())),
        ];
        write_archive(&path, &events).unwrap();

        let mut it = AppliedCompletions::new(ReadingArchive::open(&path).unwrap());
        assert_eq!(it.by_ref().count(), 2);
        assert_eq!(
            it.stats(),
            FilterStats {
                read: 6,
                decode_failures: 0,
                passed: 2,
            }
        );
    }

    #[test]
    fn advances_lazily() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("events.zip");
        let events = vec![
            completion(TerminationState::Applied, Some(member())),
            completion(TerminationState::Applied, Some(member())),
        ];
        write_archive(&path, &events).unwrap();

        let mut it = AppliedCompletions::new(ReadingArchive::open(&path).unwrap());
        assert!(it.next().is_some());
        assert_eq!(it.stats().read, 1);
    }
}
