use serde::{Deserialize, Serialize};

use crate::{context::Context, names::Name};

/// An interaction recorded by the IDE, decoded from the `"type"` tag.
///
/// Only completion events carry data the evaluation needs; every kind the
/// decoder does not know collapses into [`IdeEvent::Other`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IdeEvent {
    Completion(CompletionEvent),
    Command(CommandEvent),
    #[serde(other)]
    Other,
}

impl IdeEvent {
    pub fn into_completion(self) -> Option<CompletionEvent> {
        match self {
            IdeEvent::Completion(ce) => Some(ce),
            _ => None,
        }
    }
}

/// Just the kind tag of an event; cheap to decode for a census.
#[derive(Debug, Clone, Deserialize)]
pub struct EventHeader {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEvent {
    pub command_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationState {
    Applied,
    Cancelled,
    Filtered,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub name: Name,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<i32>,
}

impl Proposal {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            relevance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalSelection {
    pub proposal: Proposal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub context: Context,
    /// Everything the IDE offered, in display order.
    #[serde(default)]
    pub proposals: Vec<Proposal>,
    /// Selection history; the last entry is what the user ended up on.
    #[serde(default)]
    pub selections: Vec<ProposalSelection>,
    pub terminated_state: TerminationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<String>,
}

impl CompletionEvent {
    pub fn last_selected_proposal(&self) -> Option<&Proposal> {
        self.selections.last().map(|s| &s.proposal)
    }

    pub fn proposal_names(&self) -> Vec<Name> {
        self.proposals.iter().map(|p| p.name.clone()).collect()
    }

    /// Applied by the user and ending on a type member.
    pub fn is_applied_member_completion(&self) -> bool {
        self.terminated_state == TerminationState::Applied
            && self
                .last_selected_proposal()
                .is_some_and(|p| p.name.as_member().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::names::{MemberName, TypeName};

    fn selection(name: Name) -> ProposalSelection {
        ProposalSelection {
            proposal: Proposal::new(name),
            selected_after_ms: None,
        }
    }

    fn event(state: TerminationState, selections: Vec<ProposalSelection>) -> CompletionEvent {
        CompletionEvent {
            context: Context::default(),
            proposals: Vec::new(),
            selections,
            terminated_state: state,
            triggered_at: None,
        }
    }

    #[test]
    fn decodes_known_and_unknown_kinds() {
        let cmd: IdeEvent = serde_json::from_str(
            r#"{"type": "Command", "command_id": "Edit.Copy"}"#,
        )
        .unwrap();
        assert!(matches!(cmd, IdeEvent::Command(ref c) if c.command_id == "Edit.Copy"));

        let other: IdeEvent = serde_json::from_str(
            r#"{"type": "WindowEvent", "window": "Solution Explorer"}"#,
        )
        .unwrap();
        assert!(matches!(other, IdeEvent::Other));
        assert!(other.into_completion().is_none());

        let header: EventHeader = serde_json::from_str(
            r#"{"type": "WindowEvent", "window": "Solution Explorer"}"#,
        )
        .unwrap();
        assert_eq!(header.kind, "WindowEvent");
    }

    #[test]
    fn decodes_completion_event() {
        let json = r#"{
            "type": "Completion",
            "context": {"sst": {"enclosing_type": {"kind": "class", "name": "A"}}},
            "proposals": [{"name": {"other": {"identifier": "if"}}}],
            "terminated_state": "Cancelled"
        }"#;
        let ce = serde_json::from_str::<IdeEvent>(json)
            .unwrap()
            .into_completion()
            .unwrap();
        assert_eq!(ce.terminated_state, TerminationState::Cancelled);
        assert_eq!(ce.proposals.len(), 1);
        assert!(ce.last_selected_proposal().is_none());
    }

    #[test]
    fn last_selection_wins() {
        let foo = TypeName::class("Foo", "Lib");
        let ce = event(
            TerminationState::Applied,
            vec![
                selection(Name::Type(foo.clone())),
                selection(Name::Member(MemberName::method(foo, "Bar"))),
            ],
        );
        let last = ce.last_selected_proposal().unwrap();
        assert_eq!(last.name.as_member().unwrap().name, "Bar");
        assert!(ce.is_applied_member_completion());
    }

    #[test]
    fn applied_member_completion_requires_both() {
        let foo = TypeName::class("Foo", "Lib");
        let member = || selection(Name::Member(MemberName::method(foo.clone(), "Bar")));

        assert!(!event(TerminationState::Cancelled, vec![member()]).is_applied_member_completion());
        assert!(!event(TerminationState::Applied, vec![]).is_applied_member_completion());
        assert!(
            !event(TerminationState::Applied, vec![selection(Name::Type(foo.clone()))])
                .is_applied_member_completion()
        );
        assert!(event(TerminationState::Applied, vec![member()]).is_applied_member_completion());
    }
}
