//! Replaying applied completions against the recommender.
//!
//! Every applied member completion in an event corpus is turned into a
//! query: the context at trigger time and the proposals the IDE showed.
//! If the member the user picked comes back at rank `r`, every top-k
//! counter from `r` upward is incremented. Completions the recommender
//! cannot be fairly judged on are skipped and counted per reason.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use globset::GlobMatcher;
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    archive::ReadingArchive,
    bmn::Recommender,
    completion::{AppliedCompletions, FilterStats},
    context::{CompletionInfo, is_in_hierarchy},
    error::Result,
    events::CompletionEvent,
    metrics::TopK,
    walker::{self, DiscoveredArchive},
};

/// Why a completion was not evaluated.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoSelection,
    NoCompletionInfo,
    OnTypeReference,
    NotAMember,
    StaticMember,
    DeclaredInEnclosingType,
    DeclaredInSupertype,
    UnknownTrigger,
    NoModel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// Evaluated; `rank` is the 1-based position of the expected member
    /// among the recommendations, if it was there at all.
    Evaluated { rank: Option<usize> },
}

/// Accumulated results of an evaluation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub top_k: TopK,
    pub skipped: BTreeMap<SkipReason, u64>,
    /// Completions whose query failed with an error.
    pub errors: u64,
}

impl Tally {
    pub fn new(max_k: usize) -> Self {
        Self {
            top_k: TopK::new(max_k),
            skipped: BTreeMap::new(),
            errors: 0,
        }
    }

    pub fn skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn merge(&mut self, other: &Tally) {
        self.top_k.merge(&other.top_k);
        for (reason, n) in &other.skipped {
            *self.skipped.entry(*reason).or_default() += n;
        }
        self.errors += other.errors;
    }

    pub fn reset(&mut self) {
        self.top_k.reset();
        self.skipped.clear();
        self.errors = 0;
    }

    pub fn format_human(&self) -> String {
        let mut out = self.top_k.format_human();
        out.push_str(&format!("skipped: {}\n", self.skipped_total()));
        for (reason, n) in &self.skipped {
            out.push_str(&format!("  {reason:?}: {n}\n"));
        }
        if self.errors > 0 {
            out.push_str(&format!("errors: {}\n", self.errors));
        }
        out
    }

    pub fn format_json(&self) -> serde_json::Value {
        let mut v = self.top_k.format_json();
        v["skipped"] = serde_json::json!(self.skipped);
        v["errors"] = serde_json::json!(self.errors);
        v
    }
}

impl Default for Tally {
    fn default() -> Self {
        Self::new(crate::metrics::DEFAULT_MAX_K)
    }
}

/// Whether counters carry over from one archive to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CounterScope {
    /// One set of counters for the whole run; each archive report shows
    /// the running total.
    #[default]
    Run,
    /// Counters restart after each archive report; the final result is
    /// the sum over archives.
    Archive,
}

/// Judges single completion events.
#[derive(Debug)]
pub struct EvaluationEngine<'a, R> {
    recommender: &'a R,
}

impl<'a, R: Recommender> EvaluationEngine<'a, R> {
    pub fn new(recommender: &'a R) -> Self {
        Self { recommender }
    }

    /// Evaluate `event` and record the outcome in `tally`.
    pub fn evaluate(
        &self,
        event: &CompletionEvent,
        tally: &mut Tally,
    ) -> Result<Outcome> {
        let outcome = self.judge(event)?;
        match &outcome {
            Outcome::Skipped(reason) => {
                tracing::trace!(?reason, "completion skipped");
                tally.skip(*reason);
            }
            Outcome::Evaluated { rank } => tally.top_k.record(*rank),
        }
        Ok(outcome)
    }

    fn judge(&self, event: &CompletionEvent) -> Result<Outcome> {
        use SkipReason::*;

        let ctx = event.context.erased();

        let Some(selection) = event.last_selected_proposal() else {
            return Ok(Outcome::Skipped(NoSelection));
        };
        let Some(info) = CompletionInfo::extract(&ctx) else {
            return Ok(Outcome::Skipped(NoCompletionInfo));
        };
        if info.is_on_type_reference() {
            return Ok(Outcome::Skipped(OnTypeReference));
        }
        let Some(selected) = selection.name.as_member() else {
            return Ok(Outcome::Skipped(NotAMember));
        };
        if selected.is_static {
            return Ok(Outcome::Skipped(StaticMember));
        }

        // Members of the type itself or its supertypes are not usages of a
        // foreign type.
        let declaring = selected.declaring_type.erased();
        if declaring == ctx.sst.enclosing_type {
            return Ok(Outcome::Skipped(DeclaredInEnclosingType));
        }
        if is_in_hierarchy(&declaring, &ctx.type_shape.type_hierarchy) {
            return Ok(Outcome::Skipped(DeclaredInSupertype));
        }

        let Some(triggered) = info.triggered_type() else {
            return Ok(Outcome::Skipped(UnknownTrigger));
        };
        if triggered.is_unknown() || selected.is_unknown() {
            return Ok(Outcome::Skipped(UnknownTrigger));
        }
        if !self.recommender.has_model(triggered)? {
            return Ok(Outcome::Skipped(NoModel));
        }

        let expected = selected.erased();
        let recommendations =
            self.recommender.query(&ctx, &event.proposal_names())?;
        let rank = recommendations
            .iter()
            .position(|r| r.member == expected)
            .map(|i| i + 1);

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("triggered on: {triggered}");
            tracing::debug!("wanted: {expected}");
            for (i, r) in recommendations.iter().enumerate() {
                tracing::debug!(
                    "  {}. {} ({:.3})",
                    i + 1,
                    r.member,
                    r.confidence
                );
            }
            match rank {
                Some(r) => tracing::debug!("hit at rank {r}"),
                None => tracing::debug!("miss"),
            }
        }

        Ok(Outcome::Evaluated { rank })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationConfig {
    pub max_k: usize,
    pub scope: CounterScope,
    /// Evaluate archives concurrently, one tally each, merged at the end.
    pub parallel: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_k: crate::metrics::DEFAULT_MAX_K,
            scope: CounterScope::default(),
            parallel: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveReport {
    pub relative_path: PathBuf,
    pub filter: FilterStats,
    /// Completions evaluated from this archive alone.
    pub evaluated: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub archives: Vec<ArchiveReport>,
    pub failed_archives: usize,
    pub total: Tally,
}

/// Evaluate every applied member completion under `root`.
///
/// Archives that cannot be opened are logged and skipped, as are single
/// completions whose query fails. Top-k precision is reported after each
/// archive.
pub fn run_evaluation<R: Recommender>(
    root: &Path,
    only: Option<&GlobMatcher>,
    recommender: &R,
    config: &EvaluationConfig,
) -> Result<EvaluationReport> {
    let archives = walker::discover_archives(root, only)?;
    tracing::info!(archives = archives.len(), root = %root.display(), "evaluating");

    let engine = EvaluationEngine::new(recommender);
    if config.parallel {
        Ok(run_parallel(&engine, &archives, config))
    } else {
        Ok(run_sequential(&engine, &archives, config))
    }
}

fn run_sequential<R: Recommender>(
    engine: &EvaluationEngine<'_, R>,
    archives: &[DiscoveredArchive],
    config: &EvaluationConfig,
) -> EvaluationReport {
    let mut tally = Tally::new(config.max_k);
    let mut total = Tally::new(config.max_k);
    let mut reports = Vec::new();
    let mut failed_archives = 0;

    for (i, archive) in archives.iter().enumerate() {
        tracing::info!(
            "({}/{}) {}",
            i + 1,
            archives.len(),
            archive.relative_path.display()
        );
        let before = tally.top_k.evaluated();
        let Some(filter) = evaluate_archive(engine, archive, &mut tally) else {
            failed_archives += 1;
            continue;
        };
        reports.push(ArchiveReport {
            relative_path: archive.relative_path.clone(),
            filter,
            evaluated: tally.top_k.evaluated() - before,
        });

        tally
            .top_k
            .report(&archive.relative_path.display().to_string());
        if config.scope == CounterScope::Archive {
            total.merge(&tally);
            tally.reset();
        }
    }

    if config.scope == CounterScope::Run {
        total = tally;
    }
    EvaluationReport {
        archives: reports,
        failed_archives,
        total,
    }
}

fn run_parallel<R: Recommender>(
    engine: &EvaluationEngine<'_, R>,
    archives: &[DiscoveredArchive],
    config: &EvaluationConfig,
) -> EvaluationReport {
    let results: Vec<_> = archives
        .par_iter()
        .map(|archive| {
            let mut tally = Tally::new(config.max_k);
            evaluate_archive(engine, archive, &mut tally)
                .map(|filter| (filter, tally))
        })
        .collect();

    let mut total = Tally::new(config.max_k);
    let mut reports = Vec::new();
    let mut failed_archives = 0;
    for (archive, result) in archives.iter().zip(results) {
        let Some((filter, tally)) = result else {
            failed_archives += 1;
            continue;
        };
        tally
            .top_k
            .report(&archive.relative_path.display().to_string());
        reports.push(ArchiveReport {
            relative_path: archive.relative_path.clone(),
            filter,
            evaluated: tally.top_k.evaluated(),
        });
        total.merge(&tally);
    }

    EvaluationReport {
        archives: reports,
        failed_archives,
        total,
    }
}

/// Evaluate one archive into `tally`. Returns `None` if it cannot be
/// opened.
fn evaluate_archive<R: Recommender>(
    engine: &EvaluationEngine<'_, R>,
    archive: &DiscoveredArchive,
    tally: &mut Tally,
) -> Option<FilterStats> {
    let ra = match ReadingArchive::open(&archive.absolute_path) {
        Ok(ra) => ra,
        Err(e) => {
            tracing::error!("skipping archive: {e}");
            return None;
        }
    };

    let mut completions = AppliedCompletions::new(ra);
    for event in completions.by_ref() {
        if let Err(e) = engine.evaluate(&event, tally) {
            tally.errors += 1;
            tracing::warn!("evaluation failed: {e}");
        }
    }
    Some(completions.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bmn::Recommendation,
        context::{
            Context,
            Expression,
            MethodDecl,
            Sst,
            Statement,
            TypeHierarchy,
            TypeShape,
        },
        events::{Proposal, ProposalSelection, TerminationState},
        names::{MemberName, Name, TypeName},
    };

    /// Answers with a fixed ranking for every type in `known`.
    struct Canned {
        known: Vec<TypeName>,
        ranking: Vec<MemberName>,
    }

    impl Recommender for Canned {
        fn has_model(&self, t: &TypeName) -> Result<bool> {
            Ok(self.known.contains(t))
        }

        fn query(
            &self,
            _ctx: &Context,
            _proposals: &[Name],
        ) -> Result<Vec<Recommendation>> {
            Ok(self
                .ranking
                .iter()
                .map(|m| Recommendation {
                    member: m.clone(),
                    confidence: 0.5,
                })
                .collect())
        }
    }

    fn foo() -> TypeName {
        TypeName::class("Foo", "Lib")
    }

    fn canned() -> Canned {
        Canned {
            known: vec![foo()],
            ranking: vec![
                MemberName::method(foo(), "A"),
                MemberName::method(foo(), "B"),
            ],
        }
    }

    fn context(completion: Expression) -> Context {
        let run = MemberName::method(TypeName::class("App", "App"), "Run");
        Context {
            sst: Sst {
                enclosing_type: TypeName::class("App", "App"),
                fields: vec![],
                methods: vec![MethodDecl {
                    name: run,
                    body: vec![
                        Statement::VariableDeclaration {
                            name: "foo".to_string(),
                            declared_type: foo(),
                        },
                        Statement::Expression {
                            expression: completion,
                        },
                    ],
                }],
            },
            type_shape: TypeShape {
                type_hierarchy: TypeHierarchy::new(TypeName::class("App", "App"))
                    .extending(TypeHierarchy::new(TypeName::class("Base", "App"))),
                method_hierarchies: vec![],
            },
        }
    }

    fn on_foo() -> Expression {
        Expression::Completion {
            receiver: Some("foo".to_string()),
            type_reference: None,
            token: String::new(),
        }
    }

    fn event(selected: MemberName) -> CompletionEvent {
        CompletionEvent {
            context: context(on_foo()),
            proposals: vec![],
            selections: vec![ProposalSelection {
                proposal: Proposal::new(Name::Member(selected)),
                selected_after_ms: None,
            }],
            terminated_state: TerminationState::Applied,
            triggered_at: None,
        }
    }

    fn run(event: &CompletionEvent) -> (Outcome, Tally) {
        let rec = canned();
        let engine = EvaluationEngine::new(&rec);
        let mut tally = Tally::new(5);
        let outcome = engine.evaluate(event, &mut tally).unwrap();
        (outcome, tally)
    }

    #[test]
    fn hit_is_counted_at_its_rank() {
        let (outcome, tally) = run(&event(MemberName::method(foo(), "B")));
        assert_eq!(outcome, Outcome::Evaluated { rank: Some(2) });
        assert_eq!(tally.top_k.counters(), &[1, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn miss_counts_evaluation_only() {
        let (outcome, tally) = run(&event(MemberName::method(foo(), "Z")));
        assert_eq!(outcome, Outcome::Evaluated { rank: None });
        assert_eq!(tally.top_k.counters(), &[1, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn static_member_is_skipped() {
        let (outcome, tally) =
            run(&event(MemberName::method(foo(), "A").into_static()));
        assert_eq!(outcome, Outcome::Skipped(SkipReason::StaticMember));
        assert_eq!(tally.top_k.evaluated(), 0);
        assert_eq!(tally.skipped[&SkipReason::StaticMember], 1);
    }

    #[test]
    fn own_and_inherited_members_are_skipped() {
        let own = MemberName::method(TypeName::class("App", "App"), "Helper");
        assert_eq!(
            run(&event(own)).0,
            Outcome::Skipped(SkipReason::DeclaredInEnclosingType)
        );

        let inherited = MemberName::method(TypeName::class("Base", "App"), "Log");
        assert_eq!(
            run(&event(inherited)).0,
            Outcome::Skipped(SkipReason::DeclaredInSupertype)
        );
    }

    #[test]
    fn missing_selection_is_skipped() {
        let mut e = event(MemberName::method(foo(), "A"));
        e.selections.clear();
        assert_eq!(run(&e).0, Outcome::Skipped(SkipReason::NoSelection));
    }

    #[test]
    fn type_reference_completion_is_skipped() {
        let mut e = event(MemberName::method(foo(), "A"));
        e.context = context(Expression::Completion {
            receiver: None,
            type_reference: Some(foo()),
            token: String::new(),
        });
        assert_eq!(run(&e).0, Outcome::Skipped(SkipReason::OnTypeReference));
    }

    #[test]
    fn context_without_completion_is_skipped() {
        let mut e = event(MemberName::method(foo(), "A"));
        e.context = context(Expression::Constant {
            value: "1".to_string(),
        });
        assert_eq!(run(&e).0, Outcome::Skipped(SkipReason::NoCompletionInfo));
    }

    #[test]
    fn type_without_model_is_skipped() {
        let bar = TypeName::class("Bar", "Lib");
        let mut e = event(MemberName::method(bar.clone(), "A"));
        if let Statement::VariableDeclaration { declared_type, .. } =
            &mut e.context.sst.methods[0].body[0]
        {
            *declared_type = bar;
        }
        assert_eq!(run(&e).0, Outcome::Skipped(SkipReason::NoModel));
    }

    #[test]
    fn undeclared_receiver_is_skipped() {
        let mut e = event(MemberName::method(foo(), "A"));
        e.context = context(Expression::Completion {
            receiver: Some("ghost".to_string()),
            type_reference: None,
            token: String::new(),
        });
        assert_eq!(run(&e).0, Outcome::Skipped(SkipReason::UnknownTrigger));
    }

    #[test]
    fn tallies_merge() {
        let mut a = Tally::new(3);
        a.top_k.record(Some(1));
        a.skip(SkipReason::NoModel);
        let mut b = Tally::new(3);
        b.skip(SkipReason::NoModel);
        b.skip(SkipReason::StaticMember);
        b.errors = 1;
        a.merge(&b);
        assert_eq!(a.top_k.evaluated(), 1);
        assert_eq!(a.skipped[&SkipReason::NoModel], 2);
        assert_eq!(a.skipped_total(), 3);
        assert_eq!(a.errors, 1);
    }
}
