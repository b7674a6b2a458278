//! Best-matching-neighbour tables and the recommender built on them.
//!
//! A [`BmnModel`] is a frequency table over usages of one type. Each row
//! holds the enabled context features, the member accesses observed with
//! them and how often that exact combination occurred. Querying finds the
//! rows nearest to a partially known usage and ranks the accesses those
//! rows add, weighted by their counts.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    context::Context,
    error::Result,
    model_store::ModelStore,
    names::{MemberName, Name, TypeName},
    options::Options,
    usage::{DefinitionSite, MemberAccess, Usage, UsageExtractor},
};

/// One distinct feature combination and its number of occurrences.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct BmnRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_context: Option<TypeName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_context: Option<MemberName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<DefinitionSite>,
    pub accesses: BTreeSet<MemberAccess>,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BmnModel {
    pub r#type: TypeName,
    pub options: Options,
    pub rows: Vec<BmnRow>,
}

impl BmnModel {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of usages the table was built from.
    pub fn observations(&self) -> u64 {
        self.rows.iter().map(|r| u64::from(r.count)).sum()
    }

    /// Size of the encoded model.
    pub fn size_bytes(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// The feature vector of one usage under `options`, without its count.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Projection {
    class_context: Option<TypeName>,
    method_context: Option<MemberName>,
    definition: Option<DefinitionSite>,
    accesses: BTreeSet<MemberAccess>,
}

fn project(u: &Usage, options: &Options) -> Projection {
    Projection {
        class_context: options.class_context.then(|| u.class_context.clone()),
        method_context: options
            .method_context
            .then(|| u.method_context.clone()),
        definition: options.definition.then(|| u.definition.clone()),
        accesses: u
            .member_accesses
            .iter()
            .filter(|a| match a {
                MemberAccess::Call { .. } => options.calls,
                MemberAccess::Parameter { .. } => options.params,
                MemberAccess::Reference { .. } => options.members,
            })
            .cloned()
            .collect(),
    }
}

/// Build the table for `usages` of type `t`.
///
/// Identical feature combinations are merged; rows observed fewer than
/// `options.at_least` times are dropped. The result may be empty.
pub fn mine(t: &TypeName, usages: &[Usage], options: &Options) -> BmnModel {
    let mut counts: BTreeMap<Projection, u32> = BTreeMap::new();
    for u in usages {
        *counts.entry(project(u, options)).or_default() += 1;
    }

    let rows = counts
        .into_iter()
        .filter(|(_, count)| *count >= options.at_least)
        .map(|(p, count)| BmnRow {
            class_context: p.class_context,
            method_context: p.method_context,
            definition: p.definition,
            accesses: p.accesses,
            count,
        })
        .collect();

    BmnModel {
        r#type: t.clone(),
        options: *options,
        rows,
    }
}

/// A ranked proposal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub member: MemberName,
    /// Share of the nearest neighbours that contain this member, in `0..=1`.
    pub confidence: f64,
}

/// Rank `model`'s members for the partially observed usage `query`.
///
/// Distance to a row is the number of enabled context features that
/// differ plus the number of already observed accesses the row lacks.
/// Only rows at minimal distance vote. Members already accessed in the
/// query are never proposed again. Ties are broken by member name.
pub fn recommend(model: &BmnModel, query: &Usage) -> Vec<Recommendation> {
    let q = project(query, &model.options);

    let distance = |row: &BmnRow| -> usize {
        let mut d = 0;
        if row.class_context != q.class_context {
            d += 1;
        }
        if row.method_context != q.method_context {
            d += 1;
        }
        if row.definition != q.definition {
            d += 1;
        }
        d + q.accesses.difference(&row.accesses).count()
    };

    let Some(nearest) = model.rows.iter().map(distance).min() else {
        return Vec::new();
    };

    let mut total = 0u64;
    let mut votes: HashMap<&MemberName, u64> = HashMap::new();
    for row in model.rows.iter().filter(|r| distance(r) == nearest) {
        total += u64::from(row.count);
        let mut seen = HashSet::new();
        for access in &row.accesses {
            if matches!(access, MemberAccess::Parameter { .. })
                || q.accesses.contains(access)
            {
                continue;
            }
            let member = access.member();
            if seen.insert(member) {
                *votes.entry(member).or_default() += u64::from(row.count);
            }
        }
    }
    if total == 0 {
        return Vec::new();
    }

    let mut ranked: Vec<Recommendation> = votes
        .into_iter()
        .map(|(member, n)| Recommendation {
            member: member.clone(),
            confidence: n as f64 / total as f64,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.member.to_string().cmp(&b.member.to_string()))
    });
    ranked
}

/// Answers completion queries for types with a stored model.
pub trait Recommender: Sync {
    fn has_model(&self, t: &TypeName) -> Result<bool>;

    /// Ranked members for the completion point in `ctx`. When `proposals`
    /// is non-empty, only members among them are returned.
    fn query(
        &self,
        ctx: &Context,
        proposals: &[Name],
    ) -> Result<Vec<Recommendation>>;
}

/// [`Recommender`] over the models in a [`ModelStore`].
///
/// Loaded models are cached for the lifetime of the recommender; the store
/// is only read.
pub struct BmnRecommender<'a, E> {
    store: &'a ModelStore,
    extractor: E,
    cache: Mutex<HashMap<String, Option<Arc<BmnModel>>>>,
}

impl<'a, E: UsageExtractor> BmnRecommender<'a, E> {
    pub fn new(store: &'a ModelStore, extractor: E) -> Self {
        Self {
            store,
            extractor,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn model(&self, t: &TypeName) -> Result<Option<Arc<BmnModel>>> {
        let id = t.identifier();
        {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(&id) {
                return Ok(hit.clone());
            }
        }
        let loaded = self.store.load(t)?.map(Arc::new);
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, loaded.clone());
        Ok(loaded)
    }
}

impl<E: UsageExtractor> Recommender for BmnRecommender<'_, E> {
    fn has_model(&self, t: &TypeName) -> Result<bool> {
        Ok(self.model(t)?.is_some())
    }

    fn query(
        &self,
        ctx: &Context,
        proposals: &[Name],
    ) -> Result<Vec<Recommendation>> {
        let Some(query) = self.extractor.query(ctx) else {
            tracing::debug!("no query usage at completion point");
            return Ok(Vec::new());
        };
        let query_type = query.r#type.erased();
        let Some(model) = self.model(&query_type)? else {
            return Ok(Vec::new());
        };

        let mut ranked = recommend(&model, &query);
        if !proposals.is_empty() {
            let shown: HashSet<MemberName> = proposals
                .iter()
                .filter_map(Name::as_member)
                .map(MemberName::erased)
                .collect();
            ranked.retain(|r| shown.contains(&r.member));
        }
        Ok(ranked)
    }
}

impl<E> std::fmt::Debug for BmnRecommender<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BmnRecommender").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foo() -> TypeName {
        TypeName::class("Foo", "Lib")
    }

    fn call(name: &str) -> MemberAccess {
        MemberAccess::Call {
            method: MemberName::method(foo(), name),
        }
    }

    fn usage(calls: &[&str]) -> Usage {
        let mut u = Usage::new(foo());
        u.class_context = TypeName::class("Ctx", "App");
        u.member_accesses = calls.iter().map(|c| call(c)).collect();
        u
    }

    #[test]
    fn identical_usages_merge_into_one_row() {
        let usages = vec![usage(&["A", "B"]), usage(&["B", "A"]), usage(&["C"])];
        let model = mine(&foo(), &usages, &Options::default());
        assert_eq!(model.rows.len(), 2);
        assert_eq!(model.observations(), 3);
        assert!(model.rows.iter().any(|r| r.count == 2));
    }

    #[test]
    fn threshold_drops_rare_rows() {
        let usages = vec![usage(&["A"])];
        assert!(!mine(&foo(), &usages, &Options::default()).is_empty());
        let strict = Options::default().with_at_least(2);
        assert!(mine(&foo(), &usages, &strict).is_empty());
    }

    #[test]
    fn disabled_features_are_ignored() {
        let mut other_ctx = usage(&["A"]);
        other_ctx.class_context = TypeName::class("Other", "App");
        let usages = vec![usage(&["A"]), other_ctx];

        let with_ctx = mine(&foo(), &usages, &Options::default());
        assert_eq!(with_ctx.rows.len(), 2);

        let opts: Options = "calls".parse().unwrap();
        let without_ctx = mine(&foo(), &usages, &opts);
        assert_eq!(without_ctx.rows.len(), 1);
        assert_eq!(without_ctx.rows[0].count, 2);
    }

    #[test]
    fn recommends_by_neighbour_frequency() {
        let usages = vec![
            usage(&["Open", "Read"]),
            usage(&["Open", "Read"]),
            usage(&["Open", "Close"]),
            usage(&["Write"]),
        ];
        let model = mine(&foo(), &usages, &Options::default());

        let ranked = recommend(&model, &usage(&["Open"]));
        let names: Vec<_> = ranked.iter().map(|r| r.member.name.as_str()).collect();
        assert_eq!(names, vec!["Read", "Close"]);
        assert!((ranked[0].confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn ties_are_broken_by_name() {
        let usages = vec![usage(&["B"]), usage(&["A"])];
        let model = mine(&foo(), &usages, &Options::default());
        let ranked = recommend(&model, &usage(&[]));
        let names: Vec<_> = ranked.iter().map(|r| r.member.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[test]
    fn empty_model_recommends_nothing() {
        let model = mine(&foo(), &[], &Options::default());
        assert!(recommend(&model, &usage(&[])).is_empty());
    }
}
