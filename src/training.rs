use serde::Serialize;

use crate::{
    bmn::{self, BmnModel},
    error::Result,
    model_store::ModelStore,
    names::TypeName,
    options::Options,
    sorter::{UsageSorter, UsageSource},
};

/// Counts from one [`ModelTrainer::clear_and_mine_models`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrainingSummary {
    pub types: usize,
    pub models_stored: usize,
    pub empty_buckets: usize,
    pub empty_models: usize,
    pub failures: usize,
}

/// Mines one model per usage bucket.
#[derive(Debug)]
pub struct ModelTrainer<'a, S = UsageSorter> {
    sorter: &'a S,
    store: &'a ModelStore,
    options: Options,
}

enum Mined {
    EmptyBucket,
    EmptyModel,
    Stored(BmnModel),
}

impl<'a, S: UsageSource> ModelTrainer<'a, S> {
    pub fn new(
        sorter: &'a S,
        store: &'a ModelStore,
        options: Options,
    ) -> Self {
        Self {
            sorter,
            store,
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Mine and store the model for `t`. Returns the stored model, or
    /// `None` when the bucket or the resulting table is empty.
    pub fn mine(&self, t: &TypeName) -> Result<Option<BmnModel>> {
        Ok(match self.mine_type(t)? {
            Mined::Stored(model) => Some(model),
            Mined::EmptyBucket | Mined::EmptyModel => None,
        })
    }

    fn mine_type(&self, t: &TypeName) -> Result<Mined> {
        let usages = self.sorter.read(t)?;
        if usages.is_empty() {
            tracing::info!(ty = %t, "no usages, skipping");
            return Ok(Mined::EmptyBucket);
        }

        let model = bmn::mine(t, &usages, &self.options);
        if model.is_empty() {
            tracing::debug!(
                ty = %t,
                usages = usages.len(),
                "table empty after threshold, not stored"
            );
            return Ok(Mined::EmptyModel);
        }

        self.store.store(&model)?;
        Ok(Mined::Stored(model))
    }

    /// Replace every stored model with one mined from the current buckets.
    ///
    /// A failure on one type is logged and counted; the remaining types are
    /// still mined.
    pub fn clear_and_mine_models(&self) -> Result<TrainingSummary> {
        self.store.clear()?;
        self.store.set_options(&self.options)?;

        let types = self.sorter.registered_types()?;
        let total = types.len();
        let mut summary = TrainingSummary {
            types: total,
            ..TrainingSummary::default()
        };
        tracing::info!(types = total, options = %self.options, "mining models");
        if !self.options.uses_any_access() {
            tracing::warn!(
                options = %self.options,
                "no calls, params or members selected; models will predict nothing"
            );
        }

        for (i, t) in types.iter().enumerate() {
            let pct = (i + 1) as f64 * 100.0 / total as f64;
            match self.mine_type(t) {
                Ok(Mined::Stored(model)) => {
                    summary.models_stored += 1;
                    tracing::info!(
                        "({}/{total}, {pct:.1}%) {t}: {} rows, {:.2} MB",
                        i + 1,
                        model.rows.len(),
                        model.size_bytes() as f64 / (1024.0 * 1024.0),
                    );
                }
                Ok(Mined::EmptyBucket) => summary.empty_buckets += 1,
                Ok(Mined::EmptyModel) => summary.empty_models += 1,
                Err(e) => {
                    summary.failures += 1;
                    tracing::error!(ty = %t, "mining failed: {e}");
                }
            }
        }

        tracing::info!(
            stored = summary.models_stored,
            empty_models = summary.empty_models,
            failures = summary.failures,
            "mining finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::{error::Error, names::MemberName, usage::Usage};

    struct Stores {
        _tmp: tempfile::TempDir,
        sorter: UsageSorter,
        models: ModelStore,
    }

    fn stores() -> Stores {
        let tmp = tempfile::tempdir().unwrap();
        let sorter = UsageSorter::open(&tmp.path().join("usages.redb")).unwrap();
        let models = ModelStore::open(&tmp.path().join("models.redb")).unwrap();
        Stores {
            _tmp: tmp,
            sorter,
            models,
        }
    }

    fn usage(name: &str) -> Usage {
        let t = TypeName::class(name, "Lib");
        Usage::new(t.clone()).with_call(MemberName::method(t, "Run"))
    }

    #[test]
    fn empty_bucket_never_produces_a_model() {
        let s = stores();
        let trainer = ModelTrainer::new(&s.sorter, &s.models, Options::default());
        let ghost = TypeName::class("Ghost", "Lib");
        assert!(trainer.mine(&ghost).unwrap().is_none());
        assert!(!s.models.has_model(&ghost).unwrap());
    }

    #[test]
    fn mines_every_registered_type() {
        let s = stores();
        s.sorter
            .store(&[usage("Foo"), usage("Foo"), usage("Bar")])
            .unwrap();

        let trainer = ModelTrainer::new(&s.sorter, &s.models, Options::default());
        let summary = trainer.clear_and_mine_models().unwrap();
        assert_eq!(summary.types, 2);
        assert_eq!(summary.models_stored, 2);
        assert_eq!(s.models.options().unwrap(), Some(Options::default()));
    }

    #[test]
    fn threshold_discards_rare_types() {
        let s = stores();
        s.sorter
            .store(&[usage("Foo"), usage("Foo"), usage("Bar")])
            .unwrap();

        let opts = Options::default().with_at_least(2);
        let trainer = ModelTrainer::new(&s.sorter, &s.models, opts);
        let summary = trainer.clear_and_mine_models().unwrap();
        assert_eq!(summary.models_stored, 1);
        assert_eq!(summary.empty_models, 1);
        assert!(s.models.has_model(&TypeName::class("Foo", "Lib")).unwrap());
        assert!(!s.models.has_model(&TypeName::class("Bar", "Lib")).unwrap());
    }

    #[test]
    fn remining_drops_stale_models() {
        let s = stores();
        s.sorter.store(&[usage("Old")]).unwrap();
        let trainer = ModelTrainer::new(&s.sorter, &s.models, Options::default());
        trainer.clear_and_mine_models().unwrap();

        s.sorter.clear().unwrap();
        s.sorter.store(&[usage("New")]).unwrap();
        trainer.clear_and_mine_models().unwrap();

        assert!(!s.models.has_model(&TypeName::class("Old", "Lib")).unwrap());
        assert!(s.models.has_model(&TypeName::class("New", "Lib")).unwrap());
    }

    /// Buckets that fail to load for one type.
    struct Flaky<'a> {
        inner: &'a UsageSorter,
        broken: TypeName,
    }

    impl UsageSource for Flaky<'_> {
        fn registered_types(&self) -> Result<BTreeSet<TypeName>> {
            let mut types = self.inner.registered_types()?;
            types.insert(self.broken.clone());
            Ok(types)
        }

        fn read(&self, t: &TypeName) -> Result<Vec<Usage>> {
            if *t == self.broken {
                return Err(Error::NotFound {
                    kind: "bucket",
                    name: t.to_string(),
                });
            }
            self.inner.read(t)
        }
    }

    #[test]
    fn failing_type_is_counted_and_others_are_mined() {
        let s = stores();
        s.sorter.store(&[usage("Foo"), usage("Bar")]).unwrap();
        let source = Flaky {
            inner: &s.sorter,
            broken: TypeName::class("Broken", "Lib"),
        };

        let trainer = ModelTrainer::new(&source, &s.models, Options::default());
        let summary = trainer.clear_and_mine_models().unwrap();
        assert_eq!(summary.types, 3);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.models_stored, 2);
        assert!(s.models.has_model(&TypeName::class("Foo", "Lib")).unwrap());
        assert!(s.models.has_model(&TypeName::class("Bar", "Lib")).unwrap());
    }
}
