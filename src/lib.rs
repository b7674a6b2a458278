//! bmneval - mine best-matching-neighbour call recommenders and measure them.
//!
//! The mining phase reads zip archives of code contexts, extracts how each
//! instance of a type is used, groups those usages by type in an on-disk
//! bucket store and mines one frequency table per type. The evaluation
//! phase replays the member completions users applied in the IDE against
//! those tables and reports top-k precision.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use bmneval::{
//!     BmnRecommender, DataDir, MiningPipeline, ModelStore, Options,
//!     SstUsageExtractor, UsageSorter,
//! };
//! use bmneval::evaluation::{self, EvaluationConfig};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let sorter = UsageSorter::open(&data_dir.usages_db()).unwrap();
//! let models = ModelStore::open(&data_dir.models_db()).unwrap();
//!
//! let pipeline = MiningPipeline::new(
//!     &sorter,
//!     &models,
//!     SstUsageExtractor,
//!     Options::default(),
//!     10_000,
//! );
//! pipeline.run(Path::new("corpus/contexts"), None).unwrap();
//!
//! let recommender = BmnRecommender::new(&models, SstUsageExtractor);
//! let report = evaluation::run_evaluation(
//!     Path::new("corpus/events"),
//!     None,
//!     &recommender,
//!     &EvaluationConfig::default(),
//! )
//! .unwrap();
//! print!("{}", report.total.format_human());
//! ```

pub mod archive;
pub mod bmn;
pub mod census;
pub mod cli;
pub mod completion;
pub mod context;
pub mod data_dir;
pub mod error;
pub mod evaluation;
pub mod events;
pub mod metrics;
pub mod mining;
pub mod model_store;
pub mod names;
pub mod options;
pub mod sorter;
pub mod training;
pub mod usage;
pub mod walker;

pub use bmn::{BmnModel, BmnRecommender, Recommender};
pub use data_dir::DataDir;
pub use error::{Error, Result};
pub use mining::{CorpusSorter, MiningPipeline};
pub use model_store::ModelStore;
pub use options::Options;
pub use sorter::UsageSorter;
pub use usage::{SstUsageExtractor, UsageExtractor};
