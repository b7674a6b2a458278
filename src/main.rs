use bmneval::{
    BmnRecommender,
    CorpusSorter,
    DataDir,
    MiningPipeline,
    ModelStore,
    SstUsageExtractor,
    UsageSorter,
    census,
    cli::{self, Cli, Command},
    error,
    evaluation::{self, CounterScope, EvaluationConfig},
    training::TrainingSummary,
    walker,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("BMNEVAL_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Sort(args) => cmd_sort(&data_dir, &args)?,
        Command::Mine(args) => cmd_mine(&data_dir, &args)?,
        Command::Evaluate(args) => cmd_evaluate(&data_dir, &args)?,
        Command::CountEvents(args) => {
            let only = compile_only(args.corpus.only.as_deref())?;
            let result = census::count_events(&args.corpus.events, only.as_ref())?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.format_human());
            }
        }
        Command::CountTypes(args) => {
            let only = compile_only(args.only.as_deref())?;
            let result = census::collect_types(&args.contexts, only.as_ref())?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", result.format_human(args.list));
            }
        }
        Command::Status(args) => cmd_status(&data_dir, args.json)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn compile_only(pattern: Option<&str>) -> error::Result<Option<globset::GlobMatcher>> {
    pattern.map(walker::compile_filter).transpose()
}

fn cmd_sort(data_dir: &DataDir, args: &cli::SortArgs) -> error::Result<()> {
    let sorter = UsageSorter::open(&data_dir.usages_db())?;
    let only = compile_only(args.corpus.only.as_deref())?;

    let sorting =
        CorpusSorter::new(&sorter, SstUsageExtractor, args.corpus.cache_size);
    let summary =
        sorting.clear_and_sort_usages(&args.corpus.contexts, only.as_ref())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Sorted {} usages from {} contexts in {} archives ({} failed).",
            summary.usages,
            summary.contexts,
            summary.archives,
            summary.failed_archives
        );
    }
    Ok(())
}

fn cmd_mine(data_dir: &DataDir, args: &cli::MineArgs) -> error::Result<()> {
    let options = args.features.options()?;
    let sorter = UsageSorter::open(&data_dir.usages_db())?;
    let models = ModelStore::open(&data_dir.models_db())?;
    let only = compile_only(args.only.as_deref())?;

    let pipeline = MiningPipeline::new(
        &sorter,
        &models,
        SstUsageExtractor,
        options,
        args.cache_size,
    );

    let sorted = match (&args.contexts, args.skip_sort) {
        (_, true) => None,
        (Some(root), false) => {
            Some(pipeline.clear_and_sort_usages(root, only.as_ref())?)
        }
        (None, false) => {
            return Err(error::Error::Config(
                "--contexts is required unless --skip-sort is given".to_string(),
            ));
        }
    };
    let trained = pipeline.mine_models()?;

    if args.json {
        let value = serde_json::json!({
            "options": options.to_string(),
            "sort": sorted,
            "training": trained,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        if let Some(s) = &sorted {
            println!(
                "Sorted {} usages from {} contexts in {} archives.",
                s.usages, s.contexts, s.archives
            );
        }
        print_training(&options, &trained);
    }
    Ok(())
}

fn print_training(options: &bmneval::Options, summary: &TrainingSummary) {
    println!("Options: {options}");
    println!("Types: {}", summary.types);
    println!("Models stored: {}", summary.models_stored);
    println!("Empty buckets: {}", summary.empty_buckets);
    println!("Below threshold: {}", summary.empty_models);
    if summary.failures > 0 {
        println!("Failures: {}", summary.failures);
    }
}

fn cmd_evaluate(
    data_dir: &DataDir,
    args: &cli::EvaluateArgs,
) -> error::Result<()> {
    let models = ModelStore::open(&data_dir.models_db())?;
    let recorded = models.options()?.ok_or_else(|| error::Error::NotFound {
        kind: "models",
        name: data_dir.models_db().display().to_string(),
    })?;
    if let Some(requested) = args.options
        && requested != recorded
    {
        return Err(error::Error::Config(format!(
            "models were mined with {recorded}, not {requested}; run `mine` again"
        )));
    }
    tracing::info!(options = %recorded, "using models");

    let only = compile_only(args.corpus.only.as_deref())?;
    let config = EvaluationConfig {
        max_k: args.max_k,
        scope: if args.reset_per_archive {
            CounterScope::Archive
        } else {
            CounterScope::Run
        },
        parallel: args.parallel,
    };
    let recommender = BmnRecommender::new(&models, SstUsageExtractor);
    let report = evaluation::run_evaluation(
        &args.corpus.events,
        only.as_ref(),
        &recommender,
        &config,
    )?;

    if args.json {
        let mut value = report.total.format_json();
        value["options"] = serde_json::json!(recorded.to_string());
        value["archives"] = serde_json::json!(report.archives);
        value["failed_archives"] = serde_json::json!(report.failed_archives);
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Options: {recorded}");
        println!(
            "Archives: {} ({} failed)",
            report.archives.len(),
            report.failed_archives
        );
        print!("{}", report.total.format_human());
    }
    Ok(())
}

fn cmd_status(data_dir: &DataDir, json: bool) -> error::Result<()> {
    let sorter = UsageSorter::open(&data_dir.usages_db())?;
    let models = ModelStore::open(&data_dir.models_db())?;

    let types = sorter.registered_types()?;
    let mut usages = 0;
    for t in &types {
        usages += sorter.usage_count(t)?;
    }
    let model_count = models.list_types()?.len();
    let options = models.options()?.map(|o| o.to_string());

    if json {
        let value = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "types": types.len(),
            "usages": usages,
            "models": model_count,
            "options": options,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Types: {}", types.len());
        println!("Usages: {usages}");
        println!("Models: {model_count}");
        println!("Options: {}", options.as_deref().unwrap_or("(not mined)"));
    }
    Ok(())
}
