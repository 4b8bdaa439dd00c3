use clap::Parser;
use postseek::{
    CollectionDb,
    ConfigDb,
    DataDir,
    Error,
    ModelManager,
    Result,
    VectorStore,
    cli::{self, Cli, Command, ModelAction},
    config_db::MODEL_SETTING,
    corpus,
    index_builder::{self, BuildOptions},
    model_manager::{DEFAULT_MODEL_ID, MODEL_ENV_VAR},
    search::{self, SearchParams},
};
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "POSTSEEK_LOG";

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var(LOG_ENV_VAR) {
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

/// Where the active model id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelSource {
    Cli,
    Env,
    Config,
    Default,
}

impl ModelSource {
    fn as_str(self) -> &'static str {
        match self {
            ModelSource::Cli => "cli",
            ModelSource::Env => "env",
            ModelSource::Config => "config",
            ModelSource::Default => "default",
        }
    }
}

/// Resolve the model id: `--model`, then `POSTSEEK_MODEL`, then the stored
/// setting, then the built-in default.
fn resolve_model(
    cli_model: Option<&str>,
    config_db: &ConfigDb,
) -> Result<(String, ModelSource)> {
    if let Some(model) = cli_model {
        return Ok((model.to_string(), ModelSource::Cli));
    }
    if let Ok(model) = std::env::var(MODEL_ENV_VAR)
        && !model.is_empty()
    {
        return Ok((model, ModelSource::Env));
    }
    if let Some(model) = config_db.get_setting(MODEL_SETTING)? {
        return Ok((model, ModelSource::Config));
    }
    Ok((DEFAULT_MODEL_ID.to_string(), ModelSource::Default))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    match &cli.command {
        Command::Build(args) => {
            cmd_build(&cli, &config_db, &data_dir, args)?;
        }
        Command::Search(args) => {
            cmd_search(&cli, &config_db, &data_dir, args)?;
        }
        Command::Profiles(args) => {
            cmd_profiles(&cli, &data_dir, args.json)?;
        }
        Command::Status(args) => {
            cmd_status(&cli, &config_db, &data_dir, args.json)?;
        }
        Command::Model { action } => {
            cmd_model(&cli, &config_db, action)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_build(
    cli: &Cli,
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &cli::BuildArgs,
) -> Result<()> {
    let delimiter = u8::try_from(args.delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| {
            Error::Config(format!(
                "delimiter must be a single ASCII character, got '{}'",
                args.delimiter
            ))
        })?;

    let records = corpus::read_corpus(&args.corpus, delimiter)?;
    let (posts, stats) = corpus::load(&records);

    eprintln!(
        "Loaded {} of {} records ({} skipped: {} without meaningful text, {} without identity)",
        posts.len(),
        stats.total_records,
        stats.skipped(),
        stats.skipped_text,
        stats.skipped_identity,
    );
    eprintln!(
        "Recovered profiles: {} via page id, {} via URL; {} unique profiles",
        stats.recovered_pageid, stats.recovered_url, stats.unique_profiles,
    );

    let (model_id, _) = resolve_model(cli.model.as_deref(), config_db)?;
    let mut model = ModelManager::with_model_id(model_id);
    let store = CollectionDb::open(&data_dir.index_db())?;

    let options = BuildOptions {
        collection: cli.collection.clone(),
        embed_batch_size: args.embed_batch_size,
        insert_batch_size: args.insert_batch_size,
        show_progress: !args.no_progress,
    };
    let report = index_builder::build_index(&posts, &mut model, &store, &options)?;

    println!(
        "Indexed {} posts into '{}'",
        report.indexed, report.collection
    );
    Ok(())
}

fn cmd_search(
    cli: &Cli,
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &cli::SearchArgs,
) -> Result<()> {
    let (model_id, _) = resolve_model(cli.model.as_deref(), config_db)?;
    let mut model = ModelManager::with_model_id(model_id);
    let store = CollectionDb::open(&data_dir.index_db())?;

    let params = SearchParams {
        top_k: args.top_k,
        profile: args.profile.clone(),
        min_interactions: args.min_interactions,
        boost_interactions: args.boost_interactions,
        overfetch_factor: args.overfetch,
        ..SearchParams::new(args.query.clone(), cli.collection.clone())
    };

    let results = search::execute_search(&params, &store, &mut model)?;

    if args.json {
        search::format_json(&results, &args.query)?;
    } else {
        search::format_human(&results, &args.query);
    }
    Ok(())
}

fn cmd_profiles(cli: &Cli, data_dir: &DataDir, json: bool) -> Result<()> {
    let store = CollectionDb::open(&data_dir.index_db())?;
    let profiles = search::list_profiles(&store, &cli.collection)?;

    if json {
        println!("{}", serde_json::to_string(&profiles)?);
    } else if profiles.is_empty() {
        println!("No profiles in '{}'.", cli.collection);
    } else {
        for profile in &profiles {
            println!("{profile}");
        }
        eprintln!("{} profile(s)", profiles.len());
    }
    Ok(())
}

fn cmd_status(
    cli: &Cli,
    config_db: &ConfigDb,
    data_dir: &DataDir,
    json: bool,
) -> Result<()> {
    let (model_id, source) = resolve_model(cli.model.as_deref(), config_db)?;
    let store = CollectionDb::open(&data_dir.index_db())?;

    let mut collections = Vec::new();
    for name in store.list_collections()? {
        let info = store.collection_info(&name)?;
        let count = store.count(&name)?;
        let profiles = search::list_profiles(&store, &name)?.len();
        collections.push((name, info, count, profiles));
    }

    if json {
        let out = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "model": model_id,
            "model_source": source.as_str(),
            "collections": collections
                .iter()
                .map(|(name, info, count, profiles)| serde_json::json!({
                    "name": name,
                    "documents": count,
                    "profiles": profiles,
                    "model": info.model_id,
                    "dimension": info.dimension,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string(&out)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {model_id} ({})", source.as_str());
        println!("Collections: {}", collections.len());
        for (name, info, count, profiles) in &collections {
            let dimension = info
                .dimension
                .map_or_else(|| "-".to_string(), |d| d.to_string());
            println!(
                "  {name}: {count} documents, {profiles} profiles, model {}, dimension {dimension}",
                info.model_id
            );
        }
    }
    Ok(())
}

fn cmd_model(
    cli: &Cli,
    config_db: &ConfigDb,
    action: &ModelAction,
) -> Result<()> {
    match action {
        ModelAction::Show { json } => {
            let (model_id, source) =
                resolve_model(cli.model.as_deref(), config_db)?;
            let stored = config_db.get_setting(MODEL_SETTING)?;
            if *json {
                let out = serde_json::json!({
                    "resolved": model_id,
                    "source": source.as_str(),
                    "config": stored,
                });
                println!("{}", serde_json::to_string(&out)?);
            } else {
                println!("Resolved model: {model_id} ({})", source.as_str());
                if let Some(stored) = stored {
                    println!("Config model: {stored}");
                }
            }
        }
        ModelAction::Set { model } => {
            config_db.set_setting(MODEL_SETTING, model)?;
            println!("Model set to {model}");
        }
        ModelAction::Clear => {
            if config_db.remove_setting(MODEL_SETTING)? {
                println!("Model setting cleared");
            } else {
                println!("No model setting stored");
            }
        }
    }
    Ok(())
}
