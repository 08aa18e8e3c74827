use std::path::Path;

use brsr_search::{
    App,
    ConfigDb,
    DataDir,
    RedbVectorStore,
    Settings,
    app::CompanyInfo,
    cli::{self, Cli, Command, ConfigAction},
    config,
    error::{self, Error},
    ingestion::DocumentOutcome,
    mcp,
    search::{self, SearchRequest},
};
use clap::Parser;
use kdam::{BarExt, tqdm};
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("BRSR_LOG") {
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
    let metadata = cli.metadata.as_deref();

    match cli.command {
        Command::Index(args) => {
            let app = App::open(data_dir, metadata)?;
            cmd_index(&app, &args)?;
        }
        Command::Search(args) => {
            let app = App::open(data_dir, metadata)?;
            let mut request = SearchRequest::new(args.query).top_k(args.count);
            if let Some(company) = args.company {
                request = request.company(company);
            }
            if let Some(year) = args.year {
                request = request.year(year);
            }

            let outcome = app.search(&request)?;
            if args.json {
                print_json(&outcome)?;
            } else {
                print!("{}", search::render_human(&outcome));
            }
        }
        Command::Companies(args) => {
            let app = App::open(data_dir, metadata)?;
            let companies = app.companies()?;
            if args.json {
                print_json(&companies)?;
            } else if companies.is_empty() {
                println!("No companies in the metadata table.");
            } else {
                for company in &companies {
                    println!("{company}");
                }
            }
        }
        Command::CompanyInfo(args) => {
            let app = App::open(data_dir, metadata)?;
            let info = app.company_info(&args.name)?;
            if args.json {
                print_json(&info)?;
            } else {
                match info {
                    CompanyInfo::Found {
                        company,
                        similarity,
                        years,
                    } => {
                        println!("{company} (similarity {similarity:.3})");
                        println!("Years: {}", years.join(", "));
                    }
                    CompanyInfo::NotFound { message } => println!("{message}"),
                }
            }
        }
        Command::Documents(args) => {
            let config_db = ConfigDb::open(&data_dir.config_db())?;
            let documents = config_db.list_documents()?;
            if args.json {
                print_json(&documents)?;
            } else if documents.is_empty() {
                println!("No documents indexed.");
            } else {
                for doc in &documents {
                    println!(
                        "{}\t{}\t{}-{}\t{} chunks",
                        doc.filename,
                        doc.company,
                        doc.from_year,
                        doc.to_year,
                        doc.chunks
                    );
                }
            }
        }
        Command::Status(args) => {
            cmd_status(&data_dir, metadata, args.json)?;
        }
        Command::Config { action } => {
            let config_db = ConfigDb::open(&data_dir.config_db())?;
            cmd_config(&config_db, action)?;
        }
        Command::Mcp => {
            let app = App::open(data_dir, metadata)?;
            mcp::run_mcp(app)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn print_json(value: &impl Serialize) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_index(app: &App, args: &cli::IndexArgs) -> error::Result<()> {
    let mut progress =
        (!args.json).then(|| tqdm!(desc = "Indexing", unit = " files"));

    let report = app.ingest(&args.paths, args.glob.as_deref(), |outcome| {
        if let Some(pb) = progress.as_mut() {
            let _ = pb.update(1);
        }
        if args.json {
            return;
        }
        match outcome {
            DocumentOutcome::Indexed(_) => {}
            DocumentOutcome::NoMetadata(path) => {
                eprintln!("\n  skipped {}: no metadata row", path.display());
            }
            DocumentOutcome::NoText(path) => {
                eprintln!("\n  skipped {}: no text", path.display());
            }
            DocumentOutcome::Failed { path, error } => {
                eprintln!("\n  failed {}: {error}", path.display());
            }
        }
    })?;

    if let Some(mut pb) = progress {
        let _ = pb.refresh();
        eprintln!();
    }

    if args.json {
        print_json(&report)?;
    } else {
        println!(
            "Indexed {} document(s), {} chunk(s); skipped {} (no metadata: {}, no text: {}, failed: {})",
            report.indexed,
            report.chunks,
            report.skipped(),
            report.skipped_no_metadata,
            report.skipped_no_text,
            report.failed
        );
    }
    Ok(())
}

fn cmd_status(
    data_dir: &DataDir,
    metadata: Option<&Path>,
    json: bool,
) -> error::Result<()> {
    let config_db = ConfigDb::open(&data_dir.config_db())?;
    let mut settings = Settings::load(&config_db)?;
    if let Some(path) = metadata {
        settings.metadata_path = Some(path.to_path_buf());
    }
    let store = RedbVectorStore::open(
        &data_dir.vectors_db(),
        settings.embedding_dimension,
        settings.upsert_batch_size,
    )?;
    let chunks = store.len()?;
    let documents = config_db.list_documents()?.len();
    let metadata_path = settings
        .metadata_path
        .as_ref()
        .map(|p| p.display().to_string());

    if json {
        print_json(&json!({
            "data_dir": data_dir.root().display().to_string(),
            "backend": settings.backend.as_str(),
            "embedding_model": settings.embedding_model,
            "embedding_dimension": settings.embedding_dimension,
            "reranker_model": settings.reranker_model,
            "metadata": metadata_path,
            "documents": documents,
            "chunks": chunks,
        }))?;
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Backend: {}", settings.backend);
        println!(
            "Embedding model: {} ({} dims)",
            settings.embedding_model, settings.embedding_dimension
        );
        println!("Reranker model: {}", settings.reranker_model);
        println!(
            "Metadata: {}",
            metadata_path.as_deref().unwrap_or("(not configured)")
        );
        println!("Documents: {documents}");
        println!("Chunks: {chunks}");
    }
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: ConfigAction) -> error::Result<()> {
    match action {
        ConfigAction::Show { json } => {
            let settings = Settings::load(config_db)?;
            let pairs: Vec<(&str, String)> = config::KEYS
                .iter()
                .map(|key| (*key, settings.get(key).unwrap_or_default()))
                .collect();
            if json {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.into()))
                    .collect();
                print_json(&map)?;
            } else {
                for (key, value) in pairs {
                    println!("{key} = {value}");
                }
            }
        }
        ConfigAction::Set { key, value } => {
            Settings::validate(&key, &value)?;
            config_db.set_setting(&key, value.trim())?;
            println!("Set {key} = {}", value.trim());
        }
        ConfigAction::Unset { key } => {
            if !config_db.remove_setting(&key)? {
                return Err(Error::NotFound {
                    kind: "setting",
                    name: key,
                });
            }
            println!("Unset {key}");
        }
    }
    Ok(())
}
