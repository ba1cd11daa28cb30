use std::sync::Arc;

use clap::Parser;
use jsondex::{
    cli::{CategoryAction, Cli, Command, SearchArgs, SettingsAction},
    collection_config::CollectionConfig,
    config_db::ConfigDb,
    data_dir::DataDir,
    error::{self, Error},
    import,
    mcp::run_mcp,
    result::ResultHandle,
    search::{SearchRequest, SearchResults},
    settings::{self, ServerSettings},
    task_manager::TaskManager,
    tasks::{ProcessingTask, ReadonlyCategory, ReadonlyTask},
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("JSONDEX_LOG") {
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
        Command::Settings { action } => {
            let config_db = ConfigDb::open(&data_dir.config_db())?;
            settings_command(&config_db, action)
        }
        Command::Serve => run_mcp(TaskManager::open(&data_dir)?),
        command => {
            let manager = TaskManager::open(&data_dir)?;
            manager.start();
            let result = run_command(&manager, command);
            manager.stop();
            manager.join();
            result
        }
    }
}

fn run_command(manager: &Arc<TaskManager>, command: Command) -> error::Result<()> {
    match command {
        Command::Import(args) => {
            let report = import::import_file(
                manager,
                &args.collection,
                &args.file,
                args.pipe.as_deref(),
                args.commit,
            )?;
            for line in &report.skipped {
                eprintln!("line {}: {}", line.line, line.msg);
            }
            print_document_errors(&report.checkpoint.errors);
            println!(
                "Imported {} document(s) into '{}' ({} skipped, {} failed)",
                report.submitted,
                args.collection,
                report.skipped.len(),
                report.checkpoint.errors.len()
            );
        }
        Command::Search(args) => search(manager, args)?,
        Command::Get(args) => {
            let doc = readonly(
                manager,
                ReadonlyCategory::Search,
                ReadonlyTask::GetDocument {
                    collection: args.collection,
                    doc_type: args.doc_type,
                    doc_id: args.doc_id,
                },
            )?;
            print_json(&doc)?;
        }
        Command::Collections { json } => {
            let names = readonly(
                manager,
                ReadonlyCategory::Info,
                ReadonlyTask::ListCollections,
            )?;
            if json {
                print_json(&names)?;
            } else {
                let names: Vec<String> = serde_json::from_value(names)?;
                if names.is_empty() {
                    println!("No collections.");
                }
                for name in names {
                    println!("{name}");
                }
            }
        }
        Command::Info { collection } => {
            let info = readonly(
                manager,
                ReadonlyCategory::Info,
                ReadonlyTask::CollectionInfo { collection },
            )?;
            print_json(&info)?;
        }
        Command::Checkpoint(args) => {
            let info =
                checkpoint(manager, &args.collection, args.commit)?;
            print_document_errors(&info.errors);
            println!(
                "Checkpoint {} reached ({} error(s))",
                info.id,
                info.errors.len()
            );
        }
        Command::SetConfig { collection, file } => {
            let text = std::fs::read_to_string(&file)?;
            let config = CollectionConfig::from_json(serde_json::from_str(&text)?)?;
            processing(manager, &collection, ProcessingTask::SetConfig { config })?;
            checkpoint(manager, &collection, true)?;
            println!("Configuration of '{collection}' updated");
        }
        Command::Category { action } => {
            let (collection, task) = match action {
                CategoryAction::AddParent {
                    collection,
                    taxonomy,
                    category,
                    parent,
                } => (
                    collection,
                    ProcessingTask::AddCategoryParent {
                        taxonomy,
                        category,
                        parent,
                    },
                ),
                CategoryAction::RemoveParent {
                    collection,
                    taxonomy,
                    category,
                    parent,
                } => (
                    collection,
                    ProcessingTask::RemoveCategoryParent {
                        taxonomy,
                        category,
                        parent,
                    },
                ),
                CategoryAction::Remove {
                    collection,
                    taxonomy,
                    category,
                } => (
                    collection,
                    ProcessingTask::RemoveCategory { taxonomy, category },
                ),
            };
            processing(manager, &collection, task)?;
            let info = checkpoint(manager, &collection, true)?;
            print_document_errors(&info.errors);
            println!("Categories of '{collection}' updated");
        }
        Command::Serve | Command::Settings { .. } | Command::Completions(_) => {
            unreachable!("handled before the task manager starts")
        }
    }
    Ok(())
}

fn search(manager: &TaskManager, args: SearchArgs) -> error::Result<()> {
    let mut request = SearchRequest::parse_cli(&args.query)?;
    if let Some(count) = args.count {
        request.size = count;
    }
    if args.from > 0 {
        request.from = args.from;
    }
    if args.doc_type.is_some() {
        request.doc_type = args.doc_type;
    }
    request.validate()?;

    let value = readonly(
        manager,
        ReadonlyCategory::Search,
        ReadonlyTask::Search {
            collection: args.collection,
            request,
        },
    )?;
    if args.json {
        return print_json(&value);
    }

    let results: SearchResults = serde_json::from_value(value)?;
    if results.items.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for hit in &results.items {
        println!(
            "{}. {}/{} (score: {:.3})",
            hit.rank + 1,
            hit.doc_type,
            hit.doc_id,
            hit.score
        );
    }
    println!(
        "\n{}-{} of {} match(es)",
        results.from + 1,
        results.from + results.items.len(),
        results.total_matches
    );
    Ok(())
}

/// Queue a readonly task and wait for its outcome.
fn readonly(
    manager: &TaskManager,
    category: ReadonlyCategory,
    task: ReadonlyTask,
) -> error::Result<Value> {
    let handle = ResultHandle::new();
    manager
        .queue_readonly(category, task, Some(handle.clone()))
        .check()?;
    handle.wait().into_result()
}

/// Queue a processing task and wait until it has been processed. Its
/// indexing work is applied in order ahead of any later checkpoint.
fn processing(
    manager: &TaskManager,
    collection: &str,
    task: ProcessingTask,
) -> error::Result<Value> {
    let handle = ResultHandle::new();
    manager
        .queue_processing(collection, task, false, Some(handle.clone()))?
        .check()?;
    handle.wait().into_result()
}

fn checkpoint(
    manager: &Arc<TaskManager>,
    collection: &str,
    commit: bool,
) -> error::Result<jsondex::CheckpointInfo> {
    let (id, state) = manager.create_checkpoint(collection, commit, false)?;
    state.check()?;
    import::wait_for_checkpoint(manager, collection, &id)
}

fn print_document_errors(errors: &[jsondex::DocumentError]) {
    for error in errors {
        match (&error.doc_type, &error.doc_id) {
            (Some(doc_type), Some(doc_id)) => {
                eprintln!("{doc_type}/{doc_id}: {}", error.msg)
            }
            (None, Some(doc_id)) => eprintln!("{doc_id}: {}", error.msg),
            _ => eprintln!("{}", error.msg),
        }
    }
}

fn print_json(value: &Value) -> error::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn settings_command(
    config_db: &ConfigDb,
    action: SettingsAction,
) -> error::Result<()> {
    match action {
        SettingsAction::Get { key } => {
            if !settings::KEYS.contains(&key.as_str()) {
                return Err(Error::Config(format!("unknown setting {key:?}")));
            }
            match config_db.get_setting(&key)? {
                Some(value) => println!("{value}"),
                None => println!("{key} is not set (using the default)"),
            }
        }
        SettingsAction::Set { key, value } => {
            ServerSettings::validate(&key, &value)?;
            let previous = config_db.get_setting(&key)?;
            config_db.set_setting(&key, &value)?;
            // Reject combinations that would stop the server from starting.
            if let Err(e) = ServerSettings::load(config_db) {
                match previous {
                    Some(previous) => config_db.set_setting(&key, &previous)?,
                    None => {
                        config_db.remove_setting(&key)?;
                    }
                }
                return Err(e);
            }
            println!("Set {key} = {value}");
        }
        SettingsAction::Clear { key } => {
            if config_db.remove_setting(&key)? {
                println!("Cleared {key}");
            } else {
                println!("{key} was not set");
            }
        }
        SettingsAction::List { json } => {
            let effective = ServerSettings::load(config_db)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&effective)?);
            } else {
                for (key, value) in config_db.list_settings()? {
                    let marker = if settings::KEYS.contains(&key.as_str()) {
                        ""
                    } else {
                        " (unknown)"
                    };
                    println!("{key}\t{value}{marker}");
                }
                println!("{effective:#?}");
            }
        }
    }
    Ok(())
}
