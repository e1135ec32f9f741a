use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use cafs_store::{walk, AddedFile, CacheConfig, CafsConfig, Filestore, MapStore, Network};
use cafs_types::Key;
use colored::Colorize;

use crate::cli::*;
use crate::load::load_path;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Hash(args) => cmd_hash(args),
        Command::Add(args) => cmd_add(args, &config, &cli.format),
        Command::Tree(args) => cmd_tree(args),
    }
}

/// Read the config file, if any.
///
/// The commands work on a single in-memory store with no secondary, so only
/// the `[adder]` section takes effect; `[cache]` is accepted and ignored.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<CafsConfig> {
    let config = match path {
        Some(path) => CafsConfig::from_file(path)?,
        None => CafsConfig::default(),
    };
    if config.cache != CacheConfig::default() {
        tracing::warn!("[cache] settings have no effect on cafs commands");
    }
    Ok(config)
}

fn cmd_hash(args: HashArgs) -> anyhow::Result<()> {
    let store = MapStore::new();
    let key = hash_path(&store, &args.path)?;
    println!("{}", key.to_string().yellow());
    if args.dump {
        print!("{}", store.dump());
    }
    Ok(())
}

fn cmd_add(args: AddArgs, config: &CafsConfig, format: &OutputFormat) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start async runtime")?;
    let store = MapStore::with_config(&Network::new(), config.adder.clone());
    let format = format.clone();

    let report = runtime.block_on(add_paths(&store, &args, move |event| {
        print_event(event, &format)
    }))?;

    for err in &report.errors {
        eprintln!("{} {err}", "error:".red().bold());
    }
    println!(
        "{} Added {} file(s), {} bytes",
        "✓".green().bold(),
        report.events.len(),
        report.events.iter().map(|e| e.bytes).sum::<u64>()
    );
    if let Some(root) = &report.root {
        println!("  Root: {}", root.to_string().yellow());
    }
    if !report.errors.is_empty() {
        anyhow::bail!("{} path(s) could not be added", report.errors.len());
    }
    Ok(())
}

fn cmd_tree(args: TreeArgs) -> anyhow::Result<()> {
    let store = MapStore::new();
    let key = hash_path(&store, &args.path)?;
    print!("{}", render_tree(&store, &key)?);
    Ok(())
}

fn print_event(event: &AddedFile, format: &OutputFormat) {
    match format {
        OutputFormat::Text => println!(
            "  {} {} {}",
            "added".green(),
            event.key.to_string().yellow(),
            event.path
        ),
        OutputFormat::Json => match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("{} {err}", "error:".red().bold()),
        },
    }
}

/// Load `path` and put it into `store`, returning the root key.
pub fn hash_path(store: &MapStore, path: &Path) -> anyhow::Result<Key> {
    let mut file = load_path(path)?;
    let key = store.put(file.as_mut(), false)?;
    Ok(key)
}

/// Outcome of an `add` run.
pub struct AddReport {
    pub events: Vec<AddedFile>,
    pub errors: Vec<cafs_store::StoreError>,
    pub root: Option<Key>,
}

/// Stream `args.paths` into `store`, calling `on_event` for every stored leaf.
pub async fn add_paths<F>(store: &MapStore, args: &AddArgs, mut on_event: F) -> anyhow::Result<AddReport>
where
    F: FnMut(&AddedFile) + Send + 'static,
{
    let mut adder = store.new_adder(args.pin, args.wrap)?;
    let mut stream = adder.added().context("event stream already taken")?;
    let mut errors = adder.errors().context("error stream already taken")?;

    let consumer = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            on_event(&event);
            events.push(event);
        }
        events
    });

    for path in &args.paths {
        adder.add_file(load_path(path)?).await?;
    }
    let root = adder.close().await?;
    let events = consumer.await.context("event consumer failed")?;

    Ok(AddReport {
        events,
        errors: errors.drain(),
        root,
    })
}

/// Read `key` back out of `store` and render it as an indented tree.
pub fn render_tree(store: &MapStore, key: &Key) -> anyhow::Result<String> {
    let mut root = store.get(key)?;
    let mut out = String::new();
    writeln!(out, "{}", key.to_string().yellow())?;
    walk(root.as_mut(), |file, depth| {
        let indent = "  ".repeat(depth + 1);
        if file.is_directory() {
            let _ = writeln!(out, "{indent}{}/", file.file_name().blue().bold());
        } else {
            let size = file.read_all()?.len();
            let _ = writeln!(
                out,
                "{indent}{} {}",
                file.file_name(),
                format!("({size} bytes)").dimmed()
            );
        }
        Ok(())
    })?;
    Ok(out)
}
