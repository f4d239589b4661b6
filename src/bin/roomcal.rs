use anyhow::Result;
use roomcal::cache::CalendarCache;
use roomcal::config::Config;
use roomcal::context::{AppContext, StandardContext};
use roomcal::model::CalendarItem;
use roomcal::storage::JsonFileStore;
use roomcal::NullBackend;
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();

    let mut root: Option<PathBuf> = None;
    let mut file: Option<PathBuf> = None;
    let mut command: Option<String> = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" | "help" => {
                print_help();
                return Ok(());
            }
            "--root" => root = iter.next().map(PathBuf::from),
            "--file" => file = iter.next().map(PathBuf::from),
            other if command.is_none() => command = Some(other.to_string()),
            other => anyhow::bail!("Unexpected argument '{}'", other),
        }
    }

    let ctx = StandardContext::new(root);
    let config = Config::load_or_default(&ctx);

    // Diagnostics go to stderr so query output stays pipeable.
    let _ = TermLogger::init(
        config.log_level_filter(),
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );

    let path = match file {
        Some(path) => path,
        None => ctx.get_cache_file_path(&config.cache_file)?,
    };
    let offset = config.timezone.resolve()?;
    let mut cache = CalendarCache::new(Arc::new(NullBackend), offset)
        .with_flush_delay(config.flush_delay())
        .with_store(Box::new(JsonFileStore::new(&path)));
    let restored = cache.hydrate();
    log::debug!("Read {} items from {:?}", restored, path);

    let items = match command.as_deref().unwrap_or("dump") {
        "dump" => {
            println!("Last update: {}", cache.last_updated().with_timezone(&offset));
            cache.all_items()
        }
        "now" => cache.now_items(),
        "next" => cache.next_items(),
        "previous" => cache.previous_items(),
        other => {
            eprintln!("Unknown command '{}'", other);
            print_help();
            std::process::exit(2);
        }
    };

    print_items(&items);
    Ok(())
}

fn print_items(items: &[CalendarItem]) {
    if items.is_empty() {
        println!("(no items)");
    }
    for item in items {
        println!("{}", item);
    }
}

fn print_help() {
    println!(
        "roomcal v{} - inspect a persisted room calendar cache",
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!("USAGE:");
    println!("    roomcal [--root <dir>] [--file <path>] [COMMAND]");
    println!();
    println!("COMMANDS:");
    println!("    dump        Print every cached item ordered by start (default)");
    println!("    now         Items in progress right now");
    println!("    next        Items with the next upcoming start");
    println!("    previous    Items that ended most recently");
    println!("    help        Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --root <dir>     Use <dir>/config and <dir>/cache instead of the user dirs");
    println!("    --file <path>    Read this cache file instead of the configured one");
}
