use anyhow::{Context, Result};
use kindle_clippings::config::Config;
use kindle_clippings::container::{ContainerIndex, FormatExtractor};
use kindle_clippings::db::{init_db, sync_book, SyncOutcome};
use kindle_clippings::parser::read_clippings;
use kindle_clippings::pipeline::{process_clippings, HeadingContext};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = Config::load().context("invalid configuration")?;

    let raw = read_clippings(&config.clippings_path)?;

    let index = config.books_path.as_deref().map(|root| {
        let index = ContainerIndex::scan(root, &config.extensions);
        info!(root = %root.display(), containers = index.len(), "Indexed book files");
        index
    });
    let extractor = FormatExtractor;
    let context = index.as_ref().map(|index| HeadingContext {
        index,
        extractor: &extractor,
        params: config.matching,
    });

    let summary = process_clippings(&raw, context.as_ref(), config.jobs);

    for title in &summary.authorless {
        warn!(title = %title, "No author found in clippings header");
    }

    if config.dry_run {
        info!("Dry run, nothing written");
        return Ok(());
    }

    let mut conn = init_db(&config.database_path).with_context(|| {
        format!("failed to open database {}", config.database_path.display())
    })?;

    let mut written = 0;
    for outcome in &summary.books {
        let title = &outcome.aligned.book.title;
        match sync_book(&mut conn, &outcome.aligned, config.render)
            .with_context(|| format!("failed to store {title}"))?
        {
            SyncOutcome::Written(_) => written += 1,
            SyncOutcome::UpToDate => info!(title = %title, "Already up to date"),
        }
    }

    info!(
        written,
        unchanged = summary.books.len() - written,
        database = %config.database_path.display(),
        "Done"
    );

    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
