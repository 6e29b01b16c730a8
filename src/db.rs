use crate::models::AlignedBook;
use crate::render::{render_book, RenderOptions};
use chrono::{Local, NaiveDateTime, Timelike};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::info;

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),
    #[error("Query failed: {0}")]
    QueryFailed(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Written(usize),
    UpToDate,
}

pub fn init_db(path: &Path) -> Result<Connection, DbError> {
    let conn = Connection::open(path).map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS books (
            title TEXT PRIMARY KEY,
            author TEXT NOT NULL,
            highlight_count INTEGER NOT NULL,
            last_highlighted TEXT,
            includes_location INTEGER NOT NULL,
            includes_timestamp INTEGER NOT NULL,
            body TEXT NOT NULL,
            last_synced TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS highlights (
            id INTEGER PRIMARY KEY,
            book_title TEXT NOT NULL REFERENCES books(title),
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            page INTEGER,
            location_start INTEGER,
            location_end INTEGER,
            datetime TEXT,
            is_note INTEGER NOT NULL,
            heading TEXT,
            UNIQUE(book_title, ordinal)
        );",
    )?;

    Ok(conn)
}

struct StoredBook {
    highlight_count: usize,
    last_highlighted: Option<NaiveDateTime>,
    includes_location: bool,
    includes_timestamp: bool,
}

fn stored_book(conn: &Connection, title: &str) -> Result<Option<StoredBook>, DbError> {
    let row = conn
        .query_row(
            "SELECT highlight_count, last_highlighted, includes_location, includes_timestamp
             FROM books WHERE title = ?1",
            params![title],
            |row| {
                let last: Option<String> = row.get(1)?;
                Ok(StoredBook {
                    highlight_count: row.get::<_, i64>(0)? as usize,
                    last_highlighted: last
                        .and_then(|s| NaiveDateTime::parse_from_str(&s, DATETIME_FORMAT).ok()),
                    includes_location: row.get(2)?,
                    includes_timestamp: row.get(3)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

fn to_minute(ts: Option<NaiveDateTime>) -> Option<NaiveDateTime> {
    ts.and_then(|t| t.with_second(0)).and_then(|t| t.with_nanosecond(0))
}

fn needs_writing(stored: &StoredBook, book: &AlignedBook, options: RenderOptions) -> bool {
    let newer = match (
        to_minute(stored.last_highlighted),
        to_minute(book.book.last_highlighted()),
    ) {
        (Some(old), Some(new)) => old < new,
        (None, Some(_)) => true,
        _ => false,
    };

    newer
        || stored.highlight_count != book.book.highlights.len()
        || stored.includes_location != options.include_location
        || stored.includes_timestamp != options.include_date
}

/// Replaces a book and its highlights unless the stored copy is current.
pub fn sync_book(
    conn: &mut Connection,
    book: &AlignedBook,
    options: RenderOptions,
) -> Result<SyncOutcome, DbError> {
    if let Some(stored) = stored_book(conn, &book.book.title)? {
        if !needs_writing(&stored, book, options) {
            return Ok(SyncOutcome::UpToDate);
        }
    }

    let last_highlighted = book
        .book
        .last_highlighted()
        .map(|t| t.format(DATETIME_FORMAT).to_string());
    let synced = Local::now().naive_local().format(DATETIME_FORMAT).to_string();

    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM highlights WHERE book_title = ?1",
        params![book.book.title],
    )?;
    tx.execute(
        "INSERT OR REPLACE INTO books
         (title, author, highlight_count, last_highlighted, includes_location,
          includes_timestamp, body, last_synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            book.book.title,
            book.book.author,
            book.book.highlights.len() as i64,
            last_highlighted,
            options.include_location,
            options.include_date,
            render_book(book, options),
            synced,
        ],
    )?;

    for (ordinal, highlight) in book.book.highlights.iter().enumerate() {
        tx.execute(
            "INSERT INTO highlights
             (book_title, ordinal, text, page, location_start, location_end,
              datetime, is_note, heading)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                book.book.title,
                ordinal as i64,
                highlight.text,
                highlight.page,
                highlight.location.map(|l| l.start),
                highlight.location.map(|l| l.end),
                highlight
                    .timestamp
                    .map(|t| t.format(DATETIME_FORMAT).to_string()),
                highlight.is_note,
                book.heading_for(ordinal).map(|h| h.title.as_str()),
            ],
        )?;
    }
    tx.commit()?;

    let written = book.book.highlights.len();
    info!(
        title = %book.book.title,
        author = %book.book.author,
        highlights = written,
        "Synced book"
    );

    Ok(SyncOutcome::Written(written))
}
