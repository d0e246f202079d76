//! SQLite-backed local store.
//!
//! Pure storage: keyed tables per entity type plus one metadata table. Every
//! public method is one atomic call against a single connection; nothing here
//! knows about staleness or talks to the network.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::model::{
  now_millis, CacheMetadata, Comment, Report, ReportStatus, UserProfile, Vote, VoteRecord,
  VoteSubject,
};

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA user_version = 1;

CREATE TABLE IF NOT EXISTS reports (
    id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    category TEXT NOT NULL,
    authority TEXT NOT NULL,
    location TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    status TEXT NOT NULL,
    photo_url TEXT,
    author_id TEXT NOT NULL,
    author_name TEXT NOT NULL,
    author_avatar_url TEXT,
    votes INTEGER NOT NULL,
    score INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    comment_count INTEGER NOT NULL,
    cached_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reports_created ON reports(created_at DESC);

CREATE TABLE IF NOT EXISTS comments (
    id TEXT PRIMARY KEY,
    report_id TEXT NOT NULL,
    content TEXT NOT NULL,
    author_id TEXT NOT NULL,
    author_name TEXT NOT NULL,
    author_avatar_url TEXT,
    score INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    cached_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_comments_report ON comments(report_id, created_at DESC);

CREATE TABLE IF NOT EXISTS user_profiles (
    user_id TEXT PRIMARY KEY,
    name TEXT,
    phone TEXT,
    email TEXT,
    avatar_url TEXT,
    cached_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS report_votes (
    report_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    vote INTEGER NOT NULL,
    cached_at INTEGER NOT NULL,
    PRIMARY KEY (report_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_report_votes_user ON report_votes(user_id);

CREATE TABLE IF NOT EXISTS comment_votes (
    comment_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    vote INTEGER NOT NULL,
    cached_at INTEGER NOT NULL,
    PRIMARY KEY (comment_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_comment_votes_user ON comment_votes(user_id);

CREATE TABLE IF NOT EXISTS cache_metadata (
    cache_key TEXT PRIMARY KEY,
    hash TEXT NOT NULL,
    last_updated INTEGER NOT NULL,
    item_count INTEGER NOT NULL
);
"#;

const REPORT_COLUMNS: &str = "id, description, category, authority, location, latitude, longitude, \
   status, photo_url, author_id, author_name, author_avatar_url, votes, score, created_at, \
   comment_count, cached_at";

const COMMENT_COLUMNS: &str =
  "id, report_id, content, author_id, author_name, author_avatar_url, score, created_at, cached_at";

const INSERT_REPORT: &str = "INSERT OR REPLACE INTO reports (id, description, category, authority, \
   location, latitude, longitude, status, photo_url, author_id, author_name, author_avatar_url, \
   votes, score, created_at, comment_count, cached_at)
   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)";

const INSERT_COMMENT: &str = "INSERT OR REPLACE INTO comments (id, report_id, content, author_id, \
   author_name, author_avatar_url, score, created_at, cached_at)
   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

/// SQLite-based local store.
pub struct LocalStore {
  conn: Mutex<Connection>,
}

impl LocalStore {
  /// Open the store at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open_at(&path)
  }

  /// Open (or create) the store at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("citywatch-sync").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  // ==========================================================================
  // Reports
  // ==========================================================================

  /// Atomically replace every cached report.
  pub fn replace_reports(&self, reports: &[Report]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let now = now_millis();

    tx.execute("DELETE FROM reports", [])
      .map_err(|e| eyre!("Failed to delete old reports: {}", e))?;
    for report in reports {
      insert_report(&tx, report, now)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  pub fn upsert_report(&self, report: &Report) -> Result<()> {
    let conn = self.lock()?;
    insert_report(&conn, report, now_millis())
  }

  pub fn upsert_reports(&self, reports: &[Report]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let now = now_millis();
    for report in reports {
      insert_report(&tx, report, now)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  /// Every cached report, newest first.
  pub fn reports(&self) -> Result<Vec<Report>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM reports ORDER BY created_at DESC",
        REPORT_COLUMNS
      ))
      .map_err(|e| eyre!("Failed to prepare report query: {}", e))?;

    let reports = stmt
      .query_map([], row_to_report)
      .map_err(|e| eyre!("Failed to query reports: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read report row: {}", e))?;

    Ok(reports)
  }

  pub fn report(&self, id: &str) -> Result<Option<Report>> {
    let conn = self.lock()?;
    conn
      .query_row(
        &format!("SELECT {} FROM reports WHERE id = ?", REPORT_COLUMNS),
        params![id],
        row_to_report,
      )
      .optional()
      .map_err(|e| eyre!("Failed to get report {}: {}", id, e))
  }

  pub fn delete_report(&self, id: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM reports WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete report {}: {}", id, e))?;
    Ok(())
  }

  pub fn delete_all_reports(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM reports", [])
      .map_err(|e| eyre!("Failed to delete reports: {}", e))?;
    Ok(())
  }

  pub fn report_count(&self) -> Result<i64> {
    let conn = self.lock()?;
    conn
      .query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count reports: {}", e))
  }

  pub fn update_report_score(&self, id: &str, score: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE reports SET score = ? WHERE id = ?",
        params![score, id],
      )
      .map_err(|e| eyre!("Failed to update score of report {}: {}", id, e))?;
    Ok(())
  }

  pub fn update_report_comment_count(&self, id: &str, count: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE reports SET comment_count = ? WHERE id = ?",
        params![count, id],
      )
      .map_err(|e| eyre!("Failed to update comment count of report {}: {}", id, e))?;
    Ok(())
  }

  /// Patch the user-editable fields of a report (edit and status change).
  pub fn update_report_fields(&self, report: &Report) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE reports SET description = ?1, category = ?2, authority = ?3, location = ?4,
           latitude = ?5, longitude = ?6, status = ?7
         WHERE id = ?8",
        params![
          report.description,
          report.category,
          report.authority,
          report.location,
          report.latitude,
          report.longitude,
          report.status.as_str(),
          report.id,
        ],
      )
      .map_err(|e| eyre!("Failed to update report {}: {}", report.id, e))?;
    Ok(())
  }

  // ==========================================================================
  // Comments
  // ==========================================================================

  /// Atomically replace the cached comments of one report.
  pub fn replace_comments(&self, report_id: &str, comments: &[Comment]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let now = now_millis();

    tx.execute(
      "DELETE FROM comments WHERE report_id = ?",
      params![report_id],
    )
    .map_err(|e| eyre!("Failed to delete old comments: {}", e))?;
    for comment in comments {
      insert_comment(&tx, comment, now)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  pub fn upsert_comment(&self, comment: &Comment) -> Result<()> {
    let conn = self.lock()?;
    insert_comment(&conn, comment, now_millis())
  }

  pub fn upsert_comments(&self, comments: &[Comment]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let now = now_millis();
    for comment in comments {
      insert_comment(&tx, comment, now)?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  /// Cached comments of one report, newest first.
  pub fn comments_for(&self, report_id: &str) -> Result<Vec<Comment>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {} FROM comments WHERE report_id = ? ORDER BY created_at DESC",
        COMMENT_COLUMNS
      ))
      .map_err(|e| eyre!("Failed to prepare comment query: {}", e))?;

    let comments = stmt
      .query_map(params![report_id], row_to_comment)
      .map_err(|e| eyre!("Failed to query comments: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read comment row: {}", e))?;

    Ok(comments)
  }

  pub fn comment(&self, id: &str) -> Result<Option<Comment>> {
    let conn = self.lock()?;
    conn
      .query_row(
        &format!("SELECT {} FROM comments WHERE id = ?", COMMENT_COLUMNS),
        params![id],
        row_to_comment,
      )
      .optional()
      .map_err(|e| eyre!("Failed to get comment {}: {}", id, e))
  }

  pub fn delete_comment(&self, id: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM comments WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete comment {}: {}", id, e))?;
    Ok(())
  }

  pub fn delete_all_comments(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM comments", [])
      .map_err(|e| eyre!("Failed to delete comments: {}", e))?;
    Ok(())
  }

  pub fn comment_count(&self, report_id: &str) -> Result<i64> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT COUNT(*) FROM comments WHERE report_id = ?",
        params![report_id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count comments: {}", e))
  }

  pub fn update_comment_score(&self, id: &str, score: i64) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE comments SET score = ? WHERE id = ?",
        params![score, id],
      )
      .map_err(|e| eyre!("Failed to update score of comment {}: {}", id, e))?;
    Ok(())
  }

  pub fn update_comment_content(&self, id: &str, content: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE comments SET content = ? WHERE id = ?",
        params![content, id],
      )
      .map_err(|e| eyre!("Failed to update content of comment {}: {}", id, e))?;
    Ok(())
  }

  // ==========================================================================
  // User profiles
  // ==========================================================================

  pub fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO user_profiles (user_id, name, phone, email, avatar_url, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
          profile.user_id,
          profile.name,
          profile.phone,
          profile.email,
          profile.avatar_url,
          now_millis(),
        ],
      )
      .map_err(|e| eyre!("Failed to store profile {}: {}", profile.user_id, e))?;
    Ok(())
  }

  pub fn profile(&self, user_id: &str) -> Result<Option<UserProfile>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT user_id, name, phone, email, avatar_url, cached_at
         FROM user_profiles WHERE user_id = ?",
        params![user_id],
        |row| {
          Ok(UserProfile {
            user_id: row.get(0)?,
            name: row.get(1)?,
            phone: row.get(2)?,
            email: row.get(3)?,
            avatar_url: row.get(4)?,
            cached_at: row.get(5)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to get profile {}: {}", user_id, e))
  }

  pub fn delete_profile(&self, user_id: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM user_profiles WHERE user_id = ?",
        params![user_id],
      )
      .map_err(|e| eyre!("Failed to delete profile {}: {}", user_id, e))?;
    Ok(())
  }

  pub fn update_profile_name(&self, user_id: &str, name: &str) -> Result<()> {
    self.update_profile_column(user_id, "name", name)
  }

  pub fn update_profile_phone(&self, user_id: &str, phone: &str) -> Result<()> {
    self.update_profile_column(user_id, "phone", phone)
  }

  pub fn update_profile_avatar(&self, user_id: &str, url: &str) -> Result<()> {
    self.update_profile_column(user_id, "avatar_url", url)
  }

  fn update_profile_column(&self, user_id: &str, column: &str, value: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        &format!(
          "UPDATE user_profiles SET {} = ?1, cached_at = ?2 WHERE user_id = ?3",
          column
        ),
        params![value, now_millis(), user_id],
      )
      .map_err(|e| eyre!("Failed to update {} of profile {}: {}", column, user_id, e))?;
    Ok(())
  }

  // ==========================================================================
  // Votes
  // ==========================================================================

  pub fn upsert_vote(&self, subject: VoteSubject, record: &VoteRecord) -> Result<()> {
    self.upsert_votes(subject, std::slice::from_ref(record))
  }

  pub fn upsert_votes(&self, subject: VoteSubject, records: &[VoteRecord]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let sql = format!(
      "INSERT OR REPLACE INTO {} ({}, user_id, vote, cached_at) VALUES (?1, ?2, ?3, ?4)",
      subject.table(),
      subject.subject_column()
    );
    for record in records {
      tx.execute(
        &sql,
        params![
          record.subject_id,
          record.voter_id,
          record.vote.value(),
          record.cached_at
        ],
      )
      .map_err(|e| eyre!("Failed to store vote on {}: {}", record.subject_id, e))?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  pub fn vote(
    &self,
    subject: VoteSubject,
    subject_id: &str,
    voter_id: &str,
  ) -> Result<Option<Vote>> {
    let conn = self.lock()?;
    let raw: Option<i64> = conn
      .query_row(
        &format!(
          "SELECT vote FROM {} WHERE {} = ? AND user_id = ?",
          subject.table(),
          subject.subject_column()
        ),
        params![subject_id, voter_id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to get vote on {}: {}", subject_id, e))?;

    raw
      .map(Vote::try_from)
      .transpose()
      .map_err(|e| eyre!("Corrupt vote row for {}: {}", subject_id, e))
  }

  /// Every vote one user has cast in the given table.
  pub fn votes_for_user(&self, subject: VoteSubject, voter_id: &str) -> Result<Vec<VoteRecord>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {}, user_id, vote, cached_at FROM {} WHERE user_id = ?",
        subject.subject_column(),
        subject.table()
      ))
      .map_err(|e| eyre!("Failed to prepare vote query: {}", e))?;

    let rows = stmt
      .query_map(params![voter_id], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, i64>(2)?,
          row.get::<_, i64>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query votes: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read vote row: {}", e))?;

    // Rows outside {-1, 0, 1} are dropped rather than failing the whole read
    Ok(
      rows
        .into_iter()
        .filter_map(|(subject_id, voter_id, raw, cached_at)| {
          Vote::try_from(raw).ok().map(|vote| VoteRecord {
            subject_id,
            voter_id,
            vote,
            cached_at,
          })
        })
        .collect(),
    )
  }

  pub fn delete_votes_for_user(&self, subject: VoteSubject, voter_id: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        &format!("DELETE FROM {} WHERE user_id = ?", subject.table()),
        params![voter_id],
      )
      .map_err(|e| eyre!("Failed to delete votes: {}", e))?;
    Ok(())
  }

  // ==========================================================================
  // Metadata
  // ==========================================================================

  /// Write the metadata row for a key, replacing any previous row.
  pub fn put_metadata(
    &self,
    key: &str,
    hash: &str,
    last_updated: i64,
    item_count: i64,
  ) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_metadata (cache_key, hash, last_updated, item_count)
         VALUES (?1, ?2, ?3, ?4)",
        params![key, hash, last_updated, item_count],
      )
      .map_err(|e| eyre!("Failed to update metadata for {}: {}", key, e))?;
    Ok(())
  }

  pub fn metadata(&self, key: &str) -> Result<Option<CacheMetadata>> {
    let conn = self.lock()?;
    conn
      .query_row(
        "SELECT cache_key, hash, last_updated, item_count FROM cache_metadata WHERE cache_key = ?",
        params![key],
        row_to_metadata,
      )
      .optional()
      .map_err(|e| eyre!("Failed to get metadata for {}: {}", key, e))
  }

  pub fn hash(&self, key: &str) -> Result<Option<String>> {
    Ok(self.metadata(key)?.map(|m| m.hash))
  }

  pub fn last_updated(&self, key: &str) -> Result<Option<i64>> {
    Ok(self.metadata(key)?.map(|m| m.last_updated))
  }

  pub fn delete_metadata(&self, key: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM cache_metadata WHERE cache_key = ?",
        params![key],
      )
      .map_err(|e| eyre!("Failed to delete metadata for {}: {}", key, e))?;
    Ok(())
  }

  pub fn all_metadata(&self) -> Result<Vec<CacheMetadata>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT cache_key, hash, last_updated, item_count FROM cache_metadata ORDER BY cache_key",
      )
      .map_err(|e| eyre!("Failed to prepare metadata query: {}", e))?;

    let rows = stmt
      .query_map([], row_to_metadata)
      .map_err(|e| eyre!("Failed to query metadata: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read metadata row: {}", e))?;
    Ok(rows)
  }

  /// Wipe every table (logout).
  pub fn clear_all(&self) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    for table in [
      "reports",
      "comments",
      "user_profiles",
      "report_votes",
      "comment_votes",
      "cache_metadata",
    ] {
      tx.execute(&format!("DELETE FROM {}", table), [])
        .map_err(|e| eyre!("Failed to clear {}: {}", table, e))?;
    }
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }
}

fn insert_report(conn: &Connection, report: &Report, now: i64) -> Result<()> {
  conn
    .execute(
      INSERT_REPORT,
      params![
        report.id,
        report.description,
        report.category,
        report.authority,
        report.location,
        report.latitude,
        report.longitude,
        report.status.as_str(),
        report.photo_url,
        report.author_id,
        report.author_name,
        report.author_avatar_url,
        report.votes,
        report.score,
        report.created_at,
        report.comment_count,
        now,
      ],
    )
    .map_err(|e| eyre!("Failed to store report {}: {}", report.id, e))?;
  Ok(())
}

fn insert_comment(conn: &Connection, comment: &Comment, now: i64) -> Result<()> {
  conn
    .execute(
      INSERT_COMMENT,
      params![
        comment.id,
        comment.report_id,
        comment.content,
        comment.author_id,
        comment.author_name,
        comment.author_avatar_url,
        comment.score,
        comment.created_at,
        now,
      ],
    )
    .map_err(|e| eyre!("Failed to store comment {}: {}", comment.id, e))?;
  Ok(())
}

fn row_to_report(row: &Row) -> rusqlite::Result<Report> {
  let status: String = row.get(7)?;
  Ok(Report {
    id: row.get(0)?,
    description: row.get(1)?,
    category: row.get(2)?,
    authority: row.get(3)?,
    location: row.get(4)?,
    latitude: row.get(5)?,
    longitude: row.get(6)?,
    status: ReportStatus::parse_lossy(&status),
    photo_url: row.get(8)?,
    author_id: row.get(9)?,
    author_name: row.get(10)?,
    author_avatar_url: row.get(11)?,
    votes: row.get(12)?,
    score: row.get(13)?,
    created_at: row.get(14)?,
    comment_count: row.get(15)?,
    viewer_vote: Vote::NONE,
    cached_at: row.get(16)?,
  })
}

fn row_to_comment(row: &Row) -> rusqlite::Result<Comment> {
  Ok(Comment {
    id: row.get(0)?,
    report_id: row.get(1)?,
    content: row.get(2)?,
    author_id: row.get(3)?,
    author_name: row.get(4)?,
    author_avatar_url: row.get(5)?,
    score: row.get(6)?,
    created_at: row.get(7)?,
    viewer_vote: Vote::NONE,
    cached_at: row.get(8)?,
  })
}

fn row_to_metadata(row: &Row) -> rusqlite::Result<CacheMetadata> {
  Ok(CacheMetadata {
    cache_key: row.get(0)?,
    hash: row.get(1)?,
    last_updated: row.get(2)?,
    item_count: row.get(3)?,
  })
}
