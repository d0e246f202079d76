//! Result stream of one read.
//!
//! A read delivers, in order: at most one `CacheHit`, `Loading(true)`, zero to
//! two `Fresh` (the second only when the viewer's votes changed on refresh),
//! an optional `Failed`, and exactly one `Loading(false)`. The stream closes
//! once the read is done.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::cache::CacheSource;
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq)]
pub enum ReadEvent<T> {
  /// Cached rows, delivered before any network work
  CacheHit(Vec<T>),
  /// Data confirmed current, with where it came from
  Fresh { items: Vec<T>, source: CacheSource },
  Loading(bool),
  /// The read could not produce data; only sent when no cached rows were shown
  Failed(SyncError),
}

/// Receiving end of a read. Dropping it does not cancel the read.
pub struct ReadStream<T> {
  rx: mpsc::UnboundedReceiver<ReadEvent<T>>,
}

impl<T> ReadStream<T> {
  pub async fn next(&mut self) -> Option<ReadEvent<T>> {
    self.rx.recv().await
  }

  /// Wait for the read to finish and return every event it produced.
  pub async fn events(mut self) -> Vec<ReadEvent<T>> {
    let mut events = Vec::new();
    while let Some(event) = self.rx.recv().await {
      events.push(event);
    }
    events
  }

  /// Wait for the read to finish and return the last data it delivered.
  pub async fn last_data(self) -> Result<Vec<T>, SyncError> {
    let mut data = None;
    let mut failure = None;
    for event in self.events().await {
      match event {
        ReadEvent::CacheHit(items) | ReadEvent::Fresh { items, .. } => data = Some(items),
        ReadEvent::Failed(e) => failure = Some(e),
        ReadEvent::Loading(_) => {}
      }
    }
    match (data, failure) {
      (Some(items), _) => Ok(items),
      (None, Some(e)) => Err(e),
      (None, None) => Ok(Vec::new()),
    }
  }

  /// Keep only the items matching `keep` in every data event.
  pub(crate) fn filter<F>(mut self, keep: F) -> ReadStream<T>
  where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
      while let Some(event) = self.rx.recv().await {
        let event = match event {
          ReadEvent::CacheHit(items) => {
            let items: Vec<T> = items.into_iter().filter(|i| keep(i)).collect();
            if items.is_empty() {
              continue;
            }
            ReadEvent::CacheHit(items)
          }
          ReadEvent::Fresh { items, source } => ReadEvent::Fresh {
            items: items.into_iter().filter(|i| keep(i)).collect(),
            source,
          },
          other => other,
        };
        if tx.send(event).is_err() {
          break;
        }
      }
    });
    ReadStream { rx }
  }
}

impl<T> Stream for ReadStream<T> {
  type Item = ReadEvent<T>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.rx.poll_recv(cx)
  }
}

/// Sending end of a read. Tracks what has been delivered so the ordering
/// rules hold no matter which path the read takes.
pub(crate) struct Emitter<T> {
  tx: mpsc::UnboundedSender<ReadEvent<T>>,
  cache_hit: bool,
  loading: bool,
  finished: bool,
}

pub(crate) fn channel<T>() -> (Emitter<T>, ReadStream<T>) {
  let (tx, rx) = mpsc::unbounded_channel();
  (
    Emitter {
      tx,
      cache_hit: false,
      loading: false,
      finished: false,
    },
    ReadStream { rx },
  )
}

impl<T> Emitter<T> {
  fn send(&self, event: ReadEvent<T>) {
    // A dropped receiver means the caller went away; the read still completes.
    let _ = self.tx.send(event);
  }

  pub fn cache_hit(&mut self, items: Vec<T>) {
    self.cache_hit = true;
    self.send(ReadEvent::CacheHit(items));
  }

  pub fn had_cache_hit(&self) -> bool {
    self.cache_hit
  }

  pub fn loading(&mut self) {
    if !self.loading {
      self.loading = true;
      self.send(ReadEvent::Loading(true));
    }
  }

  pub fn fresh(&self, items: Vec<T>, source: CacheSource) {
    self.send(ReadEvent::Fresh { items, source });
  }

  pub fn fail(&self, error: SyncError) {
    self.send(ReadEvent::Failed(error));
  }

  /// Send `Loading(false)`. Later calls do nothing.
  pub fn finish(&mut self) {
    if !self.finished {
      self.finished = true;
      self.send(ReadEvent::Loading(false));
    }
  }
}
