//! Time synchronization of heterogeneous daily sources.
//!
//! Presents a k-way, date-ordered merge of [`DailySource`]s as unified
//! daily snapshots: one [`Snapshot`] per calendar day present in *any*
//! source, advancing only the sources whose pending date equals the
//! global minimum.

use chrono::NaiveDate;

use super::source::{DailySource, DataError, DateWindow};
use super::types::{DayRecords, Snapshot};

struct SourceCursor {
    name: String,
    source: Box<dyn DailySource>,
    /// One buffered item, or None once exhausted.
    pending: Option<(NaiveDate, DayRecords)>,
}

impl SourceCursor {
    fn advance(&mut self) -> Result<(), DataError> {
        self.pending = self.source.next_day()?;
        Ok(())
    }
}

/// Merges named daily sources by date.
///
/// Single-pass and strictly sequential; the only state beyond the
/// owned source cursors is the one-shot window gate. Days before
/// `start_date` are consumed and discarded; a day past `end_date`
/// terminates the merge without further reads.
pub struct Synchronizer {
    cursors: Vec<SourceCursor>,
    window: DateWindow,
    /// Latched once the first in-window day is reached, so lagging
    /// sources are only fast-forwarded during the initial seek.
    window_opened: bool,
    primed: bool,
    done: bool,
}

impl Synchronizer {
    pub fn new(sources: Vec<(String, Box<dyn DailySource>)>, window: DateWindow) -> Self {
        let cursors = sources
            .into_iter()
            .map(|(name, source)| SourceCursor {
                name,
                source,
                pending: None,
            })
            .collect();
        Self {
            cursors,
            window,
            window_opened: false,
            primed: false,
            done: false,
        }
    }

    /// Next unified snapshot, or `Ok(None)` on normal termination
    /// (all sources exhausted, or the window end reached).
    pub fn next_snapshot(&mut self) -> Result<Option<Snapshot>, DataError> {
        if self.done {
            return Ok(None);
        }
        if !self.primed {
            for cursor in &mut self.cursors {
                cursor.advance()?;
            }
            self.primed = true;
        }

        loop {
            let current_date = match self
                .cursors
                .iter()
                .filter_map(|c| c.pending.as_ref().map(|(d, _)| *d))
                .min()
            {
                Some(date) => date,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            };

            // Initial seek: pull each lagging source forward one step
            // at a time until the window start is reached.
            if !self.window_opened && self.window.before_start(current_date) {
                for cursor in &mut self.cursors {
                    if cursor
                        .pending
                        .as_ref()
                        .is_some_and(|(d, _)| self.window.before_start(*d))
                    {
                        cursor.advance()?;
                    }
                }
                continue;
            }
            self.window_opened = true;

            if self.window.after_end(current_date) {
                self.done = true;
                return Ok(None);
            }

            let mut snapshot = Snapshot::new(current_date);
            for cursor in &mut self.cursors {
                let matches = cursor
                    .pending
                    .as_ref()
                    .is_some_and(|(d, _)| *d == current_date);
                if matches {
                    if let Some((_, records)) = cursor.pending.take() {
                        snapshot.data.insert(cursor.name.clone(), records);
                    }
                    cursor.advance()?;
                }
            }
            return Ok(Some(snapshot));
        }
    }
}
