//! In-memory source and sink, used by the replay command and tests

use std::collections::VecDeque;

use rowguard_common::error::{PipelineError, Result};
use rowguard_common::types::{CommandKind, Row, RowShape, Value};

use super::{TupleSink, TupleSource};

/// Keep-list of 1-based ordinals that survive projection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunkFilter {
    keep: Vec<usize>,
}

impl JunkFilter {
    pub fn new(keep: Vec<usize>) -> Self {
        Self { keep }
    }

    /// Drop every column not in the keep-list. Ordinals past the row's
    /// width are ignored.
    pub fn apply(&self, row: Row) -> Row {
        let mut slots: Vec<Option<Value>> = row.values.into_iter().map(Some).collect();
        let values = self
            .keep
            .iter()
            .filter_map(|&ordinal| {
                ordinal
                    .checked_sub(1)
                    .and_then(|idx| slots.get_mut(idx))
                    .and_then(Option::take)
            })
            .collect();
        Row::new(row.table_id, values)
    }
}

/// Source backed by a queue of rows
#[derive(Debug, Default)]
pub struct VecSource {
    rows: VecDeque<Row>,
    junk: Option<JunkFilter>,
    shutdown_calls: usize,
    parallel_entered: bool,
    parallel_active: bool,
}

impl VecSource {
    pub fn new(rows: impl IntoIterator<Item = Row>) -> Self {
        Self {
            rows: rows.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_junk_filter(mut self, filter: JunkFilter) -> Self {
        self.junk = Some(filter);
        self
    }

    /// Rows not yet pulled
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls
    }

    /// Whether parallel mode was entered at any point
    pub fn parallel_entered(&self) -> bool {
        self.parallel_entered
    }

    pub fn in_parallel_mode(&self) -> bool {
        self.parallel_active
    }
}

impl TupleSource for VecSource {
    fn next(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    fn project(&self, row: Row) -> Row {
        match &self.junk {
            Some(filter) => filter.apply(row),
            None => row,
        }
    }

    fn shutdown(&mut self) {
        self.rows.clear();
        self.shutdown_calls += 1;
    }

    fn enter_parallel_mode(&mut self) {
        self.parallel_entered = true;
        self.parallel_active = true;
    }

    fn exit_parallel_mode(&mut self) {
        self.parallel_active = false;
    }
}

/// Sink that buffers every accepted row
#[derive(Debug, Default)]
pub struct CollectingSink {
    rows: Vec<Row>,
    accept_limit: Option<usize>,
    started: Option<(CommandKind, RowShape)>,
    shutdown_calls: usize,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that refuses rows after `limit` have been accepted
    pub fn accepting(limit: usize) -> Self {
        Self {
            accept_limit: Some(limit),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Command and shape passed to `startup`, if it ran
    pub fn started(&self) -> Option<&(CommandKind, RowShape)> {
        self.started.as_ref()
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls
    }
}

impl TupleSink for CollectingSink {
    fn startup(&mut self, command: CommandKind, shape: &RowShape) -> Result<()> {
        if self.started.is_some() {
            return Err(PipelineError::SinkStartup("sink already started".to_string()).into());
        }
        self.started = Some((command, shape.clone()));
        Ok(())
    }

    fn receive(&mut self, row: Row) -> bool {
        if self.accept_limit.is_some_and(|limit| self.rows.len() >= limit) {
            return false;
        }
        self.rows.push(row);
        true
    }

    fn shutdown(&mut self) {
        self.shutdown_calls += 1;
    }
}
