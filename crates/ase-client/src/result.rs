//! Command results.
//!
//! A single request can produce several result sets, informational
//! messages, output parameters and a procedure return status. The dialog
//! accumulates all of them into a [`CommandResult`] before handing control
//! back, so completion accounting survives even when the caller only looks
//! at the first result set.

use std::sync::Arc;

use ase_types::AseValue;
use tds5_protocol::token::Eed;

use crate::row::{Column, Row};

/// A server message delivered alongside results (EED token).
#[derive(Debug, Clone)]
pub struct ServerMessage {
    /// Message number.
    pub number: i32,
    /// Severity class.
    pub class: u8,
    /// Message state.
    pub state: u8,
    /// SQLSTATE, empty when the server provided none.
    pub sql_state: String,
    /// Message text.
    pub message: String,
    /// Server name.
    pub server: String,
    /// Procedure name, empty outside procedures.
    pub procedure: String,
    /// Line number within the batch or procedure.
    pub line: u32,
}

impl ServerMessage {
    /// Build a message from an EED token.
    #[must_use]
    pub fn from_eed(eed: &Eed) -> Self {
        Self {
            number: eed.number,
            class: eed.class,
            state: eed.state,
            sql_state: String::from_utf8_lossy(&eed.sql_state).into_owned(),
            message: eed.message.clone(),
            server: eed.server.clone(),
            procedure: eed.procedure.clone(),
            line: u32::from(eed.line),
        }
    }

    /// Check if this message is informational (severity 10 or below).
    #[must_use]
    pub fn is_informational(&self) -> bool {
        self.class <= 10
    }
}

/// One result set: column metadata plus its rows.
#[derive(Debug, Clone)]
pub struct ResultSet {
    /// Column metadata shared with every row.
    pub columns: Arc<Vec<Column>>,
    /// Decoded rows in server order.
    pub rows: Vec<Row>,
}

impl ResultSet {
    /// Create an empty result set for the given columns.
    #[must_use]
    pub fn new(columns: Arc<Vec<Column>>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }
}

/// The accumulated outcome of one request.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    /// Result sets in server order.
    pub result_sets: Vec<ResultSet>,
    /// Total affected-row count across completions that carried one.
    pub rows_affected: u64,
    /// Stored procedure return status, if one was sent.
    pub return_status: Option<i32>,
    /// Output parameter values, if the request produced any.
    pub output_params: Vec<AseValue>,
    /// Informational messages received during the request.
    pub messages: Vec<ServerMessage>,
}

impl CommandResult {
    /// Create an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of the first result set, or an empty slice.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        self.result_sets.first().map_or(&[], |rs| &rs.rows)
    }

    /// Columns of the first result set, or an empty slice.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        self.result_sets.first().map_or(&[], |rs| &rs.columns)
    }

    /// Total number of rows across all result sets.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.result_sets.iter().map(|rs| rs.rows.len()).sum()
    }
}
