//! StockLedger
//!
//! Multi-branch inventory ledger for retail point of sale: unit
//! conversions, FIFO batch consumption with expiry, branch stock,
//! transfers and returns, all behind one movement processor.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod commands;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod processor;
pub mod services;

use std::sync::Arc;

use crate::{
    db::DbPool,
    events::EventSender,
    processor::{MovementProcessor, RetryConfig},
    services::{
        catalog::CatalogService, reconciliation::ReconciliationService,
        valuation::ValuationService,
    },
};

/// Everything a caller needs to run the ledger: the movement processor
/// for stock changes and the read-mostly services around it.
pub struct StockLedger {
    pub db: Arc<DbPool>,
    pub event_sender: Arc<EventSender>,
    pub processor: MovementProcessor,
    pub catalog: CatalogService,
    pub valuation: ValuationService,
    pub reconciliation: ReconciliationService,
}

impl StockLedger {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>) -> Self {
        Self {
            processor: MovementProcessor::new(db.clone(), event_sender.clone()),
            catalog: CatalogService::new(db.clone(), event_sender.clone()),
            valuation: ValuationService::new(db.clone()),
            reconciliation: ReconciliationService::new(db.clone()),
            db,
            event_sender,
        }
    }

    /// Builds the ledger with settings taken from the app config.
    pub fn with_config(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &config::AppConfig,
    ) -> Self {
        let retry = RetryConfig::from_app_config(config);
        Self {
            processor: MovementProcessor::with_retry(db.clone(), event_sender.clone(), retry),
            catalog: CatalogService::new(db.clone(), event_sender.clone()),
            valuation: ValuationService::new(db.clone()),
            reconciliation: ReconciliationService::new(db.clone()),
            db,
            event_sender,
        }
    }
}

pub mod prelude {
    pub use crate::commands::returns::*;
    pub use crate::commands::stock::*;
    pub use crate::commands::transfers::*;
    pub use crate::commands::Command;
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::processor::{MovementOutcome, MovementProcessor, StockMovementCommand};
    pub use crate::StockLedger;
}
