// Ledger primitives shared by the movement commands
pub mod batches;
pub mod stock;
pub mod units;

// Catalog collaboration (products, units, branches, price writeback)
pub mod catalog;

// Read-side services
pub mod reconciliation;
pub mod valuation;
