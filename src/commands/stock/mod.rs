pub mod adjust_stock_command;
pub mod receive_purchase_command;
pub mod record_sale_command;

// Re-export commands for easier access
pub use adjust_stock_command::{AdjustStockCommand, AdjustStockResult, AdjustmentDirection};
pub use receive_purchase_command::{PurchaseLineInput, ReceivePurchaseCommand, ReceivePurchaseResult};
pub use record_sale_command::{RecordSaleCommand, RecordSaleResult, SaleLineInput};
