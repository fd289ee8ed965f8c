pub mod branch;
pub mod branch_stock;
pub mod customer_return;
pub mod movement_key;
pub mod product;
pub mod product_unit;
pub mod purchase;
pub mod purchase_line;
pub mod stock_batch;
pub mod stock_movement;
pub mod stock_transfer;
pub mod stock_transfer_line;
pub mod supplier_return;
