pub mod cancel_transfer_command;
pub mod receive_transfer_command;
pub mod request_transfer_command;
pub mod ship_transfer_command;

// Re-export commands for easier access
pub use cancel_transfer_command::{CancelTransferCommand, CancelTransferResult};
pub use receive_transfer_command::{ReceiveTransferCommand, ReceiveTransferResult};
pub use request_transfer_command::{RequestTransferCommand, RequestTransferResult, TransferLineInput};
pub use ship_transfer_command::{ShipTransferCommand, ShipTransferResult};
