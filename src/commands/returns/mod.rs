pub mod approve_customer_return_command;
pub mod cancel_supplier_return_command;
pub mod complete_supplier_return_command;
pub mod create_customer_return_command;
pub mod create_supplier_return_command;
pub mod reject_customer_return_command;

pub use approve_customer_return_command::{
    ApproveCustomerReturnCommand, ApproveCustomerReturnResult,
};
pub use cancel_supplier_return_command::{
    CancelSupplierReturnCommand, CancelSupplierReturnResult,
};
pub use complete_supplier_return_command::{
    CompleteSupplierReturnCommand, CompleteSupplierReturnResult,
};
pub use create_customer_return_command::{
    CreateCustomerReturnCommand, CreateCustomerReturnResult,
};
pub use create_supplier_return_command::{
    CreateSupplierReturnCommand, CreateSupplierReturnResult,
};
pub use reject_customer_return_command::{
    RejectCustomerReturnCommand, RejectCustomerReturnResult,
};
