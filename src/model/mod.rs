pub mod audit_log;
pub mod buyer;
pub mod employee;
pub mod invoice;
pub mod kas;
pub mod kwitansi;
pub mod pay_component;
pub mod payroll;
pub mod production_report;
pub mod role;
pub mod user;
