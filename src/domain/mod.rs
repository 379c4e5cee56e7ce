pub mod calendar;
pub mod invoice;
pub mod payroll;
pub mod terbilang;
pub mod workflow;
