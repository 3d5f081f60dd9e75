pub mod form;
pub mod fuel;
pub mod refrigerant;
