pub mod calibration;
pub mod constants;
pub mod file_name;
pub mod label;
pub mod lsq;
pub mod planetcal_errors;
pub mod spice;
pub mod time;
