pub mod gzip;
pub mod object;
