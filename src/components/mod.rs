pub mod rfid;
pub mod writer;
