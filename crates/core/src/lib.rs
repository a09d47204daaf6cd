pub mod address;
pub mod blob;
pub mod storage;
