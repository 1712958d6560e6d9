pub mod db;
pub mod donation;
pub mod participant;
pub mod payment;
pub mod registration;
pub mod settings;
pub mod storage;
pub mod tag;
pub mod track;
pub mod voucher;
