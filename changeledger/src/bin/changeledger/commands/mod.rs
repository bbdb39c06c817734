pub mod entries;
pub mod init;
pub mod lock;
pub mod record;
