pub mod file;
pub mod log_dir;
