pub mod check_env;
pub mod provision;
pub mod run;
pub mod version;
