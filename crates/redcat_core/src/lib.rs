pub mod cleaner;
pub mod config;
pub mod logging;
pub mod matcher;
pub mod mediawiki;
