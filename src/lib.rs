pub mod api;
pub mod battle;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod healing;
pub mod judge;
pub mod llm;
pub mod llms_txt;
pub mod metrics;
pub mod moderation;
pub mod progression;
pub mod session;
