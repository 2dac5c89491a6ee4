pub mod action;
pub mod audit;
pub mod calendar;
pub mod client;
pub mod commands;
pub mod compose;
pub mod config;
pub mod db;
pub mod delivery;
pub mod draft;
pub mod error;
pub mod handlers;
pub mod model;
pub mod scheduler;
pub mod telegram;
pub mod validation;
