pub mod channels;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod web;
