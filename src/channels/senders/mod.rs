pub mod webhook;
pub mod wecom;
