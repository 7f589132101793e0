#![allow(dead_code)]

pub mod helpers;
pub mod smtp_client;
