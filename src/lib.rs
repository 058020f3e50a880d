//! Multi-environment job orchestration and OCR pipeline for Quebec registry
//! document extraction.

pub mod browser;
pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod models;
pub mod ocr;
pub mod repository;
pub mod site_driver;
pub mod storage;
pub mod worker;
