pub mod align;
pub mod config;
pub mod container;
pub mod db;
pub mod epub;
pub mod mobi;
pub mod models;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod prune;
pub mod render;
pub mod toc;
