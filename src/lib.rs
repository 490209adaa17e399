//! storyforge library crate.
//!
//! Story text in, narrated video out: the planner splits the story into
//! scenes, hosted or local backends produce a still and a narration per
//! scene, and the composer encodes everything with ffmpeg. The binary is a
//! thin clap front end over [`pipeline::Pipeline`].

pub mod animate;
pub mod assets;
pub mod characters;
pub mod cli;
pub mod compose;
pub mod config;
pub mod fal;
pub mod images;
pub mod llm;
pub mod media;
pub mod models;
pub mod narration;
pub mod openai;
pub mod pipeline;
pub mod planner;
pub mod retry;
