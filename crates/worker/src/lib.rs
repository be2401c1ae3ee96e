//! Serverless job worker for Wan2.2 video generation on ComfyUI.
//!
//! A job is handled in a straight line: resolve the input images, pick and
//! load a workflow template, inject the job parameters, run the workflow
//! through [`vidgen_comfyui::session::ComfyUISession`] and return the first
//! produced video as base64.

pub mod config;
pub mod handler;
pub mod input;
