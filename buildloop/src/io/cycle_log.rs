//! Per-cycle logs under `<project>/.buildloop/cycles/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{HealthStatus, Phase};

#[derive(Debug, Clone, Serialize)]
pub struct CycleMeta {
    pub cycle: u32,
    /// `None` for the initial build.
    pub phase: Option<Phase>,
    pub health: Option<HealthStatus>,
    pub health_details: Option<String>,
    pub consecutive_fails: u32,
    pub response_len: usize,
    pub timed_out: bool,
    pub failed: bool,
    pub confidence: Option<u8>,
    pub checkpointed: bool,
    pub vision_feedback: bool,
    pub started_at: String,
    pub duration_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CyclePaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub response_path: PathBuf,
    pub vision_path: PathBuf,
}

impl CyclePaths {
    /// `label` distinguishes the main pass from the vision fix pass.
    pub fn new(cycles_dir: &Path, cycle: u32, label: &str) -> Self {
        let dir = cycles_dir.join(format!("{cycle:04}-{label}"));
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            response_path: dir.join("response.md"),
            vision_path: dir.join("vision.md"),
            dir,
        }
    }
}

pub struct CycleWriteRequest<'a> {
    pub cycles_dir: &'a Path,
    pub label: &'a str,
    pub meta: &'a CycleMeta,
    pub prompt: &'a str,
    pub response: &'a str,
    pub vision_feedback: Option<&'a str>,
}

pub fn write_cycle(request: &CycleWriteRequest<'_>) -> Result<CyclePaths> {
    let paths = CyclePaths::new(request.cycles_dir, request.meta.cycle, request.label);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create cycle dir {}", paths.dir.display()))?;

    write_json(&paths.meta_path, request.meta)?;
    write_text(&paths.prompt_path, request.prompt)?;
    write_text(&paths.response_path, request.response)?;
    if let Some(feedback) = request.vision_feedback {
        write_text(&paths.vision_path, feedback)?;
    }

    Ok(paths)
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
