use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Local;

use crate::error::{AppError, Result};
use crate::llm::media::extension_for_mime;
use crate::pipeline::component::ImageBlob;

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|ch| {
            if ch.is_whitespace() || ch == '/' || ch == '\\' {
                '_'
            } else {
                ch
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

/// Writes run artifacts under `output/<YYYY-MM-DD>/<HHMMSS>/` with the
/// canonical `<outfit>_<style>_<subject>_<stamp>.<ext>` naming. Name
/// assignment is tracked under a mutex so concurrent workers never collide.
pub struct OutputWriter {
    run_dir: PathBuf,
    assigned: Mutex<HashSet<PathBuf>>,
}

impl OutputWriter {
    pub fn create(root: &Path) -> Result<Self> {
        let now = Local::now();
        let run_dir = root
            .join("output")
            .join(now.format("%Y-%m-%d").to_string())
            .join(now.format("%H%M%S").to_string());
        Self::with_dir(run_dir)
    }

    pub fn with_dir(run_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&run_dir).map_err(|err| AppError::file(&run_dir, err))?;
        Ok(OutputWriter {
            run_dir,
            assigned: Mutex::new(HashSet::new()),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn reserve_path(&self, base_name: &str, extension: &str) -> PathBuf {
        let mut assigned = self.assigned.lock().expect("output writer lock poisoned");
        let mut candidate = self.run_dir.join(format!("{base_name}.{extension}"));
        let mut discriminator = 2usize;
        while assigned.contains(&candidate) || candidate.exists() {
            candidate = self
                .run_dir
                .join(format!("{base_name}_{discriminator}.{extension}"));
            discriminator += 1;
        }
        assigned.insert(candidate.clone());
        candidate
    }

    pub fn write_artifact(
        &self,
        outfit: &str,
        style: &str,
        subject: &str,
        blob: &ImageBlob,
    ) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let base_name = format!(
            "{}_{}_{}_{stamp}",
            sanitize_label(outfit),
            sanitize_label(style),
            sanitize_label(subject)
        );
        let path = self.reserve_path(&base_name, extension_for_mime(&blob.mime));
        fs::write(&path, &blob.bytes).map_err(|err| AppError::file(&path, err))?;
        Ok(path)
    }
}
